use crate::config::FanOutMode;
use crate::core::{FindQuery, FinderError, RequestContext, Result, SeriesResult};
use crate::remote::{NodeStream, RemoteQueryFactory};
use futures::future::try_join_all;
use futures::{StreamExt, stream};
use log::debug;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Runs one operation against every server of a resolved list.
///
/// Results are concatenated in list order. The first failing server aborts
/// the whole operation and its error is returned unchanged; there is no
/// partial result.
#[derive(Clone)]
pub struct FanOutExecutor {
    remotes: Arc<dyn RemoteQueryFactory>,
    mode: FanOutMode,
}

struct FindState {
    remotes: Arc<dyn RemoteQueryFactory>,
    query: FindQuery,
    servers: std::vec::IntoIter<String>,
    current: Option<NodeStream>,
    finished: bool,
}

impl FanOutExecutor {
    pub fn new(remotes: Arc<dyn RemoteQueryFactory>, mode: FanOutMode) -> Self {
        Self { remotes, mode }
    }

    /// Streams nodes from each server in turn.
    ///
    /// A server is contacted only after the previous server's nodes are
    /// exhausted. After the first error the stream ends.
    pub fn find_nodes(&self, servers: Vec<String>, query: FindQuery) -> NodeStream {
        let state = FindState {
            remotes: Arc::clone(&self.remotes),
            query,
            servers: servers.into_iter(),
            current: None,
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if state.finished {
                    return None;
                }
                if let Some(current) = state.current.as_mut() {
                    match current.next().await {
                        Some(Ok(node)) => return Some((Ok(node), state)),
                        Some(Err(err)) => {
                            event!(Level::ERROR, error = %err, "fan-out find aborted");
                            state.finished = true;
                            return Some((Err(err), state));
                        }
                        None => state.current = None,
                    }
                    continue;
                }

                let server = state.servers.next()?;
                match state.remotes.remote_for(&server) {
                    Ok(remote) => {
                        debug!("fan-out find_nodes: using server: {}", remote.server());
                        state.current = Some(remote.find_nodes(&state.query));
                    }
                    Err(err) => {
                        state.finished = true;
                        return Some((Err(err), state));
                    }
                }
            }
        })
        .boxed()
    }

    /// Fetches series from every server and concatenates them.
    pub async fn fetch(
        &self,
        servers: &[String],
        patterns: &[String],
        start_time: i64,
        end_time: i64,
        now: Option<i64>,
        context: &RequestContext,
    ) -> Result<Vec<SeriesResult>> {
        let span = info_span!(
            "fanout.fetch",
            servers = servers.len(),
            patterns = patterns.len(),
            mode = ?self.mode
        );
        async move {
            let per_server = match self.mode {
                FanOutMode::Sequential => {
                    let mut results = Vec::with_capacity(servers.len());
                    for server in servers {
                        let remote = self.remotes.remote_for(server)?;
                        debug!("fan-out fetch: using server: {}", remote.server());
                        results.push(
                            remote
                                .fetch_multi(patterns, start_time, end_time, now, context)
                                .await?,
                        );
                    }
                    results
                }
                FanOutMode::Concurrent => {
                    let requests = servers
                        .iter()
                        .map(|server| self.remotes.remote_for(server))
                        .collect::<Result<Vec<_>>>()?;
                    for remote in &requests {
                        debug!("fan-out fetch: using server: {}", remote.server());
                    }
                    try_join_all(requests.iter().map(|remote| {
                        remote.fetch_multi(patterns, start_time, end_time, now, context)
                    }))
                    .await?
                }
            };
            let merged: Vec<SeriesResult> = per_server.into_iter().flatten().collect();
            event!(Level::DEBUG, series = merged.len(), "fan-out fetch complete");
            Ok::<_, FinderError>(merged)
        }
        .instrument(span)
        .await
    }

    /// Collects the metric index of every server and concatenates them.
    pub async fn get_index(
        &self,
        servers: &[String],
        context: &RequestContext,
    ) -> Result<Vec<String>> {
        let span = info_span!("fanout.get_index", servers = servers.len(), mode = ?self.mode);
        async move {
            let per_server = match self.mode {
                FanOutMode::Sequential => {
                    let mut results = Vec::with_capacity(servers.len());
                    for server in servers {
                        let remote = self.remotes.remote_for(server)?;
                        debug!("fan-out get_index: using server: {}", remote.server());
                        results.push(remote.get_index(context).await?);
                    }
                    results
                }
                FanOutMode::Concurrent => {
                    let requests = servers
                        .iter()
                        .map(|server| self.remotes.remote_for(server))
                        .collect::<Result<Vec<_>>>()?;
                    for remote in &requests {
                        debug!("fan-out get_index: using server: {}", remote.server());
                    }
                    try_join_all(requests.iter().map(|remote| remote.get_index(context))).await?
                }
            };
            let merged: Vec<String> = per_server.into_iter().flatten().collect();
            event!(Level::DEBUG, paths = merged.len(), "fan-out get_index complete");
            Ok::<_, FinderError>(merged)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Node;
    use crate::remote::{InMemoryCluster, InMemoryServer, RemoteOperation};
    use futures::TryStreamExt;

    fn servers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_find_nodes_preserves_server_order() {
        let cluster = InMemoryCluster::new();
        cluster
            .register(
                "a",
                InMemoryServer::new().with_nodes(vec![Node::branch("a.b.c"), Node::leaf("a.b.c.d")]),
            )
            .unwrap();
        cluster
            .register("b", InMemoryServer::new().with_nodes(vec![Node::branch("a.b.c.d.e")]))
            .unwrap();

        let executor = FanOutExecutor::new(Arc::new(cluster), FanOutMode::Sequential);
        let nodes: Vec<Node> = executor
            .find_nodes(servers(&["a", "b"]), FindQuery::pattern("a.b.c"))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            nodes,
            vec![Node::branch("a.b.c"), Node::leaf("a.b.c.d"), Node::branch("a.b.c.d.e")]
        );
    }

    #[tokio::test]
    async fn test_find_nodes_stops_after_first_error() {
        let cluster = InMemoryCluster::new();
        cluster
            .register("a", InMemoryServer::new().failing("connection reset"))
            .unwrap();
        cluster
            .register("b", InMemoryServer::new().with_nodes(vec![Node::leaf("x")]))
            .unwrap();

        let executor = FanOutExecutor::new(Arc::new(cluster.clone()), FanOutMode::Sequential);
        let items: Vec<Result<Node>> = executor
            .find_nodes(servers(&["a", "b"]), FindQuery::pattern("*"))
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(FinderError::RemoteServer { server, .. }) if server == "a"));
        assert_eq!(cluster.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetch_keeps_server_order() {
        let series = |name: &str| SeriesResult {
            path_expression: name.to_string(),
            name: name.to_string(),
            time_info: crate::core::TimeInfo { start: 0, end: 60, step: 60 },
            values: vec![Some(1.0)],
        };
        let cluster = InMemoryCluster::new();
        cluster
            .register("a", InMemoryServer::new().with_series(vec![series("a.1"), series("a.2")]))
            .unwrap();
        cluster
            .register("b", InMemoryServer::new().with_series(vec![series("b.1")]))
            .unwrap();

        let executor = FanOutExecutor::new(Arc::new(cluster.clone()), FanOutMode::Concurrent);
        let result = executor
            .fetch(&servers(&["a", "b"]), &["*".to_string()], 0, 60, None, &RequestContext::default())
            .await
            .unwrap();

        let names: Vec<&str> = result.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.1", "a.2", "b.1"]);
        assert!(cluster
            .calls()
            .iter()
            .all(|call| call.operation == RemoteOperation::Fetch));
    }

    #[tokio::test]
    async fn test_concurrent_index_fails_on_any_server() {
        let cluster = InMemoryCluster::new();
        cluster
            .register("a", InMemoryServer::new().with_index(["a.b"]))
            .unwrap();
        cluster
            .register("b", InMemoryServer::new().failing("boom"))
            .unwrap();

        let executor = FanOutExecutor::new(Arc::new(cluster), FanOutMode::Concurrent);
        let err = executor
            .get_index(&servers(&["a", "b"]), &RequestContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.server(), Some("b"));
    }

    #[tokio::test]
    async fn test_empty_server_list_yields_nothing() {
        let executor = FanOutExecutor::new(Arc::new(InMemoryCluster::new()), FanOutMode::Sequential);
        let index = executor
            .get_index(&[], &RequestContext::default())
            .await
            .unwrap();
        assert!(index.is_empty());

        let nodes: Vec<Node> = executor
            .find_nodes(Vec::new(), FindQuery::pattern("*"))
            .try_collect()
            .await
            .unwrap();
        assert!(nodes.is_empty());
    }
}
