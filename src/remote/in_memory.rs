use super::{NodeStream, RemoteQuery, RemoteQueryFactory};
use crate::core::{FindQuery, FinderError, Node, RequestContext, Result, SeriesResult};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Canned data served by one in-memory cluster server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServer {
    pub nodes: Vec<Node>,
    pub series: Vec<SeriesResult>,
    pub index: Vec<String>,
    pub failure: Option<String>,
}

impl InMemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_series(mut self, series: Vec<SeriesResult>) -> Self {
        self.series = series;
        self
    }

    pub fn with_index<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Every request to this server fails with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperation {
    Find,
    Fetch,
    Index,
}

/// A request that reached an in-memory server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub server: String,
    pub operation: RemoteOperation,
}

#[derive(Default)]
struct InMemoryClusterState {
    servers: HashMap<String, InMemoryServer>,
    calls: Vec<RemoteCall>,
}

/// An in-memory set of cluster servers implementing `RemoteQueryFactory`.
///
/// Simulates the network by answering from registered canned data, and
/// records every request in arrival order.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<InMemoryClusterState>>,
}

impl InMemoryCluster {
    /// Creates a new, empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, InMemoryClusterState>> {
        self.state
            .lock()
            .map_err(|_| FinderError::Io("in-memory cluster lock poisoned".to_string()))
    }

    /// Registers (or replaces) a server under `address`.
    pub fn register(&self, address: impl Into<String>, server: InMemoryServer) -> Result<()> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(FinderError::Configuration(
                "server address must not be empty".to_string(),
            ));
        }
        self.state()?.servers.insert(address, server);
        Ok(())
    }

    /// Requests received so far, oldest first.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().map(|s| s.calls.clone()).unwrap_or_default()
    }

    fn serve(&self, server: &str, operation: RemoteOperation) -> Result<InMemoryServer> {
        let mut state = self.state()?;
        state.calls.push(RemoteCall {
            server: server.to_string(),
            operation,
        });
        let registered = state.servers.get(server).cloned().ok_or_else(|| {
            FinderError::remote(server, format!("server '{}' is not registered", server))
        })?;
        match registered.failure {
            Some(message) => Err(FinderError::remote(server, message)),
            None => Ok(registered),
        }
    }
}

impl RemoteQueryFactory for InMemoryCluster {
    fn remote_for(&self, server: &str) -> Result<Arc<dyn RemoteQuery>> {
        Ok(Arc::new(InMemoryRemote {
            server: server.to_string(),
            cluster: self.clone(),
        }))
    }
}

struct InMemoryRemote {
    server: String,
    cluster: InMemoryCluster,
}

#[async_trait]
impl RemoteQuery for InMemoryRemote {
    fn server(&self) -> &str {
        &self.server
    }

    fn find_nodes(&self, _query: &FindQuery) -> NodeStream {
        let cluster = self.cluster.clone();
        let server = self.server.clone();
        stream::once(async move { cluster.serve(&server, RemoteOperation::Find) })
            .map_ok(|served| stream::iter(served.nodes.into_iter().map(Ok::<Node, FinderError>)))
            .try_flatten()
            .boxed()
    }

    async fn fetch_multi(
        &self,
        _patterns: &[String],
        _start_time: i64,
        _end_time: i64,
        _now: Option<i64>,
        _context: &RequestContext,
    ) -> Result<Vec<SeriesResult>> {
        Ok(self.cluster.serve(&self.server, RemoteOperation::Fetch)?.series)
    }

    async fn get_index(&self, _context: &RequestContext) -> Result<Vec<String>> {
        Ok(self.cluster.serve(&self.server, RemoteOperation::Index)?.index)
    }
}
