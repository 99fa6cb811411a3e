use crate::cache::CacheConnector;
use crate::config::FinderConfig;
use crate::core::{FindQuery, RequestContext, Result, SeriesResult};
use crate::fanout::FanOutExecutor;
use crate::interface::MetricFinder;
use crate::membership::MembershipResolver;
use crate::remote::{HttpRemoteFactory, NodeStream, RemoteQueryFactory};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use log::debug;
use std::sync::Arc;
use std::time::Instant;

/// Finder over a cluster whose membership lives in a shared cache
///
/// Every operation resolves the current server list first (cache entry, or
/// the static list on a miss) and then fans out to all of those servers.
/// Callers never say which servers to use.
///
/// # Examples
///
/// ```no_run
/// use cluster_finder::{FindQuery, FinderConfig, RemoteCachedFinder};
/// use futures::TryStreamExt;
///
/// # async fn run() -> cluster_finder::Result<()> {
/// let config = FinderConfig::new(["127.0.0.1:11211"])
///     .cluster_servers(["10.0.0.1:8080", "10.0.0.2:8080"]);
/// let finder = RemoteCachedFinder::new(&config)?;
///
/// let nodes: Vec<_> = finder
///     .find_nodes(FindQuery::pattern("servers.*.cpu"))
///     .try_collect()
///     .await?;
/// println!("found {} nodes", nodes.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RemoteCachedFinder {
    resolver: MembershipResolver,
    executor: FanOutExecutor,
}

impl RemoteCachedFinder {
    /// Create a finder backed by memcached and the cluster HTTP API
    ///
    /// Fails with `FinderError::Configuration` when no cache host is set.
    pub fn new(config: &FinderConfig) -> Result<Self> {
        config.validate()?;
        let resolver = MembershipResolver::new(config)?;
        let remotes = HttpRemoteFactory::new(&config.remote)?;
        Ok(Self::from_parts(resolver, Arc::new(remotes), config))
    }

    /// Create a finder with custom cache and remote backends
    pub fn with_backends(
        config: &FinderConfig,
        cache: Arc<dyn CacheConnector>,
        remotes: Arc<dyn RemoteQueryFactory>,
    ) -> Result<Self> {
        let resolver = MembershipResolver::with_connector(config, cache)?;
        Ok(Self::from_parts(resolver, remotes, config))
    }

    fn from_parts(
        resolver: MembershipResolver,
        remotes: Arc<dyn RemoteQueryFactory>,
        config: &FinderConfig,
    ) -> Self {
        Self {
            resolver,
            executor: FanOutExecutor::new(remotes, config.fan_out),
        }
    }

    /// Current cluster server list
    pub async fn refresh_cluster_servers(&self) -> Result<Vec<String>> {
        self.resolver.resolve().await
    }

    /// Nodes matching `query` across the cluster
    ///
    /// Membership is resolved when the stream is first polled.
    pub fn find_nodes(&self, query: FindQuery) -> NodeStream {
        let resolver = self.resolver.clone();
        let executor = self.executor.clone();
        stream::once(async move { resolver.resolve().await })
            .map_ok(move |servers| executor.find_nodes(servers, query.clone()))
            .try_flatten()
            .boxed()
    }

    /// Series for `patterns` from every cluster server
    pub async fn fetch(
        &self,
        patterns: &[String],
        start_time: i64,
        end_time: i64,
        now: Option<i64>,
        context: &RequestContext,
    ) -> Result<Vec<SeriesResult>> {
        let started = Instant::now();
        let servers = self.resolver.resolve().await?;
        let series = self
            .executor
            .fetch(&servers, patterns, start_time, end_time, now, context)
            .await?;
        debug!(
            "fetch: {} series from {} servers in {:?}",
            series.len(),
            servers.len(),
            started.elapsed()
        );
        Ok(series)
    }

    /// Metric paths known to every cluster server
    pub async fn get_index(&self, context: &RequestContext) -> Result<Vec<String>> {
        let started = Instant::now();
        let servers = self.resolver.resolve().await?;
        let index = self.executor.get_index(&servers, context).await?;
        debug!(
            "get_index: {} paths from {} servers in {:?}",
            index.len(),
            servers.len(),
            started.elapsed()
        );
        Ok(index)
    }
}

#[async_trait]
impl MetricFinder for RemoteCachedFinder {
    fn find_nodes(&self, query: FindQuery) -> NodeStream {
        RemoteCachedFinder::find_nodes(self, query)
    }

    async fn fetch(
        &self,
        patterns: &[String],
        start_time: i64,
        end_time: i64,
        now: Option<i64>,
        context: &RequestContext,
    ) -> Result<Vec<SeriesResult>> {
        RemoteCachedFinder::fetch(self, patterns, start_time, end_time, now, context).await
    }

    async fn get_index(&self, context: &RequestContext) -> Result<Vec<String>> {
        RemoteCachedFinder::get_index(self, context).await
    }
}
