pub mod http;
pub mod in_memory;

use crate::core::{FindQuery, Node, RequestContext, Result, SeriesResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

pub use http::{HttpRemoteFactory, HttpRemoteFinder, RemoteAddress};
pub use in_memory::{InMemoryCluster, InMemoryServer, RemoteCall, RemoteOperation};

/// Lazily produced nodes. Nothing is requested until the stream is polled.
pub type NodeStream = BoxStream<'static, Result<Node>>;

/// Queries one cluster server.
#[async_trait]
pub trait RemoteQuery: Send + Sync {
    /// Address this collaborator was built for.
    fn server(&self) -> &str;

    /// Nodes matching `query`, in the server's response order.
    fn find_nodes(&self, query: &FindQuery) -> NodeStream;

    /// Series for `patterns` over `[start, end]`.
    async fn fetch_multi(
        &self,
        patterns: &[String],
        start_time: i64,
        end_time: i64,
        now: Option<i64>,
        context: &RequestContext,
    ) -> Result<Vec<SeriesResult>>;

    /// Every metric path the server knows.
    async fn get_index(&self, context: &RequestContext) -> Result<Vec<String>>;
}

/// Builds a `RemoteQuery` for a single server address.
pub trait RemoteQueryFactory: Send + Sync {
    fn remote_for(&self, server: &str) -> Result<Arc<dyn RemoteQuery>>;
}
