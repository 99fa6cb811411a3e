use crate::core::{FindQuery, RequestContext, Result, SeriesResult};
use crate::remote::NodeStream;
use async_trait::async_trait;

/// A generic trait for metric finders.
///
/// The query layer talks to this trait only, so a cluster-wide finder and a
/// single local store are interchangeable.
#[async_trait]
pub trait MetricFinder: Send + Sync {
    /// Lazily stream the nodes matching `query`.
    fn find_nodes(&self, query: FindQuery) -> NodeStream;

    /// Fetch series for `patterns` over `[start_time, end_time]`.
    async fn fetch(
        &self,
        patterns: &[String],
        start_time: i64,
        end_time: i64,
        now: Option<i64>,
        context: &RequestContext,
    ) -> Result<Vec<SeriesResult>>;

    /// List every known metric path.
    async fn get_index(&self, context: &RequestContext) -> Result<Vec<String>>;
}
