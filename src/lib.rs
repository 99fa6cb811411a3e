// ============================================================================
// cluster-finder Library
// ============================================================================
//
// Metric finder for a cluster whose membership is published in a shared
// cache. Each operation re-reads the `cluster_servers` cache entry (falling
// back to a static list), fans out to every server, and merges the results
// in server order.

pub mod cache;
pub mod config;
pub mod core;
pub mod fanout;
pub mod finder;
pub mod interface;
pub mod membership;
pub mod remote;

// Re-export main types for convenience
pub use config::{CacheConfig, FanOutMode, FinderConfig, RemoteConfig, WireFormat};
pub use crate::core::{FindQuery, FinderError, Node, RequestContext, Result, SeriesResult, TimeInfo};
pub use fanout::FanOutExecutor;
pub use finder::RemoteCachedFinder;
pub use interface::MetricFinder;
pub use membership::{
    CLUSTER_SERVERS_KEY, MembershipPublisher, MembershipResolver, encode_cluster_servers,
    parse_cluster_servers,
};

// Re-export backends
pub use cache::{
    CacheConnection, CacheConnector, CacheGuard, InMemoryCache, MemcacheClient, MemcacheConnector,
};
pub use remote::{
    HttpRemoteFactory, HttpRemoteFinder, InMemoryCluster, InMemoryServer, NodeStream, RemoteCall,
    RemoteOperation, RemoteQuery, RemoteQueryFactory,
};
