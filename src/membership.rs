use crate::cache::{CacheConnector, CacheGuard, MemcacheConnector};
use crate::config::{CacheConfig, FinderConfig};
use crate::core::{FinderError, Result};
use log::{debug, error};
use std::sync::Arc;

/// Cache key holding the current cluster server list.
pub const CLUSTER_SERVERS_KEY: &str = "cluster_servers";

/// Parses the cached `[addr1,addr2,...]` encoding.
///
/// Brackets are stripped, the rest is split on commas, and blank entries are
/// dropped, so `"[]"` is an explicitly empty list.
pub fn parse_cluster_servers(raw: &str) -> Vec<String> {
    raw.replace(['[', ']'], "")
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect()
}

/// Encodes a server list the way `parse_cluster_servers` reads it.
pub fn encode_cluster_servers<S: AsRef<str>>(servers: &[S]) -> String {
    let joined = servers
        .iter()
        .map(|s| s.as_ref().trim())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{}]", joined)
}

/// Resolves the current cluster server list.
///
/// Reads `cluster_servers` from the shared cache on every call and falls back
/// to the static list when the key is missing. Nothing is memoised.
#[derive(Clone)]
pub struct MembershipResolver {
    cache: CacheConfig,
    static_servers: Arc<Vec<String>>,
    connector: Arc<dyn CacheConnector>,
}

impl MembershipResolver {
    /// Creates a resolver that talks memcached.
    pub fn new(config: &FinderConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(MemcacheConnector))
    }

    /// Creates a resolver over any cache backend.
    ///
    /// Fails with `FinderError::Configuration` if no cache host is configured.
    pub fn with_connector(
        config: &FinderConfig,
        connector: Arc<dyn CacheConnector>,
    ) -> Result<Self> {
        config.cache.require_hosts()?;
        Ok(Self {
            cache: config.cache.clone(),
            static_servers: Arc::new(config.cluster_servers.clone()),
            connector,
        })
    }

    /// Returns the server list for one operation.
    pub async fn resolve(&self) -> Result<Vec<String>> {
        match self.read_cached().await {
            Ok(Some(servers)) => {
                debug!("retrieved cluster_servers from cache: {:?}", servers);
                Ok(servers)
            }
            Ok(None) => {
                debug!(
                    "cluster_servers not cached, using static list: {:?}",
                    self.static_servers
                );
                Ok(self.static_servers.as_ref().clone())
            }
            Err(err) => {
                error!("error retrieving cluster_servers from cache: {}", err);
                Err(FinderError::cache_unavailable(err))
            }
        }
    }

    async fn read_cached(&self) -> Result<Option<Vec<String>>> {
        let mut conn = CacheGuard::open(self.connector.as_ref(), &self.cache)?;
        let raw = conn.get(CLUSTER_SERVERS_KEY).await?;
        conn.close();
        Ok(raw
            .filter(|value| !value.trim().is_empty())
            .map(|value| parse_cluster_servers(&value)))
    }
}

/// Writes the cluster server list into the shared cache.
///
/// This is the population side; the resolver never writes.
#[derive(Clone)]
pub struct MembershipPublisher {
    cache: CacheConfig,
    connector: Arc<dyn CacheConnector>,
}

impl MembershipPublisher {
    pub fn new(config: &FinderConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(MemcacheConnector))
    }

    pub fn with_connector(
        config: &FinderConfig,
        connector: Arc<dyn CacheConnector>,
    ) -> Result<Self> {
        config.cache.require_hosts()?;
        Ok(Self {
            cache: config.cache.clone(),
            connector,
        })
    }

    /// Stores `servers` under `cluster_servers`.
    pub async fn publish<S: AsRef<str>>(&self, servers: &[S]) -> Result<()> {
        if servers.iter().any(|s| s.as_ref().trim().is_empty()) {
            return Err(FinderError::Configuration(
                "cluster server address must not be empty".to_string(),
            ));
        }
        if servers.iter().any(|s| s.as_ref().contains([',', '[', ']'])) {
            return Err(FinderError::Configuration(
                "cluster server address must not contain ',', '[' or ']'".to_string(),
            ));
        }
        let encoded = encode_cluster_servers(servers);
        let mut conn = CacheGuard::open(self.connector.as_ref(), &self.cache)?;
        conn.set(CLUSTER_SERVERS_KEY, &encoded).await?;
        debug!("published cluster_servers: {}", encoded);
        Ok(())
    }

    /// Removes the cached list so resolvers fall back to their static list.
    pub async fn clear(&self) -> Result<bool> {
        let mut conn = CacheGuard::open(self.connector.as_ref(), &self.cache)?;
        conn.delete(CLUSTER_SERVERS_KEY).await
    }
}
