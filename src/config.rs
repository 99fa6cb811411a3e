use crate::core::{FinderError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Finder configuration
///
/// Everything the finder needs is passed here explicitly: how to reach the
/// membership cache, which servers to use when the cache has no entry, and
/// how to talk to each cluster server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinderConfig {
    /// Membership cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Static fallback list of cluster servers
    #[serde(default)]
    pub cluster_servers: Vec<String>,

    /// Cluster server transport settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// How per-server requests are dispatched
    #[serde(default)]
    pub fan_out: FanOutMode,
}

/// Membership cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache hosts as `host:port`. Required.
    #[serde(default)]
    pub hosts: Option<Vec<String>>,

    /// TCP connect timeout per cache host
    #[serde(default = "default_cache_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Timeout for a single cache command round trip
    #[serde(default = "default_cache_io_timeout", with = "duration_secs")]
    pub io_timeout: Duration,
}

/// Cluster server transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Use https for addresses that carry no scheme
    #[serde(default)]
    pub intracluster_https: bool,

    /// Send requests as POST forms instead of GET query strings
    #[serde(default = "default_true")]
    pub use_post: bool,

    /// Timeout for find and index requests
    #[serde(default = "default_remote_timeout", with = "duration_secs")]
    pub find_timeout: Duration,

    /// Timeout for render requests
    #[serde(default = "default_remote_timeout", with = "duration_secs")]
    pub fetch_timeout: Duration,

    /// Response format requested when the address does not name one
    #[serde(default)]
    pub format: WireFormat,
}

/// Response encoding requested from cluster servers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Msgpack,
    Json,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Msgpack => "msgpack",
            Self::Json => "json",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "msgpack" => Some(Self::Msgpack),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Dispatch strategy for materialised operations (`fetch`, `get_index`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOutMode {
    /// One server after another, in list order.
    #[default]
    Sequential,
    /// All servers at once, results reassembled in list order.
    Concurrent,
}

fn default_true() -> bool {
    true
}

fn default_cache_connect_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_cache_io_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hosts: None,
            connect_timeout: default_cache_connect_timeout(),
            io_timeout: default_cache_io_timeout(),
        }
    }
}

impl CacheConfig {
    /// Returns the configured hosts, failing when none are set.
    pub fn require_hosts(&self) -> Result<&[String]> {
        match self.hosts.as_deref() {
            Some(hosts) if !hosts.is_empty() => Ok(hosts),
            _ => Err(FinderError::Configuration(
                "cache hosts are not set; add at least one host:port to cache.hosts".to_string(),
            )),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            intracluster_https: false,
            use_post: true,
            find_timeout: default_remote_timeout(),
            fetch_timeout: default_remote_timeout(),
            format: WireFormat::default(),
        }
    }
}

impl FinderConfig {
    /// Create a configuration for the given cache hosts
    pub fn new<I, S>(cache_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().cache_hosts(cache_hosts)
    }

    /// Set the cache hosts
    pub fn cache_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache.hosts = Some(hosts.into_iter().map(Into::into).collect());
        self
    }

    /// Set the static fallback server list
    pub fn cluster_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the cache connect timeout
    pub fn cache_connect_timeout(mut self, timeout: Duration) -> Self {
        self.cache.connect_timeout = timeout;
        self
    }

    /// Set the cache command timeout
    pub fn cache_io_timeout(mut self, timeout: Duration) -> Self {
        self.cache.io_timeout = timeout;
        self
    }

    /// Use https for scheme-less server addresses
    pub fn intracluster_https(mut self, enabled: bool) -> Self {
        self.remote.intracluster_https = enabled;
        self
    }

    /// Choose POST forms (true) or GET query strings (false)
    pub fn use_post(mut self, enabled: bool) -> Self {
        self.remote.use_post = enabled;
        self
    }

    /// Set find and index timeout
    pub fn find_timeout(mut self, timeout: Duration) -> Self {
        self.remote.find_timeout = timeout;
        self
    }

    /// Set render timeout
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.remote.fetch_timeout = timeout;
        self
    }

    /// Set the default response format
    pub fn format(mut self, format: WireFormat) -> Self {
        self.remote.format = format;
        self
    }

    /// Set the fan-out dispatch mode
    pub fn fan_out(mut self, mode: FanOutMode) -> Self {
        self.fan_out = mode;
        self
    }

    /// Parse a JSON configuration document
    ///
    /// # Examples
    ///
    /// ```
    /// # use cluster_finder::FinderConfig;
    /// let config = FinderConfig::from_json_str(r#"{
    ///     "cache": { "hosts": ["127.0.0.1:11211"] },
    ///     "cluster_servers": ["10.0.0.1:8080", "10.0.0.2:8080"]
    /// }"#).unwrap();
    /// assert_eq!(config.cluster_servers.len(), 2);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FinderError::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file without validating it
    ///
    /// For callers that layer overrides on top and call `validate` last.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FinderError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            FinderError::Configuration(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let hosts = self.cache.require_hosts()?;
        if hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(FinderError::Configuration(
                "cache host must not be empty".to_string(),
            ));
        }
        if self.cluster_servers.iter().any(|s| s.trim().is_empty()) {
            return Err(FinderError::Configuration(
                "cluster server address must not be empty".to_string(),
            ));
        }
        if self.cache.connect_timeout.is_zero() || self.cache.io_timeout.is_zero() {
            return Err(FinderError::Configuration(
                "cache timeouts must be > 0".to_string(),
            ));
        }
        if self.remote.find_timeout.is_zero() || self.remote.fetch_timeout.is_zero() {
            return Err(FinderError::Configuration(
                "remote timeouts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            cluster_servers: Vec::new(),
            remote: RemoteConfig::default(),
            fan_out: FanOutMode::default(),
        }
    }
}

/// Durations as (fractional) seconds in config files.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
