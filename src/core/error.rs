use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Error retrieving cluster_servers from cache: {source}")]
    CacheUnavailable {
        #[source]
        source: Box<FinderError>,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache protocol error: {0}")]
    Protocol(String),

    #[error("Remote server '{server}' failed: {message}")]
    RemoteServer { server: String, message: String },

    #[error("{0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl FinderError {
    /// Wraps a failure raised while talking to the membership cache.
    pub fn cache_unavailable(source: FinderError) -> Self {
        Self::CacheUnavailable {
            source: Box::new(source),
        }
    }

    pub fn remote(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteServer {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Returns the server address for errors raised by a remote collaborator.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::RemoteServer { server, .. } => Some(server.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FinderError>;

impl From<std::io::Error> for FinderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for FinderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for FinderError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Io(format!("timed out: {}", err))
    }
}
