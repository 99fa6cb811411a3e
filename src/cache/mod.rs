pub mod memcache;
pub mod memory;

use crate::config::CacheConfig;
use crate::core::Result;
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};

pub use memcache::{MemcacheClient, MemcacheConnector, MemcacheWire};
pub use memory::InMemoryCache;

/// An open session with the shared key-value cache.
///
/// Sockets may be opened lazily; `disconnect_all` closes whatever is open.
#[async_trait]
pub trait CacheConnection: Send {
    /// Read a key. `None` means the key is absent.
    async fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// Store a value without expiry.
    async fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Returns true if it existed.
    async fn delete(&mut self, key: &str) -> Result<bool>;

    /// Drop every key on every host.
    async fn flush_all(&mut self) -> Result<()>;

    /// Close every open socket.
    fn disconnect_all(&mut self);
}

/// Opens cache sessions for a host list.
pub trait CacheConnector: Send + Sync {
    fn connect(&self, config: &CacheConfig) -> Result<Box<dyn CacheConnection>>;
}

/// RAII guard for a scoped cache session
///
/// Releases the session exactly once, when closed or dropped, so every exit
/// path (success, early return, error) disconnects.
pub struct CacheGuard {
    connection: Box<dyn CacheConnection>,
    released: bool,
}

impl CacheGuard {
    /// Open a session through `connector`.
    pub fn open(connector: &dyn CacheConnector, config: &CacheConfig) -> Result<Self> {
        let connection = connector.connect(config)?;
        Ok(Self {
            connection,
            released: false,
        })
    }

    /// Explicitly release the session.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.connection.disconnect_all();
        }
    }
}

impl Deref for CacheGuard {
    type Target = dyn CacheConnection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl DerefMut for CacheGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut()
    }
}

impl Drop for CacheGuard {
    fn drop(&mut self) {
        self.release();
    }
}
