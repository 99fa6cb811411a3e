use super::{CacheConnection, CacheConnector};
use crate::config::CacheConfig;
use crate::core::{FinderError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct InMemoryCacheState {
    entries: HashMap<String, String>,
    opened: usize,
    released: usize,
    fail_connect: bool,
    failure: Option<String>,
}

/// An in-process stand-in for the shared cache.
///
/// Every clone sees the same entries. Session opens and releases are counted
/// so callers can check that no session leaks, and failures can be injected
/// to simulate an unreachable cache.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    state: Arc<Mutex<InMemoryCacheState>>,
}

impl InMemoryCache {
    /// Creates a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, InMemoryCacheState>> {
        self.state
            .lock()
            .map_err(|_| FinderError::Cache("in-memory cache lock poisoned".to_string()))
    }

    /// Writes an entry directly, bypassing sessions.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut state) = self.state() {
            state.entries.insert(key.into(), value.into());
        }
    }

    /// Reads an entry directly, bypassing sessions.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.state().ok()?.entries.get(key).cloned()
    }

    /// Removes an entry directly, bypassing sessions.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.state().ok()?.entries.remove(key)
    }

    /// Number of sessions opened so far.
    pub fn connections_opened(&self) -> usize {
        self.state().map(|s| s.opened).unwrap_or_default()
    }

    /// Number of `disconnect_all` calls so far.
    pub fn connections_released(&self) -> usize {
        self.state().map(|s| s.released).unwrap_or_default()
    }

    /// Makes every subsequent `connect` fail.
    pub fn fail_connect(&self, enabled: bool) {
        if let Ok(mut state) = self.state() {
            state.fail_connect = enabled;
        }
    }

    /// Makes every subsequent command fail with `message`; `None` heals.
    pub fn fail_commands(&self, message: Option<&str>) {
        if let Ok(mut state) = self.state() {
            state.failure = message.map(str::to_string);
        }
    }
}

impl CacheConnector for InMemoryCache {
    fn connect(&self, _config: &CacheConfig) -> Result<Box<dyn CacheConnection>> {
        let mut state = self.state()?;
        if state.fail_connect {
            return Err(FinderError::Io("in-memory cache refused connection".to_string()));
        }
        state.opened += 1;
        Ok(Box::new(InMemoryCacheConnection {
            cache: self.clone(),
        }))
    }
}

struct InMemoryCacheConnection {
    cache: InMemoryCache,
}

impl InMemoryCacheConnection {
    fn checked_state(&self) -> Result<MutexGuard<'_, InMemoryCacheState>> {
        let state = self.cache.state()?;
        if let Some(message) = state.failure.as_ref() {
            return Err(FinderError::Io(message.clone()));
        }
        Ok(state)
    }
}

#[async_trait]
impl CacheConnection for InMemoryCacheConnection {
    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.checked_state()?.entries.get(key).cloned())
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.checked_state()?
            .entries
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<bool> {
        Ok(self.checked_state()?.entries.remove(key).is_some())
    }

    async fn flush_all(&mut self) -> Result<()> {
        self.checked_state()?.entries.clear();
        Ok(())
    }

    fn disconnect_all(&mut self) {
        if let Ok(mut state) = self.cache.state() {
            state.released += 1;
        }
    }
}
