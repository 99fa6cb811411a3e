use super::{CacheConnection, CacheConnector};
use crate::config::CacheConfig;
use crate::core::{FinderError, Result};
use async_trait::async_trait;
use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

const MAX_KEY_LEN: usize = 250;
/// Default memcached item size limit.
const MAX_VALUE_LEN: usize = 1024 * 1024;

/// Memcached text protocol over a single stream.
pub struct MemcacheWire<S> {
    stream: BufStream<S>,
}

impl<S> MemcacheWire<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
        }
    }

    async fn send(&mut self, line: &str, payload: Option<&[u8]>) -> Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        if let Some(payload) = payload {
            self.stream.write_all(payload).await?;
            self.stream.write_all(b"\r\n").await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(FinderError::Io("connection closed by cache server".to_string()));
        }
        if !buf.ends_with(b"\r\n") {
            return Err(FinderError::Protocol("reply line not terminated by CRLF".to_string()));
        }
        buf.truncate(buf.len() - 2);
        String::from_utf8(buf).map_err(|e| FinderError::Protocol(e.to_string()))
    }

    /// `get <key>`. Returns the data block, or `None` on a miss.
    pub async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.send(&format!("get {}", key), None).await?;

        let mut value = None;
        loop {
            let line = self.read_line().await?;
            if line == "END" {
                return Ok(value);
            }
            let Some(header) = line.strip_prefix("VALUE ") else {
                return Err(reply_error(&line));
            };
            let len = parse_value_header(header, key)?;
            let mut data = vec![0u8; len + 2];
            self.stream.read_exact(&mut data).await?;
            if !data.ends_with(b"\r\n") {
                return Err(FinderError::Protocol(format!(
                    "data block for '{}' not terminated by CRLF",
                    key
                )));
            }
            data.truncate(len);
            value = Some(data);
        }
    }

    /// `set <key> 0 0 <bytes>` with no expiry.
    pub async fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.send(&format!("set {} 0 0 {}", key, value.len()), Some(value))
            .await?;
        match self.read_line().await?.as_str() {
            "STORED" => Ok(()),
            other => Err(reply_error(other)),
        }
    }

    /// `delete <key>`. Returns true if the key existed.
    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        self.send(&format!("delete {}", key), None).await?;
        match self.read_line().await?.as_str() {
            "DELETED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            other => Err(reply_error(other)),
        }
    }

    pub async fn flush_all(&mut self) -> Result<()> {
        self.send("flush_all", None).await?;
        match self.read_line().await?.as_str() {
            "OK" => Ok(()),
            other => Err(reply_error(other)),
        }
    }
}

fn parse_value_header(header: &str, key: &str) -> Result<usize> {
    let mut parts = header.split(' ');
    let returned_key = parts.next().unwrap_or_default();
    if returned_key != key {
        return Err(FinderError::Protocol(format!(
            "asked for '{}', server returned '{}'",
            key, returned_key
        )));
    }
    let _flags = parts.next();
    let len = parts
        .next()
        .and_then(|len| len.parse::<usize>().ok())
        .ok_or_else(|| FinderError::Protocol(format!("malformed VALUE header '{}'", header)))?;
    if len > MAX_VALUE_LEN {
        return Err(FinderError::Protocol(format!(
            "value for '{}' is {} bytes, limit is {}",
            key, len, MAX_VALUE_LEN
        )));
    }
    Ok(len)
}

fn reply_error(line: &str) -> FinderError {
    if line == "ERROR" || line.starts_with("CLIENT_ERROR") || line.starts_with("SERVER_ERROR") {
        FinderError::Protocol(line.to_string())
    } else {
        FinderError::Protocol(format!("unexpected reply '{}'", line))
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(FinderError::Cache(format!(
            "key length must be 1..={} bytes",
            MAX_KEY_LEN
        )));
    }
    if key.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(FinderError::Cache(format!(
            "key '{}' contains whitespace or control characters",
            key.escape_debug()
        )));
    }
    Ok(())
}

/// Host for `key`, placed the way python-memcached clients place it so a
/// list written by one is found by the other.
fn host_index(key: &str, host_count: usize) -> usize {
    if host_count <= 1 {
        return 0;
    }
    let hash = match (crc32fast::hash(key.as_bytes()) >> 16) & 0x7fff {
        0 => 1,
        h => h,
    };
    hash as usize % host_count
}

async fn within<T>(limit: Duration, op: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| FinderError::Io(format!("cache command timed out after {:?}", limit)))?
}

/// Memcached client over one or more `host:port` addresses.
///
/// Each key lives on one host picked by a stable hash. Sockets are opened on
/// first use and dropped after any I/O or protocol failure so the next
/// command reconnects.
pub struct MemcacheClient {
    hosts: Vec<String>,
    connect_timeout: Duration,
    io_timeout: Duration,
    connections: Vec<Option<MemcacheWire<TcpStream>>>,
}

impl MemcacheClient {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let hosts = config.require_hosts()?.to_vec();
        let connections = hosts.iter().map(|_| None).collect();
        Ok(Self {
            hosts,
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
            connections,
        })
    }

    /// Number of sockets currently open.
    pub fn open_connections(&self) -> usize {
        self.connections.iter().filter(|c| c.is_some()).count()
    }

    async fn wire(&mut self, idx: usize) -> Result<&mut MemcacheWire<TcpStream>> {
        if self.connections[idx].is_none() {
            let host = &self.hosts[idx];
            debug!("memcache: connecting to {}", host);
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(host.as_str()))
                .await
                .map_err(|_| FinderError::Io(format!("connect to {} timed out", host)))?
                .map_err(|e| FinderError::Io(format!("connect to {} failed: {}", host, e)))?;
            stream.set_nodelay(true)?;
            self.connections[idx] = Some(MemcacheWire::new(stream));
        }
        self.connections[idx]
            .as_mut()
            .ok_or_else(|| FinderError::Cache(format!("no connection to {}", self.hosts[idx])))
    }

    fn settle<T>(&mut self, idx: usize, result: Result<T>) -> Result<T> {
        if result.is_err() {
            debug!("memcache: dropping connection to {}", self.hosts[idx]);
            self.connections[idx] = None;
        }
        result
    }
}

#[async_trait]
impl CacheConnection for MemcacheClient {
    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let idx = host_index(key, self.hosts.len());
        let limit = self.io_timeout;
        let result = within(limit, async { self.wire(idx).await?.get(key).await }).await;
        let raw = self.settle(idx, result)?;
        raw.map(|bytes| {
            String::from_utf8(bytes)
                .map_err(|e| FinderError::Decode(format!("value for '{}' is not UTF-8: {}", key, e)))
        })
        .transpose()
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let idx = host_index(key, self.hosts.len());
        let limit = self.io_timeout;
        let result =
            within(limit, async { self.wire(idx).await?.set(key, value.as_bytes()).await }).await;
        self.settle(idx, result)
    }

    async fn delete(&mut self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let idx = host_index(key, self.hosts.len());
        let limit = self.io_timeout;
        let result = within(limit, async { self.wire(idx).await?.delete(key).await }).await;
        self.settle(idx, result)
    }

    async fn flush_all(&mut self) -> Result<()> {
        let limit = self.io_timeout;
        for idx in 0..self.hosts.len() {
            let result = within(limit, async { self.wire(idx).await?.flush_all().await }).await;
            self.settle(idx, result)?;
        }
        Ok(())
    }

    fn disconnect_all(&mut self) {
        for slot in self.connections.iter_mut() {
            *slot = None;
        }
    }
}

/// Opens `MemcacheClient` sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemcacheConnector;

impl CacheConnector for MemcacheConnector {
    fn connect(&self, config: &CacheConfig) -> Result<Box<dyn CacheConnection>> {
        Ok(Box::new(MemcacheClient::new(config)?))
    }
}
