use super::{NodeStream, RemoteQuery, RemoteQueryFactory};
use crate::config::{RemoteConfig, WireFormat};
use crate::core::{FindQuery, FinderError, Node, RequestContext, Result, SeriesResult, TimeInfo};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use log::debug;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const FIND_PATH: &str = "/metrics/find/";
const RENDER_PATH: &str = "/render/";
const INDEX_PATH: &str = "/metrics/index.json";

/// A cluster server address resolved into a base URL and response format.
///
/// Addresses may be bare (`10.0.0.1:8080`), carry a scheme
/// (`https://10.0.0.1`), and name a format (`host?format=json`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    server: String,
    base: Url,
    format: WireFormat,
}

impl RemoteAddress {
    pub fn parse(server: &str, config: &RemoteConfig) -> Result<Self> {
        let server = server.trim();
        let with_scheme = if server.contains("://") {
            server.to_string()
        } else {
            let scheme = if config.intracluster_https { "https" } else { "http" };
            format!("{}://{}", scheme, server)
        };
        let mut base = Url::parse(&with_scheme)
            .map_err(|e| FinderError::remote(server, format!("invalid server address: {}", e)))?;
        let format = base
            .query_pairs()
            .find(|(key, _)| key == "format")
            .and_then(|(_, value)| WireFormat::parse(&value))
            .unwrap_or(config.format);
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self {
            server: server.to_string(),
            base,
            format,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Absolute URL of `path` on this server.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| FinderError::remote(&self.server, format!("invalid endpoint {}: {}", path, e)))
    }
}

#[derive(Debug, Deserialize)]
struct RemoteNodeRecord {
    path: String,
    is_leaf: bool,
}

#[derive(Debug, Deserialize)]
struct RemoteSeriesRecord {
    name: String,
    start: i64,
    end: i64,
    step: i64,
    values: Vec<Option<f64>>,
    #[serde(rename = "pathExpression", default)]
    path_expression: Option<String>,
}

impl From<RemoteSeriesRecord> for SeriesResult {
    fn from(record: RemoteSeriesRecord) -> Self {
        let path_expression = record
            .path_expression
            .unwrap_or_else(|| record.name.clone());
        SeriesResult {
            path_expression,
            name: record.name,
            time_info: TimeInfo {
                start: record.start,
                end: record.end,
                step: record.step,
            },
            values: record.values,
        }
    }
}

fn decode<T: DeserializeOwned>(format: WireFormat, body: &[u8]) -> std::result::Result<T, String> {
    match format {
        WireFormat::Msgpack => rmp_serde::from_slice(body).map_err(|e| e.to_string()),
        WireFormat::Json => serde_json::from_slice(body).map_err(|e| e.to_string()),
    }
}

/// Queries one cluster server over its HTTP API.
#[derive(Clone)]
pub struct HttpRemoteFinder {
    address: Arc<RemoteAddress>,
    client: reqwest::Client,
    config: Arc<RemoteConfig>,
}

impl HttpRemoteFinder {
    pub fn new(server: &str, client: reqwest::Client, config: Arc<RemoteConfig>) -> Result<Self> {
        let address = RemoteAddress::parse(server, &config)?;
        Ok(Self {
            address: Arc::new(address),
            client,
            config,
        })
    }

    async fn request(
        &self,
        url: &Url,
        fields: &[(&str, String)],
        timeout: Duration,
        context: &RequestContext,
    ) -> Result<Vec<u8>> {
        let server = self.address.server();
        debug!("remote: {} {}", if self.config.use_post { "POST" } else { "GET" }, url);

        let mut request = if self.config.use_post {
            self.client.post(url.clone()).form(fields)
        } else {
            self.client.get(url.clone()).query(fields)
        };
        request = request.timeout(timeout);
        for (name, value) in &context.forward_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| FinderError::remote(server, format!("request to {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FinderError::remote(
                server,
                format!("{} returned status {}", url, status),
            ));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| FinderError::remote(server, format!("reading {} failed: {}", url, e)))?;
        Ok(body.to_vec())
    }

    async fn request_nodes(&self, query: &FindQuery) -> Result<Vec<Node>> {
        let url = self.address.endpoint(FIND_PATH)?;
        let format = self.address.format();
        let mut fields = vec![
            ("local", "1".to_string()),
            ("format", format.as_str().to_string()),
            ("query", query.pattern.clone()),
        ];
        if let Some(start) = query.start_time {
            fields.push(("from", start.to_string()));
        }
        if let Some(end) = query.end_time {
            fields.push(("until", end.to_string()));
        }

        let body = self
            .request(&url, &fields, self.config.find_timeout, &RequestContext::default())
            .await?;
        let records: Vec<RemoteNodeRecord> = decode(format, &body).map_err(|e| {
            FinderError::remote(
                self.address.server(),
                format!("Error decoding find response from {}: {}", url, e),
            )
        })?;
        Ok(records
            .into_iter()
            .map(|record| Node::from_remote(record.path, record.is_leaf))
            .collect())
    }
}

#[async_trait]
impl RemoteQuery for HttpRemoteFinder {
    fn server(&self) -> &str {
        self.address.server()
    }

    fn find_nodes(&self, query: &FindQuery) -> NodeStream {
        let remote = self.clone();
        let query = query.clone();
        stream::once(async move { remote.request_nodes(&query).await })
            .map_ok(|nodes| stream::iter(nodes.into_iter().map(Ok::<Node, FinderError>)))
            .try_flatten()
            .boxed()
    }

    async fn fetch_multi(
        &self,
        patterns: &[String],
        start_time: i64,
        end_time: i64,
        now: Option<i64>,
        context: &RequestContext,
    ) -> Result<Vec<SeriesResult>> {
        let url = self.address.endpoint(RENDER_PATH)?;
        let format = self.address.format();
        let mut fields = vec![
            ("format", format.as_str().to_string()),
            ("local", "1".to_string()),
            ("noCache", "1".to_string()),
            ("from", start_time.to_string()),
            ("until", end_time.to_string()),
        ];
        if let Some(now) = now {
            fields.push(("now", now.to_string()));
        }
        fields.extend(patterns.iter().map(|p| ("target", p.clone())));

        let body = self
            .request(&url, &fields, self.config.fetch_timeout, context)
            .await?;
        let records: Vec<RemoteSeriesRecord> = decode(format, &body).map_err(|e| {
            FinderError::remote(
                self.address.server(),
                format!("Error decoding render response from {}: {}", url, e),
            )
        })?;
        Ok(records.into_iter().map(SeriesResult::from).collect())
    }

    async fn get_index(&self, context: &RequestContext) -> Result<Vec<String>> {
        let url = self.address.endpoint(INDEX_PATH)?;
        let fields = [("local", "1".to_string())];
        let body = self
            .request(&url, &fields, self.config.find_timeout, context)
            .await?;
        decode(WireFormat::Json, &body).map_err(|e| {
            FinderError::remote(
                self.address.server(),
                format!("Error decoding index response from {}: {}", url, e),
            )
        })
    }
}

/// Builds `HttpRemoteFinder`s that share one HTTP connection pool.
#[derive(Clone)]
pub struct HttpRemoteFactory {
    client: reqwest::Client,
    config: Arc<RemoteConfig>,
}

impl HttpRemoteFactory {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FinderError::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: &RemoteConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            config: Arc::new(config.clone()),
        }
    }
}

impl RemoteQueryFactory for HttpRemoteFactory {
    fn remote_for(&self, server: &str) -> Result<Arc<dyn RemoteQuery>> {
        Ok(Arc::new(HttpRemoteFinder::new(
            server,
            self.client.clone(),
            Arc::clone(&self.config),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_address_uses_configured_scheme() {
        let plain = RemoteAddress::parse("127.0.0.1", &RemoteConfig::default()).unwrap();
        assert_eq!(
            plain.endpoint(FIND_PATH).unwrap().as_str(),
            "http://127.0.0.1/metrics/find/"
        );
        assert_eq!(plain.format(), WireFormat::Msgpack);

        let config = RemoteConfig {
            intracluster_https: true,
            ..RemoteConfig::default()
        };
        let secure = RemoteAddress::parse("1.1.1.1:8443", &config).unwrap();
        assert_eq!(
            secure.endpoint(RENDER_PATH).unwrap().as_str(),
            "https://1.1.1.1:8443/render/"
        );
    }

    #[test]
    fn test_address_scheme_and_format_override() {
        let address =
            RemoteAddress::parse("https://127.0.0.1?format=json", &RemoteConfig::default())
                .unwrap();
        assert_eq!(address.format(), WireFormat::Json);
        assert_eq!(
            address.endpoint(INDEX_PATH).unwrap().as_str(),
            "https://127.0.0.1/metrics/index.json"
        );
        assert_eq!(address.server(), "https://127.0.0.1?format=json");
    }

    #[test]
    fn test_unknown_format_falls_back_to_default() {
        let address =
            RemoteAddress::parse("127.0.0.1?format=xml", &RemoteConfig::default()).unwrap();
        assert_eq!(address.format(), WireFormat::Msgpack);
    }

    #[test]
    fn test_decode_series_defaults_path_expression() {
        let body = serde_json::to_vec(&serde_json::json!([{
            "name": "a.b.c.d",
            "start": 1496262000,
            "end": 1496262060,
            "step": 60,
            "values": [1.0, null, 1],
        }]))
        .unwrap();
        let records: Vec<RemoteSeriesRecord> = decode(WireFormat::Json, &body).unwrap();
        let series: Vec<SeriesResult> = records.into_iter().map(SeriesResult::from).collect();

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].path_expression, "a.b.c.d");
        assert_eq!(
            series[0].time_info,
            TimeInfo {
                start: 1496262000,
                end: 1496262060,
                step: 60
            }
        );
        assert_eq!(series[0].values, vec![Some(1.0), None, Some(1.0)]);
    }

    #[test]
    fn test_decode_msgpack_nodes() {
        #[derive(serde::Serialize)]
        struct Record<'a> {
            path: &'a str,
            is_leaf: bool,
        }
        let body = rmp_serde::to_vec_named(&vec![
            Record { path: "a.b.c", is_leaf: false },
            Record { path: "a.b.c.d", is_leaf: true },
        ])
        .unwrap();
        let records: Vec<RemoteNodeRecord> = decode(WireFormat::Msgpack, &body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].path, "a.b.c.d");
        assert!(records[1].is_leaf);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: std::result::Result<Vec<String>, String> = decode(WireFormat::Json, b"error");
        assert!(result.is_err());
    }
}
