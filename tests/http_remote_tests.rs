/// Cluster HTTP API tests
///
/// Drives `HttpRemoteFinder` and the full finder against small axum servers
/// that speak the find, render and index endpoints.
/// Run with: cargo test --test http_remote_tests
use axum::extract::{Form, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use cluster_finder::{
    CLUSTER_SERVERS_KEY, FanOutMode, FindQuery, FinderConfig, FinderError, HttpRemoteFactory,
    InMemoryCache, Node, RemoteCachedFinder, RemoteQuery, RemoteQueryFactory, RequestContext,
    SeriesResult, TimeInfo,
};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Serialize, Clone)]
struct NodeRecord {
    path: String,
    is_leaf: bool,
}

#[derive(Serialize, Clone)]
struct SeriesRecord {
    name: String,
    #[serde(rename = "pathExpression")]
    path_expression: String,
    start: i64,
    end: i64,
    step: i64,
    values: Vec<Option<f64>>,
}

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: &'static str,
    fields: Vec<(String, String)>,
    forwarded: Option<String>,
}

#[derive(Clone, Default)]
struct FakeClusterServer {
    nodes: Vec<NodeRecord>,
    series: Vec<SeriesRecord>,
    index: Vec<String>,
    garbage: bool,
    status: Option<StatusCode>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeClusterServer {
    fn with_nodes(mut self, nodes: &[(&str, bool)]) -> Self {
        self.nodes = nodes
            .iter()
            .map(|(path, is_leaf)| NodeRecord {
                path: path.to_string(),
                is_leaf: *is_leaf,
            })
            .collect();
        self
    }

    fn with_series(mut self, names: &[&str]) -> Self {
        self.series = names
            .iter()
            .map(|name| SeriesRecord {
                name: name.to_string(),
                path_expression: name.to_string(),
                start: 1496262000,
                end: 1496262060,
                step: 60,
                values: vec![Some(1.0), None],
            })
            .collect();
        self
    }

    fn with_index(mut self, paths: &[&str]) -> Self {
        self.index = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    fn garbage(mut self) -> Self {
        self.garbage = true;
        self
    }

    fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    async fn start(&self) -> String {
        let app = Router::new()
            .route("/metrics/find/", post(find).get(find))
            .route("/render/", post(render).get(render))
            .route("/metrics/index.json", post(index).get(index))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn record(&self, method: Method, path: &'static str, headers: &HeaderMap, fields: &[(String, String)]) {
        self.requests.lock().unwrap().push(Recorded {
            method,
            path,
            fields: fields.to_vec(),
            forwarded: headers
                .get("x-forwarded-user")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
    }

    fn respond<T: Serialize>(&self, fields: &[(String, String)], payload: &T) -> Response {
        if let Some(status) = self.status {
            return (status, "unavailable").into_response();
        }
        if self.garbage {
            return (StatusCode::OK, "error").into_response();
        }
        let json = fields.iter().any(|(k, v)| k == "format" && v == "json");
        if json {
            (
                [(header::CONTENT_TYPE, "application/json")],
                serde_json::to_vec(payload).unwrap(),
            )
                .into_response()
        } else {
            (
                [(header::CONTENT_TYPE, "application/x-msgpack")],
                rmp_serde::to_vec_named(payload).unwrap(),
            )
                .into_response()
        }
    }
}

async fn find(
    State(server): State<FakeClusterServer>,
    method: Method,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    server.record(method, "find", &headers, &fields);
    server.respond(&fields, &server.nodes)
}

async fn render(
    State(server): State<FakeClusterServer>,
    method: Method,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    server.record(method, "render", &headers, &fields);
    server.respond(&fields, &server.series)
}

async fn index(
    State(server): State<FakeClusterServer>,
    method: Method,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    server.record(method, "index", &headers, &fields);
    // index.json is always JSON
    let json = vec![("format".to_string(), "json".to_string())];
    server.respond(&json, &server.index)
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Vec<&'a str> {
    fields
        .iter()
        .filter(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .collect()
}

fn factory(config: &FinderConfig) -> HttpRemoteFactory {
    HttpRemoteFactory::new(&config.remote).unwrap()
}

#[tokio::test]
async fn test_find_posts_query_fields() {
    let fake = FakeClusterServer::default().with_nodes(&[("a.b.c", false), ("a.b.c.d", true)]);
    let addr = fake.start().await;
    let config = FinderConfig::new(["127.0.0.1:11211"]);
    let remote = factory(&config).remote_for(&addr).unwrap();

    let nodes: Vec<Node> = remote
        .find_nodes(&FindQuery::new("a.b.*", Some(100), Some(200)))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(nodes, vec![Node::branch("a.b.c"), Node::leaf("a.b.c.d")]);

    let requests = fake.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].path, "find");
    let fields = &requests[0].fields;
    assert_eq!(field(fields, "query"), vec!["a.b.*"]);
    assert_eq!(field(fields, "local"), vec!["1"]);
    assert_eq!(field(fields, "format"), vec!["msgpack"]);
    assert_eq!(field(fields, "from"), vec!["100"]);
    assert_eq!(field(fields, "until"), vec!["200"]);
}

#[tokio::test]
async fn test_find_is_lazy_until_polled() {
    let fake = FakeClusterServer::default().with_nodes(&[("a", true)]);
    let addr = fake.start().await;
    let config = FinderConfig::new(["127.0.0.1:11211"]);
    let remote = factory(&config).remote_for(&addr).unwrap();

    let mut stream = remote.find_nodes(&FindQuery::pattern("*"));
    assert!(fake.requests().is_empty());
    assert_eq!(stream.next().await.unwrap().unwrap(), Node::leaf("a"));
    assert!(stream.next().await.is_none());
    assert_eq!(fake.requests().len(), 1);
}

#[tokio::test]
async fn test_fetch_with_get_and_json_format() {
    let fake = FakeClusterServer::default().with_series(&["a.b.c.d", "a.b.c.e"]);
    let addr = fake.start().await;
    let config = FinderConfig::new(["127.0.0.1:11211"]).use_post(false);
    let remote = factory(&config)
        .remote_for(&format!("{}?format=json", addr))
        .unwrap();

    let context = RequestContext::new().forward_header("X-Forwarded-User", "alice");
    let series = remote
        .fetch_multi(
            &["a.b.c.*".to_string(), "x.y".to_string()],
            1496262000,
            1496262060,
            Some(1496262060),
            &context,
        )
        .await
        .unwrap();

    assert_eq!(series.len(), 2);
    assert_eq!(
        series[0],
        SeriesResult {
            path_expression: "a.b.c.d".to_string(),
            name: "a.b.c.d".to_string(),
            time_info: TimeInfo {
                start: 1496262000,
                end: 1496262060,
                step: 60
            },
            values: vec![Some(1.0), None],
        }
    );

    let requests = fake.requests();
    assert_eq!(requests[0].method, Method::GET);
    let fields = &requests[0].fields;
    assert_eq!(field(fields, "target"), vec!["a.b.c.*", "x.y"]);
    assert_eq!(field(fields, "format"), vec!["json"]);
    assert_eq!(field(fields, "noCache"), vec!["1"]);
    assert_eq!(field(fields, "now"), vec!["1496262060"]);
    assert_eq!(requests[0].forwarded.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_index_decode_error_names_server() {
    let fake = FakeClusterServer::default().garbage();
    let addr = fake.start().await;
    let config = FinderConfig::new(["127.0.0.1:11211"]);
    let remote = factory(&config).remote_for(&addr).unwrap();
    assert_eq!(remote.server(), addr);

    let err = remote.get_index(&RequestContext::default()).await.unwrap_err();
    assert_eq!(err.server(), Some(addr.as_str()));
    assert!(err.to_string().contains("Error decoding index response from"));
}

#[tokio::test]
async fn test_error_status_is_a_remote_failure() {
    let fake = FakeClusterServer::default().status(StatusCode::SERVICE_UNAVAILABLE);
    let addr = fake.start().await;
    let config = FinderConfig::new(["127.0.0.1:11211"]);
    let remote = factory(&config).remote_for(&addr).unwrap();

    let result: Result<Vec<Node>, FinderError> = remote
        .find_nodes(&FindQuery::pattern("*"))
        .try_collect()
        .await;
    match result {
        Err(FinderError::RemoteServer { server, message }) => {
            assert_eq!(server, addr);
            assert!(message.contains("503"));
        }
        other => panic!("expected RemoteServer error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_finder_over_cached_http_cluster() {
    let first = FakeClusterServer::default()
        .with_nodes(&[("a.b.c", false)])
        .with_series(&["a.b.c.d"])
        .with_index(&["a.b.c.d"]);
    let second = FakeClusterServer::default()
        .with_nodes(&[("a.b.c.d", true)])
        .with_series(&["a.b.c.d"])
        .with_index(&["x.y.z"]);
    let first_addr = first.start().await;
    let second_addr = second.start().await;

    let config = FinderConfig::new(["127.0.0.1:11211"])
        .cluster_servers(["127.0.0.1:1"])
        .fan_out(FanOutMode::Concurrent);
    let cache = Arc::new(InMemoryCache::new());
    cache.insert(
        CLUSTER_SERVERS_KEY,
        format!("[{},{}]", first_addr, second_addr),
    );
    let finder =
        RemoteCachedFinder::with_backends(&config, cache.clone(), Arc::new(factory(&config)))
            .unwrap();

    let nodes: Vec<Node> = finder
        .find_nodes(FindQuery::pattern("a.b.*"))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(nodes, vec![Node::branch("a.b.c"), Node::leaf("a.b.c.d")]);

    let series = finder
        .fetch(&["a.b.c.d".to_string()], 0, 60, None, &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(series.len(), 2);
    assert!(series.iter().all(|s| s.name == "a.b.c.d"));

    let index = finder.get_index(&RequestContext::default()).await.unwrap();
    assert_eq!(index, vec!["a.b.c.d", "x.y.z"]);

    assert_eq!(first.requests().len(), 3);
    assert_eq!(second.requests().len(), 3);
    assert_eq!(cache.connections_opened(), 3);
    assert_eq!(cache.connections_released(), 3);
}
