//! End-to-end tests driving the gateway router over HTTP.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use mcp_gateway::config::GatewayConfig;
use mcp_gateway::gateway::{router, Gateway};
use mcp_gateway::identity::{self, HeaderIdentityResolver};
use mcp_gateway::mcp::{handler_fn, HandlerTool, ToolOutput, NO_RESULT};
use mcp_gateway::propagation::CALLER_META_KEY;
use mcp_gateway::registry::{CapabilityRegistry, Extension, HostServices, ToolRegistrar};
use mcp_gateway::schema::ParamSpec;
use mcp_gateway::transport::{Bindings, SESSION_ID_HEADER};
use serde_json::{json, Value};
use tower::ServiceExt;

const ROOT_URL: &str = "https://ci.example.com/";

struct Jobs;

impl Extension for Jobs {
    fn name(&self) -> &str {
        "jobs"
    }

    fn register_tools(&self, registrar: &mut ToolRegistrar<'_>) {
        registrar
            .register(
                HandlerTool::builder(
                    "get_jobs",
                    handler_fn(|_, args| async move {
                        let limit: Option<usize> = args.get("limit")?;
                        let jobs = vec![
                            json!({"name": "main", "color": "blue"}),
                            json!({"name": "nightly", "color": "red"}),
                            json!({"name": "release", "color": "blue"}),
                        ];
                        let jobs: Vec<_> = jobs.into_iter().take(limit.unwrap_or(usize::MAX)).collect();
                        ToolOutput::json(&jobs)
                    }),
                )
                .name("getJobs")
                .description("List jobs")
                .param(ParamSpec::of::<Option<usize>>("limit")),
            )
            .register(
                HandlerTool::builder(
                    "get_job",
                    handler_fn(|_, args| async move {
                        let name: String = args.require("jobName")?;
                        ToolOutput::json(&json!({"name": name}))
                    }),
                )
                .name("getJob")
                .param(ParamSpec::of::<String>("jobName").description("Full job name")),
            )
            .register(
                HandlerTool::builder(
                    "boom",
                    handler_fn(|_, _| async { Err(anyhow::anyhow!("boom")) }),
                ),
            )
            .register(HandlerTool::builder(
                "nothing",
                handler_fn(|_, _| async { Ok(ToolOutput::Empty) }),
            ))
            .register(HandlerTool::builder(
                "current_user",
                handler_fn(|_, _| async { ToolOutput::json(&identity::current().map(|i| i.id)) }),
            ));
    }
}

fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.name = Some("ci".to_string());
    config.server.root_url = Some(ROOT_URL.to_string());
    config.bindings.keep_alive_seconds = 0;
    config
}

fn gateway(config: &GatewayConfig) -> Gateway {
    let host = HostServices::default().with_identities(Arc::new(HeaderIdentityResolver::new(
        http::HeaderName::from_static("x-forwarded-user"),
    )));
    let extensions: Vec<Arc<dyn Extension>> = vec![Arc::new(Jobs)];
    Gateway::new(config, CapabilityRegistry::collect(&extensions, host))
}

fn app(config: &GatewayConfig) -> Router {
    router(gateway(config))
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("req")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("req")
}

fn tool_call(id: i64, name: &str, arguments: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": "tools/call",
           "params": {"name": name, "arguments": arguments}})
}

async fn json_body(resp: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(resp.into_body(), 1 << 20)
        .await
        .expect("body");
    serde_json::from_slice(&body).expect("json")
}

async fn call_stateless(app: Router, body: Value) -> Value {
    let resp = app
        .oneshot(post("/mcp-server/stateless", body))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);
    json_body(resp).await
}

fn texts(result: &Value) -> Vec<String> {
    result["content"]
        .as_array()
        .expect("content array")
        .iter()
        .map(|block| block["text"].as_str().expect("text").to_string())
        .collect()
}

async fn open_sse(app: Router) -> (String, axum::body::BodyDataStream) {
    let resp = app.oneshot(get("/mcp-server/sse")).await.expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);
    let mut stream = resp.into_body().into_data_stream();
    let first = stream.next().await.expect("frame").expect("bytes");
    let first = String::from_utf8(first.to_vec()).expect("utf8");
    let endpoint = first
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("endpoint data")
        .to_string();
    (endpoint, stream)
}

fn with_origin(mut req: Request<Body>, origin: &str) -> Request<Body> {
    req.headers_mut()
        .insert(header::ORIGIN, origin.parse().expect("origin"));
    req
}

#[tokio::test]
async fn test_health_and_fallback() {
    let app = app(&config());
    let resp = app.clone().oneshot(get("/health")).await.expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["name"], "ci");

    let resp = app.oneshot(get("/elsewhere")).await.expect("resp");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_disabled_bindings_answer_not_found() {
    let mut config = config();
    config.bindings.sse = false;
    config.bindings.streamable = false;
    config.bindings.stateless = false;
    let app = app(&config);

    let requests = [
        post("/mcp-server/stateless", json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
        post("/mcp-server/message?sessionId=x", json!({})),
        post("/mcp-server/mcp", json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})),
        get("/mcp-server/sse"),
    ];
    for req in requests {
        let resp = app.clone().oneshot(req).await.expect("resp");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_binding_disabled_at_runtime_answers_not_found() {
    let gateway = gateway(&config());
    let app = router(gateway.clone());
    let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});

    let resp = app
        .clone()
        .oneshot(post("/mcp-server/stateless", ping.clone()))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);

    gateway.set_enabled(Bindings::STATELESS, false);
    let resp = app
        .oneshot(post("/mcp-server/stateless", ping))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_to_sse_is_method_not_allowed() {
    let resp = app(&config())
        .oneshot(post("/mcp-server/sse", json!({})))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_origin_policy() {
    let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
    let with_origin = |origin: &str| {
        let mut req = post("/mcp-server/stateless", ping.clone());
        req.headers_mut()
            .insert(header::ORIGIN, origin.parse().expect("origin"));
        req
    };

    let svc = app(&config());
    let resp = svc
        .clone()
        .oneshot(with_origin("https://ci.example.com"))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = svc
        .clone()
        .oneshot(with_origin("https://evil.example.com"))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = svc
        .oneshot(post("/mcp-server/stateless", ping.clone()))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);

    let mut strict = config();
    strict.security.require_origin_header = true;
    let resp = app(&strict)
        .oneshot(post("/mcp-server/stateless", ping))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_stateless_call_without_handshake() {
    let out = call_stateless(app(&config()), tool_call(7, "getJobs", json!({}))).await;
    assert_eq!(out["id"], 7);
    assert_eq!(out["result"]["isError"], false);

    let blocks = texts(&out["result"]);
    assert_eq!(blocks.len(), 3);
    for block in &blocks {
        let job: Value = serde_json::from_str(block).expect("block is json");
        assert!(job["name"].is_string());
    }
}

#[tokio::test]
async fn test_list_results_yield_one_block_per_element() {
    let app = app(&config());
    let out = call_stateless(app.clone(), tool_call(1, "getJobs", json!({"limit": "1"}))).await;
    assert_eq!(texts(&out["result"]).len(), 1);

    let out = call_stateless(app, tool_call(2, "nothing", json!({}))).await;
    assert_eq!(texts(&out["result"]), vec![NO_RESULT.to_string()]);
}

#[tokio::test]
async fn test_handler_failure_is_error_result() {
    let out = call_stateless(app(&config()), tool_call(3, "boom", json!({}))).await;
    assert_eq!(out["result"]["isError"], true);
    assert_eq!(texts(&out["result"]), vec!["boom".to_string()]);
}

#[tokio::test]
async fn test_missing_required_argument_is_error_result() {
    let out = call_stateless(app(&config()), tool_call(4, "getJob", json!({}))).await;
    assert_eq!(out["result"]["isError"], true);
    assert!(texts(&out["result"])[0].contains("jobName"));
}

#[tokio::test]
async fn test_caller_identity_is_propagated() {
    let mut req = post("/mcp-server/stateless", tool_call(5, "current_user", json!({})));
    req.headers_mut()
        .insert("x-forwarded-user", "alice".parse().expect("header"));
    let resp = app(&config()).oneshot(req).await.expect("resp");
    let out = json_body(resp).await;
    assert_eq!(texts(&out["result"]), vec![r#""alice""#.to_string()]);
}

#[tokio::test]
async fn test_spoofed_caller_metadata_is_ignored() {
    let body = json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call",
                      "params": {"name": "current_user", "arguments": {},
                                 "_meta": {CALLER_META_KEY: "admin"}}});
    let out = call_stateless(app(&config()), body).await;
    assert_eq!(texts(&out["result"]), vec![NO_RESULT.to_string()]);
}

#[tokio::test]
async fn test_browsers_get_the_information_page() {
    let req = Request::builder()
        .uri("/mcp-server/stateless")
        .header(header::ACCEPT, "text/html")
        .header(header::HOST, "ci.example.com")
        .header("x-forwarded-proto", "https")
        .body(Body::empty())
        .expect("req");
    let resp = app(&config()).oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1 << 16)
        .await
        .expect("body");
    let page = String::from_utf8(body.to_vec()).expect("utf8");
    assert!(page.contains("https://ci.example.com/mcp-server/stateless"));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = config();
    config.server.max_body_bytes = 64;
    let body = tool_call(1, "getJob", json!({"jobName": "x".repeat(256)}));
    let resp = app(&config)
        .oneshot(post("/mcp-server/stateless", body))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_streamable_session_lifecycle() {
    let app = app(&config());

    let resp = app
        .clone()
        .oneshot(post(
            "/mcp-server/mcp",
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
                   "params": {"protocolVersion": "2025-03-26", "capabilities": {}}}),
        ))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);
    let session = resp.headers()[SESSION_ID_HEADER]
        .to_str()
        .expect("session header")
        .to_string();
    let out = json_body(resp).await;
    assert_eq!(out["result"]["serverInfo"]["name"], "ci");

    let mut req = post("/mcp-server/mcp", tool_call(2, "getJobs", json!({})));
    req.headers_mut()
        .insert(SESSION_ID_HEADER, session.parse().expect("header"));
    let resp = app.clone().oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(texts(&json_body(resp).await["result"]).len(), 3);

    let resp = app
        .clone()
        .oneshot(post("/mcp-server/mcp", tool_call(3, "getJobs", json!({}))))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .method("DELETE")
        .uri("/mcp-server/mcp")
        .header(SESSION_ID_HEADER, session.as_str())
        .body(Body::empty())
        .expect("req");
    let resp = app.clone().oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let mut req = post("/mcp-server/mcp", tool_call(4, "getJobs", json!({})));
    req.headers_mut()
        .insert(SESSION_ID_HEADER, session.parse().expect("header"));
    let resp = app.oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sse_stream_delivers_responses() {
    let app = app(&config());

    let resp = app
        .clone()
        .oneshot(get("/mcp-server/sse"))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .expect("content type")
        .starts_with("text/event-stream"));

    let mut stream = resp.into_body().into_data_stream();
    let first = stream.next().await.expect("frame").expect("bytes");
    let first = String::from_utf8(first.to_vec()).expect("utf8");
    assert!(first.contains("event: endpoint"));
    let endpoint = first
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("endpoint data")
        .to_string();
    assert!(endpoint.starts_with("/mcp-server/message?sessionId="));

    let resp = app
        .clone()
        .oneshot(post(&endpoint, json!({"jsonrpc": "2.0", "id": 11, "method": "ping"})))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let frame = stream.next().await.expect("frame").expect("bytes");
    let frame = String::from_utf8(frame.to_vec()).expect("utf8");
    assert!(frame.contains("event: message"));
    let data = frame
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("message data");
    let message: Value = serde_json::from_str(data).expect("json");
    assert_eq!(message["id"], 11);

    let resp = app
        .clone()
        .oneshot(post(
            "/mcp-server/message?sessionId=unknown",
            json!({"jsonrpc": "2.0", "id": 12, "method": "ping"}),
        ))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(post(
            "/mcp-server/message",
            json!({"jsonrpc": "2.0", "id": 13, "method": "ping"}),
        ))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_origin_policy_guards_message_and_streamable_posts() {
    let app = app(&config());
    let evil = "https://evil.example.com";

    let (endpoint, _stream) = open_sse(app.clone()).await;
    let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
    let resp = app
        .clone()
        .oneshot(with_origin(post(&endpoint, ping.clone()), evil))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let initialize = json!({"jsonrpc": "2.0", "id": 2, "method": "initialize",
                            "params": {"protocolVersion": "2025-03-26", "capabilities": {}}});
    let resp = app
        .clone()
        .oneshot(with_origin(post("/mcp-server/mcp", initialize), evil))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = app
        .oneshot(with_origin(post(&endpoint, ping), ROOT_URL.trim_end_matches('/')))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_sse_stream_open_skips_origin_check() {
    let mut strict = config();
    strict.security.require_origin_header = true;
    let app = app(&strict);

    let resp = app
        .clone()
        .oneshot(with_origin(get("/mcp-server/sse"), "https://evil.example.com"))
        .await
        .expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(get("/mcp-server/sse")).await.expect("resp");
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_concurrent_first_requests_share_providers() {
    let app = app(&config());

    let opened =
        futures_util::future::join_all((0..8).map(|_| open_sse(app.clone()))).await;
    let endpoints: Vec<&String> = opened.iter().map(|(endpoint, _)| endpoint).collect();

    for (id, endpoint) in endpoints.iter().enumerate() {
        let resp = app
            .clone()
            .oneshot(post(
                endpoint,
                json!({"jsonrpc": "2.0", "id": id, "method": "ping"}),
            ))
            .await
            .expect("resp");
        assert_eq!(resp.status(), StatusCode::ACCEPTED, "endpoint {endpoint}");
    }
}
