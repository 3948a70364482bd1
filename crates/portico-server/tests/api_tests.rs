//! HTTP API integration tests — exercise the ingress with a scripted
//! upstream, no network.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use portico_catalog::Catalog;
use portico_config::{ApiKeyConfig, PorticoConfig, ProviderConfig};
use portico_gateway::{
    CreditLedger, Dispatcher, InMemoryLedger, LogPipeline, LogStore, ResponseCache,
};
use portico_providers::{AdapterRegistry, CredentialResolver, MockUpstream};
use portico_server::StaticApiKeys;

const API_KEY: &str = "pk-test-0123456789abcdef";

struct TestServer {
    router: axum::Router,
    _pipeline: LogPipeline,
    _dir: tempfile::TempDir,
}

fn setup(upstream: MockUpstream, credits: f64) -> TestServer {
    let mut config = PorticoConfig::default();
    config.dispatch.max_retries = 0;
    config.dispatch.base_delay_ms = 1;
    config.providers.insert(
        "openai".into(),
        ProviderConfig {
            api_key: Some("sk-gw".into()),
            ..Default::default()
        },
    );
    config.api_keys.push(ApiKeyConfig {
        key: API_KEY.into(),
        org: "acme".into(),
        project: Some("default".into()),
        allowed_providers: vec![],
        blocked_providers: vec![],
        byok: HashMap::new(),
        log_bodies: false,
    });

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LogStore::open(&dir.path().join("logs.db")).unwrap());
    let pipeline = LogPipeline::start(Arc::clone(&store), &config.log);
    let ledger = Arc::new(InMemoryLedger::new(HashMap::from([(
        "acme".to_string(),
        credits,
    )])));
    let dispatcher = Dispatcher::new(
        Arc::new(Catalog::builtin()),
        AdapterRegistry::builtin(config.dispatch.default_max_tokens),
        Arc::new(upstream),
        CredentialResolver::new(&config),
        ResponseCache::new(&config.cache),
        ledger as Arc<dyn CreditLedger>,
        pipeline.handle(),
        config.dispatch.clone(),
    );
    let keys = Arc::new(StaticApiKeys::from_config(&config).unwrap());

    TestServer {
        router: portico_server::build_router(dispatcher, keys, false),
        _pipeline: pipeline,
        _dir: dir,
    }
}

fn openai_reply() -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-up",
        "model": "gpt-4o-2024-08-06",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "hello"},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6},
    })
}

fn chat_request(body: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/v1/chat/completions").header("content-type", "application/json");
    if let Some(k) = key {
        builder = builder.header("authorization", format!("Bearer {k}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Health & metrics ───────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let server = setup(MockUpstream::new(), 100.0);
    let resp = server
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = setup(MockUpstream::new(), 100.0);
    let resp = server
        .router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("portico_http_requests_total"));
}

// ── Auth ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_key_is_unauthorized() {
    let server = setup(MockUpstream::new(), 100.0);
    let resp = server
        .router
        .oneshot(chat_request(r#"{"model":"gpt-4o","messages":[]}"#, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn test_wrong_key_is_unauthorized() {
    let server = setup(MockUpstream::new(), 100.0);
    let resp = server
        .router
        .oneshot(chat_request(
            r#"{"model":"gpt-4o","messages":[]}"#,
            Some("pk-wrong"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ── Chat completions ───────────────────────────────────────────

#[tokio::test]
async fn test_chat_completion_happy_path() {
    let server = setup(MockUpstream::new().with_json(200, &openai_reply()), 100.0);
    let body = serde_json::json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });
    let resp = server
        .router
        .oneshot(chat_request(&body.to_string(), Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["model"], "openai/gpt-4o");
    assert_eq!(json["choices"][0]["message"]["content"], "hello");
    assert_eq!(json["choices"][0]["finish_reason"], "stop");
    assert_eq!(json["usage"]["total_tokens"], 6);
    assert_eq!(json["metadata"]["used_provider"], "openai");
    assert_eq!(json["metadata"]["requested_model"], "gpt-4o");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let server = setup(MockUpstream::new(), 100.0);
    let resp = server
        .router
        .oneshot(chat_request("{not json", Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_unknown_model_is_bad_request() {
    let server = setup(MockUpstream::new(), 100.0);
    let body = serde_json::json!({
        "model": "not-a-model",
        "messages": [{"role": "user", "content": "hi"}],
    });
    let resp = server
        .router
        .oneshot(chat_request(&body.to_string(), Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["code"], "unknown_model");
}

#[tokio::test]
async fn test_insufficient_credits_is_402() {
    let server = setup(MockUpstream::new(), 0.0);
    let body = serde_json::json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "hi"}],
    });
    let resp = server
        .router
        .oneshot(chat_request(&body.to_string(), Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["type"], "insufficient_quota");
}

#[tokio::test]
async fn test_streaming_response_ends_with_done() {
    let upstream = MockUpstream::new().with_stream(vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":1}}\n\ndata: [DONE]\n\n",
    ]);
    let server = setup(upstream, 100.0);
    let body = serde_json::json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    });
    let resp = server
        .router
        .oneshot(chat_request(&body.to_string(), Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("chat.completion.chunk"));
    assert!(text.contains("\"content\":\"hi\""));
    assert!(text.contains("\"finish_reason\":\"stop\""));
    assert!(text.ends_with("data: [DONE]\n\n"));
}

// ── Models catalog ─────────────────────────────────────────────

#[tokio::test]
async fn test_models_listing() {
    let server = setup(MockUpstream::new(), 100.0);
    let resp = server
        .router
        .oneshot(
            Request::get("/v1/models")
                .header("authorization", format!("Bearer {API_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let data = json["data"].as_array().unwrap();
    assert!(data.iter().any(|m| m["id"] == "gpt-4o"));
    // Fully deactivated models are hidden by default…
    assert!(data.iter().all(|m| m["id"] != "gpt-4-turbo"));

    let gpt4o = data.iter().find(|m| m["id"] == "gpt-4o").unwrap();
    assert_eq!(
        gpt4o["architecture"]["input_modalities"],
        serde_json::json!(["text", "image"])
    );
    assert!(gpt4o["providers"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn test_models_listing_with_deactivated() {
    let server = setup(MockUpstream::new(), 100.0);
    let resp = server
        .router
        .oneshot(
            Request::get("/v1/models?include_deactivated=true")
                .header("authorization", format!("Bearer {API_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(resp).await;
    let data = json["data"].as_array().unwrap();
    let turbo = data.iter().find(|m| m["id"] == "gpt-4-turbo").unwrap();
    assert!(turbo["deactivated_at"].is_string());
}
