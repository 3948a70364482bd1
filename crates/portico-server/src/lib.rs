//! # portico-server
//!
//! HTTP ingress for the gateway:
//!
//! - `POST /v1/chat/completions` — OpenAI-compatible, buffered or SSE
//! - `GET /v1/models` — the catalog view
//! - `GET /health`, `GET /metrics`
//!
//! Auth is a bearer API key resolved to an org context before the
//! handler runs. Terminal failures come back as OpenAI error envelopes.

pub mod auth;
pub mod metrics;

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response, Sse, sse::Event as SseEvent},
    routing::{get, post},
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use portico_core::{ChatRequest, GatewayError, SseFrame};
use portico_gateway::{DispatchOutcome, Dispatcher};
use portico_providers::OrgContext;

pub use auth::{ApiKeyStore, StaticApiKeys};

/// Shared server state.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub keys: Arc<dyn ApiKeyStore>,
    pub metrics: metrics::Metrics,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct ModelsParams {
    #[serde(default)]
    include_deactivated: bool,
    #[serde(default)]
    exclude_deprecated: bool,
}

/// Build the Axum router.
pub fn build_router(dispatcher: Dispatcher, keys: Arc<dyn ApiKeyStore>, cors: bool) -> Router {
    let state = Arc::new(AppState {
        dispatcher,
        keys,
        metrics: metrics::Metrics::new(),
    });

    let api_routes = Router::new()
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/models", get(models_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api_routes)
        .with_state(state);

    if cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Map a terminal failure onto the OpenAI error envelope.
fn error_response(e: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let error_type = match e.http_status() {
        400 => "invalid_request_error",
        401 => "authentication_error",
        402 => "insufficient_quota",
        403 => "permission_error",
        429 => "rate_limit_error",
        _ => "api_error",
    };
    let body = serde_json::json!({
        "error": {
            "message": e.to_string(),
            "type": error_type,
            "code": e.kind(),
        }
    });
    (status, Json(body)).into_response()
}

/// Middleware that resolves the bearer API key to an org context and
/// stashes it in the request extensions.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    state.metrics.inc_http_requests();

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = token else {
        state.metrics.inc_http_errors();
        warn!("request without bearer token");
        return error_response(&GatewayError::Unauthorized(
            "missing bearer API key".into(),
        ));
    };

    match state.keys.resolve(token).await {
        Ok(org) => {
            request.extensions_mut().insert(org);
            next.run(request).await
        }
        Err(e) => {
            state.metrics.inc_http_errors();
            warn!(error = %e, "API key rejected");
            error_response(&e)
        }
    }
}

async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(org): axum::Extension<OrgContext>,
    body: axum::body::Bytes,
) -> Response {
    let req: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.metrics.inc_http_errors();
            return error_response(&GatewayError::BadRequest(format!(
                "malformed request body: {e}"
            )));
        }
    };

    match state.dispatcher.dispatch(&org, req).await {
        Ok(DispatchOutcome::Buffered(resp)) => {
            state.metrics.inc_completions();
            if resp.metadata.cache_hit {
                state.metrics.inc_cache_hits();
            }
            state
                .metrics
                .add_tokens(resp.usage.prompt_tokens, resp.usage.completion_tokens);
            Json(resp).into_response()
        }
        Ok(DispatchOutcome::Stream {
            request_id,
            model,
            created,
            frames,
        }) => {
            state.metrics.inc_stream_completions();
            Sse::new(relay_frames(request_id, model, created, frames)).into_response()
        }
        Err(e) => {
            state.metrics.inc_http_errors();
            error_response(&e)
        }
    }
}

/// Convert canonical frames into OpenAI stream chunks, terminated by
/// `data: [DONE]`.
fn relay_frames(
    request_id: String,
    model: String,
    created: i64,
    mut frames: tokio::sync::mpsc::Receiver<SseFrame>,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    async_stream::stream! {
        let mut first = true;
        while let Some(frame) = frames.recv().await {
            let terminal = frame.is_terminal();
            let chunk = match frame {
                SseFrame::Delta(delta) => {
                    let mut d = serde_json::json!({});
                    if first {
                        d["role"] = serde_json::json!("assistant");
                        first = false;
                    }
                    if let Some(content) = delta.content {
                        d["content"] = serde_json::json!(content);
                    }
                    if let Some(reasoning) = delta.reasoning {
                        d["reasoning"] = serde_json::json!(reasoning);
                    }
                    if !delta.tool_calls.is_empty() {
                        let calls: Vec<serde_json::Value> = delta
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                serde_json::json!({
                                    "index": tc.index,
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments,
                                    },
                                })
                            })
                            .collect();
                        d["tool_calls"] = serde_json::json!(calls);
                    }
                    serde_json::json!({
                        "id": request_id,
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": model,
                        "choices": [{"index": 0, "delta": d, "finish_reason": null}],
                    })
                }
                SseFrame::Done { finish_reason, usage } => serde_json::json!({
                    "id": request_id,
                    "object": "chat.completion.chunk",
                    "created": created,
                    "model": model,
                    "choices": [{"index": 0, "delta": {}, "finish_reason": finish_reason}],
                    "usage": usage,
                }),
                SseFrame::Error { message, kind } => serde_json::json!({
                    "error": {"message": message, "type": "api_error", "code": kind},
                }),
            };
            yield Ok(SseEvent::default().data(chunk.to_string()));
            if terminal {
                break;
            }
        }
        yield Ok(SseEvent::default().data("[DONE]"));
    }
}

async fn models_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ModelsParams>,
) -> Json<serde_json::Value> {
    let views = state
        .dispatcher
        .catalog()
        .model_views(params.include_deactivated, params.exclude_deprecated);
    Json(serde_json::json!({ "data": views }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    state.metrics.inc_http_requests();
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: state.metrics.uptime_secs(),
    })
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> (
    StatusCode,
    [(axum::http::header::HeaderName, &'static str); 1],
    String,
) {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render_prometheus(),
    )
}

/// Start the HTTP server, stopping gracefully when `shutdown` resolves.
pub async fn start_server(
    listen: &str,
    router: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> portico_core::Result<()> {
    info!(listen = %listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| GatewayError::Internal(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GatewayError::Internal(format!("server error: {e}")))?;

    Ok(())
}
