mod rate_limit;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Json, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tmpa_agents::{
    load_router_config, SupportAgent, TurnReply, TurnRequest, DEFAULT_STATE_TTL_HOURS,
};
use tmpa_core::{OutboundMessage, RouterConfig, StepMetadata};
use tmpa_observability::{AppMetrics, MetricsSnapshot};
use tmpa_storage::Store;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub use crate::rate_limit::ClientRateLimiter;

const MAX_BODY_BYTES: usize = 16 * 1024;
// The web client inlines screenshots as base64 in `metadata.attachment`.
const MAX_WEBHOOK_BODY_BYTES: usize = 10 * 1024 * 1024;
const MAX_MESSAGE_LEN: usize = 2_000;
const STATE_PURGE_EVERY: Duration = Duration::from_secs(60 * 60);

/// Process settings, read from `TMPA_*` environment variables.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub database_url: Option<String>,
    pub api_key: String,
    pub allowed_origins: Vec<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    /// Stored conversations idle longer than this are purged hourly; `None` keeps them.
    pub state_ttl: Option<chrono::Duration>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            api_key: "dev-tmpa-key".to_string(),
            allowed_origins: vec!["http://localhost:5173".to_string()],
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 120,
            state_ttl: state_ttl_from_hours(DEFAULT_STATE_TTL_HOURS),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env::var("TMPA_DATABASE_URL")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            api_key: env::var("TMPA_API_KEY").unwrap_or(defaults.api_key),
            allowed_origins: env::var("TMPA_ALLOWED_ORIGINS")
                .ok()
                .map(|value| parse_origins(&value))
                .filter(|origins| !origins.is_empty())
                .unwrap_or(defaults.allowed_origins),
            rate_limit_window: env::var("TMPA_RATE_LIMIT_WINDOW_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            rate_limit_max: env::var("TMPA_RATE_LIMIT_MAX")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.rate_limit_max),
            state_ttl: env::var("TMPA_STATE_TTL_HOURS")
                .ok()
                .and_then(|value| value.trim().parse::<i64>().ok())
                .map(state_ttl_from_hours)
                .unwrap_or(defaults.state_ttl),
        }
    }
}

/// Zero or negative hours disable purging.
fn state_ttl_from_hours(hours: i64) -> Option<chrono::Duration> {
    (hours > 0).then(|| chrono::Duration::hours(hours))
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<SupportAgent<Store>>,
    pub metrics: Arc<AppMetrics>,
    pub api_key: String,
    pub limiter: ClientRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
    pub store_backend: &'static str,
}

pub async fn build_app() -> Result<Router> {
    build_app_with(ApiConfig::from_env(), load_router_config()?).await
}

pub async fn build_app_with(config: ApiConfig, router_config: RouterConfig) -> Result<Router> {
    let metrics = AppMetrics::shared();

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };
    let store_backend = store.backend();

    let agent = Arc::new(SupportAgent::new(
        router_config,
        Arc::new(store),
        metrics.clone(),
    ));

    if let Some(ttl) = config.state_ttl {
        spawn_state_purge_task(agent.clone(), ttl, STATE_PURGE_EVERY);
    }

    let state = ApiState {
        agent,
        metrics,
        api_key: config.api_key,
        limiter: ClientRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
        allowed_origins: Arc::new(config.allowed_origins),
        store_backend,
    };

    Ok(build_router(state))
}

/// Drops conversations idle for longer than `ttl`, once right away and then
/// every `every`.
pub fn spawn_state_purge_task(
    agent: Arc<SupportAgent<Store>>,
    ttl: chrono::Duration,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match agent.purge_idle(ttl).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "purged idle conversations"),
                Err(err) => warn!(error = %format!("{err:#}"), "idle conversation purge failed"),
            }
        }
    })
}

pub fn build_router(state: ApiState) -> Router {
    let webhook: Router<ApiState> = Router::new()
        .route("/webhooks/rest/webhook", post(rest_webhook))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_WEBHOOK_BODY_BYTES));

    let api: Router<ApiState> = Router::new()
        .route("/v1/turn", post(turn))
        .route("/v1/flows", get(flows))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    Router::new()
        .route("/health", get(health))
        .merge(webhook)
        .merge(api)
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    store: &'static str,
    flows: usize,
    metrics: MetricsSnapshot,
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        store: state.store_backend,
        flows: state.agent.flows().len(),
        metrics: state.metrics.snapshot(),
    };
    (StatusCode::OK, Json(payload))
}

#[derive(Debug, Clone, Deserialize)]
struct IntentRef {
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TurnBody {
    conversation_id: Option<String>,
    text: String,
    intent: Option<IntentRef>,
    lang: Option<String>,
}

async fn turn(State(state): State<ApiState>, Json(body): Json<TurnBody>) -> Response {
    if body.text.chars().count() > MAX_MESSAGE_LEN {
        return message_too_long();
    }

    let request = TurnRequest {
        conversation_id: body.conversation_id,
        text: body.text,
        intent: body.intent.and_then(|intent| intent.name),
        lang: body.lang,
    };

    match state.agent.handle_turn(request).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(err) => turn_failed(err),
    }
}

/// `attachment` is accepted by the client contract but not read.
#[derive(Debug, Clone, Default, Deserialize)]
struct WebhookMetadata {
    intent: Option<IntentRef>,
    lang: Option<String>,
}

/// Body of the REST channel the web client posts to.
#[derive(Debug, Clone, Deserialize)]
struct WebhookBody {
    sender: Option<String>,
    message: String,
    metadata: Option<WebhookMetadata>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct BotMessage {
    recipient_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom: Option<StepMetadata>,
}

impl BotMessage {
    fn from_outbound(recipient_id: &str, message: OutboundMessage) -> Self {
        let mut bot = Self {
            recipient_id: recipient_id.to_string(),
            text: None,
            response: None,
            custom: None,
        };
        match message {
            OutboundMessage::Template { key } => bot.response = Some(key),
            OutboundMessage::Text { text } => bot.text = Some(text),
            OutboundMessage::Metadata(metadata) => bot.custom = Some(metadata),
        }
        bot
    }
}

async fn rest_webhook(State(state): State<ApiState>, Json(body): Json<WebhookBody>) -> Response {
    if body.message.chars().count() > MAX_MESSAGE_LEN {
        return message_too_long();
    }

    let sender = body
        .sender
        .map(|sender| sender.trim().to_string())
        .filter(|sender| !sender.is_empty())
        .unwrap_or_else(|| "default".to_string());
    let metadata = body.metadata.unwrap_or_default();
    let request = TurnRequest {
        conversation_id: Some(sender.clone()),
        text: body.message,
        intent: metadata.intent.and_then(|intent| intent.name),
        lang: metadata.lang,
    };

    match state.agent.handle_turn(request).await {
        Ok(TurnReply { messages, .. }) => {
            let messages = messages
                .into_iter()
                .map(|message| BotMessage::from_outbound(&sender, message))
                .collect::<Vec<_>>();
            (StatusCode::OK, Json(messages)).into_response()
        }
        Err(err) => turn_failed(err),
    }
}

#[derive(Debug, Serialize)]
struct FlowSummary {
    id: String,
    total_steps: usize,
    steps: Vec<String>,
}

async fn flows(State(state): State<ApiState>) -> impl IntoResponse {
    let flows = state
        .agent
        .flows()
        .flows()
        .iter()
        .map(|flow| FlowSummary {
            id: flow.id.clone(),
            total_steps: flow.total_steps(),
            steps: flow.steps.clone(),
        })
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(flows))
}

fn message_too_long() -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(serde_json::json!({
            "error": "message_too_long",
            "message": format!("message exceeds {} characters", MAX_MESSAGE_LEN)
        })),
    )
        .into_response()
}

fn turn_failed(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "turn failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": "turn_failed",
            "message": "the conversation state could not be loaded or saved"
        })),
    )
        .into_response()
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/health")
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if request.method() == Method::OPTIONS || is_public_endpoint(path.as_str()) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let query_token = Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.token)
        .unwrap_or_default();

    // The web widget calls the webhook from an allowed origin without a key,
    // or with the key as `?token=`.
    if header_key == state.api_key
        || query_token == state.api_key
        || request_origin_is_allowed(&state, request.headers())
    {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "unauthorized",
            "message": "missing or invalid x-api-key or token, and request origin is not allowed"
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn request_origin_is_allowed(state: &ApiState, headers: &HeaderMap) -> bool {
    headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(|origin| origin.trim().trim_end_matches('/'))
        .map(|origin| state.allowed_origins.iter().any(|allowed| allowed == origin))
        .unwrap_or(false)
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if !state.limiter.allow(&ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "message": "rate limit exceeded for this client"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| "local".to_string())
}
