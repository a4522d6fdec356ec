use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use axum::{
    Json, Router,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::ServiceError,
    log_sink::{AsyncLogSink, LogRecord},
    presets::{DEFAULT_PRESET, PRESETS, PresetName},
    rate_limit::RateLimiter,
    resolver::ResponseResolver,
    streaming::{frame_result, sse_response},
    types::{
        GenerateResponse, GenerationRequest, HealthStatus, ModelInfo, ModelsResponse,
        PresetsResponse, Provenance,
    },
    upstream::UpstreamBackend,
};

const UNKNOWN_CLIENT: &str = "unknown";

/// Process-wide handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub resolver: Arc<ResponseResolver>,
    pub limiter: Arc<RateLimiter>,
    pub log_sink: Arc<AsyncLogSink>,
    pub started_at: Instant,
    pub request_count: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        upstream: Option<Arc<dyn UpstreamBackend>>,
        log_sink: Arc<AsyncLogSink>,
    ) -> Self {
        let resolver = ResponseResolver::new(upstream, config.upstream.resume_content.clone());
        let limiter = RateLimiter::new(config.rate_limit, config.rate_limit_window);
        Self {
            resolver: Arc::new(resolver),
            limiter: Arc::new(limiter),
            log_sink,
            started_at: Instant::now(),
            request_count: Arc::new(AtomicU64::new(0)),
            config,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/models", get(list_models))
        .route("/presets", get(list_presets))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn generate(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let started = Instant::now();
    let Json(request) = payload?;
    request.validate()?;
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let client_ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    if !state.limiter.allow(&client_ip) {
        warn!(%client_ip, "rate limit exceeded");
        return Err(ServiceError::RateLimited);
    }

    let mut params = request.generation_params();
    let system = request
        .system
        .as_deref()
        .or(state.config.upstream.system_prompt.as_deref());
    params.system = state.resolver.enhance_system_prompt(&request.prompt, system);

    let result = state.resolver.resolve(&params, request.stream).await;
    let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(
        provenance = ?result.provenance,
        stream = request.stream,
        preset = request.preset.map(PresetName::as_str),
        processing_time_ms,
        "generation resolved"
    );

    state.log_sink.log(LogRecord {
        timestamp: Utc::now(),
        prompt: request.prompt.clone(),
        response: result.text.clone(),
        usage: result.usage,
        processing_time_ms,
        ip_address: Some(client_ip),
        stream: request.stream,
        preset_used: request.preset,
        model_name: request.model.clone(),
        temperature_used: params.temperature,
        top_p_used: params.top_p,
        max_tokens_used: params.max_tokens,
        system_prompt: request.system.clone(),
        provenance: result.provenance,
        fallback_used: result.provenance == Provenance::Fallback,
    });

    if request.stream {
        let frames = frame_result(state.resolver.upstream().cloned(), params, result);
        return Ok(sse_response(frames).into_response());
    }

    Ok(Json(GenerateResponse {
        response: result.text,
        usage: result.usage,
        generated_at: Utc::now(),
        provenance: result.provenance,
    })
    .into_response())
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let llm_status = match state.resolver.upstream() {
        Some(upstream) => Some(upstream.health_check().await),
        None => None,
    };

    Json(HealthStatus {
        status: "healthy",
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        total_requests: state.request_count.load(Ordering::Relaxed),
        version: env!("CARGO_PKG_VERSION"),
        llm_status,
    })
}

async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ServiceError> {
    let upstream = state
        .resolver
        .upstream()
        .ok_or_else(|| ServiceError::Unavailable("LLM service not available".into()))?;

    let names = upstream
        .list_models()
        .await
        .map_err(|err| ServiceError::Unavailable(format!("Failed to list models: {err}")))?;

    Ok(Json(ModelsResponse {
        models: names.into_iter().map(|name| ModelInfo { name }).collect(),
    }))
}

async fn list_presets() -> Json<PresetsResponse> {
    Json(PresetsResponse {
        presets: PRESETS.to_vec(),
        default: DEFAULT_PRESET,
    })
}
