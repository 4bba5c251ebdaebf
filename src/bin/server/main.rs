use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};

mod metrics;

use whisper_relay::error::Error;
use whisper_relay::{AppConfig, Orchestrator, TranscriptionResult};

#[derive(Clone)]
struct AppState {
    config: Arc<AppConfig>,
    orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
struct TranscribeRequest {
    audio_url: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Serialize)]
struct TranscribeData {
    text: String,
    duration: f64,
    confidence: f32,
    processing_time: f64,
    model: String,
    language: String,
    chunks_processed: usize,
}

impl From<TranscriptionResult> for TranscribeData {
    fn from(r: TranscriptionResult) -> Self {
        Self {
            text: r.text,
            duration: r.duration_s,
            confidence: r.confidence,
            processing_time: r.processing_time_s,
            model: r.model,
            language: r.language,
            chunks_processed: r.chunks_processed,
        }
    }
}

#[derive(Debug, Serialize)]
struct SuccessBody {
    error_code: u32,
    data: TranscribeData,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error_code: u32,
    message: String,
}

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = status_for(&self.0);
        let body = Json(ErrorBody {
            error_code: code,
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// Map a typed core error to an HTTP status code and a stable error code (§6, §7).
fn status_for(err: &Error) -> (StatusCode, u32) {
    match err {
        Error::InvalidUrl(_) => (StatusCode::BAD_REQUEST, 1),
        Error::Unauthorized => (StatusCode::UNAUTHORIZED, 2),
        Error::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, 3),
        Error::AudioDecodeError(_) | Error::AudioSliceError(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, 4)
        }
        Error::ChunkTimeout | Error::OverallTimeout | Error::DownloadTimeout => {
            (StatusCode::GATEWAY_TIMEOUT, 5)
        }
        Error::CancelledByClient => (
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            6,
        ),
        Error::ArtifactMissing(_)
        | Error::ModelInitError(_)
        | Error::DownloadError(_)
        | Error::TransientStorageError(_)
        | Error::EngineError(_) => (StatusCode::INTERNAL_SERVER_ERROR, 7),
    }
}

#[tokio::main]
async fn main() {
    whisper_relay::logging::init();

    if let Err(err) = run().await {
        error!(error = ?err, "whisper-relay-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Arc::new(AppConfig::from_env().context("failed to load configuration")?);

    if let Err(err) = metrics::init() {
        tracing::warn!(error = ?err, "metrics disabled (init failed)");
    }

    let transcriber = whisper_relay::engine::init(&config)
        .context("failed to initialize whisper engine; refusing to start")?;
    let orchestrator =
        Arc::new(Orchestrator::new(config.clone(), transcriber).context("failed to build orchestrator")?);

    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port)
        .parse()
        .context("invalid BIND_HOST/BIND_PORT")?;

    let state = AppState { config: config.clone(), orchestrator };

    let app = Router::new()
        .route("/transcribe", post(transcribe))
        .route_layer(from_fn_with_state(state.clone(), require_api_key))
        .route("/health", get(health))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/swagger/{*path}", get(swagger_placeholder))
        .route_layer(axum::middleware::from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn require_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    if state.config.api_key.is_empty() {
        return next.run(request).await;
    }

    let provided = headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided != state.config.api_key {
        return AppError(Error::Unauthorized).into_response();
    }

    next.run(request).await
}

async fn health() -> StatusCode {
    if whisper_relay::engine::global().is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn swagger_placeholder() -> (StatusCode, [(header::HeaderName, &'static str); 1], &'static str) {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "API documentation is not bundled with this deployment.",
    )
}

async fn transcribe(
    State(state): State<AppState>,
    Json(body): Json<TranscribeRequest>,
) -> Result<Json<SuccessBody>, AppError> {
    let result = state
        .orchestrator
        .transcribe(&body.audio_url, body.language.as_deref())
        .await;

    if let Ok(r) = &result {
        metrics::observe_chunks_processed(r.chunks_processed);
    }

    let data = result?.into();
    Ok(Json(SuccessBody {
        error_code: 0,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_maps_to_bad_request() {
        let (status, code) = status_for(&Error::InvalidUrl("bad".to_owned()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, 1);
    }

    #[test]
    fn chunk_timeout_maps_to_gateway_timeout() {
        let (status, _) = status_for(&Error::ChunkTimeout);
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn payload_too_large_maps_to_413() {
        let (status, _) = status_for(&Error::PayloadTooLarge);
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
