use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts as PromOpts, Registry,
    TextEncoder,
};

struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_in_flight_requests: IntGauge,
    chunks_processed: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn build_metrics() -> Result<Metrics> {
    let registry = Registry::new();

    let http_requests_total = IntCounterVec::new(
        PromOpts::new(
            "whisper_relay_http_requests_total",
            "Total HTTP requests served by whisper-relay-server.",
        ),
        &["status"],
    )
    .context("invalid definition for whisper_relay_http_requests_total")?;

    let http_request_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "whisper_relay_http_request_duration_seconds",
            "HTTP request latency in seconds.",
        ),
        &["status"],
    )
    .context("invalid definition for whisper_relay_http_request_duration_seconds")?;

    let http_in_flight_requests = IntGauge::new(
        "whisper_relay_http_in_flight_requests",
        "Current number of in-flight HTTP requests.",
    )
    .context("invalid definition for whisper_relay_http_in_flight_requests")?;

    let chunks_processed = HistogramVec::new(
        HistogramOpts::new(
            "whisper_relay_chunks_processed",
            "Number of audio chunks processed per transcription request.",
        )
        .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0]),
        &["outcome"],
    )
    .context("invalid definition for whisper_relay_chunks_processed")?;

    registry
        .register(Box::new(http_requests_total.clone()))
        .context("failed to register whisper_relay_http_requests_total")?;
    registry
        .register(Box::new(http_request_duration_seconds.clone()))
        .context("failed to register whisper_relay_http_request_duration_seconds")?;
    registry
        .register(Box::new(http_in_flight_requests.clone()))
        .context("failed to register whisper_relay_http_in_flight_requests")?;
    registry
        .register(Box::new(chunks_processed.clone()))
        .context("failed to register whisper_relay_chunks_processed")?;

    Ok(Metrics {
        registry,
        http_requests_total,
        http_request_duration_seconds,
        http_in_flight_requests,
        chunks_processed,
    })
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

pub fn init() -> Result<()> {
    if metrics().is_some() {
        return Ok(());
    }

    let built = build_metrics()?;
    let _ = METRICS.set(built);
    Ok(())
}

/// Record the chunk count for a completed (successful) transcription request.
pub fn observe_chunks_processed(chunks: usize) {
    if let Some(metrics) = metrics() {
        metrics
            .chunks_processed
            .with_label_values(&["success"])
            .observe(chunks as f64);
    }
}

pub async fn prometheus_metrics() -> Response {
    if metrics().is_none() {
        if let Err(err) = init() {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to initialize metrics: {err:#}"),
            )
                .into_response();
        }
    }

    let Some(metrics) = metrics() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "metrics not initialized").into_response();
    };

    let families = metrics.registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics",
        )
            .into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        buf,
    )
        .into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str())
        .unwrap_or_else(|| req.uri().path())
        .to_owned();

    if route == "/metrics" || route == "/health" {
        return next.run(req).await;
    }

    let Some(metrics) = metrics() else {
        return next.run(req).await;
    };

    let start = Instant::now();

    metrics.http_in_flight_requests.inc();
    let response = next.run(req).await;
    metrics.http_in_flight_requests.dec();

    let status = response.status().as_u16().to_string();
    metrics
        .http_requests_total
        .with_label_values(&[&status])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&status])
        .observe(start.elapsed().as_secs_f64());

    response
}
