//! Structured logging and request tracing middleware
//!
//! This module provides:
//! - Unique request ID generation for each request
//! - Structured logging with tracing
//! - Per-route request/latency metrics

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::common::metrics::MetricsRegistry;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Generate a new unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Middleware that adds request ID, structured logging and metrics to each request
pub async fn request_tracing_middleware(
    State(metrics): State<Arc<MetricsRegistry>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let start = Instant::now();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id);

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    // Route template keeps metric labels bounded (ids are not labels)
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let client_ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
        client_ip = %client_ip,
    );

    let mut response = next.run(request).instrument(span.clone()).await;

    let duration = start.elapsed();
    let status = response.status();
    metrics.record_request(&route, duration, status.is_success());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let _guard = span.enter();
    if status.is_success() {
        info!(
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    } else if status.is_client_error() {
        warn!(
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Client error"
        );
    } else {
        warn!(
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Server error"
        );
    }

    response
}
