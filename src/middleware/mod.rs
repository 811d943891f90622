// CORS and request logging middleware

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Request logging middleware
///
/// Tags each request with a short id and logs method, path, status and latency.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    tracing::debug!("[{}] {} {}", request_id, method, path);

    let response = next.run(request).await;
    let status = response.status();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    if status.is_server_error() {
        tracing::warn!(
            "[{}] {} {} -> {} ({:.1}ms)",
            request_id,
            method,
            path,
            status,
            latency_ms
        );
    } else {
        tracing::info!(
            "[{}] {} {} -> {} ({:.1}ms)",
            request_id,
            method,
            path,
            status,
            latency_ms
        );
    }

    response
}

/// Create CORS middleware layer
///
/// Configures CORS to allow all origins, methods, and headers.
/// Handles OPTIONS preflight requests automatically.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
