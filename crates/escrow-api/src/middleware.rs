//! # Request Metrics
//!
//! Records every HTTP request through the `metrics` facade. The path label
//! is the matched route template (`/v1/escrows/{id}`), never the raw URI,
//! so escrow ids cannot blow up label cardinality. Installed with
//! `route_layer`, which is what makes [`MatchedPath`] visible here.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

pub async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let labels = [
        ("method", method),
        ("path", path),
        ("status", status.as_u16().to_string()),
    ];
    metrics::counter!("escrow_http_requests_total", &labels).increment(1);
    metrics::histogram!("escrow_http_request_duration_seconds", &labels[..2])
        .record(start.elapsed().as_secs_f64());
    if status.is_client_error() || status.is_server_error() {
        metrics::counter!("escrow_http_errors_total", &labels).increment(1);
    }
    response
}
