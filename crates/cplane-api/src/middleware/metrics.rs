//! # Request Metrics
//!
//! HTTP request counts and latency recorded through the `metrics` facade.
//! Without an installed recorder (tests, metrics disabled) the calls are
//! no-ops. The exporter renders them at `/metrics`.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

pub const HTTP_REQUESTS_TOTAL: &str = "cplane_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "cplane_http_request_duration_seconds";

/// Route template for labelling, so that path parameters do not explode
/// label cardinality.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = route_label(&request);
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path)
        .record(start.elapsed().as_secs_f64());

    response
}
