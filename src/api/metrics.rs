//! Prometheus metrics endpoint and HTTP request tracking middleware.
//!
//! Besides per-request counters this module records sign-in outcomes, guard
//! redirects, profile lookup failures and the number of live sessions.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const SIGN_INS_TOTAL: &str = "sign_ins_total";
pub const GUARD_REDIRECTS_TOTAL: &str = "guard_redirects_total";
pub const PROFILE_FETCH_FAILURES_TOTAL: &str = "profile_fetch_failures_total";
pub const ACTIVE_SESSIONS: &str = "active_sessions";

const UNMATCHED_ROUTE: &str = "unmatched";

/// Install the Prometheus recorder. Call once at startup.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests received"
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(SIGN_INS_TOTAL, "Sign-in attempts by outcome");
    describe_counter!(
        GUARD_REDIRECTS_TOTAL,
        "Requests turned away by an access guard, by area"
    );
    describe_counter!(
        PROFILE_FETCH_FAILURES_TOTAL,
        "Profile lookups that failed and fell back to client routing"
    );
    describe_gauge!(ACTIVE_SESSIONS, "Number of live visitor sessions");

    Ok(handle)
}

/// GET /metrics
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    set_active_sessions(state.sessions.len());

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Route template the request matched. Must run as a route layer so the
/// router has already set `MatchedPath`; anything else shares one label.
fn route_label(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

/// Records `http_requests_total` and `http_request_duration_seconds` per
/// method and matched route.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let path = route_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_sign_in(success: bool) {
    let outcome = if success { "success" } else { "failed" };
    counter!(SIGN_INS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_guard_redirect(area: &'static str) {
    counter!(GUARD_REDIRECTS_TOTAL, "area" => area).increment(1);
}

pub fn record_profile_fetch_failure() {
    counter!(PROFILE_FETCH_FAILURES_TOTAL).increment(1);
}

pub fn set_active_sessions(count: usize) {
    gauge!(ACTIVE_SESSIONS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(HTTP_REQUESTS_TOTAL.ends_with("_total"));
        assert!(SIGN_INS_TOTAL.ends_with("_total"));
        assert!(GUARD_REDIRECTS_TOTAL.ends_with("_total"));
        assert!(PROFILE_FETCH_FAILURES_TOTAL.ends_with("_total"));
        assert!(HTTP_REQUEST_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_unrouted_requests_share_one_label() {
        let request = Request::builder()
            .uri("/admin/users/3f2a9c")
            .body(Body::empty())
            .unwrap();
        assert_eq!(route_label(&request), UNMATCHED_ROUTE);
    }

    #[tokio::test]
    async fn test_route_layer_sees_route_template() {
        use axum::{middleware, routing::get, Router};
        use tower::ServiceExt;

        async fn tag_route(request: Request<Body>, next: Next) -> Response {
            let label = route_label(&request);
            let mut response = next.run(request).await;
            if let Ok(value) = label.parse() {
                response.headers_mut().insert("x-route", value);
            }
            response
        }

        let app: Router = Router::new()
            .route("/admin/users/:id", get(|| async { "ok" }))
            .route_layer(middleware::from_fn(tag_route));

        let request = Request::builder()
            .uri("/admin/users/3f2a9c")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-route"], "/admin/users/:id");
    }

    #[test]
    fn test_recording_without_recorder_is_a_no_op() {
        record_sign_in(true);
        record_guard_redirect("admin");
        record_profile_fetch_failure();
        set_active_sessions(3);
    }
}
