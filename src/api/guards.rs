//! Access guards for the page routes.
//!
//! Both middlewares wait for the visitor's session to settle (bounded by the
//! init ceiling), then render, show the loading placeholder, or redirect.
//! On success the resolved [`Viewer`] is stored in the request extensions.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use super::auth::{visitor_snapshot, Viewer};
use super::metrics;
use crate::session::{guard, resolve, GuardDecision};
use crate::ui::pages;
use crate::AppState;

fn requested_path(request: &Request<Body>) -> String {
    request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

async fn run_guard(
    state: &AppState,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
    area: &'static str,
    decide: impl FnOnce(crate::session::RouteState, &str) -> GuardDecision,
) -> Response {
    let requested = requested_path(&request);
    let (current, snapshot) = visitor_snapshot(state, &jar).await;
    let route = resolve(&snapshot);

    match decide(route, &requested) {
        GuardDecision::Render => {
            let viewer = current.and_then(|c| Viewer::from_snapshot(c, snapshot).ok());
            match viewer {
                Some(viewer) => {
                    request.extensions_mut().insert(viewer);
                    next.run(request).await
                }
                // Render is only decided for signed-in visitors
                None => pages::loading_page(&requested).into_response(),
            }
        }
        GuardDecision::Placeholder => {
            tracing::debug!(path = %requested, area, "Session still loading, serving placeholder");
            pages::loading_page(&requested).into_response()
        }
        GuardDecision::Redirect(target) => {
            tracing::debug!(path = %requested, %route, area, target = %target, "Guard redirect");
            metrics::record_guard_redirect(area);
            Redirect::to(&target).into_response()
        }
    }
}

/// Any signed-in visitor; anonymous visitors go to login and come back afterwards
pub async fn require_authenticated(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request<Body>,
    next: Next,
) -> Response {
    run_guard(&state, jar, request, next, "authenticated", |route, requested| {
        guard::authenticated_area(route, requested)
    })
    .await
}

/// Admins only; everyone else goes to the site root
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request<Body>,
    next: Next,
) -> Response {
    run_guard(&state, jar, request, next, "admin", |route, _| guard::admin_area(route)).await
}
