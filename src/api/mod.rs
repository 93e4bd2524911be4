pub mod admin;
pub mod auth;
pub mod error;
pub mod guards;
pub mod metrics;
pub mod profile;
pub mod rate_limit;
pub mod validation;
mod ws;

use axum::{
    handler::Handler,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::ui;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_limit = middleware::from_fn_with_state(state.clone(), rate_limit::rate_limit_auth);

    // Public pages; credential submissions are rate limited
    let public_pages = Router::new()
        .route("/", get(ui::landing))
        .route(
            "/login",
            get(ui::login_page).post(ui::login_submit.layer(auth_limit.clone())),
        )
        .route(
            "/signup",
            get(ui::signup_page).post(ui::signup_submit.layer(auth_limit)),
        )
        .route("/logout", post(ui::logout));

    let member_pages = Router::new()
        .route("/dashboard", get(ui::client_dashboard))
        .route("/services", get(ui::services))
        .route("/provider/dashboard", get(ui::provider_dashboard))
        .route(
            "/account/settings",
            get(ui::account_settings).post(ui::account_settings_submit),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guards::require_authenticated,
        ));

    let admin_pages = Router::new()
        .route("/admin/dashboard", get(ui::admin_dashboard))
        .route("/admin/users", get(ui::admin_users))
        .route("/admin/users/:id", post(ui::admin_user_update))
        .route("/admin/notifications", get(ui::admin_notifications))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guards::require_admin,
        ));

    // JSON API; extractors enforce sign-in and admin access per handler
    let api_routes = Router::new()
        .route("/session", get(auth::session_info))
        .route(
            "/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .route("/admin/profiles", get(admin::list_profiles))
        .route("/admin/profiles/:id", put(admin::update_profile))
        .route("/admin/notifications", get(admin::list_notifications))
        .route("/admin/notifications/stream", get(ws::notifications_ws))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .merge(public_pages)
        .merge(member_pages)
        .merge(admin_pages)
        .nest("/api", api_routes)
        // Route layer so request metrics are labelled by route template
        .route_layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
