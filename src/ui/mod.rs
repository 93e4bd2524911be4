// Server-rendered pages: landing, login/sign-up, role dashboards, account
// settings and the admin area. Access control lives in `api::guards`.

pub mod pages;

use axum::{
    extract::{Path, RawQuery, State},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::api::admin::apply_admin_update;
use crate::api::auth::{current_session, removal_cookie, PendingSession, Viewer};
use crate::api::error::ValidationErrorBuilder;
use crate::api::metrics;
use crate::api::profile::update_own_profile;
use crate::api::validation::{validate_email, validate_full_name, validate_password};
use crate::models::{NewProfile, ProfileUpdate, UserType};
use crate::notifications;
use crate::session::redirect::{post_login_destination, redirect_from_query, sanitize_redirect, LANDING_PATH};
use crate::session::LandingRedirect;
use crate::AppState;

use pages::SignupValues;

/// GET /
pub async fn landing(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let Some(current) = current_session(&state, &jar) else {
        return pages::landing_page().into_response();
    };

    let delay = state.config.session.landing_redirect_delay();
    let (tx, rx) = oneshot::channel();
    // Dropped with this future, which cancels the pending navigation
    let _redirect = LandingRedirect::schedule(&current.provider, delay, move |target| {
        let _ = tx.send(target);
    });

    let ceiling = state.config.session.init_timeout() + delay;
    match tokio::time::timeout(ceiling, rx).await {
        Ok(Ok(target)) => Redirect::to(&target).into_response(),
        // Anonymous visitors never navigate
        Ok(Err(_)) => pages::landing_page().into_response(),
        Err(_) => pages::loading_page(LANDING_PATH).into_response(),
    }
}

/// GET /login
pub async fn login_page(RawQuery(query): RawQuery) -> Html<String> {
    let redirect = redirect_from_query(query.as_deref());
    pages::login_page(None, redirect.as_deref(), "")
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub redirect: Option<String>,
}

/// POST /login
pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let redirect = form
        .redirect
        .as_deref()
        .and_then(sanitize_redirect)
        .map(str::to_string);
    let email = form.email.trim();

    if email.is_empty() || form.password.is_empty() {
        return pages::login_page(
            Some("Enter your email and password."),
            redirect.as_deref(),
            email,
        )
        .into_response();
    }

    let pending = PendingSession::for_visitor(&state, &jar);
    let identity = match pending.provider().sign_in(email, &form.password).await {
        Ok(identity) => identity,
        Err(e) => {
            metrics::record_sign_in(false);
            pending.discard(&state);
            return pages::login_page(Some(&e.user_message()), redirect.as_deref(), email)
                .into_response();
        }
    };
    metrics::record_sign_in(true);
    let jar = pending.commit(&state, jar);

    // Read the role straight from storage; the session may still be settling
    let user_type = match state.backend.profiles().fetch_profile(&identity.id).await {
        Ok(profile) => profile.and_then(|p| p.user_type),
        Err(e) => {
            tracing::warn!(user_id = %identity.id, error = %e, "Profile fetch after login failed, routing as client");
            metrics::record_profile_fetch_failure();
            None
        }
    };
    let target = post_login_destination(user_type, redirect.as_deref());
    tracing::info!(user_id = %identity.id, target = %target, "Login redirect");
    (jar, Redirect::to(&target)).into_response()
}

/// GET /signup
pub async fn signup_page() -> Html<String> {
    pages::signup_page(None, &SignupValues::default())
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub user_type: String,
}

/// POST /signup
pub async fn signup_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<SignupForm>,
) -> Response {
    let email = form.email.trim().to_string();
    let full_name = form.full_name.trim().to_string();
    let user_type = form
        .user_type
        .parse::<UserType>()
        .ok()
        .filter(UserType::is_self_assignable);
    let values = SignupValues {
        email: email.clone(),
        full_name: full_name.clone(),
        user_type,
    };

    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(&email));
    errors.check("password", validate_password(&form.password));
    if !full_name.is_empty() {
        errors.check("full_name", validate_full_name(&full_name));
    }
    if user_type.is_none() {
        errors.add("user_type", "Choose whether you are hiring or offering services");
    }
    if let Some(message) = errors.first_message() {
        return pages::signup_page(Some(message), &values).into_response();
    }
    let user_type = user_type.unwrap_or(UserType::Client);

    let pending = PendingSession::for_visitor(&state, &jar);
    let outcome = match pending.provider().sign_up(&email, &form.password).await {
        Ok(outcome) => outcome,
        Err(e) => {
            pending.discard(&state);
            return pages::signup_page(Some(&e.user_message()), &values).into_response();
        }
    };

    let new_profile = NewProfile::new(&outcome.identity.id, &email, user_type)
        .with_full_name((!full_name.is_empty()).then_some(full_name));
    if let Err(e) = state.backend.profiles().create_profile(new_profile).await {
        // The account exists either way; without a row the visitor routes as a client
        tracing::warn!(user_id = %outcome.identity.id, error = %e, "Failed to create profile at sign-up");
    }

    if outcome.session.is_none() {
        tracing::info!(user_id = %outcome.identity.id, "Sign-up awaiting email confirmation");
        pending.discard(&state);
        return pages::check_email_page(&email).into_response();
    }

    let profile = pending.provider().refresh_profile().await;
    let target = post_login_destination(profile.and_then(|p| p.user_type), None);
    let jar = pending.commit(&state, jar);
    (jar, Redirect::to(&target)).into_response()
}

/// POST /logout
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(current) = current_session(&state, &jar) {
        // Local state is discarded even if the remote call fails
        let _ = current.provider.sign_out().await;
        state.sessions.remove(&current.id);
    }
    let jar = jar.remove(removal_cookie(&state.config.session));
    (jar, Redirect::to(LANDING_PATH)).into_response()
}

/// GET /dashboard
pub async fn client_dashboard(viewer: Viewer) -> Html<String> {
    pages::client_dashboard_page(&viewer)
}

/// GET /services
pub async fn services(viewer: Viewer) -> Html<String> {
    pages::services_page(&viewer)
}

/// GET /provider/dashboard
pub async fn provider_dashboard(viewer: Viewer) -> Html<String> {
    pages::provider_dashboard_page(&viewer)
}

/// GET /account/settings
pub async fn account_settings(viewer: Viewer) -> Html<String> {
    pages::account_settings_page(&viewer, None, None)
}

#[derive(Debug, Deserialize)]
pub struct AccountSettingsForm {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub location: String,
}

/// POST /account/settings
pub async fn account_settings_submit(
    State(state): State<Arc<AppState>>,
    mut viewer: Viewer,
    Form(form): Form<AccountSettingsForm>,
) -> Html<String> {
    let full_name = form.full_name.trim();
    let update = ProfileUpdate {
        full_name: (!full_name.is_empty()).then(|| full_name.to_string()),
        phone: Some(form.phone.trim().to_string()),
        location: Some(form.location.trim().to_string()),
        ..Default::default()
    };

    match update_own_profile(&state, &viewer, &update).await {
        Ok(profile) => {
            viewer.profile = Some(profile);
            pages::account_settings_page(&viewer, Some("Your changes have been saved."), None)
        }
        Err(e) => pages::account_settings_page(&viewer, None, Some(e.message())),
    }
}

/// GET /admin/dashboard
pub async fn admin_dashboard(State(state): State<Arc<AppState>>, viewer: Viewer) -> Html<String> {
    let stats = match state.backend.profiles().list_profiles().await {
        Ok(profiles) => {
            let pending = notifications::derive_notifications(&profiles, Utc::now()).len();
            Some(pages::AdminStats::from_profiles(&profiles, pending))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load profiles for admin dashboard");
            None
        }
    };
    pages::admin_dashboard_page(&viewer, stats.as_ref())
}

/// GET /admin/users
pub async fn admin_users(State(state): State<Arc<AppState>>, viewer: Viewer) -> Html<String> {
    render_users(&state, &viewer, None).await
}

async fn render_users(state: &AppState, viewer: &Viewer, error: Option<&str>) -> Html<String> {
    match state.backend.profiles().list_profiles().await {
        Ok(profiles) => pages::admin_users_page(viewer, &profiles, error),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list profiles");
            let message = e.user_message();
            pages::admin_users_page(viewer, &[], Some(error.unwrap_or(&message)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdminUserForm {
    #[serde(default)]
    pub is_verified: Option<bool>,
    #[serde(default)]
    pub user_type: Option<String>,
}

/// POST /admin/users/:id
pub async fn admin_user_update(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(id): Path<String>,
    Form(form): Form<AdminUserForm>,
) -> Response {
    let user_type = match form.user_type.as_deref().map(str::parse::<UserType>) {
        Some(Ok(user_type)) => Some(user_type),
        Some(Err(e)) => {
            return render_users(&state, &viewer, Some(e.as_str()))
                .await
                .into_response()
        }
        None => None,
    };
    let update = ProfileUpdate {
        user_type,
        is_verified: form.is_verified,
        ..Default::default()
    };

    match apply_admin_update(&state, &viewer, &id, &update).await {
        Ok(_) => Redirect::to("/admin/users").into_response(),
        Err(e) => render_users(&state, &viewer, Some(e.message()))
            .await
            .into_response(),
    }
}

/// GET /admin/notifications
pub async fn admin_notifications(State(state): State<Arc<AppState>>, viewer: Viewer) -> Html<String> {
    let store = state.backend.profiles();
    match notifications::load(store.as_ref(), Utc::now()).await {
        Ok(list) => pages::admin_notifications_page(&viewer, &list, None),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load notifications");
            pages::admin_notifications_page(&viewer, &[], Some(&e.user_message()))
        }
    }
}
