//! Cookie-bound visitor sessions and the extractors built on them.
//!
//! The session cookie carries only an opaque registry id; the tokens issued
//! by the auth service stay server-side inside the visitor's
//! [`SessionProvider`].

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use std::sync::Arc;

use super::error::ApiError;
use crate::backend::Identity;
use crate::config::SessionConfig;
use crate::models::Profile;
use crate::session::{resolve, RouteState, SessionProvider, SessionSnapshot};
use crate::AppState;

/// A registry session named by the request's cookie
#[derive(Clone)]
pub struct CurrentSession {
    pub id: String,
    pub provider: Arc<SessionProvider>,
}

pub fn current_session(state: &AppState, jar: &CookieJar) -> Option<CurrentSession> {
    let id = jar.get(&state.config.session.cookie_name)?.value().to_string();
    let provider = state.sessions.get(&id)?;
    Some(CurrentSession { id, provider })
}

/// The session a credential submission signs into. A visitor without a
/// cookie gets a provisional session that is only kept (and given a cookie)
/// once the submission succeeds.
pub struct PendingSession {
    pub current: CurrentSession,
    fresh: bool,
}

impl PendingSession {
    pub fn for_visitor(state: &AppState, jar: &CookieJar) -> Self {
        if let Some(current) = current_session(state, jar) {
            return Self {
                current,
                fresh: false,
            };
        }
        let (id, provider) = state.sessions.create();
        Self {
            current: CurrentSession { id, provider },
            fresh: true,
        }
    }

    pub fn provider(&self) -> &SessionProvider {
        &self.current.provider
    }

    /// Keep the session, adding its cookie if it is new
    pub fn commit(self, state: &AppState, jar: CookieJar) -> CookieJar {
        if self.fresh {
            jar.add(session_cookie(&state.config.session, &self.current.id))
        } else {
            jar
        }
    }

    /// Tear down a provisional session; an existing one is left alone
    pub fn discard(self, state: &AppState) {
        if self.fresh {
            state.sessions.remove(&self.current.id);
        }
    }
}

pub fn session_cookie(config: &SessionConfig, id: &str) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.secure_cookie)
        .build()
}

/// Cookie that clears the session id in the browser
pub fn removal_cookie(config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), String::new()))
        .path("/")
        .build()
}

/// Wait for the session to settle, but never longer than the init ceiling
pub async fn settled_within(state: &AppState, provider: &SessionProvider) -> SessionSnapshot {
    let ceiling = state.config.session.init_timeout();
    match tokio::time::timeout(ceiling, provider.settled()).await {
        Ok(snapshot) => snapshot,
        Err(_) => {
            tracing::warn!(
                timeout_secs = ceiling.as_secs(),
                "Session did not settle in time"
            );
            provider.snapshot()
        }
    }
}

/// Settled snapshot for whoever sent this request; no cookie means anonymous
pub async fn visitor_snapshot(
    state: &AppState,
    jar: &CookieJar,
) -> (Option<CurrentSession>, SessionSnapshot) {
    match current_session(state, jar) {
        Some(current) => {
            let snapshot = settled_within(state, &current.provider).await;
            (Some(current), snapshot)
        }
        None => (None, SessionSnapshot::anonymous()),
    }
}

/// A signed-in visitor whose session has settled
#[derive(Clone)]
pub struct Viewer {
    pub session: CurrentSession,
    pub identity: Identity,
    pub profile: Option<Profile>,
    pub route: RouteState,
}

impl Viewer {
    /// `Err` carries the route state when the visitor is not signed in (or still loading)
    pub fn from_snapshot(
        session: CurrentSession,
        snapshot: SessionSnapshot,
    ) -> Result<Self, RouteState> {
        let route = resolve(&snapshot);
        match snapshot.identity {
            Some(identity) if route.is_authenticated() => Ok(Self {
                session,
                identity,
                profile: snapshot.profile,
                route,
            }),
            _ => Err(route),
        }
    }

    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .map(Profile::display_name)
            .unwrap_or(&self.identity.email)
    }
}

fn rejection(route: RouteState) -> ApiError {
    match route {
        RouteState::Loading => ApiError::service_unavailable("Session is still loading"),
        _ => ApiError::unauthorized("Sign in required"),
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Set by the page guards
        if let Some(viewer) = parts.extensions.get::<Viewer>() {
            return Ok(viewer.clone());
        }

        let jar = CookieJar::from_headers(&parts.headers);
        let current = current_session(state, &jar).ok_or_else(|| rejection(RouteState::Anonymous))?;
        let snapshot = settled_within(state, &current.provider).await;
        Viewer::from_snapshot(current, snapshot).map_err(rejection)
    }
}

/// A signed-in admin or super admin
#[derive(Clone)]
pub struct AdminViewer(pub Viewer);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminViewer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let viewer = Viewer::from_request_parts(parts, state).await?;
        if viewer.route != RouteState::Admin {
            tracing::info!(user_id = %viewer.identity.id, route = %viewer.route, "Admin API refused");
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminViewer(viewer))
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub state: RouteState,
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
}

/// GET /api/session
pub async fn session_info(State(state): State<Arc<AppState>>, jar: CookieJar) -> Json<SessionResponse> {
    let (_, snapshot) = visitor_snapshot(&state, &jar).await;
    Json(SessionResponse {
        state: resolve(&snapshot),
        identity: snapshot.identity,
        profile: snapshot.profile,
    })
}
