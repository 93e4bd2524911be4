//! HTTP client for the hosted auth/storage service.
//!
//! Auth calls go to the GoTrue-style `/auth/v1` endpoints with the public key;
//! profile rows are read and written through the PostgREST-style `/rest/v1`
//! endpoints with the service-role key.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

use super::{
    AuthChange, AuthClient, AuthEvent, AuthSession, Backend, BackendError, Identity,
    ProfileStore, SignUpOutcome, EVENT_CHANNEL_CAPACITY,
};
use crate::config::BackendConfig;
use crate::models::{NewProfile, Profile, ProfileUpdate};

const PROFILES_PATH: &str = "/rest/v1/profiles";

/// Refresh access tokens this long before they expire
const REFRESH_MARGIN_SECS: i64 = 30;

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: GoTrueUser,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(self.expires_in),
            identity: Identity {
                id: self.user.id,
                email: self.user.email.unwrap_or_default(),
            },
        }
    }
}

/// Map a non-success response to a [`BackendError`]
fn classify_error(status: reqwest::StatusCode, body: &str) -> BackendError {
    let lower = body.to_lowercase();
    match status.as_u16() {
        400 | 401
            if lower.contains("invalid_grant")
                || lower.contains("invalid_credentials")
                || lower.contains("invalid login credentials") =>
        {
            BackendError::InvalidCredentials
        }
        422 | 400 if lower.contains("already registered") || lower.contains("user_already_exists") => {
            BackendError::AlreadyRegistered
        }
        401 | 403 => BackendError::Unauthorized,
        404 => BackendError::NotFound("resource".to_string()),
        409 => BackendError::Conflict(body.to_string()),
        code => BackendError::Service {
            status: code,
            message: body.to_string(),
        },
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(classify_error(status, &body))
}

struct RestInner {
    base_url: String,
    anon_key: String,
    service_role_key: String,
    http: reqwest::Client,
    feed_poll_interval: Duration,
    inserts: broadcast::Sender<Profile>,
    feed_started: AtomicBool,
}

impl RestInner {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("apikey", &self.anon_key)
    }

    fn table_request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(PROFILES_PATH))
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<AuthSession, BackendError> {
        let response = self
            .auth_request(reqwest::Method::POST, "/auth/v1/token")
            .query(&[("grant_type", grant_type)])
            .json(&body)
            .send()
            .await?;
        let token: TokenResponse = check(response).await?.json().await?;
        Ok(token.into_session())
    }

    async fn profiles_since(&self, since: DateTime<Utc>) -> Result<Vec<Profile>, BackendError> {
        let response = self
            .table_request(reqwest::Method::GET)
            .query(&[
                ("select", "*".to_string()),
                ("created_at", format!("gt.{}", since.to_rfc3339())),
                ("order", "created_at.asc".to_string()),
            ])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Polls for new profile rows while anyone is listening
async fn run_insert_feed(inner: Weak<RestInner>, interval: Duration) {
    let mut last_seen = Utc::now();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.inserts.receiver_count() == 0 {
            continue;
        }
        match inner.profiles_since(last_seen).await {
            Ok(rows) => {
                for profile in rows {
                    last_seen = last_seen.max(profile.created_at);
                    let _ = inner.inserts.send(profile);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Profile insert feed poll failed");
            }
        }
    }
    tracing::debug!("Profile insert feed stopped");
}

/// Backend reached over HTTP
#[derive(Clone)]
pub struct RestBackend {
    inner: Arc<RestInner>,
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .context("backend.url is not set")?
            .trim_end_matches('/')
            .to_string();
        let anon_key = config.anon_key.clone().context("backend.anon_key is not set")?;
        let service_role_key = config
            .service_role_key
            .clone()
            .context("backend.service_role_key is not set")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("marketplace/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let (inserts, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(RestInner {
                base_url,
                anon_key,
                service_role_key,
                http,
                feed_poll_interval: Duration::from_secs(config.feed_poll_interval_secs.max(1)),
                inserts,
                feed_started: AtomicBool::new(false),
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }
}

impl Backend for RestBackend {
    fn auth_client(&self) -> Arc<dyn AuthClient> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(RestAuthClient {
            inner: self.inner.clone(),
            session: Mutex::new(None),
            events,
        })
    }

    fn profiles(&self) -> Arc<dyn ProfileStore> {
        Arc::new(RestProfileStore {
            inner: self.inner.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}

struct RestAuthClient {
    inner: Arc<RestInner>,
    session: Mutex<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestAuthClient {
    fn emit(&self, change: AuthChange, session: Option<AuthSession>) {
        let _ = self.events.send(AuthEvent { change, session });
    }

    fn store_session(&self, session: AuthSession, change: AuthChange) {
        *self.session.lock() = Some(session.clone());
        self.emit(change, Some(session));
    }

    fn clear_session(&self) -> Option<AuthSession> {
        let previous = self.session.lock().take();
        if previous.is_some() {
            self.emit(AuthChange::SignedOut, None);
        }
        previous
    }
}

#[async_trait]
impl AuthClient for RestAuthClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let session = self
            .inner
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        self.store_session(session.clone(), AuthChange::SignedIn);
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, BackendError> {
        let response = self
            .inner
            .auth_request(reqwest::Method::POST, "/auth/v1/signup")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body: serde_json::Value = check(response).await?.json().await?;

        // With auto-confirm the service answers with a full token response,
        // otherwise with the bare user awaiting confirmation.
        if body.get("access_token").is_some() {
            let token: TokenResponse =
                serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))?;
            let session = token.into_session();
            self.store_session(session.clone(), AuthChange::SignedIn);
            Ok(SignUpOutcome {
                identity: session.identity.clone(),
                session: Some(session),
            })
        } else {
            let user: GoTrueUser =
                serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))?;
            Ok(SignUpOutcome {
                identity: Identity {
                    id: user.id,
                    email: user.email.unwrap_or_else(|| email.to_string()),
                },
                session: None,
            })
        }
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let Some(session) = self.clear_session() else {
            return Ok(());
        };
        let response = self
            .inner
            .auth_request(reqwest::Method::POST, "/auth/v1/logout")
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<AuthSession>, BackendError> {
        let current = self.session.lock().clone();
        let Some(session) = current else {
            return Ok(None);
        };
        if !session.expires_within(chrono::Duration::seconds(REFRESH_MARGIN_SECS), Utc::now()) {
            return Ok(Some(session));
        }

        match self
            .inner
            .token_grant(
                "refresh_token",
                json!({ "refresh_token": session.refresh_token }),
            )
            .await
        {
            Ok(refreshed) => {
                tracing::debug!(user_id = %refreshed.identity.id, "Access token refreshed");
                self.store_session(refreshed.clone(), AuthChange::TokenRefreshed);
                Ok(Some(refreshed))
            }
            Err(BackendError::Unauthorized | BackendError::InvalidCredentials) => {
                tracing::info!(user_id = %session.identity.id, "Refresh token rejected, signing out");
                self.clear_session();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

struct RestProfileStore {
    inner: Arc<RestInner>,
}

#[async_trait]
impl ProfileStore for RestProfileStore {
    async fn fetch_profile(&self, id: &str) -> Result<Option<Profile>, BackendError> {
        let response = self
            .inner
            .table_request(reqwest::Method::GET)
            .query(&[("id", format!("eq.{}", id)), ("select", "*".to_string())])
            .send()
            .await?;
        let rows: Vec<Profile> = check(response).await?.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn create_profile(&self, profile: NewProfile) -> Result<Profile, BackendError> {
        let id = profile.id.clone();
        let response = self
            .inner
            .table_request(reqwest::Method::POST)
            .header("Prefer", "return=representation")
            .json(&profile)
            .send()
            .await?;
        let rows: Vec<Profile> = match check(response).await {
            Ok(response) => response.json().await?,
            Err(BackendError::Conflict(_)) => {
                return Err(BackendError::Conflict(format!("profile {} already exists", id)))
            }
            Err(e) => return Err(e),
        };
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("insert returned no rows".to_string()))
    }

    async fn update_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> Result<Profile, BackendError> {
        let response = self
            .inner
            .table_request(reqwest::Method::PATCH)
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(update)
            .send()
            .await?;
        let rows: Vec<Profile> = check(response).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("profile {}", id)))
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, BackendError> {
        let response = self
            .inner
            .table_request(reqwest::Method::GET)
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    fn subscribe_inserts(&self) -> broadcast::Receiver<Profile> {
        let receiver = self.inner.inserts.subscribe();
        if !self.inner.feed_started.swap(true, Ordering::SeqCst) {
            let weak = Arc::downgrade(&self.inner);
            let interval = self.inner.feed_poll_interval;
            tokio::spawn(run_insert_feed(weak, interval));
        }
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> RestBackend {
        let config = BackendConfig {
            kind: crate::config::BackendKind::Rest,
            url: Some(format!("{}/", server.uri())),
            anon_key: Some("anon-key".to_string()),
            service_role_key: Some("service-key".to_string()),
            request_timeout_secs: 5,
            feed_poll_interval_secs: 1,
            seed_accounts: Vec::new(),
        };
        RestBackend::new(&config).unwrap()
    }

    fn token_body(id: &str, email: &str) -> serde_json::Value {
        json!({
            "access_token": "access-1",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "user": { "id": id, "email": email }
        })
    }

    #[tokio::test]
    async fn test_password_sign_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .and(body_json(json!({ "email": "ada@example.com", "password": "pw" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("u-1", "ada@example.com")))
            .mount(&server)
            .await;

        let client = backend_for(&server).auth_client();
        let mut events = client.subscribe();
        let session = client
            .sign_in_with_password("ada@example.com", "pw")
            .await
            .unwrap();

        assert_eq!(session.identity.id, "u-1");
        assert_eq!(session.access_token, "access-1");
        assert_eq!(events.recv().await.unwrap().change, AuthChange::SignedIn);
        assert!(client.get_session().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bad_credentials_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let err = backend_for(&server)
            .auth_client()
            .sign_in_with_password("ada@example.com", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_sign_up_awaiting_confirmation_has_no_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "u-2",
                "email": "new@example.com",
                "confirmation_sent_at": "2025-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let outcome = backend_for(&server)
            .auth_client()
            .sign_up("new@example.com", "secret-pw")
            .await
            .unwrap();
        assert_eq!(outcome.identity.id, "u-2");
        assert!(outcome.session.is_none());
    }

    #[tokio::test]
    async fn test_existing_account_on_sign_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": 422,
                "error_code": "user_already_exists",
                "msg": "User already registered"
            })))
            .mount(&server)
            .await;

        let err = backend_for(&server)
            .auth_client()
            .sign_up("taken@example.com", "secret-pw")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn test_fetch_profile_uses_service_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PROFILES_PATH))
            .and(query_param("id", "eq.u-1"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "u-1",
                "full_name": "Ada",
                "user_type": "provider",
                "is_verified": false,
                "completed_jobs": 3,
                "created_at": "2025-01-01T00:00:00Z"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(PROFILES_PATH))
            .and(query_param("id", "eq.missing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let store = backend_for(&server).profiles();
        let profile = store.fetch_profile("u-1").await.unwrap().unwrap();
        assert_eq!(profile.completed_jobs, 3);
        assert_eq!(profile.role(), crate::models::UserType::Provider);
        assert!(store.fetch_profile("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_of_missing_row_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(PROFILES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let update = ProfileUpdate {
            is_verified: Some(true),
            ..Default::default()
        };
        let err = backend_for(&server)
            .profiles()
            .update_profile("ghost", &update)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_server_errors_surface_as_service_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PROFILES_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = backend_for(&server).profiles().list_profiles().await.unwrap_err();
        assert!(matches!(err, BackendError::Service { status: 503, .. }));
    }

    #[test]
    fn test_classify_conflict_and_auth_errors() {
        assert!(matches!(
            classify_error(reqwest::StatusCode::CONFLICT, "duplicate key"),
            BackendError::Conflict(_)
        ));
        assert!(matches!(
            classify_error(reqwest::StatusCode::FORBIDDEN, "{}"),
            BackendError::Unauthorized
        ));
        assert!(matches!(
            classify_error(reqwest::StatusCode::UNAUTHORIZED, "{\"error\":\"invalid_grant\"}"),
            BackendError::InvalidCredentials
        ));
    }
}
