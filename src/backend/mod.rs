//! Seam to the hosted authentication and storage service.
//!
//! Everything the marketplace knows about accounts and profiles goes through
//! these traits. `RestBackend` talks to the hosted service over HTTP;
//! `InMemoryBackend` keeps everything in process for development and tests.

mod memory;
mod rest;

pub use memory::InMemoryBackend;
pub use rest::RestBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::{BackendConfig, BackendKind};
use crate::models::{NewProfile, Profile, ProfileUpdate};

/// Buffer for auth-state and insert notifications per subscriber
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 32;

/// An authenticated principal as known to the auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

impl AuthSession {
    /// True once the access token is within `margin` of expiring
    pub fn expires_within(&self, margin: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChange {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

impl std::fmt::Display for AuthChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignedIn => write!(f, "signed_in"),
            Self::SignedOut => write!(f, "signed_out"),
            Self::TokenRefreshed => write!(f, "token_refreshed"),
        }
    }
}

/// Auth-state change pushed by an [`AuthClient`]
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub change: AuthChange,
    pub session: Option<AuthSession>,
}

impl AuthEvent {
    pub fn identity(&self) -> Option<&Identity> {
        self.session.as_ref().map(|s| &s.identity)
    }
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub identity: Identity,
    /// Absent when the service wants the e-mail address confirmed first
    pub session: Option<AuthSession>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("an account with this email already exists")]
    AlreadyRegistered,
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not authorized")]
    Unauthorized,
    #[error("request to the backend timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("failed to decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    /// Text shown inline on a form when a request fails
    pub fn user_message(&self) -> String {
        match self {
            BackendError::InvalidCredentials => "Invalid email or password.".to_string(),
            BackendError::AlreadyRegistered => {
                "An account with this email already exists.".to_string()
            }
            BackendError::Timeout | BackendError::Transport(_) => {
                "We could not reach the server. Please try again.".to_string()
            }
            BackendError::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Per-visitor auth client. Holds that visitor's tokens and pushes auth-state changes.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, BackendError>;
    /// Drops the cached tokens even when the remote call fails
    async fn sign_out(&self) -> Result<(), BackendError>;
    /// Current session, refreshing the access token first if it has expired
    async fn get_session(&self) -> Result<Option<AuthSession>, BackendError>;
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Access to the shared profile table
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch_profile(&self, id: &str) -> Result<Option<Profile>, BackendError>;
    async fn create_profile(&self, profile: NewProfile) -> Result<Profile, BackendError>;
    async fn update_profile(&self, id: &str, update: &ProfileUpdate)
        -> Result<Profile, BackendError>;
    /// All profiles, newest first
    async fn list_profiles(&self) -> Result<Vec<Profile>, BackendError>;
    /// Change feed of newly inserted profile rows
    fn subscribe_inserts(&self) -> broadcast::Receiver<Profile>;
}

pub trait Backend: Send + Sync {
    /// A fresh client with no cached session
    fn auth_client(&self) -> Arc<dyn AuthClient>;
    fn profiles(&self) -> Arc<dyn ProfileStore>;
    fn name(&self) -> &'static str;
}

pub async fn connect(config: &BackendConfig) -> anyhow::Result<Arc<dyn Backend>> {
    match config.kind {
        BackendKind::Rest => {
            let backend = RestBackend::new(config)?;
            tracing::info!(url = %backend.base_url(), "Using hosted backend");
            Ok(Arc::new(backend))
        }
        BackendKind::Memory => {
            let backend = InMemoryBackend::new();
            for account in &config.seed_accounts {
                backend.seed_account(account).await?;
            }
            tracing::warn!(
                seeded = config.seed_accounts.len(),
                "Using in-memory backend; accounts are lost on restart"
            );
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_hide_internals() {
        let err = BackendError::Service {
            status: 500,
            message: "relation \"profiles\" does not exist".to_string(),
        };
        assert!(!err.user_message().contains("relation"));
        assert_eq!(
            BackendError::InvalidCredentials.user_message(),
            "Invalid email or password."
        );
    }

    #[test]
    fn test_session_expiry_margin() {
        let now = Utc::now();
        let session = AuthSession {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: now + chrono::Duration::seconds(20),
            identity: Identity {
                id: "u".to_string(),
                email: "u@example.com".to_string(),
            },
        };
        assert!(session.expires_within(chrono::Duration::seconds(30), now));
        assert!(!session.expires_within(chrono::Duration::seconds(10), now));
    }
}
