//! In-process stand-in for the hosted backend.
//!
//! Accounts, tokens and profiles live in memory and vanish on restart. Used by
//! `backend.kind = "memory"` for local development and by the test suite,
//! which also drives its fault-injection hooks.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;

use super::{
    AuthChange, AuthClient, AuthEvent, AuthSession, Backend, BackendError, Identity,
    ProfileStore, SignUpOutcome, EVENT_CHANNEL_CAPACITY,
};
use crate::config::SeedAccount;
use crate::models::{NewProfile, Profile, ProfileUpdate, UserType};

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

struct Account {
    identity: Identity,
    salt: String,
    password_digest: String,
}

#[derive(Default)]
struct Faults {
    profile_latency: HashMap<String, Duration>,
    fail_profile_fetches: bool,
    hang_session_lookups: bool,
}

struct Shared {
    /// Keyed by lowercased e-mail
    accounts: DashMap<String, Account>,
    /// Refresh token -> identity
    refresh_tokens: DashMap<String, Identity>,
    profiles: RwLock<HashMap<String, Profile>>,
    inserts: broadcast::Sender<Profile>,
    faults: Mutex<Faults>,
    session_ttl: Mutex<Duration>,
}

/// Generate a random opaque token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

fn digest_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl Shared {
    fn issue_session(&self, identity: Identity) -> AuthSession {
        let ttl = *self.session_ttl.lock();
        let refresh_token = generate_token();
        self.refresh_tokens
            .insert(refresh_token.clone(), identity.clone());
        AuthSession {
            access_token: generate_token(),
            refresh_token,
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1)),
            identity,
        }
    }

    fn register(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        let key = email.trim().to_lowercase();
        if self.accounts.contains_key(&key) {
            return Err(BackendError::AlreadyRegistered);
        }
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.trim().to_string(),
        };
        let salt = generate_token();
        let password_digest = digest_password(&salt, password);
        self.accounts.insert(
            key,
            Account {
                identity: identity.clone(),
                salt,
                password_digest,
            },
        );
        Ok(identity)
    }

    fn insert_profile(&self, profile: NewProfile) -> Result<Profile, BackendError> {
        let mut profiles = self.profiles.write();
        if profiles.contains_key(&profile.id) {
            return Err(BackendError::Conflict(format!(
                "profile {} already exists",
                profile.id
            )));
        }
        let profile = profile.into_profile(Utc::now());
        profiles.insert(profile.id.clone(), profile.clone());
        drop(profiles);

        let _ = self.inserts.send(profile.clone());
        Ok(profile)
    }
}

/// Process-local backend
#[derive(Clone)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (inserts, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                accounts: DashMap::new(),
                refresh_tokens: DashMap::new(),
                profiles: RwLock::new(HashMap::new()),
                inserts,
                faults: Mutex::new(Faults::default()),
                session_ttl: Mutex::new(DEFAULT_SESSION_TTL),
            }),
        }
    }

    /// Create an account and, when a role is given, its profile row
    pub fn register(
        &self,
        email: &str,
        password: &str,
        user_type: Option<UserType>,
        full_name: Option<&str>,
    ) -> Result<Identity, BackendError> {
        let identity = self.shared.register(email, password)?;
        if let Some(user_type) = user_type {
            let profile = NewProfile::new(&identity.id, &identity.email, user_type)
                .with_full_name(full_name.map(str::to_string));
            self.shared.insert_profile(profile)?;
        }
        Ok(identity)
    }

    pub async fn seed_account(&self, account: &SeedAccount) -> anyhow::Result<()> {
        let identity = self.register(
            &account.email,
            &account.password,
            Some(account.user_type.unwrap_or(UserType::Client)),
            account.full_name.as_deref(),
        )?;
        if account.is_verified {
            let update = ProfileUpdate {
                is_verified: Some(true),
                ..Default::default()
            };
            self.profile_store().update_profile(&identity.id, &update).await?;
        }
        tracing::info!(email = %account.email, "Seeded account");
        Ok(())
    }

    /// Delay every profile fetch for `id`
    pub fn set_profile_latency(&self, id: &str, latency: Duration) {
        self.shared
            .faults
            .lock()
            .profile_latency
            .insert(id.to_string(), latency);
    }

    /// Make profile fetches fail with a transient service error
    pub fn fail_profile_fetches(&self, fail: bool) {
        self.shared.faults.lock().fail_profile_fetches = fail;
    }

    /// Make `get_session` never complete
    pub fn hang_session_lookups(&self, hang: bool) {
        self.shared.faults.lock().hang_session_lookups = hang;
    }

    /// Lifetime of newly issued access tokens
    pub fn set_session_ttl(&self, ttl: Duration) {
        *self.shared.session_ttl.lock() = ttl;
    }

    fn profile_store(&self) -> MemoryProfileStore {
        MemoryProfileStore {
            shared: self.shared.clone(),
        }
    }
}

impl Backend for InMemoryBackend {
    fn auth_client(&self) -> Arc<dyn AuthClient> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(MemoryAuthClient {
            shared: self.shared.clone(),
            session: Mutex::new(None),
            events,
        })
    }

    fn profiles(&self) -> Arc<dyn ProfileStore> {
        Arc::new(self.profile_store())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryAuthClient {
    shared: Arc<Shared>,
    session: Mutex<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl MemoryAuthClient {
    fn emit(&self, change: AuthChange, session: Option<AuthSession>) {
        // No subscribers is fine
        let _ = self.events.send(AuthEvent { change, session });
    }

    fn store_session(&self, session: AuthSession, change: AuthChange) {
        *self.session.lock() = Some(session.clone());
        self.emit(change, Some(session));
    }
}

#[async_trait]
impl AuthClient for MemoryAuthClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let identity = {
            let account = self
                .shared
                .accounts
                .get(&email.trim().to_lowercase())
                .ok_or(BackendError::InvalidCredentials)?;
            let digest = digest_password(&account.salt, password);
            let matches: bool = digest
                .as_bytes()
                .ct_eq(account.password_digest.as_bytes())
                .into();
            if !matches {
                return Err(BackendError::InvalidCredentials);
            }
            account.identity.clone()
        };

        let session = self.shared.issue_session(identity);
        self.store_session(session.clone(), AuthChange::SignedIn);
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, BackendError> {
        let identity = self.shared.register(email, password)?;
        // Accounts are confirmed immediately
        let session = self.shared.issue_session(identity.clone());
        self.store_session(session.clone(), AuthChange::SignedIn);
        Ok(SignUpOutcome {
            identity,
            session: Some(session),
        })
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let previous = self.session.lock().take();
        if let Some(session) = previous {
            self.shared.refresh_tokens.remove(&session.refresh_token);
            self.emit(AuthChange::SignedOut, None);
        }
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<AuthSession>, BackendError> {
        if self.shared.faults.lock().hang_session_lookups {
            std::future::pending::<()>().await;
        }

        let current = self.session.lock().clone();
        let Some(session) = current else {
            return Ok(None);
        };
        if !session.expires_within(chrono::Duration::zero(), Utc::now()) {
            return Ok(Some(session));
        }

        let identity = match self.shared.refresh_tokens.remove(&session.refresh_token) {
            Some((_, identity)) => identity,
            None => {
                *self.session.lock() = None;
                self.emit(AuthChange::SignedOut, None);
                return Ok(None);
            }
        };
        let refreshed = self.shared.issue_session(identity);
        self.store_session(refreshed.clone(), AuthChange::TokenRefreshed);
        Ok(Some(refreshed))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

struct MemoryProfileStore {
    shared: Arc<Shared>,
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn fetch_profile(&self, id: &str) -> Result<Option<Profile>, BackendError> {
        let (latency, fail) = {
            let faults = self.shared.faults.lock();
            (
                faults.profile_latency.get(id).copied(),
                faults.fail_profile_fetches,
            )
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(BackendError::Service {
                status: 503,
                message: "profile table unavailable".to_string(),
            });
        }
        Ok(self.shared.profiles.read().get(id).cloned())
    }

    async fn create_profile(&self, profile: NewProfile) -> Result<Profile, BackendError> {
        self.shared.insert_profile(profile)
    }

    async fn update_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> Result<Profile, BackendError> {
        let mut profiles = self.shared.profiles.write();
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(format!("profile {}", id)))?;
        update.apply_to(profile, Utc::now());
        Ok(profile.clone())
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, BackendError> {
        let mut profiles: Vec<Profile> = self.shared.profiles.read().values().cloned().collect();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(profiles)
    }

    fn subscribe_inserts(&self) -> broadcast::Receiver<Profile> {
        self.shared.inserts.subscribe()
    }
}
