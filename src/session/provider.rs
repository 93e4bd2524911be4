//! Per-visitor session state kept in step with the auth service.
//!
//! A [`SessionProvider`] owns one auth client. It publishes the current
//! identity and profile through a watch channel; guards, redirects and pages
//! only ever read from it. Every auth notification bumps a generation counter
//! and profile lookups carry the generation they were started under, so a
//! slow lookup for an older notification can never overwrite newer state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::resolver::{resolve, RouteState};
use crate::api::metrics;
use crate::backend::{AuthClient, AuthEvent, BackendError, Identity, ProfileStore, SignUpOutcome};
use crate::config::SessionConfig;
use crate::models::Profile;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
    /// Bumped on every auth notification and local sign-out
    pub generation: u64,
}

impl SessionSnapshot {
    pub fn initial() -> Self {
        Self {
            identity: None,
            profile: None,
            loading: true,
            generation: 0,
        }
    }

    /// Settled state of a visitor with no session at all
    pub fn anonymous() -> Self {
        Self {
            loading: false,
            ..Self::initial()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Ceiling on the initial session/profile lookup
    pub init_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            init_timeout: config.init_timeout(),
        }
    }
}

struct Inner {
    auth: Arc<dyn AuthClient>,
    profiles: Arc<dyn ProfileStore>,
    state: watch::Sender<SessionSnapshot>,
    shutdown: CancellationToken,
}

impl Inner {
    /// Missing and failed lookups both yield `None`; the visitor then routes as a client.
    async fn load_profile(&self, id: &str) -> Option<Profile> {
        match self.profiles.fetch_profile(id).await {
            Ok(Some(profile)) => Some(profile),
            Ok(None) => {
                debug!(user_id = %id, "No profile row for identity yet");
                None
            }
            Err(e) => {
                warn!(user_id = %id, error = %e, "Profile fetch failed, routing as client");
                metrics::record_profile_fetch_failure();
                None
            }
        }
    }

    /// Publish a lookup result if no newer notification has arrived since it started
    fn apply(&self, generation: u64, identity: Option<Identity>, profile: Option<Profile>) -> bool {
        self.state.send_if_modified(|s| {
            if s.generation != generation {
                debug!(
                    stale = generation,
                    current = s.generation,
                    "Discarding stale session result"
                );
                return false;
            }
            s.identity = identity;
            s.profile = profile;
            s.loading = false;
            true
        })
    }

    /// Start a new generation. Returns its number.
    fn begin(&self, identity: Option<Identity>) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|s| {
            s.generation += 1;
            generation = s.generation;
            if s.identity.as_ref().map(|i| &i.id) != identity.as_ref().map(|i| &i.id) {
                s.profile = None;
            }
            s.loading = identity.is_some();
            s.identity = identity;
        });
        generation
    }

    fn clear(&self) {
        self.begin(None);
    }

    /// New generation for the current identity without touching `loading`
    fn bump(&self) -> (u64, Option<Identity>) {
        let mut current = (0, None);
        self.state.send_if_modified(|s| {
            s.generation += 1;
            current = (s.generation, s.identity.clone());
            false
        });
        current
    }

    async fn initialize(self: Arc<Self>, ceiling: Duration) {
        let deadline = tokio::time::Instant::now() + ceiling;
        let generation = self.state.borrow().generation;
        let lookup = async {
            let session = self.auth.get_session().await?;
            let identity = session.map(|s| s.identity);
            let profile = match &identity {
                Some(identity) => self.load_profile(&identity.id).await,
                None => None,
            };
            Ok::<_, BackendError>((identity, profile))
        };

        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            outcome = tokio::time::timeout_at(deadline, lookup) => outcome,
        };

        match outcome {
            Ok(Ok((identity, profile))) => {
                self.apply(generation, identity, profile);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Could not read the current session, treating visitor as anonymous");
                self.apply(generation, None, None);
            }
            Err(_) => {}
        }

        // A notification during start-up supersedes the lookup above; its
        // profile fetch is held to the same deadline.
        let mut rx = self.state.subscribe();
        let settled = async move { rx.wait_for(|s| !s.loading).await.is_ok() };
        let settled_in_time = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            settled = tokio::time::timeout_at(deadline, settled) => settled.unwrap_or(false),
        };
        if settled_in_time {
            return;
        }

        let forced = self.state.send_if_modified(|s| {
            if s.loading {
                s.loading = false;
                true
            } else {
                false
            }
        });
        if forced {
            warn!(
                timeout_secs = ceiling.as_secs(),
                "Session initialization hit its ceiling, no longer loading"
            );
        }
    }

    fn handle_event(self: &Arc<Self>, event: AuthEvent) {
        debug!(
            change = %event.change,
            user_id = ?event.identity().map(|i| i.id.as_str()),
            "Auth state changed"
        );

        let Some(identity) = event.session.map(|s| s.identity) else {
            self.clear();
            return;
        };

        self.track(identity);
    }

    /// Start a generation for `identity` and look up its profile under it
    fn track(self: &Arc<Self>, identity: Identity) {
        let generation = self.begin(Some(identity.clone()));
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = inner.shutdown.cancelled() => {}
                profile = inner.load_profile(&identity.id) => {
                    inner.apply(generation, Some(identity), profile);
                }
            }
        });
    }

    async fn listen(self: Arc<Self>, mut events: broadcast::Receiver<AuthEvent>) {
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(event) => self.handle_event(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed auth notifications, re-reading the session");
                    match self.auth.get_session().await {
                        Ok(session) => self.handle_event(AuthEvent {
                            change: crate::backend::AuthChange::TokenRefreshed,
                            session,
                        }),
                        Err(e) => warn!(error = %e, "Could not re-read the session"),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Session listener stopped");
    }
}

/// Session state for one visitor
pub struct SessionProvider {
    inner: Arc<Inner>,
}

impl SessionProvider {
    /// Subscribe to the client's notifications and start the initial lookup
    pub fn start(
        auth: Arc<dyn AuthClient>,
        profiles: Arc<dyn ProfileStore>,
        settings: SessionSettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::initial());
        let inner = Arc::new(Inner {
            auth,
            profiles,
            state,
            shutdown: CancellationToken::new(),
        });

        // Subscribe before the initial lookup so no notification slips between them
        let events = inner.auth.subscribe();
        tokio::spawn(inner.clone().initialize(settings.init_timeout));
        tokio::spawn(inner.clone().listen(events));

        Self { inner }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn route_state(&self) -> RouteState {
        resolve(&self.inner.state.borrow())
    }

    /// Wait until the session is no longer loading
    pub async fn settled(&self) -> SessionSnapshot {
        let mut rx = self.watch();
        let settled = match rx.wait_for(|s| !s.loading).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        settled
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        let session = match self.inner.auth.sign_in_with_password(email, password).await {
            Ok(session) => session,
            Err(e) => {
                info!(error = %e, "Sign-in rejected");
                return Err(e);
            }
        };
        info!(user_id = %session.identity.id, "Signed in");
        self.mark_pending(&session.identity);
        Ok(session.identity)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, BackendError> {
        let outcome = self.inner.auth.sign_up(email, password).await?;
        info!(
            user_id = %outcome.identity.id,
            confirmed = outcome.session.is_some(),
            "Account created"
        );
        if outcome.session.is_some() {
            self.mark_pending(&outcome.identity);
        }
        Ok(outcome)
    }

    /// Clears local state even when the remote sign-out fails
    pub async fn sign_out(&self) -> Result<(), BackendError> {
        let result = self.inner.auth.sign_out().await;
        self.inner.clear();
        match &result {
            Ok(()) => info!("Signed out"),
            Err(e) => warn!(error = %e, "Remote sign-out failed, local session discarded anyway"),
        }
        result
    }

    /// Re-fetch the profile for the current identity. Supersedes any lookup
    /// still in flight.
    pub async fn refresh_profile(&self) -> Option<Profile> {
        if self.inner.state.borrow().identity.is_none() {
            return None;
        }
        let (generation, identity) = self.inner.bump();
        let identity = identity?;
        let profile = self.inner.load_profile(&identity.id).await;
        self.inner.apply(generation, Some(identity), profile.clone());
        profile
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Loading until the profile for this identity arrives. Whichever of this
    /// lookup and the one started by the auth notification is newer wins.
    fn mark_pending(&self, identity: &Identity) {
        self.inner.track(identity.clone());
    }
}

impl Drop for SessionProvider {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}
