//! Live visitor sessions, keyed by the opaque id in the session cookie.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::time::Instant;

use super::provider::{SessionProvider, SessionSettings};
use crate::api::metrics;
use crate::backend::Backend;

struct Entry {
    provider: Arc<SessionProvider>,
    last_seen: Instant,
}

pub struct SessionRegistry {
    backend: Arc<dyn Backend>,
    settings: SessionSettings,
    sessions: DashMap<String, Entry>,
}

/// 256-bit random session id, hex encoded
fn generate_session_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn Backend>, settings: SessionSettings) -> Self {
        Self {
            backend,
            settings,
            sessions: DashMap::new(),
        }
    }

    /// Start a session with a fresh auth client
    pub fn create(&self) -> (String, Arc<SessionProvider>) {
        let provider = Arc::new(SessionProvider::start(
            self.backend.auth_client(),
            self.backend.profiles(),
            self.settings.clone(),
        ));
        let id = generate_session_id();
        self.sessions.insert(
            id.clone(),
            Entry {
                provider: provider.clone(),
                last_seen: Instant::now(),
            },
        );
        metrics::set_active_sessions(self.sessions.len());
        tracing::debug!(sessions = self.sessions.len(), "Session created");
        (id, provider)
    }

    /// Look up a session and mark it as seen
    pub fn get(&self, id: &str) -> Option<Arc<SessionProvider>> {
        let mut entry = self.sessions.get_mut(id)?;
        entry.last_seen = Instant::now();
        Some(entry.provider.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionProvider>> {
        let (_, entry) = self.sessions.remove(id)?;
        entry.provider.shutdown();
        metrics::set_active_sessions(self.sessions.len());
        Some(entry.provider)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions not seen for `max_idle`. Returns how many were dropped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            let keep = entry.last_seen.elapsed() < max_idle;
            if !keep {
                entry.provider.shutdown();
            }
            keep
        });
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            metrics::set_active_sessions(self.sessions.len());
        }
        evicted
    }
}

/// Periodically evict idle sessions
pub fn spawn_cleanup_task(registry: Arc<SessionRegistry>, interval: Duration, max_idle: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = registry.evict_idle(max_idle);
            if evicted > 0 {
                tracing::info!(
                    evicted,
                    remaining = registry.len(),
                    "Evicted idle sessions"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(InMemoryBackend::new()), SessionSettings::default())
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let registry = registry();
        let (id, provider) = registry.create();
        assert_eq!(id.len(), 64);
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(&id).unwrap(), &provider));

        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = registry();
        let (a, _) = registry.create();
        let (b, _) = registry.create();
        assert_ne!(a, b);
        assert!(!Arc::ptr_eq(
            &registry.get(&a).unwrap(),
            &registry.get(&b).unwrap()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_are_evicted() {
        let registry = registry();
        let (stale, _) = registry.create();
        let (fresh, _) = registry.create();

        tokio::time::advance(Duration::from_secs(50)).await;
        registry.get(&fresh);
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(registry.evict_idle(Duration::from_secs(60)), 1);
        assert!(registry.get(&stale).is_none());
        assert!(registry.get(&fresh).is_some());
    }
}
