//! Delayed hand-off from the landing page to a signed-in visitor's dashboard.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::provider::{SessionProvider, SessionSnapshot};
use super::redirect::landing_destination;
use super::resolver::resolve;

/// A pending landing redirect. Dropping it cancels the navigation.
pub struct LandingRedirect {
    task: JoinHandle<()>,
}

async fn settle(rx: &mut watch::Receiver<SessionSnapshot>) -> Option<SessionSnapshot> {
    rx.wait_for(|s| !s.loading).await.ok().map(|s| s.clone())
}

impl LandingRedirect {
    /// Once the session settles, wait `delay` and call `on_navigate` with the
    /// visitor's dashboard. Anonymous visitors never navigate.
    pub fn schedule<F>(provider: &SessionProvider, delay: Duration, on_navigate: F) -> Self
    where
        F: FnOnce(String) + Send + 'static,
    {
        let mut rx = provider.watch();
        let task = tokio::spawn(async move {
            let Some(snapshot) = settle(&mut rx).await else {
                return;
            };
            if !resolve(&snapshot).is_authenticated() {
                return;
            }

            tokio::time::sleep(delay).await;

            // The visitor may have signed out or switched accounts meanwhile
            let Some(snapshot) = settle(&mut rx).await else {
                return;
            };
            if let Some(target) = landing_destination(resolve(&snapshot)) {
                debug!(target, "Landing redirect firing");
                on_navigate(target.to_string());
            }
        });
        Self { task }
    }

    /// Abort the pending navigation; `on_navigate` will not be called afterwards
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LandingRedirect {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, InMemoryBackend};
    use crate::models::UserType;
    use crate::session::SessionSettings;
    use std::sync::Arc;
    use parking_lot::Mutex;

    async fn signed_in(user_type: Option<UserType>) -> (InMemoryBackend, SessionProvider) {
        let backend = InMemoryBackend::new();
        backend
            .register("land@example.com", "password-1", user_type, None)
            .unwrap();
        let provider = SessionProvider::start(
            backend.auth_client(),
            backend.profiles(),
            SessionSettings::default(),
        );
        provider.settled().await;
        provider.sign_in("land@example.com", "password-1").await.unwrap();
        (backend, provider)
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl FnOnce(String) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |target| sink.lock().push(target))
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_lands_on_dashboard_after_delay() {
        let (_backend, provider) = signed_in(Some(UserType::Provider)).await;
        let (seen, on_navigate) = recorder();
        let redirect = LandingRedirect::schedule(&provider, Duration::from_secs(1), on_navigate);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*seen.lock(), vec!["/provider/dashboard".to_string()]);
        assert!(redirect.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_and_admin_targets() {
        for (user_type, expected) in [
            (None, "/dashboard"),
            (Some(UserType::Client), "/dashboard"),
            (Some(UserType::Admin), "/admin/dashboard"),
        ] {
            let (_backend, provider) = signed_in(user_type).await;
            let (seen, on_navigate) = recorder();
            let _redirect =
                LandingRedirect::schedule(&provider, Duration::from_secs(1), on_navigate);
            tokio::time::sleep(Duration::from_secs(2)).await;
            assert_eq!(*seen.lock(), vec![expected.to_string()]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_visitor_never_navigates() {
        let backend = InMemoryBackend::new();
        let provider = SessionProvider::start(
            backend.auth_client(),
            backend.profiles(),
            SessionSettings::default(),
        );
        let (seen, on_navigate) = recorder();
        let redirect = LandingRedirect::schedule(&provider, Duration::from_secs(1), on_navigate);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(seen.lock().is_empty());
        assert!(redirect.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_before_delay_cancels() {
        let (_backend, provider) = signed_in(Some(UserType::Client)).await;
        let (seen, on_navigate) = recorder();
        let redirect = LandingRedirect::schedule(&provider, Duration::from_secs(1), on_navigate);

        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(redirect);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_delay() {
        let (_backend, provider) = signed_in(Some(UserType::Provider)).await;
        let (seen, on_navigate) = recorder();
        let redirect = LandingRedirect::schedule(&provider, Duration::from_secs(1), on_navigate);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!redirect.is_finished());
        redirect.cancel();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_during_delay_cancels_navigation() {
        let (_backend, provider) = signed_in(Some(UserType::Client)).await;
        let (seen, on_navigate) = recorder();
        let _redirect = LandingRedirect::schedule(&provider, Duration::from_secs(1), on_navigate);

        tokio::time::sleep(Duration::from_millis(500)).await;
        provider.sign_out().await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(seen.lock().is_empty());
    }
}
