pub mod api;
pub mod backend;
pub mod config;
pub mod models;
pub mod notifications;
pub mod session;
pub mod ui;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::backend::Backend;
use crate::session::{SessionRegistry, SessionSettings};

pub struct AppState {
    pub config: Config,
    pub backend: Arc<dyn Backend>,
    pub sessions: Arc<SessionRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            backend.clone(),
            SessionSettings::from(&config.session),
        ));
        Self {
            config,
            backend,
            sessions,
            rate_limiter,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
