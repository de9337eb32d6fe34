use crate::{config::Config, error::Result, metrics, relay::Relay};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Upstream client and timeout policy (pooled connections)
    pub relay: Relay,
    /// Renders the Prometheus exposition for `/metrics`
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        let relay = Relay::new(&config)?;

        Ok(Self {
            config: Arc::new(config),
            relay,
            metrics: metrics::install(),
            started_at: Instant::now(),
        })
    }
}
