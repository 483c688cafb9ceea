use crate::config::GatewayConfig;
use common::Core;
use std::sync::Arc;

/// Application state shared across all webhook handlers.
///
/// Cloned per request; the core handle carries the stores and queues the
/// intake pipeline writes to.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub core: Arc<Core>,
}

impl AppState {
    pub fn new(config: GatewayConfig, core: Arc<Core>) -> Self {
        Self { config, core }
    }
}
