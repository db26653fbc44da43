//! Application state shared across request handlers.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::hub::Hub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(hub: Hub, config: ServerConfig) -> Self {
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}
