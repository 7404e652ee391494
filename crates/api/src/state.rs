//! Shared application state for the Axum API server.

use relay_common::config::AppConfig;
use relay_publisher::PublishPolicy;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub policy: PublishPolicy,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(policy: PublishPolicy, config: AppConfig) -> Self {
        Self { policy, config }
    }
}
