//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::Hub;
use crate::ws::handler::UpgradePolicy;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The hub running every WebSocket session.
    pub hub: Hub,
    /// Admission rules for WebSocket upgrades.
    pub upgrade: Arc<UpgradePolicy>,
}

impl AppState {
    /// State with an upgrade policy that accepts everything.
    #[must_use]
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            upgrade: Arc::new(UpgradePolicy::allow_all()),
        }
    }

    /// Replaces the upgrade policy.
    #[must_use]
    pub fn with_upgrade_policy(mut self, policy: UpgradePolicy) -> Self {
        self.upgrade = Arc::new(policy);
        self
    }
}
