//! Zone capability gating.

use std::collections::HashSet;

use steward_core::config::ZoneConfig;
use steward_core::types::Capability;

/// Answers which capabilities this instance may exercise.
///
/// Purely a function of static configuration. Executor code paths check
/// `may(ApproveExecute)` before any executor is looked up.
#[derive(Debug, Clone)]
pub struct ZoneCoordinator {
    zone_id: String,
    capabilities: HashSet<Capability>,
}

impl ZoneCoordinator {
    pub fn new(zone_id: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            zone_id: zone_id.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ZoneConfig) -> Self {
        Self::new(config.id.clone(), config.capabilities.iter().copied())
    }

    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    pub fn may(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
