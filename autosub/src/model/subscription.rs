use config::shared::{RefreshMode, SubscriptionConfig};

use crate::model::engine::normalize_datastore_name;

/// Immutable subscription record, referencing its engines by normalized name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub name: String,
    pub source: String,
    pub target: String,
    pub skip_new_blobs: bool,
    pub refresh_mode: RefreshMode,
}

impl Subscription {
    pub fn new(config: &SubscriptionConfig) -> Self {
        Self {
            name: config.name.trim().to_string(),
            source: normalize_datastore_name(&config.source),
            target: normalize_datastore_name(&config.target),
            skip_new_blobs: config.skip_new_blobs,
            refresh_mode: config.refresh_mode,
        }
    }

    /// Returns `true` if source and target are the same datastore.
    pub fn is_loopback(&self) -> bool {
        self.source == self.target
    }
}
