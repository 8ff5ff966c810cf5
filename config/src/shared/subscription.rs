use serde::{Deserialize, Serialize};

/// Whether automated repair may fall back to a full table refresh.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Tables requiring a refresh are left unrepaired.
    #[serde(alias = "Never", alias = "NEVER")]
    Never,
    /// A refresh is used only when the failure requires one.
    #[default]
    #[serde(alias = "Allow", alias = "ALLOW")]
    Allow,
    /// Every repaired table is refreshed.
    #[serde(alias = "Force", alias = "FORCE")]
    Force,
}

/// A monitored subscription.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub name: String,
    /// Name of the source engine.
    pub source: String,
    /// Name of the target engine.
    pub target: String,
    /// Exclude newly discovered large-object columns when remapping.
    #[serde(default)]
    pub skip_new_blobs: bool,
    #[serde(default)]
    pub refresh_mode: RefreshMode,
}
