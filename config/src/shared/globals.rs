use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_poll_period_ms() -> u64 {
    10_000
}

fn default_wait_start_stop_secs() -> u64 {
    30
}

fn default_pause_after_error_ms() -> u64 {
    30_000
}

fn default_pause_before_repair_ms() -> u64 {
    5_000
}

fn default_recovery_dir() -> String {
    "subs-recovery".to_string()
}

fn default_data_file() -> String {
    "subs-datafile".to_string()
}

fn default_stop_poll_interval_ms() -> u64 {
    500
}

/// Service-wide tunables.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalsConfig {
    /// Delay between two monitoring cycles.
    #[serde(default = "default_poll_period_ms")]
    pub poll_period_ms: u64,
    /// Wait budget passed to the start and stop mirroring commands.
    #[serde(default = "default_wait_start_stop_secs")]
    pub wait_start_stop_secs: u64,
    /// Minimum time between two repair attempts of the same subscription.
    #[serde(default = "default_pause_after_error_ms")]
    pub pause_after_error_ms: u64,
    /// Settle delay between the two checks that must agree before repairing.
    #[serde(default = "default_pause_before_repair_ms")]
    pub pause_before_repair_ms: u64,
    /// Whether bookmarks are fetched and logged before repairing.
    #[serde(default)]
    pub grab_bookmarks: bool,
    /// Directory receiving recovery reports.
    #[serde(default = "default_recovery_dir")]
    pub recovery_dir: String,
    /// Base name of the `.SHUTDOWN` and `.RELOAD` flag files.
    #[serde(default = "default_data_file")]
    pub data_file: String,
    #[serde(default = "default_stop_poll_interval_ms")]
    pub stop_poll_interval_ms: u64,
    /// Directory for daily-rolling log files. Console only when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl GlobalsConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn pause_after_error(&self) -> Duration {
        Duration::from_millis(self.pause_after_error_ms)
    }

    pub fn pause_before_repair(&self) -> Duration {
        Duration::from_millis(self.pause_before_repair_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }
}

impl Default for GlobalsConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: default_poll_period_ms(),
            wait_start_stop_secs: default_wait_start_stop_secs(),
            pause_after_error_ms: default_pause_after_error_ms(),
            pause_before_repair_ms: default_pause_before_repair_ms(),
            grab_bookmarks: false,
            recovery_dir: default_recovery_dir(),
            data_file: default_data_file(),
            stop_poll_interval_ms: default_stop_poll_interval_ms(),
            log_dir: None,
        }
    }
}
