use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use config::shared::{CommandTemplates, EngineConfig, EngineRole, GlobalsConfig, RefreshMode, SubscriptionConfig};

use crate::model::{EngineRegistry, Subscription, Topology};

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Engine without remote execution prefix and with the stock command templates.
pub fn engine_config(name: &str, role: EngineRole) -> EngineConfig {
    EngineConfig {
        name: name.to_string(),
        role,
        remote_exec: String::new(),
        install_dir: "/opt/cdc".to_string(),
        instance: name.to_lowercase(),
        ddl_aware: None,
        commands: CommandTemplates::default(),
    }
}

/// Engine with pinned DDL awareness.
pub fn pinned_engine_config(name: &str, role: EngineRole, ddl_aware: bool) -> EngineConfig {
    EngineConfig {
        ddl_aware: Some(ddl_aware),
        ..engine_config(name, role)
    }
}

pub fn subscription_config(name: &str, source: &str, target: &str) -> SubscriptionConfig {
    SubscriptionConfig {
        name: name.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        skip_new_blobs: false,
        refresh_mode: RefreshMode::Allow,
    }
}

/// Builds a topology as if validation had enabled every engine and monitor.
pub fn enabled_topology(engines: &[EngineConfig], subscriptions: &[SubscriptionConfig]) -> Topology {
    let mut topology = Topology::new(
        EngineRegistry::new(engines),
        subscriptions.iter().map(Subscription::new),
    );

    let (engines, sources) = topology.parts_mut();
    for engine in engines.iter_mut() {
        engine.set_enabled(true);
        engine.derive_ddl_aware(false);
    }
    for group in sources.iter_mut() {
        for monitor in group.monitors_mut() {
            monitor.set_enabled(true);
        }
    }

    topology
}

/// Returns a fresh directory path under the system temp directory. Nothing is created.
pub fn scratch_path(prefix: &str) -> PathBuf {
    let index = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("{prefix}-{}-{index}", std::process::id()))
}

/// Tunables with short waits, writing reports and flags into a scratch directory.
pub fn test_globals() -> GlobalsConfig {
    let scratch = scratch_path("autosub-test");

    GlobalsConfig {
        poll_period_ms: 10,
        wait_start_stop_secs: 1,
        pause_after_error_ms: 30_000,
        pause_before_repair_ms: 1,
        grab_bookmarks: false,
        recovery_dir: scratch.join("recovery").to_string_lossy().into_owned(),
        data_file: scratch.join("subs-datafile").to_string_lossy().into_owned(),
        stop_poll_interval_ms: 1,
        log_dir: None,
    }
}
