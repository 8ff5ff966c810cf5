use std::path::PathBuf;

use autosub::concurrency::flag::ControlFlags;
use autosub::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use autosub::control::HttpControlPlaneConnector;
use autosub::model::topology::Topology;
use autosub::report::RecoveryReport;
use autosub::supervisor::{Supervisor, SupervisorExit};
use autosub::tool::ShellToolRunner;
use config::shared::AutosubConfig;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::load_autosub_config;
use crate::error::DaemonResult;

/// Runs supervisor generations until shutdown.
///
/// Each generation builds a fresh topology from the configuration. A reload request re-reads
/// the configuration before the next generation and keeps the previous one when the new
/// configuration cannot be loaded.
pub async fn start_autosub_with_config(
    config: AutosubConfig,
    config_dir: Option<PathBuf>,
) -> DaemonResult<()> {
    info!("starting autosub daemon");

    log_config(&config);

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let signal_handle = spawn_signal_listener(shutdown_tx)?;

    let mut config = config;
    let mut generation = 1u64;
    loop {
        info!(generation, "starting configuration generation");

        let topology = Topology::from_config(&config);
        let report = RecoveryReport::new();
        let connector = HttpControlPlaneConnector::new(config.control_plane.clone());
        let tools = ShellToolRunner::new(report.clone());
        let flags = ControlFlags::new(&config.globals.data_file);

        let supervisor = Supervisor::new(connector, tools, report, config.globals.clone(), topology);
        match supervisor.run(shutdown_rx.clone(), &flags).await {
            SupervisorExit::Shutdown => break,
            SupervisorExit::Reload => match load_autosub_config(config_dir.as_deref()) {
                Ok(reloaded) => {
                    info!("configuration reloaded");
                    log_config(&reloaded);
                    config = reloaded;
                }
                Err(err) => {
                    error!(
                        error = %err,
                        "failed to reload configuration, keeping the current one"
                    );
                }
            },
        }

        generation += 1;
    }

    signal_handle.abort();

    Ok(())
}

/// Spawns a task forwarding SIGINT and SIGTERM to the shutdown channel.
fn spawn_signal_listener(shutdown_tx: ShutdownTx) -> DaemonResult<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down");
            }
        }

        if let Err(e) = shutdown_tx.shutdown() {
            warn!(error = ?e, "failed to send shutdown signal");
        }
    });

    Ok(handle)
}

fn log_config(config: &AutosubConfig) {
    let control_plane = &config.control_plane;
    debug!(
        url = control_plane.url,
        host = control_plane.host,
        port = control_plane.port,
        username = control_plane.username,
        "control plane config"
    );

    let globals = &config.globals;
    debug!(
        poll_period_ms = globals.poll_period_ms,
        wait_start_stop_secs = globals.wait_start_stop_secs,
        pause_after_error_ms = globals.pause_after_error_ms,
        pause_before_repair_ms = globals.pause_before_repair_ms,
        grab_bookmarks = globals.grab_bookmarks,
        recovery_dir = globals.recovery_dir,
        data_file = globals.data_file,
        "globals config"
    );

    for engine in &config.engines {
        debug!(
            name = engine.name,
            role = engine.role.as_str(),
            instance = engine.instance,
            ddl_aware = ?engine.ddl_aware,
            "engine config"
        );
    }

    for subscription in &config.subscriptions {
        debug!(
            name = subscription.name,
            source = subscription.source,
            target = subscription.target,
            skip_new_blobs = subscription.skip_new_blobs,
            refresh_mode = ?subscription.refresh_mode,
            "subscription config"
        );
    }
}
