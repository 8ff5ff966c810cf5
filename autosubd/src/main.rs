//! Subscription auto-repair daemon.
//!
//! Loads the configuration, initializes tracing, and runs the supervisor until a shutdown
//! signal or a shutdown flag file is observed. A reload flag file makes the daemon re-read
//! its configuration and start a new generation.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use crate::config::load_autosub_config;
use crate::core::start_autosub_with_config;
use crate::error::{DaemonError, DaemonResult};

mod config;
mod core;
mod error;

/// Command line arguments of the daemon.
#[derive(Debug, Parser)]
#[command(name = "autosubd", version, about = "Detects and repairs failed replication subscriptions")]
struct Args {
    /// Directory holding `base.yaml` and the environment files. Defaults to `./configuration`.
    #[arg(long, env = "AUTOSUB_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn run() -> DaemonResult<()> {
    let args = Args::parse();

    let config = load_autosub_config(args.config_dir.as_deref())?;

    let log_dir = config.globals.log_dir.as_ref().map(PathBuf::from);
    let _log_flusher = telemetry::tracing::init_tracing(env!("CARGO_BIN_NAME"), log_dir.as_deref())
        .map_err(DaemonError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config, args.config_dir))?;

    Ok(())
}

async fn async_main(
    config: ::config::shared::AutosubConfig,
    config_dir: Option<PathBuf>,
) -> DaemonResult<()> {
    if let Err(err) = start_autosub_with_config(config, config_dir).await {
        error!("autosub daemon failed: {}", err);
        return Err(err);
    }

    info!("autosub daemon stopped");

    Ok(())
}
