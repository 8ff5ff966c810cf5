use std::path::Path;

use config::shared::AutosubConfig;
use config::{load_config, load_config_from};

use crate::error::{DaemonError, DaemonResult};

/// Loads and validates the daemon configuration.
///
/// Reads from `directory` when given, otherwise from `./configuration`.
pub fn load_autosub_config(directory: Option<&Path>) -> DaemonResult<AutosubConfig> {
    let config: AutosubConfig = match directory {
        Some(directory) => load_config_from(directory),
        None => load_config(),
    }
    .map_err(DaemonError::config)?;

    config.validate().map_err(DaemonError::config)?;

    Ok(config)
}
