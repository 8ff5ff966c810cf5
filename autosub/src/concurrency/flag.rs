use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Suffix of the file that requests a shutdown.
pub const SHUTDOWN_SUFFIX: &str = "SHUTDOWN";

/// Suffix of the file that requests a configuration reload.
pub const RELOAD_SUFFIX: &str = "RELOAD";

/// A signal raised by an operator creating a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFlag {
    path: PathBuf,
}

impl FileFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Builds the flag `<data_file>.<suffix>`.
    pub fn for_data_file(data_file: &str, suffix: &str) -> Self {
        Self::new(format!("{data_file}.{suffix}"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_raised(&self) -> bool {
        self.path.exists()
    }

    /// Removes the flag file. A missing file is not an error.
    pub fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Returns `true` once per raise, removing the file.
    pub fn consume(&self) -> bool {
        if !self.is_raised() {
            return false;
        }
        if let Err(err) = self.clear() {
            warn!(path = %self.path.display(), error = %err, "failed to remove flag file");
        }

        true
    }
}

/// The shutdown and reload flags of one data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlags {
    pub shutdown: FileFlag,
    pub reload: FileFlag,
}

impl ControlFlags {
    pub fn new(data_file: &str) -> Self {
        Self {
            shutdown: FileFlag::for_data_file(data_file, SHUTDOWN_SUFFIX),
            reload: FileFlag::for_data_file(data_file, RELOAD_SUFFIX),
        }
    }
}
