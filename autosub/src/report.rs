//! Per-repair audit trail.
//!
//! While a repair sequence runs, every control plane command, every external tool invocation
//! and their outcomes are appended to `recovery_<timestamp>_<SOURCE>.txt` as tab-separated
//! `timestamp, category, text` lines.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::error::AutosubResult;

const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const LINE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Kind of a report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportCategory {
    Version,
    Metadata,
    Success,
    /// Control plane command sent.
    Command,
    /// Control plane command rejected.
    CommandError,
    ShellCommand,
    ShellOutput,
    ShellStatus,
}

impl ReportCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportCategory::Version => "version",
            ReportCategory::Metadata => "metadata",
            ReportCategory::Success => "success",
            ReportCategory::Command => "chcclp",
            ReportCategory::CommandError => "chcclp-error",
            ReportCategory::ShellCommand => "shell-command",
            ReportCategory::ShellOutput => "shell-output",
            ReportCategory::ShellStatus => "shell-status",
        }
    }
}

#[derive(Debug)]
struct ReportFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Shared handle to the active report, if any.
///
/// Clones refer to the same report, so the control plane script and the tool runner can both
/// record into the file opened by the repairman. Recording is a no-op while disabled.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    inner: Arc<Mutex<Option<ReportFile>>>,
}

impl RecoveryReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new report file for `source` in `dir` and makes it the active one.
    pub fn enable(&self, dir: &Path, source: &str, now: DateTime<Local>) -> AutosubResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(report_file_name(source, now));
        let file = File::create(&path)?;

        *self.lock() = Some(ReportFile {
            path: path.clone(),
            writer: BufWriter::new(file),
        });
        info!(path = %path.display(), "recovery report enabled");

        Ok(path)
    }

    /// Flushes and closes the active report.
    pub fn disable(&self) {
        if let Some(mut report) = self.lock().take() {
            if let Err(err) = report.writer.flush() {
                warn!(path = %report.path.display(), error = %err, "failed to flush recovery report");
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().is_some()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|report| report.path.clone())
    }

    /// Appends one line to the active report, if any.
    pub fn record(&self, category: ReportCategory, text: &str) {
        let mut guard = self.lock();
        let Some(report) = guard.as_mut() else {
            return;
        };

        let timestamp = Local::now().format(LINE_TIMESTAMP_FORMAT);
        let result = writeln!(report.writer, "{timestamp}\t{}\t{text}", category.as_str())
            .and_then(|_| report.writer.flush());
        if let Err(err) = result {
            warn!(path = %report.path.display(), error = %err, "failed to write recovery report");
        }
    }

    /// Enables the report for the lifetime of the returned guard.
    ///
    /// Failure to open the file is logged and yields a guard that records nothing.
    pub fn scope(&self, dir: &Path, source: &str) -> ReportScope {
        if let Err(err) = self.enable(dir, source, Local::now()) {
            warn!(source, error = %err.summary(), "recovery report unavailable, repairing without it");
        }
        ReportScope {
            report: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ReportFile>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Disables the report when dropped.
#[must_use]
pub struct ReportScope {
    report: RecoveryReport,
}

impl Drop for ReportScope {
    fn drop(&mut self) {
        self.report.disable();
    }
}

fn report_file_name(source: &str, now: DateTime<Local>) -> String {
    format!("recovery_{}_{}.txt", now.format(FILE_TIMESTAMP_FORMAT), source)
}
