use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use config::shared::{EngineRole, GlobalsConfig};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::autosub_error;
use crate::bail;
use crate::control::{ControlPlane, Script};
use crate::error::{AutosubResult, ErrorKind};
use crate::model::{Engine, EngineRegistry, Monitor, RepairMode, SourceGroup};
use crate::report::{RecoveryReport, ReportCategory};
use crate::tool::{Substitutions, TOKEN_SOURCE, TOKEN_SUB, TOKEN_TABLE, ToolRunner};

const LARGE_OBJECT_TYPES: [&str; 4] = ["BLOB", "CLOB", "NCLOB", "DBCLOB"];

/// How a repair sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Nothing was pending, no command was issued.
    Skipped,
    /// Every step ran. Individual monitors may still have been excluded along the way.
    Completed,
    /// The sequence stopped early. Stopped subscriptions were restarted anyway.
    Halted,
}

/// Returns `true` for large-object column types excluded by `skip_new_blobs`.
pub fn is_large_object(data_type: &str) -> bool {
    let data_type = data_type.trim();
    LARGE_OBJECT_TYPES
        .iter()
        .any(|candidate| data_type.eq_ignore_ascii_case(candidate))
}

/// Returns `true` for a line holding a bookmark: 8 to 512 uppercase hex digits.
pub fn is_bookmark(line: &str) -> bool {
    (8..=512).contains(&line.len())
        && line
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'A'..=b'F').contains(&byte))
}

/// Runs the repair sequence for the pending monitors of one source group.
///
/// The sequence stops every mirroring subscription of the source datastore, clears its
/// staging store, re-adds the selected tables and remaps the pending subscriptions. Whatever
/// happens in between, the subscriptions it stopped or repaired are started again before
/// [`Repairman::run`] returns.
pub struct Repairman<'a, C, T> {
    script: &'a mut Script<C>,
    tools: &'a T,
    engines: &'a EngineRegistry,
    group: &'a mut SourceGroup,
    globals: &'a GlobalsConfig,
    report: &'a RecoveryReport,
    started_at: DateTime<Utc>,
    selected_tables: BTreeSet<String>,
    /// Subscriptions to start at the end, with their target datastore.
    to_restart: BTreeMap<String, String>,
}

impl<'a, C, T> Repairman<'a, C, T>
where
    C: ControlPlane,
    T: ToolRunner,
{
    pub fn new(
        script: &'a mut Script<C>,
        tools: &'a T,
        engines: &'a EngineRegistry,
        group: &'a mut SourceGroup,
        globals: &'a GlobalsConfig,
        report: &'a RecoveryReport,
    ) -> Self {
        let selected_tables = group.altered_tables();

        Self {
            script,
            tools,
            engines,
            group,
            globals,
            report,
            started_at: Utc::now(),
            selected_tables,
            to_restart: BTreeMap::new(),
        }
    }

    /// Uses `started_at` as the failure time of monitors excluded by this sequence.
    pub fn with_start_time(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn selected_tables(&self) -> &BTreeSet<String> {
        &self.selected_tables
    }

    pub async fn run(mut self) -> RepairOutcome {
        if self.selected_tables.is_empty() || !self.group.has_pending() {
            return RepairOutcome::Skipped;
        }

        let source = self.group.source().to_string();
        let tables = self
            .selected_tables
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let subscriptions = self.group.pending_names().join(", ");

        let _scope = self
            .report
            .scope(Path::new(&self.globals.recovery_dir), &source);
        self.report.record(
            ReportCategory::Version,
            concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")),
        );
        self.report.record(
            ReportCategory::Metadata,
            &format!("source={source} subscriptions={subscriptions} tables={tables}"),
        );
        info!(%source, %subscriptions, %tables, "starting repair");

        let completed = match self.repair_steps().await {
            Ok(completed) => completed,
            Err(err) => {
                error!(%source, error = %err.summary(), "repair sequence aborted");
                false
            }
        };

        self.restart_subscriptions().await;

        if completed {
            let repaired = self.group.pending_names().join(", ");
            info!(%source, subscriptions = %repaired, "repair completed");
            self.report
                .record(ReportCategory::Success, &format!("repaired {repaired}"));
            RepairOutcome::Completed
        } else {
            info!(%source, "repair halted");
            RepairOutcome::Halted
        }
    }

    /// Runs every step up to, but excluding, the restart.
    ///
    /// Returns `Ok(false)` when no monitor is left to repair after a step.
    async fn repair_steps(&mut self) -> AutosubResult<bool> {
        let source = self.group.source().to_string();
        let engines = self.engines;
        let Some(source_engine) = engines.get(&source) else {
            bail!(
                ErrorKind::InvalidConfig,
                "Source engine is not configured",
                source
            );
        };

        self.script
            .select_datastore(&source, EngineRole::Source)
            .await?;

        if self.globals.grab_bookmarks {
            self.grab_bookmarks().await;
        }

        self.capture_columns().await;
        if !self.group.has_pending() {
            info!(%source, "no subscription left to repair after capturing columns");
            return Ok(false);
        }

        self.stop_subscriptions().await?;

        if !self.clear_staging(source_engine).await {
            return Ok(false);
        }

        self.readd_tables(source_engine).await;
        if !self.group.has_pending() {
            info!(%source, "no subscription left to repair after re-adding tables");
            return Ok(false);
        }

        self.remap_subscriptions().await;
        if !self.group.has_pending() {
            info!(%source, "no subscription left to repair after remapping");
            return Ok(false);
        }

        Ok(true)
    }

    async fn grab_bookmarks(&mut self) {
        for monitor in self.group.monitors_mut().filter(|monitor| monitor.is_pending()) {
            let Some(engine) = self.engines.get(&monitor.subscription().target) else {
                continue;
            };

            let template = engine.expand_command(engine.commands().bookmark_get());
            let substitutions =
                Substitutions::from([(TOKEN_SUB.to_string(), monitor.name().to_string())]);
            let output = self
                .tools
                .run("get-bookmark", &template, &substitutions)
                .await;
            if !output.is_success() {
                warn!(
                    subscription = %monitor.name(),
                    exit_code = output.exit_code,
                    output = %output.output,
                    "failed to get bookmark"
                );
                continue;
            }

            monitor.bookmark = output
                .output
                .lines()
                .map(str::trim)
                .find(|line| is_bookmark(line))
                .map(str::to_string);
            match monitor.bookmark() {
                Some(bookmark) => {
                    info!(subscription = %monitor.name(), bookmark, "bookmark before repair");
                    self.report.record(
                        ReportCategory::Metadata,
                        &format!("bookmark {} {bookmark}", monitor.name()),
                    );
                }
                None => warn!(subscription = %monitor.name(), "no bookmark in tool output"),
            }
        }
    }

    async fn capture_columns(&mut self) {
        for monitor in self.group.monitors_mut().filter(|monitor| monitor.is_pending()) {
            if let Err(err) = capture_monitor_columns(&mut *self.script, monitor).await {
                warn!(
                    subscription = %monitor.name(),
                    error = %err.summary(),
                    "failed to capture column state, excluding subscription from repair"
                );
                monitor.mark_repair_failed(self.started_at);
            }
        }
    }

    /// Stops every mirroring subscription of the source datastore and waits until none mirrors.
    async fn stop_subscriptions(&mut self) -> AutosubResult<()> {
        let wait_secs = self.globals.wait_start_stop_secs;

        for status in self.script.monitor_replication().await? {
            if !status.is_mirroring() {
                continue;
            }

            self.to_restart
                .insert(status.subscription.clone(), status.target.clone());
            info!(subscription = %status.subscription, "stopping subscription");
            self.script
                .select_datastore(&status.target, EngineRole::Target)
                .await?;
            self.script.select_subscription(&status.subscription).await?;
            self.script.end_replication(wait_secs).await?;
        }

        let deadline = Instant::now() + Duration::from_secs(wait_secs);
        loop {
            let mirroring: Vec<String> = self
                .script
                .monitor_replication()
                .await?
                .into_iter()
                .filter(|status| status.is_mirroring())
                .map(|status| status.subscription)
                .collect();
            if mirroring.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!(
                    ErrorKind::InvalidState,
                    "Subscriptions did not stop in time",
                    mirroring.join(", ")
                );
            }

            debug!(subscriptions = %mirroring.join(", "), "waiting for subscriptions to stop");
            tokio::time::sleep(self.globals.stop_poll_interval()).await;
        }
    }

    /// Clears the staging store of the source datastore.
    ///
    /// The staging store is shared by every subscription of the source, so on failure all
    /// monitors are excluded.
    async fn clear_staging(&mut self, engine: &Engine) -> bool {
        let template = engine.expand_command(engine.commands().clear_staging());
        let substitutions =
            Substitutions::from([(TOKEN_SOURCE.to_string(), engine.name().to_string())]);
        let output = self
            .tools
            .run("clear-staging", &template, &substitutions)
            .await;
        if output.is_success() {
            return true;
        }

        let err = autosub_error!(
            ErrorKind::ExternalToolFailed,
            "Staging store clear failed",
            format!("exit code {}: {}", output.exit_code, output.output.trim())
        );
        error!(source = %engine.name(), error = %err.summary(), "cannot repair any subscription of the source");
        for monitor in self.group.monitors_mut() {
            monitor.mark_repair_failed(self.started_at);
        }

        false
    }

    /// Re-adds each selected table. A failure excludes only the monitors altered on that table.
    async fn readd_tables(&mut self, engine: &Engine) {
        let template = engine.expand_command(engine.commands().readd_table());

        for table in &self.selected_tables {
            let substitutions = Substitutions::from([
                (TOKEN_TABLE.to_string(), table.clone()),
                (TOKEN_SOURCE.to_string(), engine.name().to_string()),
            ]);
            let output = self.tools.run("readd-table", &template, &substitutions).await;
            if output.is_success() {
                info!(source = %engine.name(), %table, "re-added table");
                continue;
            }

            let err = autosub_error!(
                ErrorKind::ExternalToolFailed,
                "Table re-add failed",
                format!("exit code {}: {}", output.exit_code, output.output.trim())
            );
            warn!(source = %engine.name(), %table, error = %err.summary(), "excluding subscriptions of the table from repair");
            for monitor in self
                .group
                .monitors_mut()
                .filter(|monitor| monitor.altered_tables().contains(table))
            {
                monitor.mark_repair_failed(self.started_at);
            }
        }
    }

    async fn remap_subscriptions(&mut self) {
        for monitor in self.group.monitors_mut().filter(|monitor| monitor.is_pending()) {
            match remap_monitor(&mut *self.script, monitor).await {
                Ok(()) => {
                    info!(subscription = %monitor.name(), "remapped subscription");
                    monitor.set_failure_time(None);
                    self.to_restart.insert(
                        monitor.name().to_string(),
                        monitor.subscription().target.clone(),
                    );
                }
                Err(err) => {
                    warn!(
                        subscription = %monitor.name(),
                        error = %err.summary(),
                        "failed to remap subscription, it may remain locked"
                    );
                    monitor.mark_repair_failed(self.started_at);
                }
            }
        }
    }

    /// Starts every subscription stopped or repaired by this sequence. Failures are logged only.
    async fn restart_subscriptions(&mut self) {
        let wait_secs = self.globals.wait_start_stop_secs;

        for (subscription, target) in std::mem::take(&mut self.to_restart) {
            let script = &mut *self.script;
            let result = async {
                script.select_datastore(&target, EngineRole::Target).await?;
                script.select_subscription(&subscription).await?;
                if let Err(err) = script.unlock_subscription().await {
                    debug!(%subscription, error = %err.summary(), "unlock before start ignored");
                }
                script.start_mirroring(wait_secs).await
            }
            .await;

            match result {
                Ok(()) => info!(%subscription, "started subscription"),
                Err(err) => error!(%subscription, error = %err.summary(), "failed to start subscription"),
            }
        }
    }
}

/// Records the replicate flag of every source column of each altered table of `monitor`.
async fn capture_monitor_columns<C>(script: &mut Script<C>, monitor: &mut Monitor) -> AutosubResult<()>
where
    C: ControlPlane,
{
    let subscription = monitor.subscription().clone();
    script
        .select_datastore(&subscription.target, EngineRole::Target)
        .await?;
    script.select_subscription(&subscription.name).await?;

    for table in monitor.altered_tables.clone() {
        script.select_table_mapping(&table).await?;
        let columns = script
            .list_source_columns()
            .await?
            .into_iter()
            .map(|column| (column.name, column.replicated))
            .collect();
        monitor.column_state.insert(table, columns);
    }

    Ok(())
}

/// Reassigns each altered table mapping of `monitor` and restores its column flags.
async fn remap_monitor<C>(script: &mut Script<C>, monitor: &Monitor) -> AutosubResult<()>
where
    C: ControlPlane,
{
    let subscription = monitor.subscription();
    script
        .select_datastore(&subscription.target, EngineRole::Target)
        .await?;
    script.select_subscription(&subscription.name).await?;
    if let Err(err) = script.unlock_subscription().await {
        debug!(subscription = %subscription.name, error = %err.summary(), "unlock before lock ignored");
    }
    script.lock_subscription().await?;
    script.describe_subscription().await?;

    for table in monitor.altered_tables() {
        script.select_table_mapping(table).await?;
        script.reassign_table_mapping().await?;

        let snapshot = monitor.column_state(table);
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for column in script.list_source_columns().await? {
            let desired = match snapshot.and_then(|columns| columns.get(&column.name)) {
                Some(replicated) => *replicated,
                None => !(subscription.skip_new_blobs && is_large_object(&column.data_type)),
            };
            if desired == column.replicated {
                continue;
            }
            if desired {
                include.push(column.name);
            } else {
                exclude.push(column.name);
            }
        }

        for column in &include {
            script.filter_source_column(column, true).await?;
        }
        for column in &exclude {
            script.filter_source_column(column, false).await?;
        }
        if monitor.repair_mode() == RepairMode::Refresh {
            script.flag_refresh().await?;
        }
        debug!(
            subscription = %subscription.name,
            %table,
            included = include.len(),
            excluded = exclude.len(),
            "remapped table"
        );
    }

    script.unlock_subscription().await?;

    Ok(())
}
