//! Failure diagnosis for the subscriptions of one source datastore.
//!
//! [`FailureChecker::check`] polls the replication state of every subscription, diagnoses the
//! failed ones from their event log and finally decides which altered tables can be repaired
//! without breaking sibling subscriptions that still replicate them.

mod families;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use config::shared::{EngineRole, GlobalsConfig, RefreshMode};
use tracing::{debug, info, warn};

pub use families::{FailureFamily, SUBSCRIPTION_START_EVENT_ID, normalize_message};

use crate::control::{ControlPlane, ReplicationStatus, Script};
use crate::error::{AutosubResult, ErrorKind};
use crate::model::{EngineRegistry, Monitor, RepairMode, SourceGroup};

/// Diagnoses the subscriptions of a source group through one control plane script.
pub struct FailureChecker<'a, C> {
    script: &'a mut Script<C>,
    engines: &'a EngineRegistry,
    pause_after_error: Duration,
    now: DateTime<Utc>,
}

impl<'a, C> FailureChecker<'a, C>
where
    C: ControlPlane,
{
    pub fn new(script: &'a mut Script<C>, engines: &'a EngineRegistry, globals: &GlobalsConfig) -> Self {
        Self {
            script,
            engines,
            pause_after_error: globals.pause_after_error(),
            now: Utc::now(),
        }
    }

    /// Evaluates the retry backoff against `now` instead of the construction time.
    pub fn with_start_time(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Checks every monitor of `group` and selects the tables to repair.
    ///
    /// Returns `true` if at least one monitor is pending repair afterwards.
    pub async fn check(&mut self, group: &mut SourceGroup) -> AutosubResult<bool> {
        group.monitors_mut().for_each(Monitor::reset_cycle);

        self.script
            .select_datastore(group.source(), EngineRole::Source)
            .await?;
        let statuses = self.script.monitor_replication().await?;
        for status in &statuses {
            self.check_row(group, status).await?;
        }

        let engines = self.engines;
        group
            .monitors_mut()
            .filter(|monitor| {
                monitor.is_enabled() && engines.is_enabled(&monitor.subscription().target)
            })
            .for_each(Monitor::report_presence);

        self.select_tables(group).await?;

        Ok(group.has_pending())
    }

    async fn check_row(&mut self, group: &mut SourceGroup, status: &ReplicationStatus) -> AutosubResult<()> {
        if !self.engines.is_enabled(&status.target) {
            return Ok(());
        }
        let Some(monitor) = group
            .find_target_mut(&status.target)
            .and_then(|target| target.find_monitor_mut(&status.subscription))
        else {
            return Ok(());
        };
        if !monitor.is_enabled() {
            return Ok(());
        }

        monitor.known = true;
        if status.is_mirroring() {
            monitor.report_recovered();
            return Ok(());
        }

        monitor.report_not_working(&status.state);
        if status.is_failed() {
            monitor.repair_mode = self.check_monitor(monitor).await?;
        }

        Ok(())
    }

    /// Diagnoses a failed subscription from its event log.
    ///
    /// On success the altered table is appended to the monitor and the repair mode is
    /// returned. Any reason not to repair yields [`RepairMode::Disabled`].
    pub async fn check_monitor(&mut self, monitor: &mut Monitor) -> AutosubResult<RepairMode> {
        if let Some(failure_time) = monitor.failure_time() {
            let elapsed = (self.now - failure_time).to_std().unwrap_or_default();
            if elapsed < self.pause_after_error {
                debug!(
                    subscription = %monitor.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "previous repair failed recently, not retrying yet"
                );
                return Ok(RepairMode::Disabled);
            }
        }

        let events = self.script.list_subscription_events(monitor.name()).await?;
        let mut chosen = None;
        for (index, event_id) in events.iter().enumerate() {
            if event_id.trim() == SUBSCRIPTION_START_EVENT_ID {
                break;
            }
            if let Some(family) = FailureFamily::from_event_id(event_id) {
                chosen = Some((index, family));
            }
        }

        let Some((index, family)) = chosen else {
            monitor.report_cannot_repair();
            return Ok(RepairMode::Disabled);
        };
        debug!(subscription = %monitor.name(), index, %family, "diagnosing event");

        let text = normalize_message(&self.script.subscription_event_text(index).await?);
        let Some(table) = family.parse_table(&text) else {
            warn!(
                subscription = %monitor.name(),
                kind = ?ErrorKind::EventParseFailed,
                %family,
                message = %text,
                "could not find the table name in the event message"
            );
            monitor.report_cannot_repair();
            return Ok(RepairMode::Disabled);
        };

        let ddl_aware = self
            .engines
            .get(&monitor.subscription().source)
            .is_some_and(|engine| engine.is_ddl_aware());
        let refresh_required = family.requires_refresh() || !ddl_aware;

        let refresh = match monitor.subscription().refresh_mode {
            RefreshMode::Never if refresh_required => {
                info!(
                    subscription = %monitor.name(),
                    %table,
                    "table needs a refresh but refresh is not allowed for this subscription"
                );
                monitor.report_cannot_repair();
                return Ok(RepairMode::Disabled);
            }
            RefreshMode::Never | RefreshMode::Allow => refresh_required,
            RefreshMode::Force => true,
        };

        monitor.reset_cannot_repair();
        monitor.add_altered_table(table);

        Ok(if refresh {
            RepairMode::Refresh
        } else {
            RepairMode::Normal
        })
    }

    /// Keeps only the altered tables that no sibling subscription still replicates unaltered.
    ///
    /// A table claimed by pending monitors is repairable only if every subscription mapping
    /// it has reported it as altered too. Otherwise all claimants are disabled. Mappings are
    /// read for every monitor, enabled or not, and a subscription whose mappings cannot be read
    /// blocks every table it did not report as altered. Pending monitors left without a
    /// repairable table are disabled as well.
    pub async fn select_tables(&mut self, group: &mut SourceGroup) -> AutosubResult<()> {
        if !group.has_pending() {
            return Ok(());
        }

        let mut unreadable = BTreeSet::new();
        for target in group.targets_mut() {
            let target_name = target.target().to_string();
            if !self.engines.is_enabled(&target_name) {
                debug!(
                    target = %target_name,
                    "target datastore disabled, its subscriptions block every altered table"
                );
                unreadable.extend(target.monitors().iter().map(|monitor| monitor.name().to_string()));
                continue;
            }
            if let Err(err) = self
                .script
                .select_datastore(&target_name, EngineRole::Target)
                .await
            {
                if err.kind().is_connection() {
                    return Err(err);
                }
                warn!(
                    target = %target_name,
                    error = %err.summary(),
                    "cannot select target datastore to read table mappings"
                );
                unreadable.extend(target.monitors().iter().map(|monitor| monitor.name().to_string()));
                continue;
            }

            for monitor in target.monitors_mut() {
                match read_table_mappings(&mut *self.script, monitor.name()).await {
                    Ok(tables) => monitor.source_tables = tables,
                    Err(err) if err.kind().is_connection() => return Err(err),
                    Err(err) => {
                        warn!(
                            subscription = %monitor.name(),
                            error = %err.summary(),
                            "cannot read table mappings, treating the subscription as replicating every altered table"
                        );
                        unreadable.insert(monitor.name().to_string());
                    }
                }
            }
        }

        let mut candidates: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for monitor in group.pending_monitors() {
            for table in monitor.altered_tables() {
                candidates
                    .entry(table.clone())
                    .or_default()
                    .push(monitor.name().to_string());
            }
        }

        let mut selected = BTreeSet::new();
        for (table, claimants) in candidates {
            let blocker = group
                .monitors()
                .find(|monitor| {
                    !monitor.altered_tables().contains(&table)
                        && (monitor.source_tables().contains(&table)
                            || unreadable.contains(monitor.name()))
                })
                .map(|monitor| monitor.name().to_string());

            for name in &claimants {
                let Some(monitor) = group.find_monitor_mut(name) else {
                    continue;
                };
                match &blocker {
                    Some(blocker) => {
                        monitor.repair_mode = RepairMode::Disabled;
                        monitor.report_locked(&table, blocker);
                    }
                    None if monitor.is_pending() => monitor.reset_locked(),
                    None => {}
                }
            }

            if blocker.is_none() {
                selected.insert(table);
            }
        }

        for monitor in group.monitors_mut() {
            if monitor.is_pending() {
                monitor.retain_altered_tables(&selected);
                if monitor.altered_tables().is_empty() {
                    monitor.repair_mode = RepairMode::Disabled;
                }
            } else {
                monitor.altered_tables.clear();
            }
        }

        if !selected.is_empty() {
            let refresh = group
                .pending_monitors()
                .any(|monitor| monitor.repair_mode() == RepairMode::Refresh);
            let tables = selected.into_iter().collect::<Vec<_>>().join(", ");
            if refresh {
                info!(source = %group.source(), %tables, "selected table(s) for recovery with refresh");
            } else {
                info!(source = %group.source(), %tables, "selected table(s) for recovery");
            }
        }

        Ok(())
    }
}

async fn read_table_mappings<C>(
    script: &mut Script<C>,
    subscription: &str,
) -> AutosubResult<BTreeSet<String>>
where
    C: ControlPlane,
{
    script.select_subscription(subscription).await?;
    Ok(script.list_table_mappings().await?.into_iter().collect())
}
