use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::ErrorKind;
use crate::model::latch::ReportLatch;
use crate::model::subscription::Subscription;

/// How a subscription is going to be repaired in the current cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RepairMode {
    /// Not repaired.
    #[default]
    Disabled,
    /// Table metadata is re-added and columns remapped in place.
    Normal,
    /// Like [`RepairMode::Normal`], additionally flagging the tables for a full refresh.
    Refresh,
}

impl RepairMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairMode::Disabled => "disabled",
            RepairMode::Normal => "normal",
            RepairMode::Refresh => "refresh",
        }
    }
}

/// Column replicate flags of a table mapping, keyed by source column name.
pub type ColumnState = BTreeMap<String, bool>;

#[derive(Debug, Clone, Default)]
struct MonitorLatches {
    missing: ReportLatch,
    stopped: ReportLatch,
    cannot_repair: ReportLatch,
    locked: ReportLatch,
}

/// Runtime state of one monitored subscription.
///
/// `known`, the repair mode, the altered and source tables and the bookmark are rebuilt on
/// every check. The failure time and the report latches survive across cycles.
#[derive(Debug, Clone)]
pub struct Monitor {
    subscription: Subscription,
    pub(crate) enabled: bool,
    pub(crate) known: bool,
    pub(crate) repair_mode: RepairMode,
    pub(crate) altered_tables: Vec<String>,
    pub(crate) source_tables: BTreeSet<String>,
    pub(crate) bookmark: Option<String>,
    pub(crate) column_state: BTreeMap<String, ColumnState>,
    pub(crate) failure_time: Option<DateTime<Utc>>,
    latches: MonitorLatches,
}

impl Monitor {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            enabled: false,
            known: false,
            repair_mode: RepairMode::Disabled,
            altered_tables: Vec::new(),
            source_tables: BTreeSet::new(),
            bookmark: None,
            column_state: BTreeMap::new(),
            failure_time: None,
            latches: MonitorLatches::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.subscription.name
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_known(&self) -> bool {
        self.known
    }

    pub fn repair_mode(&self) -> RepairMode {
        self.repair_mode
    }

    /// Returns `true` when the monitor is scheduled for repair.
    pub fn is_pending(&self) -> bool {
        self.repair_mode != RepairMode::Disabled
    }

    pub fn altered_tables(&self) -> &[String] {
        &self.altered_tables
    }

    pub fn source_tables(&self) -> &BTreeSet<String> {
        &self.source_tables
    }

    pub fn bookmark(&self) -> Option<&str> {
        self.bookmark.as_deref()
    }

    /// Column flags captured before the repair of `table`.
    pub fn column_state(&self, table: &str) -> Option<&ColumnState> {
        self.column_state.get(table)
    }

    pub fn failure_time(&self) -> Option<DateTime<Utc>> {
        self.failure_time
    }

    pub fn set_failure_time(&mut self, failure_time: Option<DateTime<Utc>>) {
        self.failure_time = failure_time;
    }

    /// Drops everything derived by the previous check.
    pub(crate) fn reset_cycle(&mut self) {
        self.known = false;
        self.repair_mode = RepairMode::Disabled;
        self.altered_tables.clear();
        self.source_tables.clear();
        self.bookmark = None;
        self.column_state.clear();
    }

    pub(crate) fn add_altered_table(&mut self, table: String) {
        if !self.altered_tables.contains(&table) {
            self.altered_tables.push(table);
        }
    }

    /// Keeps only the altered tables found in `selected`, preserving their order.
    pub(crate) fn retain_altered_tables(&mut self, selected: &BTreeSet<String>) {
        self.altered_tables.retain(|table| selected.contains(table));
    }

    /// Excludes the monitor from the ongoing repair and starts the retry backoff.
    pub(crate) fn mark_repair_failed(&mut self, at: DateTime<Utc>) {
        self.failure_time = Some(at);
        self.repair_mode = RepairMode::Disabled;
    }

    pub(crate) fn report_presence(&mut self) {
        if self.known {
            if self.latches.missing.clear() {
                info!(subscription = %self.name(), "found subscription");
            }
        } else if self.latches.missing.raise() {
            warn!(subscription = %self.name(), "lost subscription");
        }
    }

    pub(crate) fn report_recovered(&mut self) {
        if self.latches.stopped.clear() {
            info!(subscription = %self.name(), "recovered subscription");
        }
        self.latches.cannot_repair.clear();
        self.latches.locked.clear();
    }

    pub(crate) fn report_not_working(&mut self, state: &str) {
        if self.latches.stopped.raise() {
            info!(subscription = %self.name(), state, "subscription not working");
        }
    }

    pub(crate) fn report_cannot_repair(&mut self) {
        if self.latches.cannot_repair.raise() {
            warn!(subscription = %self.name(), "cannot repair the failed subscription");
        }
    }

    pub(crate) fn reset_cannot_repair(&mut self) {
        self.latches.cannot_repair.clear();
    }

    pub(crate) fn report_locked(&mut self, table: &str, blocker: &str) {
        if self.latches.locked.raise() {
            info!(
                subscription = %self.name(),
                kind = ?ErrorKind::DependencyLocked,
                table,
                blocker,
                "repair locked by sibling subscription replicating the altered table"
            );
        }
    }

    pub(crate) fn reset_locked(&mut self) {
        self.latches.locked.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_reported_missing(&self) -> bool {
        self.latches.missing.is_reported()
    }

    #[cfg(test)]
    pub(crate) fn is_reported_locked(&self) -> bool {
        self.latches.locked.is_reported()
    }
}

impl fmt::Display for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use config::shared::RefreshMode;

    use super::*;

    fn monitor() -> Monitor {
        Monitor::new(Subscription {
            name: "SUB1".to_string(),
            source: "ORA1".to_string(),
            target: "KAFKA".to_string(),
            skip_new_blobs: false,
            refresh_mode: RefreshMode::Allow,
        })
    }

    #[test]
    fn reset_cycle_keeps_failure_time() {
        let mut monitor = monitor();
        monitor.known = true;
        monitor.repair_mode = RepairMode::Refresh;
        monitor.add_altered_table("APP.T1".to_string());
        monitor.source_tables.insert("APP.T1".to_string());
        monitor.bookmark = Some("0011AABB".to_string());
        monitor
            .column_state
            .insert("APP.T1".to_string(), ColumnState::from([("ID".to_string(), true)]));
        let failed_at = Utc::now();
        monitor.mark_repair_failed(failed_at);

        monitor.reset_cycle();

        assert!(!monitor.is_known());
        assert!(!monitor.is_pending());
        assert!(monitor.altered_tables().is_empty());
        assert!(monitor.source_tables().is_empty());
        assert_eq!(monitor.bookmark(), None);
        assert_eq!(monitor.column_state("APP.T1"), None);
        assert_eq!(monitor.failure_time(), Some(failed_at));
    }

    #[test]
    fn altered_tables_are_deduplicated_in_order() {
        let mut monitor = monitor();
        monitor.add_altered_table("APP.T2".to_string());
        monitor.add_altered_table("APP.T1".to_string());
        monitor.add_altered_table("APP.T2".to_string());
        assert_eq!(monitor.altered_tables(), ["APP.T2", "APP.T1"]);

        monitor.retain_altered_tables(&BTreeSet::from(["APP.T1".to_string()]));
        assert_eq!(monitor.altered_tables(), ["APP.T1"]);
    }

    #[test]
    fn presence_latch_flips_on_transitions() {
        let mut monitor = monitor();
        monitor.report_presence();
        assert!(monitor.is_reported_missing());

        monitor.known = true;
        monitor.report_presence();
        assert!(!monitor.is_reported_missing());
    }
}
