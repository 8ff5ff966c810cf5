use std::collections::BTreeSet;

use config::shared::AutosubConfig;

use crate::model::engine::{EngineRegistry, normalize_datastore_name};
use crate::model::latch::ReportLatch;
use crate::model::monitor::Monitor;
use crate::model::subscription::Subscription;

/// Monitors of one source datastore that replicate into the same target datastore.
#[derive(Debug, Clone)]
pub struct TargetGroup {
    target: String,
    monitors: Vec<Monitor>,
}

impl TargetGroup {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    pub fn monitors_mut(&mut self) -> &mut [Monitor] {
        &mut self.monitors
    }

    pub fn find_monitor(&self, name: &str) -> Option<&Monitor> {
        self.monitors
            .iter()
            .find(|monitor| monitor.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn find_monitor_mut(&mut self, name: &str) -> Option<&mut Monitor> {
        self.monitors
            .iter_mut()
            .find(|monitor| monitor.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// Monitors of one source datastore, grouped by target datastore.
///
/// This is the unit of checking and repairing: all of its subscriptions share the source
/// staging store.
#[derive(Debug, Clone)]
pub struct SourceGroup {
    source: String,
    targets: Vec<TargetGroup>,
    pub(crate) check_errors: ReportLatch,
}

impl SourceGroup {
    pub fn new(source: &str) -> Self {
        Self {
            source: normalize_datastore_name(source),
            targets: Vec::new(),
            check_errors: ReportLatch::default(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn targets(&self) -> &[TargetGroup] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut [TargetGroup] {
        &mut self.targets
    }

    /// Adds a monitor under its target datastore.
    pub fn add_monitor(&mut self, monitor: Monitor) {
        let target = monitor.subscription().target.clone();
        match self.targets.iter_mut().find(|group| group.target == target) {
            Some(group) => group.monitors.push(monitor),
            None => self.targets.push(TargetGroup {
                target,
                monitors: vec![monitor],
            }),
        }
    }

    pub fn find_target(&self, name: &str) -> Option<&TargetGroup> {
        let name = normalize_datastore_name(name);
        self.targets.iter().find(|group| group.target == name)
    }

    pub fn find_target_mut(&mut self, name: &str) -> Option<&mut TargetGroup> {
        let name = normalize_datastore_name(name);
        self.targets.iter_mut().find(|group| group.target == name)
    }

    pub fn find_monitor(&self, name: &str) -> Option<&Monitor> {
        self.targets
            .iter()
            .find_map(|group| group.find_monitor(name))
    }

    pub fn find_monitor_mut(&mut self, name: &str) -> Option<&mut Monitor> {
        self.targets
            .iter_mut()
            .find_map(|group| group.find_monitor_mut(name))
    }

    pub fn monitors(&self) -> impl Iterator<Item = &Monitor> {
        self.targets.iter().flat_map(|group| group.monitors.iter())
    }

    pub fn monitors_mut(&mut self) -> impl Iterator<Item = &mut Monitor> {
        self.targets
            .iter_mut()
            .flat_map(|group| group.monitors.iter_mut())
    }

    pub fn pending_monitors(&self) -> impl Iterator<Item = &Monitor> {
        self.monitors().filter(|monitor| monitor.is_pending())
    }

    /// Names of the pending monitors, in topology order.
    pub fn pending_names(&self) -> Vec<String> {
        self.pending_monitors()
            .map(|monitor| monitor.name().to_string())
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.pending_monitors().next().is_some()
    }

    /// Union of the altered tables of the pending monitors.
    pub fn altered_tables(&self) -> BTreeSet<String> {
        self.pending_monitors()
            .flat_map(|monitor| monitor.altered_tables().iter().cloned())
            .collect()
    }

    pub fn has_enabled_monitor(&self) -> bool {
        self.monitors().any(Monitor::is_enabled)
    }
}

/// Engines and source groups of one configuration generation.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    engines: EngineRegistry,
    sources: Vec<SourceGroup>,
}

impl Topology {
    /// Builds the topology with every engine and monitor disabled until validated.
    pub fn from_config(config: &AutosubConfig) -> Self {
        let subscriptions = config.subscriptions.iter().map(Subscription::new);
        Self::new(EngineRegistry::new(&config.engines), subscriptions)
    }

    pub fn new(engines: EngineRegistry, subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let mut sources: Vec<SourceGroup> = Vec::new();
        for subscription in subscriptions {
            let index = match sources
                .iter()
                .position(|group| group.source == subscription.source)
            {
                Some(index) => index,
                None => {
                    sources.push(SourceGroup::new(&subscription.source));
                    sources.len() - 1
                }
            };
            sources[index].add_monitor(Monitor::new(subscription));
        }

        Self { engines, sources }
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    pub fn sources(&self) -> &[SourceGroup] {
        &self.sources
    }

    pub fn source(&self, name: &str) -> Option<&SourceGroup> {
        let name = normalize_datastore_name(name);
        self.sources.iter().find(|group| group.source == name)
    }

    /// Splits the topology into engines and source groups so both can be updated together.
    pub fn parts_mut(&mut self) -> (&mut EngineRegistry, &mut [SourceGroup]) {
        (&mut self.engines, &mut self.sources)
    }

    /// Returns `true` if any subscription uses the named engine.
    pub fn is_engine_used(&self, name: &str) -> bool {
        let name = normalize_datastore_name(name);
        self.sources.iter().any(|group| {
            group.source == name || group.targets.iter().any(|target| target.target == name)
        })
    }

    pub fn monitors(&self) -> impl Iterator<Item = &Monitor> {
        self.sources.iter().flat_map(|group| group.monitors())
    }
}

#[cfg(test)]
mod tests {
    use config::shared::RefreshMode;

    use super::*;
    use crate::model::monitor::RepairMode;

    fn subscription(name: &str, source: &str, target: &str) -> Subscription {
        Subscription {
            name: name.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            skip_new_blobs: false,
            refresh_mode: RefreshMode::Allow,
        }
    }

    fn topology() -> Topology {
        Topology::new(
            EngineRegistry::default(),
            [
                subscription("SUB1", "ORA1", "KAFKA"),
                subscription("SUB2", "ORA1", "DB2T"),
                subscription("SUB3", "ORA1", "KAFKA"),
                subscription("SUB4", "PG1", "KAFKA"),
            ],
        )
    }

    #[test]
    fn subscriptions_are_grouped_by_source_then_target() {
        let topology = topology();

        assert_eq!(topology.sources().len(), 2);
        let ora = topology.source("ora1").unwrap();
        assert_eq!(ora.targets().len(), 2);
        assert_eq!(ora.find_target("kafka").unwrap().monitors().len(), 2);
        assert_eq!(ora.find_monitor("sub2").map(Monitor::name), Some("SUB2"));
        assert!(ora.find_monitor("SUB4").is_none());
        assert!(topology.is_engine_used("DB2T"));
        assert!(!topology.is_engine_used("MSSQL"));
    }

    #[test]
    fn altered_tables_cover_only_pending_monitors() {
        let mut topology = topology();
        let (_, sources) = topology.parts_mut();
        let ora = &mut sources[0];

        let sub1 = ora.find_monitor_mut("SUB1").unwrap();
        sub1.repair_mode = RepairMode::Normal;
        sub1.add_altered_table("APP.T1".to_string());

        let sub3 = ora.find_monitor_mut("SUB3").unwrap();
        sub3.add_altered_table("APP.T9".to_string());

        assert_eq!(ora.pending_names(), ["SUB1"]);
        assert_eq!(ora.altered_tables(), BTreeSet::from(["APP.T1".to_string()]));
    }
}
