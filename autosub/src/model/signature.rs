use std::collections::{BTreeMap, BTreeSet};

use crate::model::topology::SourceGroup;

/// Pending repair state of one source datastore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSignature {
    pub altered_tables: BTreeSet<String>,
    pub pending_subscriptions: BTreeSet<String>,
}

/// Snapshot of the pending repairs across source groups.
///
/// Two snapshots compare equal when every source has the same altered tables and the same
/// pending subscriptions. The driving loop repairs only when two snapshots taken a settle
/// delay apart agree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSignature {
    sources: BTreeMap<String, SourceSignature>,
}

impl ChangeSignature {
    pub fn capture<'a>(groups: impl IntoIterator<Item = &'a SourceGroup>) -> Self {
        let sources = groups
            .into_iter()
            .map(|group| {
                let signature = SourceSignature {
                    altered_tables: group.altered_tables(),
                    pending_subscriptions: group
                        .pending_monitors()
                        .map(|monitor| monitor.name().to_string())
                        .collect(),
                };
                (group.source().to_string(), signature)
            })
            .collect();

        Self { sources }
    }

    pub fn source(&self, name: &str) -> Option<&SourceSignature> {
        self.sources.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.sources
            .values()
            .all(|signature| signature.pending_subscriptions.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use config::shared::RefreshMode;

    use super::*;
    use crate::model::monitor::{Monitor, RepairMode};
    use crate::model::subscription::Subscription;

    fn group() -> SourceGroup {
        let mut group = SourceGroup::new("ORA1");
        for name in ["SUB1", "SUB2"] {
            group.add_monitor(Monitor::new(Subscription {
                name: name.to_string(),
                source: "ORA1".to_string(),
                target: "KAFKA".to_string(),
                skip_new_blobs: false,
                refresh_mode: RefreshMode::Allow,
            }));
        }
        let sub1 = group.find_monitor_mut("SUB1").unwrap();
        sub1.repair_mode = RepairMode::Normal;
        sub1.add_altered_table("APP.T1".to_string());
        group
    }

    #[test]
    fn snapshots_of_unchanged_state_are_equal() {
        let group = group();
        assert_eq!(
            ChangeSignature::capture([&group]),
            ChangeSignature::capture([&group])
        );
    }

    #[test]
    fn snapshots_differ_after_pending_set_changes() {
        let mut group = group();
        let before = ChangeSignature::capture([&group]);

        let sub2 = group.find_monitor_mut("SUB2").unwrap();
        sub2.repair_mode = RepairMode::Normal;
        sub2.add_altered_table("APP.T1".to_string());
        let after = ChangeSignature::capture([&group]);

        assert_ne!(before, after);
        assert_eq!(
            after.source("ORA1").unwrap().altered_tables,
            before.source("ORA1").unwrap().altered_tables
        );
    }

    #[test]
    fn snapshots_differ_after_altered_tables_change() {
        let mut group = group();
        let before = ChangeSignature::capture([&group]);

        group
            .find_monitor_mut("SUB1")
            .unwrap()
            .add_altered_table("APP.T2".to_string());

        assert_ne!(before, ChangeSignature::capture([&group]));
    }
}
