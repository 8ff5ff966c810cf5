use std::collections::BTreeSet;

use config::shared::EngineRole;
use tracing::{info, warn};

use crate::control::{ControlPlane, Script};
use crate::error::AutosubResult;
use crate::model::{Subscription, Topology};
use crate::tool::{Substitutions, ToolRunner};

/// Vendor names in the version output of capture engines that tolerate table definition changes.
const DDL_AWARE_VENDORS: [&str; 2] = ["oracle", "db2"];

/// Enables the engines and monitors of a freshly built topology that are actually usable.
pub struct ConfigValidator<'a, C, T> {
    script: &'a mut Script<C>,
    tools: &'a T,
    topology: &'a mut Topology,
}

impl<'a, C, T> ConfigValidator<'a, C, T>
where
    C: ControlPlane,
    T: ToolRunner,
{
    pub fn new(script: &'a mut Script<C>, tools: &'a T, topology: &'a mut Topology) -> Self {
        Self {
            script,
            tools,
            topology,
        }
    }

    /// Validates engines then subscriptions and returns the number of enabled monitors.
    ///
    /// Only a lost control plane connection is returned as an error. Any other problem
    /// disables the engine or monitor concerned.
    pub async fn run(self) -> AutosubResult<usize> {
        let used: BTreeSet<String> = self
            .topology
            .engines()
            .iter()
            .map(|engine| engine.name().to_string())
            .filter(|name| self.topology.is_engine_used(name))
            .collect();

        let (engines, sources) = self.topology.parts_mut();

        for engine in engines.iter_mut() {
            engine.set_enabled(false);
            if !used.contains(engine.name()) {
                info!(engine = %engine.name(), "engine not used by any subscription, skipping");
                continue;
            }

            let no_substitutions = Substitutions::new();
            let template = engine.expand_command(engine.commands().version());
            let output = self
                .tools
                .run("show-version", &template, &no_substitutions)
                .await;
            if !output.is_success() {
                warn!(
                    engine = %engine.name(),
                    exit_code = output.exit_code,
                    output = %output.output.trim(),
                    "version check failed, disabling engine"
                );
                continue;
            }
            let version = output.output.to_lowercase();
            engine.derive_ddl_aware(DDL_AWARE_VENDORS.iter().any(|vendor| version.contains(vendor)));

            let template = engine.expand_command(engine.commands().events());
            let output = self
                .tools
                .run("get-events", &template, &no_substitutions)
                .await;
            if !output.is_success() {
                warn!(
                    engine = %engine.name(),
                    exit_code = output.exit_code,
                    output = %output.output.trim(),
                    "event log check failed, disabling engine"
                );
                continue;
            }

            engine.set_enabled(true);
            info!(engine = %engine.name(), ddl_aware = engine.is_ddl_aware(), "engine enabled");
        }

        let mut enabled = 0;
        for group in sources.iter_mut() {
            for monitor in group.monitors_mut() {
                monitor.set_enabled(false);
                let subscription = monitor.subscription().clone();
                if !engines.is_enabled(&subscription.source) || !engines.is_enabled(&subscription.target) {
                    warn!(subscription = %subscription.name, "engine disabled, not monitoring subscription");
                    continue;
                }

                match count_table_mappings(&mut *self.script, &subscription).await {
                    Ok(0) => {
                        warn!(subscription = %subscription.name, "no table mappings, not monitoring subscription");
                    }
                    Ok(tables) => {
                        monitor.set_enabled(true);
                        enabled += 1;
                        info!(subscription = %subscription.name, tables, "monitoring subscription");
                    }
                    Err(err) if err.kind().is_connection() => return Err(err),
                    Err(err) => {
                        warn!(
                            subscription = %subscription.name,
                            error = %err.summary(),
                            "failed to validate subscription, not monitoring it"
                        );
                    }
                }
            }
        }

        if enabled == 0 {
            warn!("empty configuration, nothing to do");
        } else {
            info!("monitoring {enabled} subscription(s)");
        }

        Ok(enabled)
    }
}

async fn count_table_mappings<C>(script: &mut Script<C>, subscription: &Subscription) -> AutosubResult<usize>
where
    C: ControlPlane,
{
    if subscription.is_loopback() {
        script
            .select_datastore(&subscription.source, EngineRole::Dual)
            .await?;
    } else {
        script
            .select_datastore(&subscription.source, EngineRole::Source)
            .await?;
        script
            .select_datastore(&subscription.target, EngineRole::Target)
            .await?;
    }
    script.select_subscription(&subscription.name).await?;

    Ok(script.list_table_mappings().await?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EngineRegistry, Topology};
    use crate::report::RecoveryReport;
    use crate::test_utils::control_plane::{FakeColumn, FakeControlPlane, FakeSubscription};
    use crate::test_utils::tool_runner::FakeToolRunner;
    use crate::test_utils::topology::{engine_config, pinned_engine_config, subscription_config};

    fn topology() -> Topology {
        let engines = [
            engine_config("ORA1", EngineRole::Source),
            engine_config("PG1", EngineRole::Source),
            pinned_engine_config("DB2Z", EngineRole::Source, false),
            engine_config("KAFKA", EngineRole::Target),
            engine_config("SPARE", EngineRole::Target),
        ];
        let subscriptions = [
            subscription_config("SUB1", "ORA1", "KAFKA"),
            subscription_config("SUB2", "PG1", "KAFKA"),
            subscription_config("SUB3", "DB2Z", "KAFKA"),
            subscription_config("EMPTY", "ORA1", "KAFKA"),
        ];

        Topology::new(
            EngineRegistry::new(&engines),
            subscriptions.iter().map(Subscription::new),
        )
    }

    fn plane() -> FakeControlPlane {
        let plane = FakeControlPlane::new();
        let columns = vec![FakeColumn::new("ID", "INTEGER", true)];
        for (name, source) in [("SUB1", "ORA1"), ("SUB2", "PG1"), ("SUB3", "DB2Z")] {
            plane.add_subscription(
                FakeSubscription::new(name, source, "KAFKA").with_table("APP.T1", columns.clone()),
            );
        }
        plane.add_subscription(FakeSubscription::new("EMPTY", "ORA1", "KAFKA"));
        plane
    }

    #[tokio::test]
    async fn usable_engines_and_subscriptions_are_enabled() {
        let plane = plane();
        let tools = FakeToolRunner::new();
        tools.set_output("show-version", "Version: 11.4.0.5 for Oracle Redo");
        let mut topology = topology();
        let mut script = Script::new(plane.session(), RecoveryReport::new());

        let enabled = ConfigValidator::new(&mut script, &tools, &mut topology)
            .run()
            .await
            .unwrap();

        assert_eq!(enabled, 3);
        let engines = topology.engines();
        assert!(engines.is_enabled("ORA1"));
        assert!(engines.get("ORA1").unwrap().is_ddl_aware());
        assert!(!engines.get("DB2Z").unwrap().is_ddl_aware());
        assert!(!engines.is_enabled("SPARE"));
        assert!(tools.invocations().iter().all(|run| !run.arguments.contains(&"spare".to_string())));

        let group = topology.source("ORA1").unwrap();
        assert!(group.find_monitor("SUB1").unwrap().is_enabled());
        assert!(!group.find_monitor("EMPTY").unwrap().is_enabled());
    }

    #[tokio::test]
    async fn failed_version_probe_disables_engine_and_its_subscriptions() {
        let plane = plane();
        let tools = FakeToolRunner::new();
        tools.fail_argument("pg1", 2);
        let mut topology = topology();
        let mut script = Script::new(plane.session(), RecoveryReport::new());

        let enabled = ConfigValidator::new(&mut script, &tools, &mut topology)
            .run()
            .await
            .unwrap();

        assert_eq!(enabled, 2);
        assert!(!topology.engines().is_enabled("PG1"));
        assert!(!topology.source("PG1").unwrap().has_enabled_monitor());
        assert_eq!(tools.invocations_of("get-events").len(), 3);
    }

    #[tokio::test]
    async fn rejected_subscription_is_not_monitored() {
        let plane = plane();
        plane.fail_command("select subscription name \"SUB3\"");
        let tools = FakeToolRunner::new();
        let mut topology = topology();
        let mut script = Script::new(plane.session(), RecoveryReport::new());

        let enabled = ConfigValidator::new(&mut script, &tools, &mut topology)
            .run()
            .await
            .unwrap();

        assert_eq!(enabled, 2);
        assert!(!topology.source("DB2Z").unwrap().has_enabled_monitor());
    }
}
