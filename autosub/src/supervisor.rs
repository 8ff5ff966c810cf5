use config::shared::GlobalsConfig;
use tracing::{info, warn};

use crate::checker::FailureChecker;
use crate::concurrency::flag::ControlFlags;
use crate::concurrency::shutdown::ShutdownRx;
use crate::control::{ControlPlane, ControlPlaneConnector, Script};
use crate::model::{ChangeSignature, ReportLatch, Topology};
use crate::repair::{RepairOutcome, Repairman};
use crate::report::RecoveryReport;
use crate::tool::ToolRunner;
use crate::validator::ConfigValidator;

/// What a single supervisor cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The configuration could not be validated yet.
    NotValidated,
    /// Nothing to repair.
    Idle,
    /// Repairs were pending but the state changed during the settle delay.
    Postponed,
    /// Number of repair sequences run.
    Repaired(usize),
}

/// Why [`Supervisor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Shutdown,
    Reload,
}

/// Drives check and repair cycles over the topology of one configuration generation.
pub struct Supervisor<K, T> {
    connector: K,
    tools: T,
    report: RecoveryReport,
    globals: GlobalsConfig,
    topology: Topology,
    validated: bool,
    connect_error: ReportLatch,
    validation_skipped: ReportLatch,
}

impl<K, T> Supervisor<K, T>
where
    K: ControlPlaneConnector,
    T: ToolRunner,
{
    pub fn new(
        connector: K,
        tools: T,
        report: RecoveryReport,
        globals: GlobalsConfig,
        topology: Topology,
    ) -> Self {
        Self {
            connector,
            tools,
            report,
            globals,
            topology,
            validated: false,
            connect_error: ReportLatch::default(),
            validation_skipped: ReportLatch::default(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Runs cycles until a shutdown or reload is requested.
    ///
    /// Requests are only looked at between cycles, so a running repair always completes.
    pub async fn run(mut self, mut shutdown_rx: ShutdownRx, flags: &ControlFlags) -> SupervisorExit {
        loop {
            if flags.shutdown.consume() {
                info!(path = %flags.shutdown.path().display(), "shutdown requested by flag file");
                return SupervisorExit::Shutdown;
            }
            if flags.reload.consume() {
                info!(path = %flags.reload.path().display(), "reload requested by flag file");
                return SupervisorExit::Reload;
            }

            self.run_cycle().await;

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("supervisor stopped due to shutdown");

                    return SupervisorExit::Shutdown;
                }

                _ = tokio::time::sleep(self.globals.poll_period()) => {}
            }
        }
    }

    /// Validates the configuration if needed, checks every source group and repairs the ones
    /// whose pending state survived the settle delay.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        if !self.validated && !self.validate().await {
            return CycleOutcome::NotValidated;
        }

        let mut pending = Vec::new();
        for index in 0..self.topology.sources().len() {
            if !self.topology.sources()[index].has_enabled_monitor() {
                continue;
            }
            if self.check_group(index).await {
                pending.push(index);
            }
        }
        if pending.is_empty() {
            return CycleOutcome::Idle;
        }

        let before = self.signature(&pending);
        tokio::time::sleep(self.globals.pause_before_repair()).await;

        let mut still_pending = Vec::new();
        for &index in &pending {
            if self.check_group(index).await {
                still_pending.push(index);
            }
        }
        let after = self.signature(&pending);
        if before != after {
            info!("state changed, postponing repair");
            return CycleOutcome::Postponed;
        }

        let mut repaired = 0;
        for index in still_pending {
            if self.repair_group(index).await != RepairOutcome::Skipped {
                repaired += 1;
            }
        }

        CycleOutcome::Repaired(repaired)
    }

    async fn validate(&mut self) -> bool {
        let Some(mut script) = self.open_script().await else {
            if self.validation_skipped.raise() {
                info!("configuration validation postponed until the control plane is reachable");
            }
            return false;
        };

        let result = ConfigValidator::new(&mut script, &self.tools, &mut self.topology)
            .run()
            .await;
        close_script(script).await;

        match result {
            Ok(_) => {
                self.validated = true;
                self.validation_skipped.clear();
                true
            }
            Err(err) => {
                if self.validation_skipped.raise() {
                    warn!(error = %err.summary(), "configuration validation interrupted");
                }
                false
            }
        }
    }

    /// Checks the source group at `index` with a fresh session. Returns `true` if it has
    /// pending repairs.
    async fn check_group(&mut self, index: usize) -> bool {
        let Some(mut script) = self.open_script().await else {
            return false;
        };

        let (engines, sources) = self.topology.parts_mut();
        let group = &mut sources[index];
        let result = FailureChecker::new(&mut script, engines, &self.globals)
            .check(group)
            .await;
        close_script(script).await;

        match result {
            Ok(pending) => {
                if group.check_errors.clear() {
                    info!(source = %group.source(), "subscription check recovered");
                }
                pending
            }
            Err(err) => {
                if group.check_errors.raise() {
                    warn!(source = %group.source(), error = %err.summary(), "failed to check subscriptions");
                }
                false
            }
        }
    }

    async fn repair_group(&mut self, index: usize) -> RepairOutcome {
        let Some(mut script) = self.open_script().await else {
            return RepairOutcome::Skipped;
        };

        let (engines, sources) = self.topology.parts_mut();
        let outcome = Repairman::new(
            &mut script,
            &self.tools,
            engines,
            &mut sources[index],
            &self.globals,
            &self.report,
        )
        .run()
        .await;
        close_script(script).await;

        outcome
    }

    fn signature(&self, indexes: &[usize]) -> ChangeSignature {
        let sources = self.topology.sources();
        ChangeSignature::capture(indexes.iter().map(|&index| &sources[index]))
    }

    async fn open_script(&mut self) -> Option<Script<K::Session>> {
        match self.connector.connect().await {
            Ok(session) => {
                if self.connect_error.clear() {
                    info!("control plane connection re-established");
                }
                Some(Script::new(session, self.report.clone()))
            }
            Err(err) => {
                if self.connect_error.raise() {
                    warn!(error = %err.summary(), "cannot connect to the control plane");
                }
                None
            }
        }
    }
}

async fn close_script<C>(script: Script<C>)
where
    C: ControlPlane,
{
    if let Err(err) = script.close().await {
        warn!(error = %err.summary(), "failed to close control plane session");
    }
}
