#![cfg(feature = "test-utils")]

use autosub::checker::FailureChecker;
use autosub::control::{STATE_FAILED, STATE_MIRROR_CONTINUOUS, Script};
use autosub::model::{RepairMode, Topology};
use autosub::repair::{RepairOutcome, Repairman};
use autosub::report::RecoveryReport;
use autosub::test_utils::control_plane::{FakeColumn, FakeControlPlane, FakeSubscription};
use autosub::test_utils::tool_runner::FakeToolRunner;
use autosub::test_utils::topology::{
    enabled_topology, engine_config, pinned_engine_config, subscription_config, test_globals,
};
use config::shared::{EngineRole, GlobalsConfig, SubscriptionConfig};
use telemetry::tracing::init_test_tracing;

fn ddl_change(table: &str) -> String {
    format!(
        "IBM Data Replication has encountered a critical data definition (DDL) change for \
         source table {table} and will shutdown. Please re-add the table definition."
    )
}

fn failed(name: &str, source: &str, table: &str) -> FakeSubscription {
    FakeSubscription::new(name, source, "KAFKA")
        .with_state(STATE_FAILED)
        .with_event("9505", &ddl_change(table))
        .with_table(
            table,
            vec![
                FakeColumn::new("ID", "NUMBER", true),
                FakeColumn::new("NOTE", "VARCHAR2", false),
            ],
        )
}

fn healthy(name: &str, table: &str) -> FakeSubscription {
    FakeSubscription::new(name, "ORA1", "KAFKA")
        .with_table(table, vec![FakeColumn::new("ID", "NUMBER", true)])
}

/// SUB1 failed on APP.T1, SUB2 failed on APP.T2, SUB3 mirrors APP.T3.
fn scenario() -> (FakeControlPlane, Topology) {
    let plane = FakeControlPlane::new();
    plane.add_subscription(failed("SUB1", "ORA1", "APP.T1"));
    plane.add_subscription(failed("SUB2", "ORA1", "APP.T2"));
    plane.add_subscription(healthy("SUB3", "APP.T3"));

    let topology = topology(&[
        subscription_config("SUB1", "ORA1", "KAFKA"),
        subscription_config("SUB2", "ORA1", "KAFKA"),
        subscription_config("SUB3", "ORA1", "KAFKA"),
    ]);

    (plane, topology)
}

fn topology(subscriptions: &[SubscriptionConfig]) -> Topology {
    let engines = [
        pinned_engine_config("ORA1", EngineRole::Source, true),
        pinned_engine_config("PG1", EngineRole::Source, false),
        engine_config("KAFKA", EngineRole::Target),
    ];

    enabled_topology(&engines, subscriptions)
}

async fn check(plane: &FakeControlPlane, topology: &mut Topology, globals: &GlobalsConfig) -> bool {
    let mut script = Script::new(plane.session(), RecoveryReport::new());
    let (engines, sources) = topology.parts_mut();

    FailureChecker::new(&mut script, engines, globals)
        .check(&mut sources[0])
        .await
        .unwrap()
}

async fn repair(
    plane: &FakeControlPlane,
    tools: &FakeToolRunner,
    topology: &mut Topology,
    globals: &GlobalsConfig,
    report: &RecoveryReport,
) -> RepairOutcome {
    let mut script = Script::new(plane.session(), report.clone());
    let (engines, sources) = topology.parts_mut();

    Repairman::new(&mut script, tools, engines, &mut sources[0], globals, report)
        .run()
        .await
}

#[tokio::test(flavor = "multi_thread")]
async fn repair_restores_every_subscription_of_the_source() {
    init_test_tracing();

    let (plane, mut topology) = scenario();
    plane.set_reassigned_columns(
        "SUB1",
        "APP.T1",
        vec![
            FakeColumn::new("ID", "NUMBER", true),
            FakeColumn::new("NOTE", "VARCHAR2", true),
            FakeColumn::new("ADDED", "VARCHAR2", false),
            FakeColumn::new("PICTURE", "BLOB", false),
        ],
    );
    let tools = FakeToolRunner::new();
    let globals = test_globals();
    let report = RecoveryReport::new();

    assert!(check(&plane, &mut topology, &globals).await);
    let outcome = repair(&plane, &tools, &mut topology, &globals, &report).await;

    assert_eq!(outcome, RepairOutcome::Completed);
    assert_eq!(tools.invocations_of("clear-staging").len(), 1);
    let readded: Vec<_> = tools
        .invocations_of("readd-table")
        .iter()
        .map(|run| run.arguments.clone())
        .collect();
    assert_eq!(readded.len(), 2);
    assert!(readded[0].contains(&"APP.T1".to_string()));
    assert!(readded[1].contains(&"APP.T2".to_string()));

    for name in ["SUB1", "SUB2", "SUB3"] {
        assert_eq!(plane.subscription_state(name).as_deref(), Some(STATE_MIRROR_CONTINUOUS));
        assert!(!plane.is_locked(name));
    }
    assert_eq!(plane.count_commands("end replication"), 1);
    assert_eq!(plane.count_commands("start mirroring"), 3);

    let flags = plane.column_flags("SUB1", "APP.T1");
    assert_eq!(flags["ID"], true);
    assert_eq!(flags["NOTE"], false);
    assert_eq!(flags["ADDED"], true);
    assert_eq!(flags["PICTURE"], true);
    assert!(plane.refresh_flagged("SUB1").is_empty());

    let group = &topology.sources()[0];
    assert!(group.monitors().all(|monitor| monitor.failure_time().is_none()));
    assert!(!report.is_enabled());
}

#[tokio::test(flavor = "multi_thread")]
async fn new_large_object_columns_stay_excluded_when_configured() {
    init_test_tracing();

    let plane = FakeControlPlane::new();
    plane.add_subscription(failed("SUB1", "ORA1", "APP.T1"));
    plane.set_reassigned_columns(
        "SUB1",
        "APP.T1",
        vec![
            FakeColumn::new("ID", "NUMBER", true),
            FakeColumn::new("NOTE", "VARCHAR2", false),
            FakeColumn::new("PICTURE", "BLOB", true),
            FakeColumn::new("BODY", "clob", true),
        ],
    );
    let mut subscription = subscription_config("SUB1", "ORA1", "KAFKA");
    subscription.skip_new_blobs = true;
    let mut topology = topology(&[subscription]);
    let tools = FakeToolRunner::new();
    let globals = test_globals();

    assert!(check(&plane, &mut topology, &globals).await);
    let outcome = repair(&plane, &tools, &mut topology, &globals, &RecoveryReport::new()).await;

    assert_eq!(outcome, RepairOutcome::Completed);
    let flags = plane.column_flags("SUB1", "APP.T1");
    assert_eq!(flags["PICTURE"], false);
    assert_eq!(flags["BODY"], false);
    assert_eq!(flags["NOTE"], false);
    assert_eq!(plane.count_commands("filter source column name \"NOTE\""), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_is_flagged_for_sources_without_ddl_awareness() {
    init_test_tracing();

    let plane = FakeControlPlane::new();
    plane.add_subscription(failed("SUB1", "PG1", "myuser.pgtab1"));
    let mut topology = topology(&[subscription_config("SUB1", "PG1", "KAFKA")]);
    let tools = FakeToolRunner::new();
    let globals = test_globals();

    assert!(check(&plane, &mut topology, &globals).await);
    assert_eq!(
        topology.sources()[0].find_monitor("SUB1").unwrap().repair_mode(),
        RepairMode::Refresh
    );
    let outcome = repair(&plane, &tools, &mut topology, &globals, &RecoveryReport::new()).await;

    assert_eq!(outcome, RepairOutcome::Completed);
    assert!(plane.refresh_flagged("SUB1").contains("myuser.pgtab1"));
    let readd = tools.invocations_of("readd-table");
    assert!(readd[0].arguments.contains(&"myuser.pgtab1".to_string()));
    assert!(readd[0].arguments.contains(&"pg1".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn staging_clear_failure_fails_all_and_restarts_stopped_subscriptions() {
    init_test_tracing();

    let (plane, mut topology) = scenario();
    let tools = FakeToolRunner::new();
    tools.fail_label("clear-staging", 1);
    let globals = test_globals();

    assert!(check(&plane, &mut topology, &globals).await);
    let outcome = repair(&plane, &tools, &mut topology, &globals, &RecoveryReport::new()).await;

    assert_eq!(outcome, RepairOutcome::Halted);
    let group = &topology.sources()[0];
    assert!(group.monitors().all(|monitor| monitor.failure_time().is_some()));
    assert!(!group.has_pending());
    assert!(tools.invocations_of("readd-table").is_empty());

    assert_eq!(plane.subscription_state("SUB3").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
    assert_eq!(plane.count_commands("start mirroring"), 1);
    assert_eq!(plane.subscription_state("SUB1").as_deref(), Some(STATE_FAILED));
}

/// Scenario plus SUB4 mirroring APP.T4, which `stop` customizes.
fn scenario_with_stubborn_sibling(
    stop: impl FnOnce(FakeSubscription) -> FakeSubscription,
) -> (FakeControlPlane, Topology) {
    let plane = FakeControlPlane::new();
    plane.add_subscription(failed("SUB1", "ORA1", "APP.T1"));
    plane.add_subscription(failed("SUB2", "ORA1", "APP.T2"));
    plane.add_subscription(healthy("SUB3", "APP.T3"));
    plane.add_subscription(stop(healthy("SUB4", "APP.T4")));

    let topology = topology(&[
        subscription_config("SUB1", "ORA1", "KAFKA"),
        subscription_config("SUB2", "ORA1", "KAFKA"),
        subscription_config("SUB3", "ORA1", "KAFKA"),
        subscription_config("SUB4", "ORA1", "KAFKA"),
    ]);

    (plane, topology)
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_stop_halts_and_restarts_stopped_subscriptions() {
    init_test_tracing();

    let (plane, mut topology) = scenario_with_stubborn_sibling(FakeSubscription::rejecting_stop);
    let tools = FakeToolRunner::new();
    let globals = test_globals();

    assert!(check(&plane, &mut topology, &globals).await);
    let outcome = repair(&plane, &tools, &mut topology, &globals, &RecoveryReport::new()).await;

    assert_eq!(outcome, RepairOutcome::Halted);
    assert!(tools.invocations_of("clear-staging").is_empty());
    assert!(tools.invocations_of("readd-table").is_empty());
    assert_eq!(plane.count_commands("end replication"), 2);
    assert_eq!(plane.count_commands("start mirroring"), 2);
    assert_eq!(plane.subscription_state("SUB3").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
    assert_eq!(plane.subscription_state("SUB4").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
    assert_eq!(plane.subscription_state("SUB1").as_deref(), Some(STATE_FAILED));
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_timeout_halts_and_restarts_stopped_subscriptions() {
    init_test_tracing();

    let (plane, mut topology) = scenario_with_stubborn_sibling(FakeSubscription::ignoring_stop);
    let tools = FakeToolRunner::new();
    let globals = test_globals();

    assert!(check(&plane, &mut topology, &globals).await);
    let outcome = repair(&plane, &tools, &mut topology, &globals, &RecoveryReport::new()).await;

    assert_eq!(outcome, RepairOutcome::Halted);
    assert!(tools.invocations_of("clear-staging").is_empty());
    assert!(tools.invocations_of("readd-table").is_empty());
    assert_eq!(plane.count_commands("end replication"), 2);
    assert!(plane.count_commands("monitor replication") > 2);
    assert_eq!(plane.count_commands("start mirroring"), 2);
    assert_eq!(plane.subscription_state("SUB3").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
    assert_eq!(plane.subscription_state("SUB1").as_deref(), Some(STATE_FAILED));
}

#[tokio::test(flavor = "multi_thread")]
async fn readd_failure_isolates_the_monitors_of_that_table() {
    init_test_tracing();

    let (plane, mut topology) = scenario();
    let tools = FakeToolRunner::new();
    tools.fail_argument("APP.T1", 3);
    let globals = test_globals();

    assert!(check(&plane, &mut topology, &globals).await);
    let outcome = repair(&plane, &tools, &mut topology, &globals, &RecoveryReport::new()).await;

    assert_eq!(outcome, RepairOutcome::Completed);
    let group = &topology.sources()[0];
    let sub1 = group.find_monitor("SUB1").unwrap();
    assert!(sub1.failure_time().is_some());
    assert!(!sub1.is_pending());
    assert_eq!(group.pending_names(), ["SUB2"]);

    assert_eq!(plane.subscription_state("SUB1").as_deref(), Some(STATE_FAILED));
    assert_eq!(plane.subscription_state("SUB2").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
    assert_eq!(plane.subscription_state("SUB3").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
    assert_eq!(plane.count_commands("select subscription name \"SUB1\""), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn remap_failure_leaves_the_subscription_locked() {
    init_test_tracing();

    let plane = FakeControlPlane::new();
    plane.add_subscription(failed("SUB1", "ORA1", "APP.T1"));
    plane.add_subscription(healthy("SUB3", "APP.T3"));
    plane.fail_command("describe subscription");
    let mut topology = topology(&[
        subscription_config("SUB1", "ORA1", "KAFKA"),
        subscription_config("SUB3", "ORA1", "KAFKA"),
    ]);
    let tools = FakeToolRunner::new();
    let globals = test_globals();

    assert!(check(&plane, &mut topology, &globals).await);
    let outcome = repair(&plane, &tools, &mut topology, &globals, &RecoveryReport::new()).await;

    assert_eq!(outcome, RepairOutcome::Halted);
    assert!(plane.is_locked("SUB1"));
    assert!(topology.sources()[0].find_monitor("SUB1").unwrap().failure_time().is_some());
    assert_eq!(plane.subscription_state("SUB3").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
}

#[tokio::test(flavor = "multi_thread")]
async fn column_capture_failure_excludes_only_that_subscription() {
    init_test_tracing();

    let (plane, mut topology) = scenario();
    plane.fail_command("select table mapping sourceSchema \"APP\" sourceTable \"T1\"");
    let tools = FakeToolRunner::new();
    let globals = test_globals();

    assert!(check(&plane, &mut topology, &globals).await);
    let outcome = repair(&plane, &tools, &mut topology, &globals, &RecoveryReport::new()).await;

    assert_eq!(outcome, RepairOutcome::Completed);
    let group = &topology.sources()[0];
    assert!(group.find_monitor("SUB1").unwrap().failure_time().is_some());
    assert_eq!(group.pending_names(), ["SUB2"]);
    assert_eq!(plane.subscription_state("SUB2").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
}

#[tokio::test(flavor = "multi_thread")]
async fn nothing_pending_issues_no_command() {
    init_test_tracing();

    let plane = FakeControlPlane::new();
    plane.add_subscription(healthy("SUB3", "APP.T3"));
    let mut topology = topology(&[subscription_config("SUB3", "ORA1", "KAFKA")]);
    let tools = FakeToolRunner::new();
    let globals = test_globals();

    assert!(!check(&plane, &mut topology, &globals).await);
    plane.clear_commands();
    let outcome = repair(&plane, &tools, &mut topology, &globals, &RecoveryReport::new()).await;

    assert_eq!(outcome, RepairOutcome::Skipped);
    assert!(plane.commands().is_empty());
    assert!(tools.invocations().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn repair_writes_a_recovery_report() {
    init_test_tracing();

    let (plane, mut topology) = scenario();
    let tools = FakeToolRunner::new();
    let globals = test_globals();
    let report = RecoveryReport::new();

    assert!(check(&plane, &mut topology, &globals).await);
    let outcome = repair(&plane, &tools, &mut topology, &globals, &report).await;
    assert_eq!(outcome, RepairOutcome::Completed);

    let files: Vec<_> = std::fs::read_dir(&globals.recovery_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("recovery_"));
    assert!(name.ends_with("_ORA1.txt"));

    let content = std::fs::read_to_string(&files[0]).unwrap();
    assert!(content.contains("\tversion\t"));
    assert!(content.contains("\tchcclp\tlock subscription;"));
    assert!(content.contains("\tsuccess\t"));

    std::fs::remove_dir_all(&globals.recovery_dir).unwrap();
}
