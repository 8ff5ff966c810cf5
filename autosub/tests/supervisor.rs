#![cfg(feature = "test-utils")]

use std::time::Duration;

use autosub::concurrency::flag::ControlFlags;
use autosub::concurrency::shutdown::create_shutdown_channel;
use autosub::control::{STATE_FAILED, STATE_MIRROR_CONTINUOUS};
use autosub::model::{EngineRegistry, Subscription, Topology};
use autosub::report::RecoveryReport;
use autosub::supervisor::{CycleOutcome, Supervisor, SupervisorExit};
use autosub::test_utils::control_plane::{FakeColumn, FakeControlPlane, FakeSubscription};
use autosub::test_utils::tool_runner::FakeToolRunner;
use autosub::test_utils::topology::{engine_config, subscription_config, test_globals};
use config::shared::{EngineRole, GlobalsConfig};
use telemetry::tracing::init_test_tracing;

const DDL_CHANGE: &str = "The replication engine has encountered a critical data definition (DDL) \
    change for source table APP.T1 and will shutdown. Please re-add the table definition.";

fn plane() -> FakeControlPlane {
    let plane = FakeControlPlane::new();
    plane.add_subscription(
        FakeSubscription::new("SUB1", "ORA1", "KAFKA")
            .with_state(STATE_FAILED)
            .with_event("9505", DDL_CHANGE)
            .with_table("APP.T1", vec![FakeColumn::new("ID", "NUMBER", true)]),
    );
    plane.add_subscription(
        FakeSubscription::new("SUB2", "ORA1", "KAFKA")
            .with_table("APP.T2", vec![FakeColumn::new("ID", "NUMBER", true)]),
    );
    plane
}

/// Topology as loaded from configuration, before validation.
fn topology() -> Topology {
    let engines = [
        engine_config("ORA1", EngineRole::Source),
        engine_config("KAFKA", EngineRole::Target),
    ];
    let subscriptions = [
        subscription_config("SUB1", "ORA1", "KAFKA"),
        subscription_config("SUB2", "ORA1", "KAFKA"),
    ];

    Topology::new(
        EngineRegistry::new(&engines),
        subscriptions.iter().map(Subscription::new),
    )
}

fn supervisor(
    plane: &FakeControlPlane,
    globals: GlobalsConfig,
) -> Supervisor<FakeControlPlane, FakeToolRunner> {
    let tools = FakeToolRunner::new();
    tools.set_output("show-version", "Version 11.4.0.5, Oracle Redo log reader");

    Supervisor::new(plane.clone(), tools, RecoveryReport::new(), globals, topology())
}

#[tokio::test(flavor = "multi_thread")]
async fn cycle_validates_checks_and_repairs() {
    init_test_tracing();

    let plane = plane();
    let mut supervisor = supervisor(&plane, test_globals());

    let outcome = supervisor.run_cycle().await;

    assert_eq!(outcome, CycleOutcome::Repaired(1));
    assert!(supervisor.is_validated());
    assert_eq!(plane.subscription_state("SUB1").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
    assert_eq!(plane.subscription_state("SUB2").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
    assert_eq!(plane.sessions_opened(), plane.sessions_closed());

    let outcome = supervisor.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_control_plane_postpones_validation() {
    init_test_tracing();

    let plane = plane();
    plane.fail_connections(true);
    let mut supervisor = supervisor(&plane, test_globals());

    assert_eq!(supervisor.run_cycle().await, CycleOutcome::NotValidated);
    assert_eq!(supervisor.run_cycle().await, CycleOutcome::NotValidated);
    assert!(!supervisor.is_validated());
    assert!(plane.commands().is_empty());

    plane.fail_connections(false);
    assert_eq!(supervisor.run_cycle().await, CycleOutcome::Repaired(1));
    assert!(supervisor.is_validated());
}

#[tokio::test(flavor = "multi_thread")]
async fn state_change_during_settle_delay_postpones_repair() {
    init_test_tracing();

    let plane = plane();
    let mut globals = test_globals();
    globals.pause_before_repair_ms = 500;
    let mut supervisor = supervisor(&plane, globals);

    let background = plane.clone();
    let recover = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        background.set_state("SUB1", STATE_MIRROR_CONTINUOUS);
    });

    assert_eq!(supervisor.run_cycle().await, CycleOutcome::Postponed);
    recover.await.unwrap();

    assert_eq!(plane.count_commands("end replication"), 0);
    assert_eq!(plane.count_commands("lock subscription"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn flag_files_stop_the_supervisor() {
    init_test_tracing();

    let globals = test_globals();
    let scratch = std::path::Path::new(&globals.data_file)
        .parent()
        .unwrap()
        .to_path_buf();
    std::fs::create_dir_all(&scratch).unwrap();
    let flags = ControlFlags::new(&globals.data_file);
    let plane = plane();

    std::fs::write(flags.reload.path(), b"").unwrap();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let exit = supervisor(&plane, globals.clone())
        .run(shutdown_rx, &flags)
        .await;
    assert_eq!(exit, SupervisorExit::Reload);
    assert!(!flags.reload.is_raised());

    std::fs::write(flags.shutdown.path(), b"").unwrap();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let exit = supervisor(&plane, globals).run(shutdown_rx, &flags).await;
    assert_eq!(exit, SupervisorExit::Shutdown);
    assert!(!flags.shutdown.is_raised());
    assert!(plane.commands().is_empty());

    std::fs::remove_dir_all(&scratch).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_signal_stops_after_the_running_cycle() {
    init_test_tracing();

    let globals = test_globals();
    let flags = ControlFlags::new(&globals.data_file);
    let plane = plane();

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    shutdown_tx.shutdown().unwrap();
    let exit = tokio::time::timeout(
        Duration::from_secs(10),
        supervisor(&plane, globals).run(shutdown_rx, &flags),
    )
    .await
    .unwrap();

    assert_eq!(exit, SupervisorExit::Shutdown);
    assert_eq!(plane.subscription_state("SUB1").as_deref(), Some(STATE_MIRROR_CONTINUOUS));
}
