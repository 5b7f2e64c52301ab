//! End-to-end runs: reset then build against an on-disk warehouse.

mod common;

use common::{runner, seeded_warehouse, small_dataset, warehouse, DelayLog};
use datamodel_core::{
    config::{BuildEngine, PipelineConfig, RefreshMode},
    demo::{self, DemoConfig},
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    runner::{PipelineRunner, StepStatus},
    state::{RunPhase, StepKind},
    steps::{with_statement_timeout, BuildStep, PipelineStep, StepContext, StepOutcome},
    store::WarehouseStore,
    types::{parse_ts, Timestamp},
};
use std::time::Duration;

fn logical(raw: &str) -> Timestamp {
    parse_ts(raw).expect("logical date")
}

fn locked() -> PipelineError {
    PipelineError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        Some("database is locked".into()),
    ))
}

/// A reset step that fails its first `failures` attempts.
struct FlakyReset {
    failures: u32,
    calls:    u32,
}

impl PipelineStep for FlakyReset {
    fn name(&self) -> &'static str { "delete_table" }

    fn kind(&self) -> StepKind { StepKind::Reset }

    fn execute(&mut self, _ctx: &StepContext<'_>) -> PipelineResult<StepOutcome> {
        self.calls += 1;
        if self.calls <= self.failures {
            Err(locked())
        } else {
            Ok(StepOutcome::default())
        }
    }
}

fn runner_with_reset(config: &PipelineConfig, reset: FlakyReset, delays: &DelayLog) -> PipelineRunner {
    let store = WarehouseStore::connect(&config.connection).expect("connect");
    store.migrate().expect("migrate");
    let mut runner = PipelineRunner::new(config.clone(), store).with_delay(delays.recorder());
    runner.register(Box::new(reset));
    runner.register(Box::new(BuildStep::new()));
    runner
}

#[test]
fn full_run_rebuilds_the_table_and_records_success() {
    let wh = seeded_warehouse(&small_dataset());
    let delays = DelayLog::default();
    let mut runner = runner(&wh.config, &delays);

    let report = runner.run(logical("2023-11-01")).expect("run");
    assert!(report.succeeded());
    assert_eq!(report.phase, RunPhase::BuildDone);
    assert_eq!(report.step("delete_table").map(|s| s.status), Some(StepStatus::Success));
    let build = report.step("create_table").expect("build step");
    assert_eq!(build.status, StepStatus::Success);
    assert_eq!(build.attempts, 1);
    assert_eq!(build.rows_affected, Some(6));

    let snapshot = report.snapshot.expect("snapshot");
    assert_eq!(snapshot.row_count, 6);
    assert_eq!(wh.store.row_count(&wh.config.target_table).unwrap(), 6);

    let record = wh.store.run(&report.run_id).unwrap().expect("run record");
    assert_eq!(record.state, "success");
    assert_eq!(record.phase, "BUILD_DONE");
    assert_eq!(record.logical_date, "2023-11-01 00:00:00");
    assert!(record.finished_at.is_some());
    assert!(delays.waits().is_empty());
}

#[test]
fn rerun_over_unchanged_sources_is_idempotent() {
    let wh = seeded_warehouse(&small_dataset());
    let delays = DelayLog::default();
    let mut runner = runner(&wh.config, &delays);

    let first = runner.run(logical("2023-11-01")).expect("first run");
    let second = runner.run(logical("2023-11-02")).expect("second run");
    let (a, b) = (first.snapshot.expect("first"), second.snapshot.expect("second"));
    assert_ne!(a.run_id, b.run_id);
    assert!(a.same_content(&b));

    let stored = wh.store.table_snapshots(&wh.config.target_table, 10).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0], b);
}

#[test]
fn rerun_replaces_stale_rows() {
    let wh = seeded_warehouse(&small_dataset());
    let delays = DelayLog::default();
    let mut runner = runner(&wh.config, &delays);
    runner.run(logical("2023-11-01")).expect("first run");

    wh.store
        .insert_application(&common::app(5, "2024-04-01", 2, None))
        .expect("new application");
    let report = runner.run(logical("2023-11-02")).expect("second run");
    assert_eq!(report.snapshot.map(|s| s.row_count), Some(7));
}

#[test]
fn failed_reset_is_retried_once_then_build_is_skipped() {
    let wh = seeded_warehouse(&small_dataset());
    wh.store.execute_script("CREATE TABLE task4_datamodel (marker INTEGER);").unwrap();
    let delays = DelayLog::default();
    let mut runner = runner_with_reset(&wh.config, FlakyReset { failures: u32::MAX, calls: 0 }, &delays);

    let report = runner.run(logical("2023-11-01")).expect("run");
    assert!(!report.succeeded());
    assert_eq!(report.phase, RunPhase::Failed);

    let reset = report.step("delete_table").expect("reset");
    assert_eq!(reset.status, StepStatus::Failed);
    assert_eq!(reset.attempts, 2);
    assert!(reset.last_error.as_deref().unwrap_or_default().contains("database is locked"));

    let build = report.step("create_table").expect("build");
    assert_eq!(build.status, StepStatus::UpstreamFailed);
    assert_eq!(build.attempts, 0);
    assert_eq!(wh.store.attempt_count(&report.run_id, "create_table").unwrap(), 0);
    assert_eq!(wh.store.attempt_count(&report.run_id, "delete_table").unwrap(), 2);

    // The table the reset never dropped is untouched.
    assert!(wh.store.table_exists("task4_datamodel").unwrap());
    assert_eq!(wh.store.row_count("task4_datamodel").unwrap(), 0);
    assert_eq!(delays.waits(), vec![Duration::from_secs(300)]);
    assert!(report.snapshot.is_none());

    let record = wh.store.run(&report.run_id).unwrap().expect("record");
    assert_eq!(record.state, "failed");
    assert_eq!(record.phase, "FAILED");
}

#[test]
fn transient_failure_succeeds_on_retry() {
    let wh = seeded_warehouse(&small_dataset());
    let delays = DelayLog::default();
    let mut runner = runner_with_reset(&wh.config, FlakyReset { failures: 1, calls: 0 }, &delays);

    let report = runner.run(logical("2023-11-01")).expect("run");
    assert!(report.succeeded());
    assert_eq!(report.step("delete_table").map(|s| s.attempts), Some(2));
    assert_eq!(report.step("create_table").map(|s| s.attempts), Some(1));
    assert_eq!(delays.waits(), vec![Duration::from_secs(300)]);

    let types: Vec<String> = wh
        .store
        .events_for_run(&report.run_id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert!(types.contains(&"step_retry_scheduled".to_string()));
}

#[test]
fn zero_retries_means_a_single_attempt() {
    let wh = seeded_warehouse(&small_dataset());
    let mut config = wh.config.clone();
    config.default_args.retries = 0;
    let delays = DelayLog::default();
    let mut runner = runner_with_reset(&config, FlakyReset { failures: 1, calls: 0 }, &delays);

    let report = runner.run(logical("2023-11-01")).expect("run");
    assert_eq!(report.phase, RunPhase::Failed);
    assert_eq!(report.step("delete_table").map(|s| s.attempts), Some(1));
    assert!(delays.waits().is_empty());
}

#[test]
fn build_fails_when_a_source_table_is_missing() {
    let wh = warehouse();
    wh.store.create_source_tables().unwrap();
    wh.store.execute_script("DROP TABLE cycles;").unwrap();
    let delays = DelayLog::default();
    let mut runner = runner(&wh.config, &delays);

    let report = runner.run(logical("2023-11-01")).expect("run");
    assert_eq!(report.phase, RunPhase::Failed);
    let build = report.step("create_table").expect("build");
    assert_eq!(build.status, StepStatus::Failed);
    assert_eq!(build.attempts, 2);
    assert!(build.last_error.as_deref().unwrap_or_default().contains("cycles"));
    assert!(!wh.store.table_exists("task4_datamodel").unwrap());

    let failures: Vec<PipelineEvent> = wh
        .store
        .events_for_run(&report.run_id)
        .unwrap()
        .iter()
        .map(|e| e.decode().expect("decode"))
        .filter(|e| matches!(e, PipelineEvent::StepFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 2);
    for event in &failures {
        assert_eq!(event.step(), Some("create_table"));
    }
}

#[test]
fn phase_changes_are_logged_in_order() {
    let wh = seeded_warehouse(&small_dataset());
    let delays = DelayLog::default();
    let mut runner = runner(&wh.config, &delays);
    let report = runner.run(logical("2023-11-01")).expect("run");

    let events: Vec<PipelineEvent> = wh
        .store
        .events_for_run(&report.run_id)
        .unwrap()
        .iter()
        .map(|e| e.decode().expect("decode"))
        .collect();

    let phases: Vec<RunPhase> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            RunPhase::ResetRunning,
            RunPhase::ResetDone,
            RunPhase::BuildRunning,
            RunPhase::BuildDone,
        ]
    );
    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RunFinished { succeeded: true, .. })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::TableSnapshotTaken { row_count: 6, .. })));
}

#[test]
fn staged_swap_keeps_the_previous_table_when_build_fails() {
    let wh = seeded_warehouse(&small_dataset());
    let mut config = wh.config.clone();
    config.refresh_mode = RefreshMode::StagedSwap;
    let delays = DelayLog::default();
    let mut runner = runner(&config, &delays);

    let first = runner.run(logical("2023-11-01")).expect("first run");
    assert!(first.succeeded());
    assert!(!wh.store.table_exists(&config.staging_table()).unwrap());
    assert_eq!(wh.store.row_count(&config.target_table).unwrap(), 6);

    wh.store.execute_script("DROP TABLE cycles;").unwrap();
    let second = runner.run(logical("2023-11-02")).expect("second run");
    assert_eq!(second.phase, RunPhase::Failed);
    assert_eq!(wh.store.row_count(&config.target_table).unwrap(), 6);
}

#[test]
fn drop_then_create_leaves_no_table_when_build_fails() {
    let wh = seeded_warehouse(&small_dataset());
    let delays = DelayLog::default();
    let mut runner = runner(&wh.config, &delays);
    runner.run(logical("2023-11-01")).expect("first run");

    wh.store.execute_script("DROP TABLE loans;").unwrap();
    let report = runner.run(logical("2023-11-02")).expect("second run");
    assert_eq!(report.phase, RunPhase::Failed);
    assert!(!wh.store.table_exists(&wh.config.target_table).unwrap());
}

#[test]
fn second_run_is_refused_while_one_is_active() {
    let wh = seeded_warehouse(&small_dataset());
    wh.store
        .claim_run("run-crashed", &wh.config.pipeline_id, "2023-10-31 00:00:00", 1, "0.0.0", "2023-11-01 00:00:00")
        .expect("manual claim");
    let delays = DelayLog::default();
    let mut runner = runner(&wh.config, &delays);

    match runner.run(logical("2023-11-01")) {
        Err(PipelineError::RunAlreadyActive { active, max, .. }) => {
            assert_eq!(active, 1);
            assert_eq!(max, 1);
        }
        other => panic!("expected RunAlreadyActive, got {other:?}"),
    }
    assert_eq!(wh.store.recent_runs(&wh.config.pipeline_id, 10).unwrap().len(), 1);

    let released = wh
        .store
        .fail_stale_runs(&wh.config.pipeline_id, "2023-11-01 01:00:00")
        .unwrap();
    assert_eq!(released, 1);
    assert!(runner.run(logical("2023-11-01")).expect("run").succeeded());
    assert_eq!(
        wh.store.latest_logical_date(&wh.config.pipeline_id).unwrap().as_deref(),
        Some("2023-11-01 00:00:00")
    );
}

#[test]
fn native_engine_matches_sql_engine() {
    let data = demo::generate(&DemoConfig { customers: 60, ..DemoConfig::default() });
    let delays = DelayLog::default();

    let sql_wh = seeded_warehouse(&data);
    let sql_report = runner(&sql_wh.config, &delays).run(logical("2023-11-01")).expect("sql run");

    let native_wh = seeded_warehouse(&data);
    let mut config = native_wh.config.clone();
    config.build_engine = BuildEngine::Native;
    let native_report = runner(&config, &delays).run(logical("2023-11-01")).expect("native run");

    let (a, b) = (sql_report.snapshot.expect("sql"), native_report.snapshot.expect("native"));
    assert!(a.row_count > 0);
    assert!(a.same_content(&b), "sql {a:?} vs native {b:?}");
}

#[test]
fn steps_out_of_order_fail_the_run() {
    let wh = seeded_warehouse(&small_dataset());
    let store = WarehouseStore::connect(&wh.config.connection).unwrap();
    store.migrate().unwrap();
    let mut runner = PipelineRunner::new(wh.config.clone(), store);
    runner.register(Box::new(BuildStep::new()));
    runner.register(Box::new(FlakyReset { failures: 0, calls: 0 }));

    let err = runner.run(logical("2023-11-01")).expect_err("invalid order");
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));

    let runs = wh.store.recent_runs(&wh.config.pipeline_id, 1).unwrap();
    assert_eq!(runs[0].state, "failed");
    assert!(!wh.store.table_exists(&wh.config.target_table).unwrap());
}

#[test]
fn long_statement_is_interrupted_at_the_timeout() {
    let wh = warehouse();
    let result = with_statement_timeout(&wh.store, "create_table", Some(1), || {
        wh.store.execute_script(
            "CREATE TABLE forever AS
             WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n)
             SELECT COUNT(*) AS total FROM n;",
        )
    });
    match result {
        Err(PipelineError::StepTimeout { step, timeout_secs }) => {
            assert_eq!(step, "create_table");
            assert_eq!(timeout_secs, 1);
        }
        other => panic!("expected StepTimeout, got {other:?}"),
    }
}

#[test]
fn fast_statement_is_not_affected_by_the_timeout() {
    let wh = warehouse();
    let result = with_statement_timeout(&wh.store, "delete_table", Some(30), || {
        wh.store.execute_script("DROP TABLE IF EXISTS task4_datamodel;")
    });
    assert!(result.is_ok());
}

#[test]
fn staged_build_retry_recovers_after_a_failed_swap() {
    let wh = seeded_warehouse(&small_dataset());
    // A view holding the target name makes the first swap fail.
    wh.store.execute_script("CREATE VIEW task4_datamodel AS SELECT 1 AS x;").unwrap();
    let mut config = wh.config.clone();
    config.refresh_mode = RefreshMode::StagedSwap;

    let connection = config.connection.clone();
    let mut runner = PipelineRunner::build(config.clone())
        .expect("build runner")
        .with_delay(move |_| {
            let store = WarehouseStore::connect(&connection).expect("connect");
            store.execute_script("DROP VIEW IF EXISTS task4_datamodel;").expect("drop view");
        });

    let report = runner.run(logical("2023-11-01")).expect("run");
    assert!(report.succeeded(), "{report:?}");
    let build = report.step("create_table").expect("build");
    assert_eq!(build.attempts, 2);
    assert_eq!(build.rows_affected, Some(6));
    assert_eq!(wh.store.row_count(&config.target_table).unwrap(), 6);
    assert!(!wh.store.table_exists(&config.staging_table()).unwrap());
}
