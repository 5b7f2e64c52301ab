//! The pipeline runner.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. delete_table  (reset)
//!   2. create_table  (build)
//!
//! RULES:
//!   - Steps execute in registration order, once per run.
//!   - A step runs only if every earlier step succeeded; later steps are
//!     recorded as upstream_failed and never executed.
//!   - A failed attempt is retried `retries` times after `retry_delay`.
//!   - Every attempt and every phase change is recorded in the store.
//!   - At most `max_active_runs` runs hold a slot at any time.

use crate::{
    config::PipelineConfig,
    error::PipelineResult,
    event::{EventLogEntry, PipelineEvent},
    snapshot::TableSnapshot,
    state::{RunPhase, StepKind},
    steps::{BuildStep, PipelineStep, ResetStep, StepContext},
    store::WarehouseStore,
    types::{format_ts, utc_now, RunId, Timestamp},
};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// How the runner waits between attempts. Production sleeps the thread;
/// tests substitute a recorder.
pub type DelayFn = Box<dyn FnMut(Duration) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    UpstreamFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name:          String,
    pub kind:          StepKind,
    pub status:        StepStatus,
    pub attempts:      u32,
    pub rows_affected: Option<u64>,
    pub last_error:    Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id:       RunId,
    pub logical_date: String,
    pub phase:        RunPhase,
    pub steps:        Vec<StepReport>,
    pub snapshot:     Option<TableSnapshot>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.phase == RunPhase::BuildDone
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

pub struct PipelineRunner {
    config: PipelineConfig,
    steps:  Vec<Box<dyn PipelineStep>>,
    store:  WarehouseStore,
    delay:  DelayFn,
}

impl PipelineRunner {
    /// A runner with no steps. `store` holds run metadata and must be
    /// migrated.
    pub fn new(config: PipelineConfig, store: WarehouseStore) -> Self {
        Self {
            config,
            steps: Vec::new(),
            store,
            delay: Box::new(std::thread::sleep),
        }
    }

    /// Build a fully wired runner: connect, migrate, register reset then
    /// build. Call this instead of new() + manual register() calls.
    pub fn build(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let store = WarehouseStore::connect(&config.connection)?;
        store.migrate()?;

        let mut runner = PipelineRunner::new(config, store);
        runner.register(Box::new(ResetStep::new()));
        runner.register(Box::new(BuildStep::new()));
        Ok(runner)
    }

    /// Register a step. Call in the documented execution order.
    pub fn register(&mut self, step: Box<dyn PipelineStep>) {
        self.steps.push(step);
    }

    /// Replace the wait between attempts.
    pub fn with_delay(mut self, delay: impl FnMut(Duration) + Send + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &WarehouseStore {
        &self.store
    }

    /// Execute one run for `logical_date`.
    ///
    /// Step failures are reported in the returned `RunReport`; `Err` means
    /// the run could not be claimed or its bookkeeping failed.
    pub fn run(&mut self, logical_date: Timestamp) -> PipelineResult<RunReport> {
        let run_id = format!("run-{}", Uuid::new_v4());
        let logical = format_ts(&logical_date);

        self.store.claim_run(
            &run_id,
            &self.config.pipeline_id,
            &logical,
            self.config.max_active_runs,
            env!("CARGO_PKG_VERSION"),
            &format_ts(&utc_now()),
        )?;
        log::info!("run={run_id} started for logical date {logical}");

        match self.drive(&run_id, logical_date) {
            Ok(report) => {
                let succeeded = report.succeeded();
                self.store
                    .finish_run(&run_id, report.phase, succeeded, &format_ts(&utc_now()))?;
                emit(&self.store, &run_id, PipelineEvent::RunFinished {
                    run_id: run_id.clone(),
                    succeeded,
                })?;
                if succeeded {
                    log::info!("run={run_id} finished: {}", report.phase);
                } else {
                    log::error!("run={run_id} failed in phase {}", report.phase);
                }
                Ok(report)
            }
            Err(e) => {
                // Release the slot even when bookkeeping broke mid-run.
                if let Err(release) =
                    self.store.finish_run(&run_id, RunPhase::Failed, false, &format_ts(&utc_now()))
                {
                    log::error!("run={run_id} could not release run slot: {release}");
                }
                Err(e)
            }
        }
    }

    fn drive(&mut self, run_id: &str, logical_date: Timestamp) -> PipelineResult<RunReport> {
        let Self { config, steps, store, delay } = self;

        emit(store, run_id, PipelineEvent::RunStarted {
            run_id:       run_id.to_string(),
            pipeline_id:  config.pipeline_id.clone(),
            logical_date: format_ts(&logical_date),
        })?;

        let mut phase = RunPhase::Pending;
        let mut reports = Vec::with_capacity(steps.len());

        for step in steps.iter_mut() {
            if phase.is_terminal() {
                let reason = "upstream_failed".to_string();
                log::warn!("run={run_id} {}: skipped, predecessor failed", step.name());
                emit(store, run_id, PipelineEvent::StepSkipped {
                    step:   step.name().to_string(),
                    reason: reason.clone(),
                })?;
                reports.push(StepReport {
                    name:          step.name().to_string(),
                    kind:          step.kind(),
                    status:        StepStatus::UpstreamFailed,
                    attempts:      0,
                    rows_affected: None,
                    last_error:    Some(reason),
                });
                continue;
            }

            phase = advance(store, run_id, phase, RunPhase::running(step.kind()))?;
            let report = execute_with_retry(store, config, delay, run_id, logical_date, step.as_mut())?;
            let next = match report.status {
                StepStatus::Success => RunPhase::done(step.kind()),
                _                   => RunPhase::Failed,
            };
            phase = advance(store, run_id, phase, next)?;
            reports.push(report);
        }

        let snapshot = if phase == RunPhase::BuildDone {
            let rows = store.read_datamodel(&config.target_table)?;
            let snapshot = TableSnapshot::of_rows(run_id, &config.target_table, &rows);
            store.save_table_snapshot(&snapshot)?;
            emit(store, run_id, PipelineEvent::TableSnapshotTaken {
                table:     snapshot.table.clone(),
                row_count: snapshot.row_count,
                checksum:  snapshot.checksum.clone(),
            })?;
            Some(snapshot)
        } else {
            None
        };

        Ok(RunReport {
            run_id: run_id.to_string(),
            logical_date: format_ts(&logical_date),
            phase,
            steps: reports,
            snapshot,
        })
    }
}

fn execute_with_retry(
    store:        &WarehouseStore,
    config:       &PipelineConfig,
    delay:        &mut DelayFn,
    run_id:       &str,
    logical_date: Timestamp,
    step:         &mut dyn PipelineStep,
) -> PipelineResult<StepReport> {
    let name = step.name();
    let max_attempts = config.default_args.retries + 1;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        emit(store, run_id, PipelineEvent::StepStarted {
            step: name.to_string(),
            attempt,
        })?;
        let started_at = format_ts(&utc_now());
        let ctx = StepContext { run_id, logical_date, attempt, config };
        let result = step.execute(&ctx);
        let finished_at = format_ts(&utc_now());

        match result {
            Ok(outcome) => {
                store.record_attempt(
                    run_id, name, attempt, None, outcome.rows_affected, &started_at, &finished_at,
                )?;
                emit(store, run_id, PipelineEvent::StepSucceeded {
                    step:          name.to_string(),
                    attempt,
                    rows_affected: outcome.rows_affected,
                })?;
                return Ok(StepReport {
                    name:          name.to_string(),
                    kind:          step.kind(),
                    status:        StepStatus::Success,
                    attempts:      attempt,
                    rows_affected: outcome.rows_affected,
                    last_error:    None,
                });
            }
            Err(e) => {
                let message = e.to_string();
                log::warn!("run={run_id} {name}: attempt {attempt}/{max_attempts} failed: {message}");
                store.record_attempt(
                    run_id, name, attempt, Some(&message), None, &started_at, &finished_at,
                )?;
                emit(store, run_id, PipelineEvent::StepFailed {
                    step:  name.to_string(),
                    attempt,
                    error: message.clone(),
                })?;

                if attempt < max_attempts {
                    let wait = config.retry_delay();
                    emit(store, run_id, PipelineEvent::StepRetryScheduled {
                        step:         name.to_string(),
                        next_attempt: attempt + 1,
                        delay_secs:   wait.as_secs(),
                    })?;
                    delay(wait);
                }
                last_error = Some(message);
            }
        }
    }

    log::error!("run={run_id} {name}: failed after {max_attempts} attempt(s)");
    Ok(StepReport {
        name:          name.to_string(),
        kind:          step.kind(),
        status:        StepStatus::Failed,
        attempts:      max_attempts,
        rows_affected: None,
        last_error,
    })
}

/// Validated phase change, persisted and logged as an event.
fn advance(
    store:  &WarehouseStore,
    run_id: &str,
    from:   RunPhase,
    to:     RunPhase,
) -> PipelineResult<RunPhase> {
    let next = from.transition(to)?;
    store.update_run_phase(run_id, next)?;
    emit(store, run_id, PipelineEvent::PhaseChanged { from, to: next })?;
    log::debug!("run={run_id} phase {from} -> {next}");
    Ok(next)
}

fn emit(store: &WarehouseStore, run_id: &str, event: PipelineEvent) -> PipelineResult<()> {
    let entry = EventLogEntry::from_event(run_id, &event)?;
    store.append_event(&entry, &format_ts(&utc_now()))
}
