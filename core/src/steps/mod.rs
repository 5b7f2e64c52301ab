//! Step trait and the two pipeline steps.
//!
//! RULE: Every step implements PipelineStep.
//! The runner executes registered steps in order; a step runs only if
//! every step before it succeeded. Each attempt opens its own connection
//! and drops it before returning.

mod build;
mod reset;

pub use build::BuildStep;
pub use reset::ResetStep;

use crate::{
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    state::StepKind,
    store::WarehouseStore,
    types::Timestamp,
};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// What a step sees for one attempt.
pub struct StepContext<'a> {
    pub run_id:       &'a str,
    pub logical_date: Timestamp,
    /// 1-based attempt number.
    pub attempt:      u32,
    pub config:       &'a PipelineConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub rows_affected: Option<u64>,
}

/// The contract every step must fulfill.
pub trait PipelineStep: Send {
    /// Unique stable name, used in the attempt log and events.
    fn name(&self) -> &'static str;

    /// Which phase of the run this step drives.
    fn kind(&self) -> StepKind;

    /// One attempt. An `Err` counts as a failed attempt; the runner
    /// decides whether to retry.
    fn execute(&mut self, ctx: &StepContext<'_>) -> PipelineResult<StepOutcome>;
}

/// Run `work` against `store`, interrupting the running statement once
/// `timeout_secs` elapse. An interrupted attempt fails with `StepTimeout`.
pub fn with_statement_timeout<T>(
    store:        &WarehouseStore,
    step:         &str,
    timeout_secs: Option<u64>,
    work:         impl FnOnce() -> PipelineResult<T>,
) -> PipelineResult<T> {
    let Some(secs) = timeout_secs else {
        return work();
    };

    let handle = store.interrupt_handle();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let watchdog = thread::spawn(move || {
        match done_rx.recv_timeout(Duration::from_secs(secs)) {
            Err(RecvTimeoutError::Timeout) => {
                handle.interrupt();
                true
            }
            _ => false,
        }
    });

    let result = work();
    let _ = done_tx.send(());
    let fired = watchdog.join().unwrap_or(false);

    match result {
        Err(_) if fired => Err(PipelineError::StepTimeout {
            step:         step.to_string(),
            timeout_secs: secs,
        }),
        other => other,
    }
}
