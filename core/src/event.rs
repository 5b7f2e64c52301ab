//! Run lifecycle events.
//!
//! Every state change of a run is appended to `event_log` as tagged JSON,
//! so a run can be reconstructed from the log alone.

use crate::{
    state::RunPhase,
    types::RunId,
};
use serde::{Deserialize, Serialize};

/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id:       RunId,
        pipeline_id:  String,
        logical_date: String,
    },
    PhaseChanged {
        from: RunPhase,
        to:   RunPhase,
    },
    StepStarted {
        step:    String,
        attempt: u32,
    },
    StepSucceeded {
        step:          String,
        attempt:       u32,
        rows_affected: Option<u64>,
    },
    StepFailed {
        step:    String,
        attempt: u32,
        error:   String,
    },
    StepRetryScheduled {
        step:         String,
        next_attempt: u32,
        delay_secs:   u64,
    },
    /// Downstream step never executed because a predecessor failed.
    StepSkipped {
        step:   String,
        reason: String,
    },
    TableSnapshotTaken {
        table:     String,
        row_count: u64,
        checksum:  String,
    },
    RunFinished {
        run_id:    RunId,
        succeeded: bool,
    },
}

impl PipelineEvent {
    /// Stable name stored in the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. }         => "run_started",
            Self::PhaseChanged { .. }       => "phase_changed",
            Self::StepStarted { .. }        => "step_started",
            Self::StepSucceeded { .. }      => "step_succeeded",
            Self::StepFailed { .. }         => "step_failed",
            Self::StepRetryScheduled { .. } => "step_retry_scheduled",
            Self::StepSkipped { .. }        => "step_skipped",
            Self::TableSnapshotTaken { .. } => "table_snapshot_taken",
            Self::RunFinished { .. }        => "run_finished",
        }
    }

    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step, .. }
            | Self::StepSucceeded { step, .. }
            | Self::StepFailed { step, .. }
            | Self::StepRetryScheduled { step, .. }
            | Self::StepSkipped { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// A persisted event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub step:       Option<String>,
    pub event_type: String,
    pub payload:    String,
}

impl EventLogEntry {
    pub fn from_event(run_id: &str, event: &PipelineEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id:         None,
            run_id:     run_id.to_string(),
            step:       event.step().map(str::to_string),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        })
    }

    pub fn decode(&self) -> serde_json::Result<PipelineEvent> {
        serde_json::from_str(&self.payload)
    }
}
