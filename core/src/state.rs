//! Per-run state machine.
//!
//! ```text
//! PENDING -> RESET_RUNNING -> RESET_DONE -> BUILD_RUNNING -> BUILD_DONE
//!                 |                              |
//!                 +------------> FAILED <--------+
//! ```
//!
//! Retries happen inside a running phase; only terminal step failure moves
//! the run to FAILED.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Reset,
    Build,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Build => "build",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Pending,
    ResetRunning,
    ResetDone,
    BuildRunning,
    BuildDone,
    Failed,
}

impl RunPhase {
    pub fn running(kind: StepKind) -> Self {
        match kind {
            StepKind::Reset => Self::ResetRunning,
            StepKind::Build => Self::BuildRunning,
        }
    }

    pub fn done(kind: StepKind) -> Self {
        match kind {
            StepKind::Reset => Self::ResetDone,
            StepKind::Build => Self::BuildDone,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BuildDone | Self::Failed)
    }

    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Pending, ResetRunning)
                | (ResetRunning, ResetDone)
                | (ResetRunning, Failed)
                | (ResetDone, BuildRunning)
                | (BuildRunning, BuildDone)
                | (BuildRunning, Failed)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: RunPhase) -> PipelineResult<RunPhase> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PipelineError::InvalidTransition {
                from: self.to_string(),
                to:   next.to_string(),
            })
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending      => "PENDING",
            Self::ResetRunning => "RESET_RUNNING",
            Self::ResetDone    => "RESET_DONE",
            Self::BuildRunning => "BUILD_RUNNING",
            Self::BuildDone    => "BUILD_DONE",
            Self::Failed       => "FAILED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RunPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING"       => Ok(Self::Pending),
            "RESET_RUNNING" => Ok(Self::ResetRunning),
            "RESET_DONE"    => Ok(Self::ResetDone),
            "BUILD_RUNNING" => Ok(Self::BuildRunning),
            "BUILD_DONE"    => Ok(Self::BuildDone),
            "FAILED"        => Ok(Self::Failed),
            _ => Err(format!("Invalid run phase: {s}")),
        }
    }
}
