use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source table '{table}' does not exist")]
    MissingSourceTable { table: String },

    #[error("Invalid SQL identifier: '{name}'")]
    InvalidIdentifier { name: String },

    #[error("Invalid timestamp in {table}.{column}: '{value}'")]
    InvalidTimestamp {
        table:  String,
        column: String,
        value:  String,
    },

    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Pipeline '{pipeline_id}' already has {active} active run(s) (max {max})")]
    RunAlreadyActive {
        pipeline_id: String,
        active:      i64,
        max:         u32,
    },

    #[error("Step '{step}' exceeded its execution timeout of {timeout_secs}s")]
    StepTimeout { step: String, timeout_secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
