//! Pipeline configuration, loaded from `data/pipeline.json`.
//!
//! Defaults mirror the production workflow: daily cadence, no catch-up,
//! one active run, one retry after five minutes, auto-committed steps.

use crate::{
    error::{PipelineError, PipelineResult},
    schedule::ScheduleInterval,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PIPELINE_ID: &str = "task4__datamodel_creation";
pub const DEFAULT_TARGET_TABLE: &str = "task4_datamodel";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_id:       String,
    pub owner:             String,
    /// First logical date, `YYYY-MM-DD`.
    pub start_date:        String,
    pub schedule_interval: ScheduleInterval,
    pub catchup:           bool,
    pub max_active_runs:   u32,
    pub default_args:      StepDefaults,
    pub connection:        ConnectionConfig,
    pub target_table:      String,
    #[serde(default)]
    pub refresh_mode:      RefreshMode,
    #[serde(default)]
    pub build_engine:      BuildEngine,
}

/// Per-step policy shared by every step of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefaults {
    pub retries:          u32,
    pub retry_delay_secs: u64,
    #[serde(default = "default_autocommit")]
    pub autocommit:       bool,
    #[serde(default)]
    pub execution_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub conn_id: String,
    /// Filesystem path or SQLite URI (`file:...?mode=memory&cache=shared`).
    pub path:    String,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Drop the target, then create it. Consumers can observe the table
    /// missing between the two steps.
    #[default]
    DropThenCreate,
    /// Build into `<target>__staging`, then replace the target in one
    /// transaction.
    StagedSwap,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildEngine {
    /// One `CREATE TABLE ... AS WITH ...` statement run by the database.
    #[default]
    Sql,
    /// Rows computed in-process by sorted scans, then bulk inserted.
    Native,
}

fn default_autocommit() -> bool { true }
fn default_busy_timeout() -> u64 { 5 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_id:       DEFAULT_PIPELINE_ID.to_string(),
            owner:             "mozes".to_string(),
            start_date:        "2023-11-01".to_string(),
            schedule_interval: ScheduleInterval::Daily,
            catchup:           false,
            max_active_runs:   1,
            default_args: StepDefaults {
                retries:                1,
                retry_delay_secs:       300,
                autocommit:             true,
                execution_timeout_secs: None,
            },
            connection: ConnectionConfig {
                conn_id:           "anyfin_warehouse".to_string(),
                path:              "warehouse.db".to_string(),
                busy_timeout_secs: default_busy_timeout(),
            },
            target_table: DEFAULT_TARGET_TABLE.to_string(),
            refresh_mode: RefreshMode::default(),
            build_engine: BuildEngine::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Same defaults as production, pointed at `db_path`.
    pub fn for_database(db_path: &str) -> Self {
        let mut config = Self::default();
        config.connection.path = db_path.to_string();
        config
    }

    pub fn validate(&self) -> PipelineResult<()> {
        validate_identifier(&self.target_table)?;
        if self.max_active_runs == 0 {
            return Err(PipelineError::Config(
                "max_active_runs must be at least 1".into(),
            ));
        }
        if self.pipeline_id.trim().is_empty() {
            return Err(PipelineError::Config("pipeline_id must not be empty".into()));
        }
        if crate::types::parse_ts(&self.start_date).is_none() {
            return Err(PipelineError::Config(format!(
                "start_date '{}' is not YYYY-MM-DD",
                self.start_date
            )));
        }
        if !self.default_args.autocommit {
            // Every step is a single statement; there is no multi-statement
            // transaction for a non-autocommit mode to span.
            return Err(PipelineError::Config(
                "autocommit=false is not supported".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.default_args.retry_delay_secs)
    }

    /// Name of the staging table used by [`RefreshMode::StagedSwap`].
    pub fn staging_table(&self) -> String {
        format!("{}__staging", self.target_table)
    }
}

/// Accept only plain `[A-Za-z_][A-Za-z0-9_]*` identifiers. Table names are
/// spliced into SQL text, so anything else is rejected.
pub fn validate_identifier(name: &str) -> PipelineResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidIdentifier { name: name.to_string() })
    }
}
