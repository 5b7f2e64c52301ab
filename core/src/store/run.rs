//! Store methods for run bookkeeping: runs, step attempts, the event log
//! and table snapshots.

use crate::{
    error::{PipelineError, PipelineResult},
    event::EventLogEntry,
    snapshot::TableSnapshot,
    state::RunPhase,
};
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;

use super::WarehouseStore;

pub const RUN_STATE_RUNNING: &str = "running";
pub const RUN_STATE_SUCCESS: &str = "success";
pub const RUN_STATE_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id:       String,
    pub pipeline_id:  String,
    pub logical_date: String,
    pub state:        String,
    pub phase:        String,
    pub started_at:   String,
    pub finished_at:  Option<String>,
}

impl WarehouseStore {
    // ── Runs ───────────────────────────────────────────────────

    /// Atomically register a new run, refusing when `max_active` runs of
    /// this pipeline are already in state `running`.
    pub fn claim_run(
        &self,
        run_id:       &str,
        pipeline_id:  &str,
        logical_date: &str,
        max_active:   u32,
        version:      &str,
        started_at:   &str,
    ) -> PipelineResult<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let active: i64 = tx.query_row(
            "SELECT COUNT(*) FROM pipeline_run WHERE pipeline_id = ?1 AND state = ?2",
            params![pipeline_id, RUN_STATE_RUNNING],
            |row| row.get(0),
        )?;
        if active >= max_active as i64 {
            return Err(PipelineError::RunAlreadyActive {
                pipeline_id: pipeline_id.to_string(),
                active,
                max: max_active,
            });
        }
        tx.execute(
            "INSERT INTO pipeline_run
                (run_id, pipeline_id, logical_date, state, phase, started_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                pipeline_id,
                logical_date,
                RUN_STATE_RUNNING,
                RunPhase::Pending.to_string(),
                started_at,
                version,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_run_phase(&self, run_id: &str, phase: RunPhase) -> PipelineResult<()> {
        self.conn.execute(
            "UPDATE pipeline_run SET phase = ?2 WHERE run_id = ?1",
            params![run_id, phase.to_string()],
        )?;
        Ok(())
    }

    /// Release the run slot.
    pub fn finish_run(
        &self,
        run_id:      &str,
        phase:       RunPhase,
        succeeded:   bool,
        finished_at: &str,
    ) -> PipelineResult<()> {
        let state = if succeeded { RUN_STATE_SUCCESS } else { RUN_STATE_FAILED };
        self.conn.execute(
            "UPDATE pipeline_run SET state = ?2, phase = ?3, finished_at = ?4
             WHERE run_id = ?1",
            params![run_id, state, phase.to_string(), finished_at],
        )?;
        Ok(())
    }

    /// Mark every `running` run of the pipeline failed. Used after a crash
    /// left a run slot claimed. Returns how many runs were released.
    pub fn fail_stale_runs(&self, pipeline_id: &str, finished_at: &str) -> PipelineResult<usize> {
        let n = self.conn.execute(
            "UPDATE pipeline_run SET state = ?2, phase = ?3, finished_at = ?4
             WHERE pipeline_id = ?1 AND state = ?5",
            params![
                pipeline_id,
                RUN_STATE_FAILED,
                RunPhase::Failed.to_string(),
                finished_at,
                RUN_STATE_RUNNING,
            ],
        )?;
        Ok(n)
    }

    pub fn run(&self, run_id: &str) -> PipelineResult<Option<RunRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT run_id, pipeline_id, logical_date, state, phase, started_at, finished_at
                 FROM pipeline_run WHERE run_id = ?1",
                params![run_id],
                map_run,
            )
            .optional()?;
        Ok(record)
    }

    pub fn recent_runs(&self, pipeline_id: &str, limit: u32) -> PipelineResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, pipeline_id, logical_date, state, phase, started_at, finished_at
             FROM pipeline_run WHERE pipeline_id = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
        )?;
        let runs = stmt
            .query_map(params![pipeline_id, limit as i64], map_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Latest logical date ever scheduled, whatever its outcome.
    pub fn latest_logical_date(&self, pipeline_id: &str) -> PipelineResult<Option<String>> {
        let date: Option<String> = self.conn.query_row(
            "SELECT MAX(logical_date) FROM pipeline_run WHERE pipeline_id = ?1",
            params![pipeline_id],
            |row| row.get(0),
        )?;
        Ok(date)
    }

    // ── Step attempts ──────────────────────────────────────────

    pub fn record_attempt(
        &self,
        run_id:        &str,
        step:          &str,
        attempt:       u32,
        error:         Option<&str>,
        rows_affected: Option<u64>,
        started_at:    &str,
        finished_at:   &str,
    ) -> PipelineResult<()> {
        let outcome = if error.is_none() { RUN_STATE_SUCCESS } else { RUN_STATE_FAILED };
        self.conn.execute(
            "INSERT INTO step_attempt
                (run_id, step, attempt, outcome, error, rows_affected, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                step,
                attempt,
                outcome,
                error,
                rows_affected.map(|n| n as i64),
                started_at,
                finished_at,
            ],
        )?;
        Ok(())
    }

    pub fn attempt_count(&self, run_id: &str, step: &str) -> PipelineResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM step_attempt WHERE run_id = ?1 AND step = ?2",
            params![run_id, step],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry, created_at: &str) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, step, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entry.run_id, entry.step, entry.event_type, entry.payload, created_at],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> PipelineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, step, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    step:       row.get(2)?,
                    event_type: row.get(3)?,
                    payload:    row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Table snapshots ────────────────────────────────────────

    pub fn save_table_snapshot(&self, snapshot: &TableSnapshot) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO table_snapshot (run_id, table_name, row_count, checksum, state_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.run_id,
                snapshot.table,
                snapshot.row_count as i64,
                snapshot.checksum,
                serde_json::to_string(snapshot)?,
            ],
        )?;
        Ok(())
    }

    /// Most recent snapshots of `table`, newest first.
    pub fn table_snapshots(&self, table: &str, limit: u32) -> PipelineResult<Vec<TableSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT state_json FROM table_snapshot
             WHERE table_name = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let raw = stmt
            .query_map(params![table, limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(PipelineError::from))
            .collect()
    }
}

fn map_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        run_id:       row.get(0)?,
        pipeline_id:  row.get(1)?,
        logical_date: row.get(2)?,
        state:        row.get(3)?,
        phase:        row.get(4)?,
        started_at:   row.get(5)?,
        finished_at:  row.get(6)?,
    })
}
