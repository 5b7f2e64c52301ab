//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Steps and the runner call store methods; they never hold a raw connection.

mod datamodel;
mod run;
mod source;

pub use run::RunRecord;

use crate::{
    config::ConnectionConfig,
    error::{PipelineError, PipelineResult},
    sql::SOURCE_TABLES,
};
use rusqlite::{params, Connection, InterruptHandle, OpenFlags};
use std::time::Duration;

pub struct WarehouseStore {
    conn: Connection,
}

impl WarehouseStore {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open the named connection from config, with its busy timeout.
    pub fn connect(config: &ConnectionConfig) -> PipelineResult<Self> {
        let store = Self::open(&config.path)?;
        store
            .conn
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))?;
        log::debug!("connected to {} ({})", config.conn_id, config.path);
        Ok(store)
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply run-metadata migrations. Idempotent.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_pipeline_metadata.sql"))?;
        Ok(())
    }

    /// Create the upstream source tables if absent. Production databases
    /// already have them; demo seeding and tests call this.
    pub fn create_source_tables(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/002_source_tables.sql"))?;
        Ok(())
    }

    /// Handle that can abort the statement currently running on this
    /// connection from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    // ── Schema inspection ──────────────────────────────────────

    pub fn table_exists(&self, table: &str) -> PipelineResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Fail with `MissingSourceTable` unless every source table exists.
    pub fn require_source_tables(&self) -> PipelineResult<()> {
        for table in SOURCE_TABLES {
            if !self.table_exists(table)? {
                return Err(PipelineError::MissingSourceTable {
                    table: table.to_string(),
                });
            }
        }
        Ok(())
    }

    // ── Statement execution ────────────────────────────────────

    /// Run one or more statements, each auto-committed.
    pub fn execute_script(&self, sql: &str) -> PipelineResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run statements inside a single transaction.
    pub fn execute_atomic(&self, sql: &str) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.commit()?;
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> PipelineResult<u64> {
        crate::config::validate_identifier(table)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {table}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
