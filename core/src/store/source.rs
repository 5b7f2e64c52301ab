//! Source table access: `applications`, `loans`, `cycles`.

use crate::{
    error::{PipelineError, PipelineResult},
    model::{Application, Cycle, Loan, SourceData},
    types::{format_ts, parse_ts, Timestamp},
};
use rusqlite::params;

use super::WarehouseStore;

fn ts(table: &str, column: &str, raw: String) -> PipelineResult<Timestamp> {
    parse_ts(&raw).ok_or_else(|| PipelineError::InvalidTimestamp {
        table:  table.to_string(),
        column: column.to_string(),
        value:  raw,
    })
}

impl WarehouseStore {
    pub fn insert_application(&self, a: &Application) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO applications (id, created_at, customer_id, loan_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![a.id, format_ts(&a.created_at), a.customer_id, a.loan_id],
        )?;
        Ok(())
    }

    pub fn insert_loan(&self, l: &Loan) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO loans (id, customer_id, status) VALUES (?1, ?2, ?3)",
            params![l.id, l.customer_id, l.status],
        )?;
        Ok(())
    }

    pub fn insert_cycle(&self, c: &Cycle) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO cycles (id, created_at, loan_id, customer_id, dpd, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                c.id,
                format_ts(&c.created_at),
                c.loan_id,
                c.customer_id,
                c.dpd,
                c.status,
            ],
        )?;
        Ok(())
    }

    /// Insert a whole dataset in one transaction.
    pub fn insert_source_data(&self, data: &SourceData) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for l in &data.loans {
            self.insert_loan(l)?;
        }
        for a in &data.applications {
            self.insert_application(a)?;
        }
        for c in &data.cycles {
            self.insert_cycle(c)?;
        }
        tx.commit()?;
        log::info!(
            "seeded {} applications, {} loans, {} cycles",
            data.applications.len(),
            data.loans.len(),
            data.cycles.len()
        );
        Ok(())
    }

    /// Read all three source tables.
    pub fn load_source_data(&self) -> PipelineResult<SourceData> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created_at, customer_id, loan_id FROM applications ORDER BY id",
        )?;
        let raw_apps = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let applications = raw_apps
            .into_iter()
            .map(|(id, created_at, customer_id, loan_id)| {
                Ok(Application {
                    id,
                    created_at: ts("applications", "created_at", created_at)?,
                    customer_id,
                    loan_id,
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT id, customer_id, status FROM loans ORDER BY id")?;
        let loans = stmt
            .query_map([], |row| {
                Ok(Loan {
                    id:          row.get(0)?,
                    customer_id: row.get(1)?,
                    status:      row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT id, created_at, loan_id, customer_id, dpd, status FROM cycles ORDER BY id",
        )?;
        let raw_cycles = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let cycles = raw_cycles
            .into_iter()
            .map(|(id, created_at, loan_id, customer_id, dpd, status)| {
                Ok(Cycle {
                    id,
                    created_at: ts("cycles", "created_at", created_at)?,
                    loan_id,
                    customer_id,
                    dpd,
                    status,
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        Ok(SourceData { applications, loans, cycles })
    }
}
