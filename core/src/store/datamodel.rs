//! Derived table access.

use crate::{
    config::validate_identifier,
    error::{PipelineError, PipelineResult},
    model::DatamodelRow,
    sql,
    types::{format_ts, parse_ts},
};
use rusqlite::params;

use super::WarehouseStore;

struct RawRow {
    application_id:            i64,
    application_created_at:    String,
    customer_id:               i64,
    loan_id:                   Option<i64>,
    nr_of_applications_before: i64,
    nr_of_loans_before:        i64,
    cycle_created_at:          Option<String>,
    paid_cycles_before:        Option<i64>,
    unpaid_cycles_before:      Option<i64>,
    avg_dpd_30_days:           Option<f64>,
    max_dpd_30_days:           Option<i64>,
    avg_dpd_60_days:           Option<f64>,
    max_dpd_60_days:           Option<i64>,
}

impl WarehouseStore {
    /// Create `table` with explicit column types and fill it, atomically.
    pub fn write_datamodel(&self, table: &str, rows: &[DatamodelRow]) -> PipelineResult<u64> {
        validate_identifier(table)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&sql::create_datamodel_typed(table))?;
        {
            let mut stmt = tx.prepare(&sql::insert_datamodel_row(table))?;
            for r in rows {
                stmt.execute(params![
                    r.application_id,
                    format_ts(&r.application_created_at),
                    r.customer_id,
                    r.loan_id,
                    r.nr_of_applications_before,
                    r.nr_of_loans_before,
                    r.cycle_created_at.as_ref().map(format_ts),
                    r.paid_cycles_before,
                    r.unpaid_cycles_before,
                    r.avg_dpd_30_days,
                    r.max_dpd_30_days,
                    r.avg_dpd_60_days,
                    r.max_dpd_60_days,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len() as u64)
    }

    /// Read every row of the derived table, in storage order.
    pub fn read_datamodel(&self, table: &str) -> PipelineResult<Vec<DatamodelRow>> {
        validate_identifier(table)?;
        let mut stmt = self.conn.prepare(&sql::select_datamodel(table))?;
        let raw = stmt
            .query_map([], |row| {
                Ok(RawRow {
                    application_id:            row.get(0)?,
                    application_created_at:    row.get(1)?,
                    customer_id:               row.get(2)?,
                    loan_id:                   row.get(3)?,
                    nr_of_applications_before: row.get(4)?,
                    nr_of_loans_before:        row.get(5)?,
                    cycle_created_at:          row.get(6)?,
                    paid_cycles_before:        row.get(7)?,
                    unpaid_cycles_before:      row.get(8)?,
                    avg_dpd_30_days:           row.get(9)?,
                    max_dpd_30_days:           row.get(10)?,
                    avg_dpd_60_days:           row.get(11)?,
                    max_dpd_60_days:           row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|r| {
                let bad_ts = |column: &str, value: &str| PipelineError::InvalidTimestamp {
                    table:  table.to_string(),
                    column: column.to_string(),
                    value:  value.to_string(),
                };
                let application_created_at = parse_ts(&r.application_created_at)
                    .ok_or_else(|| bad_ts("application_created_at", &r.application_created_at))?;
                let cycle_created_at = match &r.cycle_created_at {
                    Some(raw) => Some(parse_ts(raw).ok_or_else(|| bad_ts("cycle_created_at", raw))?),
                    None => None,
                };
                Ok(DatamodelRow {
                    application_id: r.application_id,
                    application_created_at,
                    customer_id: r.customer_id,
                    loan_id: r.loan_id,
                    nr_of_applications_before: r.nr_of_applications_before,
                    nr_of_loans_before: r.nr_of_loans_before,
                    cycle_created_at,
                    paid_cycles_before: r.paid_cycles_before,
                    unpaid_cycles_before: r.unpaid_cycles_before,
                    avg_dpd_30_days: r.avg_dpd_30_days,
                    max_dpd_30_days: r.max_dpd_30_days,
                    avg_dpd_60_days: r.avg_dpd_60_days,
                    max_dpd_60_days: r.max_dpd_60_days,
                })
            })
            .collect()
    }
}
