//! Source records read from upstream tables and the derived feature row.

use crate::types::{format_ts, RowId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const PAID_STATUS: &str = "paid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id:          RowId,
    pub created_at:  Timestamp,
    pub customer_id: RowId,
    pub loan_id:     Option<RowId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id:          RowId,
    pub customer_id: RowId,
    pub status:      String,
}

/// One billing/repayment period of a loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id:          RowId,
    pub created_at:  Timestamp,
    pub loan_id:     RowId,
    pub customer_id: RowId,
    pub dpd:         Option<i64>,
    pub status:      Option<String>,
}

impl Cycle {
    /// `Some(true)` for paid, `Some(false)` for any other status,
    /// `None` when the status is unknown (counts as neither).
    pub fn is_paid(&self) -> Option<bool> {
        self.status.as_deref().map(|s| s == PAID_STATUS)
    }
}

/// Everything the build step reads.
#[derive(Debug, Clone, Default)]
pub struct SourceData {
    pub applications: Vec<Application>,
    pub loans:        Vec<Loan>,
    pub cycles:       Vec<Cycle>,
}

/// One row of the derived table: an application paired with one of its
/// loan's cycles (or with none).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatamodelRow {
    pub application_id:            RowId,
    pub application_created_at:    Timestamp,
    pub customer_id:               RowId,
    pub loan_id:                   Option<RowId>,
    pub nr_of_applications_before: i64,
    pub nr_of_loans_before:        i64,
    pub cycle_created_at:          Option<Timestamp>,
    pub paid_cycles_before:        Option<i64>,
    pub unpaid_cycles_before:      Option<i64>,
    pub avg_dpd_30_days:           Option<f64>,
    pub max_dpd_30_days:           Option<i64>,
    pub avg_dpd_60_days:           Option<f64>,
    pub max_dpd_60_days:           Option<i64>,
}

impl DatamodelRow {
    /// Canonical text form, stable across engines. Averages are printed
    /// with two decimals since both engines round to that precision.
    pub fn canonical(&self) -> String {
        fn opt<T: ToString>(v: &Option<T>) -> String {
            v.as_ref().map(|x| x.to_string()).unwrap_or_else(|| "null".into())
        }
        fn avg(v: &Option<f64>) -> String {
            v.map(|x| format!("{x:.2}")).unwrap_or_else(|| "null".into())
        }
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.application_id,
            format_ts(&self.application_created_at),
            self.customer_id,
            opt(&self.loan_id),
            self.nr_of_applications_before,
            self.nr_of_loans_before,
            self.cycle_created_at.as_ref().map(format_ts).unwrap_or_else(|| "null".into()),
            opt(&self.paid_cycles_before),
            opt(&self.unpaid_cycles_before),
            avg(&self.avg_dpd_30_days),
            opt(&self.max_dpd_30_days),
            avg(&self.avg_dpd_60_days),
            opt(&self.max_dpd_60_days),
        )
    }

    /// Total order used to compare row sets independent of storage order.
    pub fn sort_key_cmp(a: &Self, b: &Self) -> Ordering {
        (a.application_id, a.cycle_created_at)
            .cmp(&(b.application_id, b.cycle_created_at))
            .then_with(|| a.canonical().cmp(&b.canonical()))
    }
}

/// Sort rows into canonical order, in place.
pub fn sort_rows(rows: &mut [DatamodelRow]) {
    rows.sort_by(DatamodelRow::sort_key_cmp);
}
