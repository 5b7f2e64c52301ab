//! SQL text for the reset and build steps (SQLite dialect).
//!
//! Table names are spliced into the text, so callers must pass identifiers
//! that passed [`crate::config::validate_identifier`].

use crate::features::{LONG_WINDOW_DAYS, SHORT_WINDOW_DAYS};

pub const SOURCE_TABLES: [&str; 3] = ["applications", "loans", "cycles"];

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {table};")
}

/// Trailing dpd aggregates per reference cycle over `days` days, strictly
/// before the cycle's own timestamp. Reads the normalised `cycles_cte`.
///
/// The average is rounded half away from zero from the integer sum and
/// count, matching [`crate::features::window::round_ratio`].
fn trailing_dpd_cte(days: i64) -> String {
    format!(
        "cycles_{days}_day_dpd AS (
    SELECT
        c1.cycle_created_at,
        c1.loan_id,
        c1.customer_id,
        c1.dpd,
        CASE
            WHEN COUNT(c2.dpd) = 0 THEN NULL
            WHEN SUM(c2.dpd) >= 0 THEN
                CAST((SUM(c2.dpd) * 200 + COUNT(c2.dpd)) / (2 * COUNT(c2.dpd)) AS REAL) / 100.0
            ELSE
                -CAST((-SUM(c2.dpd) * 200 + COUNT(c2.dpd)) / (2 * COUNT(c2.dpd)) AS REAL) / 100.0
        END AS avg_dpd_{days}_days,
        MAX(c2.dpd) AS max_dpd_{days}_days
    FROM cycles_cte AS c1
    LEFT JOIN cycles_cte AS c2
        ON c1.loan_id = c2.loan_id
        AND c1.customer_id = c2.customer_id
        AND c2.cycle_created_at >= datetime(c1.cycle_created_at, '-{days} days')
        AND c2.cycle_created_at < c1.cycle_created_at
    GROUP BY c1.cycle_created_at, c1.loan_id, c1.customer_id, c1.dpd
)"
    )
}

/// The feature query, as a bare `WITH ... SELECT`.
///
/// Source timestamps pass through `datetime()` first, so date-only values
/// compare and sort as midnight.
pub fn datamodel_select() -> String {
    let short = SHORT_WINDOW_DAYS;
    let long = LONG_WINDOW_DAYS;
    format!(
        "WITH applications_cte AS (
    SELECT
        id AS application_id,
        datetime(created_at) AS application_created_at,
        customer_id,
        loan_id
    FROM applications
),
cycles_cte AS (
    SELECT
        id AS cycle_id,
        datetime(created_at) AS cycle_created_at,
        loan_id,
        customer_id,
        dpd,
        status
    FROM cycles
),
{short_cte},
{long_cte},
loans_and_applications AS (
    SELECT
        a.application_id,
        a.application_created_at,
        a.customer_id,
        a.loan_id,
        COUNT(a.application_id) OVER (
            PARTITION BY a.customer_id
            ORDER BY a.application_created_at, a.application_id
            ROWS BETWEEN UNBOUNDED PRECEDING AND 1 PRECEDING
        ) AS nr_of_applications_before,
        COUNT(a.loan_id) OVER (
            PARTITION BY a.customer_id
            ORDER BY a.application_created_at, a.application_id
            ROWS BETWEEN UNBOUNDED PRECEDING AND 1 PRECEDING
        ) AS nr_of_loans_before
    FROM applications_cte AS a
),
paid_unpaid_cycles AS (
    SELECT
        a.*,
        c.cycle_created_at,
        SUM(CASE WHEN c.status = 'paid' THEN 1 ELSE 0 END) OVER (
            PARTITION BY a.customer_id
            ORDER BY c.cycle_created_at, a.application_id, c.cycle_id
            ROWS BETWEEN UNBOUNDED PRECEDING AND 1 PRECEDING
        ) AS paid_cycles_before,
        SUM(CASE WHEN c.status <> 'paid' THEN 1 ELSE 0 END) OVER (
            PARTITION BY a.customer_id
            ORDER BY c.cycle_created_at, a.application_id, c.cycle_id
            ROWS BETWEEN UNBOUNDED PRECEDING AND 1 PRECEDING
        ) AS unpaid_cycles_before
    FROM loans_and_applications AS a
    LEFT JOIN cycles_cte AS c
        ON a.customer_id = c.customer_id
        AND a.loan_id = c.loan_id
)
SELECT
    puc.*,
    c{short}.avg_dpd_{short}_days,
    c{short}.max_dpd_{short}_days,
    c{long}.avg_dpd_{long}_days,
    c{long}.max_dpd_{long}_days
FROM paid_unpaid_cycles AS puc
LEFT JOIN cycles_{short}_day_dpd AS c{short}
    ON puc.loan_id = c{short}.loan_id
    AND puc.customer_id = c{short}.customer_id
    AND puc.cycle_created_at = c{short}.cycle_created_at
LEFT JOIN cycles_{long}_day_dpd AS c{long}
    ON puc.loan_id = c{long}.loan_id
    AND puc.customer_id = c{long}.customer_id
    AND puc.cycle_created_at = c{long}.cycle_created_at",
        short_cte = trailing_dpd_cte(short),
        long_cte = trailing_dpd_cte(long),
    )
}

/// `CREATE TABLE <table> AS` the feature query.
pub fn create_datamodel_as(table: &str) -> String {
    format!("CREATE TABLE {table} AS\n{};", datamodel_select())
}

/// Explicitly typed table used by the native engine.
pub fn create_datamodel_typed(table: &str) -> String {
    format!(
        "CREATE TABLE {table} (
    application_id            INTEGER,
    application_created_at    TEXT,
    customer_id               INTEGER,
    loan_id                   INTEGER,
    nr_of_applications_before INTEGER,
    nr_of_loans_before        INTEGER,
    cycle_created_at          TEXT,
    paid_cycles_before        INTEGER,
    unpaid_cycles_before      INTEGER,
    avg_dpd_30_days           REAL,
    max_dpd_30_days           INTEGER,
    avg_dpd_60_days           REAL,
    max_dpd_60_days           INTEGER
);"
    )
}

pub fn insert_datamodel_row(table: &str) -> String {
    format!(
        "INSERT INTO {table} (
            application_id, application_created_at, customer_id, loan_id,
            nr_of_applications_before, nr_of_loans_before, cycle_created_at,
            paid_cycles_before, unpaid_cycles_before,
            avg_dpd_30_days, max_dpd_30_days, avg_dpd_60_days, max_dpd_60_days
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
    )
}

pub fn select_datamodel(table: &str) -> String {
    format!(
        "SELECT application_id, application_created_at, customer_id, loan_id,
                nr_of_applications_before, nr_of_loans_before, cycle_created_at,
                paid_cycles_before, unpaid_cycles_before,
                avg_dpd_30_days, max_dpd_30_days, avg_dpd_60_days, max_dpd_60_days
         FROM {table}"
    )
}

/// Replace `target` with `staging`. Run inside one transaction.
pub fn swap_into_place(staging: &str, target: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {target};
         ALTER TABLE {staging} RENAME TO {target};"
    )
}
