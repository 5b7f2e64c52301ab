//! In-process feature computation.
//!
//! Produces exactly the rows the build query produces, using sorted scans
//! instead of a query engine:
//!
//!   1. Rank applications per customer by `(created_at, id)` and count the
//!      strictly-preceding applications and loans.
//!   2. Pair each application with its loan's cycles (left join), order the
//!      pairs per customer by `(cycle_created_at NULLS FIRST, application_id,
//!      cycle_id)` and accumulate paid/unpaid counts of preceding pairs.
//!   3. Compute 30/60-day trailing dpd aggregates per `(loan, customer)` and
//!      attach them by `(loan, customer, cycle_created_at)`.

pub mod window;

use crate::{
    model::{Application, Cycle, DatamodelRow, SourceData},
    types::{RowId, Timestamp},
};
use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use window::{trailing_stats, WindowStats};

pub const SHORT_WINDOW_DAYS: i64 = 30;
pub const LONG_WINDOW_DAYS: i64 = 60;

/// An application with its strictly-preceding counts.
#[derive(Debug, Clone)]
pub struct RankedApplication<'a> {
    pub app:          &'a Application,
    pub apps_before:  i64,
    pub loans_before: i64,
}

/// Trailing aggregates for one `(loan, customer, created_at)` key.
#[derive(Debug, Clone, Copy)]
struct TrailingEntry {
    short:   WindowStats,
    long:    WindowStats,
    /// Number of distinct dpd values among cycles at this key. The query
    /// groups by dpd too, so the join back fans out by this factor.
    fan_out: usize,
}

type CycleKey = (RowId, RowId); // (customer_id, loan_id)
type TrailingKey = (RowId, RowId, Timestamp); // (loan_id, customer_id, created_at)

/// Compute the full derived table from source records.
pub fn build_rows(source: &SourceData) -> Vec<DatamodelRow> {
    let ranked = rank_applications(&source.applications);
    let cycles_by_loan = index_cycles(&source.cycles);
    let trailing = trailing_aggregates(&source.cycles);

    let mut rows = Vec::new();
    for (_customer, apps) in ranked {
        let mut pairs: Vec<(&RankedApplication, Option<&Cycle>)> = Vec::new();
        for ranked_app in &apps {
            let matched = ranked_app
                .app
                .loan_id
                .and_then(|loan| cycles_by_loan.get(&(ranked_app.app.customer_id, loan)));
            match matched {
                Some(cycles) => pairs.extend(cycles.iter().map(|c| (ranked_app, Some(*c)))),
                None         => pairs.push((ranked_app, None)),
            }
        }
        pairs.sort_by_key(|(r, c)| {
            (c.map(|c| c.created_at), r.app.id, c.map(|c| c.id))
        });

        let (mut paid, mut unpaid) = (0i64, 0i64);
        for (i, (ranked_app, cycle)) in pairs.iter().enumerate() {
            let (paid_before, unpaid_before) = if i == 0 {
                (None, None)
            } else {
                (Some(paid), Some(unpaid))
            };
            match cycle.and_then(|c| c.is_paid()) {
                Some(true)  => paid += 1,
                Some(false) => unpaid += 1,
                None        => {}
            }

            let base = DatamodelRow {
                application_id:            ranked_app.app.id,
                application_created_at:    ranked_app.app.created_at,
                customer_id:               ranked_app.app.customer_id,
                loan_id:                   ranked_app.app.loan_id,
                nr_of_applications_before: ranked_app.apps_before,
                nr_of_loans_before:        ranked_app.loans_before,
                cycle_created_at:          cycle.map(|c| c.created_at),
                paid_cycles_before:        paid_before,
                unpaid_cycles_before:      unpaid_before,
                avg_dpd_30_days:           None,
                max_dpd_30_days:           None,
                avg_dpd_60_days:           None,
                max_dpd_60_days:           None,
            };

            let entry = cycle.and_then(|c| trailing.get(&(c.loan_id, c.customer_id, c.created_at)));
            match entry {
                Some(e) => {
                    let row = DatamodelRow {
                        avg_dpd_30_days: e.short.avg,
                        max_dpd_30_days: e.short.max,
                        avg_dpd_60_days: e.long.avg,
                        max_dpd_60_days: e.long.max,
                        ..base
                    };
                    for _ in 0..e.fan_out * e.fan_out {
                        rows.push(row.clone());
                    }
                }
                None => rows.push(base),
            }
        }
    }

    log::debug!(
        "features: {} applications, {} cycles -> {} rows",
        source.applications.len(),
        source.cycles.len(),
        rows.len()
    );
    rows
}

/// Rank applications per customer. Counts cover strictly-preceding
/// applications in `(created_at, id)` order; the first one gets zeros.
pub fn rank_applications(apps: &[Application]) -> BTreeMap<RowId, Vec<RankedApplication<'_>>> {
    let mut by_customer: BTreeMap<RowId, Vec<&Application>> = BTreeMap::new();
    for app in apps {
        by_customer.entry(app.customer_id).or_default().push(app);
    }

    by_customer
        .into_iter()
        .map(|(customer, mut list)| {
            list.sort_by_key(|a| (a.created_at, a.id));
            let mut loans_before = 0i64;
            let ranked = list
                .into_iter()
                .enumerate()
                .map(|(i, app)| {
                    let r = RankedApplication {
                        app,
                        apps_before: i as i64,
                        loans_before,
                    };
                    if app.loan_id.is_some() {
                        loans_before += 1;
                    }
                    r
                })
                .collect();
            (customer, ranked)
        })
        .collect()
}

fn index_cycles(cycles: &[Cycle]) -> HashMap<CycleKey, Vec<&Cycle>> {
    let mut index: HashMap<CycleKey, Vec<&Cycle>> = HashMap::new();
    for c in cycles {
        index.entry((c.customer_id, c.loan_id)).or_default().push(c);
    }
    index
}

fn trailing_aggregates(cycles: &[Cycle]) -> HashMap<TrailingKey, TrailingEntry> {
    let mut series: HashMap<(RowId, RowId), Vec<&Cycle>> = HashMap::new();
    for c in cycles {
        series.entry((c.loan_id, c.customer_id)).or_default().push(c);
    }

    let mut out = HashMap::new();
    for ((loan, customer), mut list) in series {
        list.sort_by_key(|c| (c.created_at, c.id));
        let points: Vec<(Timestamp, Option<i64>)> =
            list.iter().map(|c| (c.created_at, c.dpd)).collect();
        let short = trailing_stats(&points, Duration::days(SHORT_WINDOW_DAYS));
        let long = trailing_stats(&points, Duration::days(LONG_WINDOW_DAYS));

        let mut distinct_dpd: HashMap<Timestamp, BTreeSet<Option<i64>>> = HashMap::new();
        for c in &list {
            distinct_dpd.entry(c.created_at).or_default().insert(c.dpd);
        }

        for (i, c) in list.iter().enumerate() {
            let fan_out = distinct_dpd.get(&c.created_at).map_or(1, |s| s.len());
            out.entry((loan, customer, c.created_at)).or_insert(TrailingEntry {
                short: short[i],
                long:  long[i],
                fan_out,
            });
        }
    }
    out
}
