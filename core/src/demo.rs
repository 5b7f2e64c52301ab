//! Demo dataset generator.
//!
//! Produces customers with one to three applications, most of which carry
//! a loan with a run of roughly monthly repayment cycles. The same seed
//! always yields the same dataset.

use crate::{
    model::{Application, Cycle, Loan, SourceData, PAID_STATUS},
    rng::{DemoRng, DemoStream},
    types::Timestamp,
};
use chrono::{Duration, NaiveDate};

const LOAN_PROBABILITY: f64 = 0.7;
const ON_TIME_PROBABILITY: f64 = 0.6;
const MAX_DPD: f64 = 120.0;

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub customers: usize,
    pub seed:      u64,
    /// Earliest application timestamp.
    pub start:     Timestamp,
    /// Applications are spread over this many days after `start`.
    pub span_days: i64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            customers: 200,
            seed:      42,
            start:     NaiveDate::from_ymd_opt(2023, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            span_days: 300,
        }
    }
}

pub fn generate(config: &DemoConfig) -> SourceData {
    let mut app_rng = DemoRng::new(config.seed, DemoStream::Applications);
    let mut loan_rng = DemoRng::new(config.seed, DemoStream::Loans);
    let mut cycle_rng = DemoRng::new(config.seed, DemoStream::Cycles);

    let mut data = SourceData::default();
    let (mut app_id, mut loan_id, mut cycle_id) = (0i64, 0i64, 0i64);

    for customer in 1..=config.customers as i64 {
        let n_apps = app_rng.between(1, 3);
        for _ in 0..n_apps {
            app_id += 1;
            let created_at = config.start
                + Duration::days(app_rng.between(0, config.span_days.max(0)))
                + Duration::seconds(app_rng.between(0, 86_399));

            let loan = if loan_rng.chance(LOAN_PROBABILITY) {
                loan_id += 1;
                let status = match loan_rng.below(3) {
                    0 => "active",
                    1 => "repaid",
                    _ => "defaulted",
                };
                data.loans.push(Loan {
                    id:          loan_id,
                    customer_id: customer,
                    status:      status.to_string(),
                });
                Some(loan_id)
            } else {
                None
            };

            data.applications.push(Application {
                id: app_id,
                created_at,
                customer_id: customer,
                loan_id: loan,
            });

            if let Some(loan) = loan {
                let n_cycles = cycle_rng.between(1, 6);
                for k in 1..=n_cycles {
                    cycle_id += 1;
                    let cycle_at = created_at
                        + Duration::days(30 * k + cycle_rng.between(-3, 3))
                        + Duration::seconds(cycle_rng.between(0, 3_599));
                    let dpd = if cycle_rng.chance(ON_TIME_PROBABILITY) {
                        0
                    } else {
                        cycle_rng.pareto(1.0, 1.2).min(MAX_DPD) as i64
                    };
                    let status = if dpd == 0 { PAID_STATUS } else { "unpaid" };
                    data.cycles.push(Cycle {
                        id:          cycle_id,
                        created_at:  cycle_at,
                        loan_id:     loan,
                        customer_id: customer,
                        dpd:         Some(dpd),
                        status:      Some(status.to_string()),
                    });
                }
            }
        }
    }
    data
}
