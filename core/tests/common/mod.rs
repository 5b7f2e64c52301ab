//! Shared fixtures for integration tests.
#![allow(dead_code)]

use datamodel_core::{
    config::PipelineConfig,
    model::{Application, Cycle, Loan, SourceData, PAID_STATUS},
    runner::PipelineRunner,
    store::WarehouseStore,
    types::{parse_ts, Timestamp},
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Parse `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`.
pub fn ts(raw: &str) -> Timestamp {
    parse_ts(raw).unwrap_or_else(|| panic!("bad timestamp {raw}"))
}

pub fn app(id: i64, at: &str, customer: i64, loan: Option<i64>) -> Application {
    Application { id, created_at: ts(at), customer_id: customer, loan_id: loan }
}

pub fn loan(id: i64, customer: i64) -> Loan {
    Loan { id, customer_id: customer, status: "active".into() }
}

pub fn cycle(id: i64, at: &str, loan: i64, customer: i64, dpd: i64, paid: bool) -> Cycle {
    Cycle {
        id,
        created_at: ts(at),
        loan_id: loan,
        customer_id: customer,
        dpd: Some(dpd),
        status: Some(if paid { PAID_STATUS } else { "unpaid" }.to_string()),
    }
}

/// An on-disk warehouse in a temp dir. Keep the struct alive for the
/// duration of the test.
pub struct TestWarehouse {
    pub dir:    TempDir,
    pub config: PipelineConfig,
    pub store:  WarehouseStore,
}

pub fn warehouse() -> TestWarehouse {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("warehouse.db");
    let config = PipelineConfig::for_database(path.to_str().expect("utf-8 path"));
    let store = WarehouseStore::connect(&config.connection).expect("connect");
    store.migrate().expect("migrate");
    TestWarehouse { dir, config, store }
}

pub fn seeded_warehouse(data: &SourceData) -> TestWarehouse {
    let wh = warehouse();
    wh.store.create_source_tables().expect("source tables");
    wh.store.insert_source_data(data).expect("seed");
    wh
}

/// Records every retry delay instead of sleeping.
#[derive(Clone, Default)]
pub struct DelayLog(pub Arc<Mutex<Vec<Duration>>>);

impl DelayLog {
    pub fn waits(&self) -> Vec<Duration> {
        self.0.lock().expect("delay log").clone()
    }

    pub fn recorder(&self) -> impl FnMut(Duration) + Send + 'static {
        let log = self.0.clone();
        move |d| log.lock().expect("delay log").push(d)
    }
}

/// The production runner for `config`, with retry delays recorded.
pub fn runner(config: &PipelineConfig, delays: &DelayLog) -> PipelineRunner {
    PipelineRunner::build(config.clone())
        .expect("build runner")
        .with_delay(delays.recorder())
}

/// Small hand-built dataset used across tests.
///
/// Customer 1: applications on Jan 1 (loan 10), Feb 1 (no loan), Mar 1 (loan 11).
///   Loan 10 cycles: Jan 12 dpd 5 unpaid, Jan 22 dpd 10 unpaid, Feb 1 dpd 0 paid.
///   Loan 11 cycles: Mar 15 dpd 0 paid.
/// Customer 2: one application on Jan 5 with loan 20 and one cycle on Feb 20.
pub fn small_dataset() -> SourceData {
    SourceData {
        applications: vec![
            app(1, "2024-01-01", 1, Some(10)),
            app(2, "2024-02-01", 1, None),
            app(3, "2024-03-01", 1, Some(11)),
            app(4, "2024-01-05", 2, Some(20)),
        ],
        loans: vec![loan(10, 1), loan(11, 1), loan(20, 2)],
        cycles: vec![
            cycle(100, "2024-01-12", 10, 1, 5, false),
            cycle(101, "2024-01-22", 10, 1, 10, false),
            cycle(102, "2024-02-01", 10, 1, 0, true),
            cycle(110, "2024-03-15", 11, 1, 0, true),
            cycle(200, "2024-02-20", 20, 2, 3, false),
        ],
    }
}
