//! Datamodel pipeline: rebuilds the `task4_datamodel` feature table from
//! applications, loans and repayment cycles on a fixed schedule.

pub mod config;
pub mod demo;
pub mod error;
pub mod event;
pub mod features;
pub mod model;
pub mod rng;
pub mod runner;
pub mod schedule;
pub mod snapshot;
pub mod sql;
pub mod state;
pub mod steps;
pub mod store;
pub mod types;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use runner::{PipelineRunner, RunReport};
pub use store::WarehouseStore;
