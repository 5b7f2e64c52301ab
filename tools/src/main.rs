//! pipeline-runner: runs and schedules the datamodel pipeline.
//!
//! Usage:
//!   pipeline-runner run         [--config data/pipeline.json] [--db warehouse.db] [--logical-date 2023-11-01] [--json]
//!   pipeline-runner schedule    [--config F] [--db P] [--max-runs N]
//!   pipeline-runner seed-demo   [--config F] [--db P] [--customers 200] [--seed 42]
//!   pipeline-runner history     [--config F] [--db P] [--limit 20] [--json]
//!   pipeline-runner clear-stale [--config F] [--db P]

use anyhow::{bail, Result};
use datamodel_core::{
    demo::{self, DemoConfig},
    schedule::Schedule,
    types::{format_ts, parse_ts, utc_now, Timestamp},
    PipelineConfig, PipelineError, PipelineRunner, RunReport, WarehouseStore,
};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "./data/pipeline.json";

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");
    let config = load_config(&args)?;

    match command {
        "run"         => run_once(config, &args),
        "schedule"    => run_scheduler(config, &args),
        "seed-demo"   => seed_demo(&config, &args),
        "history"     => print_history(&config, &args),
        "clear-stale" => clear_stale(&config),
        other => bail!("unknown command '{other}' (expected run | schedule | seed-demo | history | clear-stale)"),
    }
}

fn load_config(args: &[String]) -> Result<PipelineConfig> {
    let mut config = match str_arg(args, "--config") {
        Some(path) => PipelineConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => PipelineConfig::load(DEFAULT_CONFIG_PATH)?,
        None => PipelineConfig::default(),
    };
    if let Some(db) = str_arg(args, "--db") {
        config.connection.path = db.to_string();
    }
    config.validate()?;
    Ok(config)
}

fn run_once(config: PipelineConfig, args: &[String]) -> Result<()> {
    let schedule = Schedule::from_config(&config)?;
    let now = utc_now();
    let logical_date = match str_arg(args, "--logical-date") {
        Some(raw) => parse_ts(raw)
            .ok_or_else(|| anyhow::anyhow!("--logical-date '{raw}' is not YYYY-MM-DD"))?,
        None => schedule.latest_complete(now).unwrap_or(schedule.start),
    };

    let json = has_flag(args, "--json");
    if !json {
        println!("datamodel pipeline: run");
        println!("  pipeline:      {}", config.pipeline_id);
        println!("  db:            {}", config.connection.path);
        println!("  table:         {}", config.target_table);
        println!("  logical date:  {}", format_ts(&logical_date));
        println!();
    }

    let mut runner = PipelineRunner::build(config)?;
    let report = runner.run(logical_date)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if !report.succeeded() {
        bail!("run {} failed in phase {}", report.run_id, report.phase);
    }
    Ok(())
}

/// Fixed cadence, no catch-up, one run at a time.
fn run_scheduler(config: PipelineConfig, args: &[String]) -> Result<()> {
    let schedule = Schedule::from_config(&config)?;
    let max_runs = parse_arg(args, "--max-runs", u64::MAX);
    let pipeline_id = config.pipeline_id.clone();
    let backoff = config.retry_delay();
    let mut runner = PipelineRunner::build(config)?;
    let mut completed = 0u64;

    log::info!("scheduler started for {pipeline_id} ({:?})", schedule.interval);
    while completed < max_runs {
        let last = runner
            .store()
            .latest_logical_date(&pipeline_id)?
            .as_deref()
            .and_then(parse_ts);
        let now = utc_now();

        let Some(logical_date) = schedule.due_logical_date(last, now) else {
            let next = schedule.next_fire_time(last, now);
            log::info!("next run due at {}", format_ts(&next));
            sleep_until(now, next);
            continue;
        };

        match runner.run(logical_date) {
            Ok(report) => {
                print_report(&report);
                completed += 1;
            }
            Err(PipelineError::RunAlreadyActive { active, .. }) => {
                log::warn!("{active} run(s) still active, waiting {}s", backoff.as_secs());
                std::thread::sleep(backoff);
            }
            Err(e) => {
                log::error!("run for {} could not complete: {e}", format_ts(&logical_date));
                std::thread::sleep(backoff);
            }
        }
    }
    Ok(())
}

fn seed_demo(config: &PipelineConfig, args: &[String]) -> Result<()> {
    let demo_config = DemoConfig {
        customers: parse_arg(args, "--customers", 200usize),
        seed: parse_arg(args, "--seed", 42u64),
        ..DemoConfig::default()
    };
    let store = WarehouseStore::connect(&config.connection)?;
    store.create_source_tables()?;
    let data = demo::generate(&demo_config);
    store.insert_source_data(&data)?;

    println!("=== DEMO DATA ===");
    println!("  db:            {}", config.connection.path);
    println!("  seed:          {}", demo_config.seed);
    println!("  customers:     {}", demo_config.customers);
    println!("  applications:  {}", data.applications.len());
    println!("  loans:         {}", data.loans.len());
    println!("  cycles:        {}", data.cycles.len());
    Ok(())
}

fn print_history(config: &PipelineConfig, args: &[String]) -> Result<()> {
    let store = WarehouseStore::connect(&config.connection)?;
    store.migrate()?;
    let limit = parse_arg(args, "--limit", 20u32);
    let runs = store.recent_runs(&config.pipeline_id, limit)?;
    if has_flag(args, "--json") {
        for run in &runs {
            println!("{}", serde_json::to_string(run)?);
        }
        return Ok(());
    }
    if runs.is_empty() {
        println!("  (no runs recorded)");
    }
    for run in runs {
        println!(
            "  {} | logical {} | {:<7} | {:<13} | started {} | finished {}",
            run.run_id,
            run.logical_date,
            run.state,
            run.phase,
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn clear_stale(config: &PipelineConfig) -> Result<()> {
    let store = WarehouseStore::connect(&config.connection)?;
    store.migrate()?;
    let released = store.fail_stale_runs(&config.pipeline_id, &format_ts(&utc_now()))?;
    println!("released {released} stale run(s) of {}", config.pipeline_id);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:        {}", report.run_id);
    println!("  logical date:  {}", report.logical_date);
    println!("  phase:         {}", report.phase);
    for step in &report.steps {
        println!(
            "  {:<13} {:?} after {} attempt(s){}{}",
            step.name,
            step.status,
            step.attempts,
            step.rows_affected.map(|n| format!(", {n} rows")).unwrap_or_default(),
            step.last_error.as_ref().map(|e| format!(", last error: {e}")).unwrap_or_default(),
        );
    }
    if let Some(snapshot) = &report.snapshot {
        println!("  snapshot:      {} rows, checksum {}", snapshot.row_count, snapshot.checksum);
    }
}

fn sleep_until(now: Timestamp, next: Timestamp) {
    if let Ok(wait) = (next - now).to_std() {
        std::thread::sleep(wait);
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
