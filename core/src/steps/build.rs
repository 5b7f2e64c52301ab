use crate::{
    config::{BuildEngine, RefreshMode},
    error::PipelineResult,
    features,
    sql,
    state::StepKind,
    store::WarehouseStore,
};

use super::{with_statement_timeout, PipelineStep, StepContext, StepOutcome};

/// Recomputes the derived table from `applications`, `loans` and `cycles`.
#[derive(Debug, Default)]
pub struct BuildStep;

impl BuildStep {
    pub fn new() -> Self { Self }
}

impl PipelineStep for BuildStep {
    fn name(&self) -> &'static str { "create_table" }

    fn kind(&self) -> StepKind { StepKind::Build }

    fn execute(&mut self, ctx: &StepContext<'_>) -> PipelineResult<StepOutcome> {
        let config = ctx.config;
        let target = config.target_table.clone();
        let staging = config.staging_table();
        let table = match config.refresh_mode {
            RefreshMode::DropThenCreate => target.clone(),
            RefreshMode::StagedSwap     => staging.clone(),
        };

        let store = WarehouseStore::connect(&config.connection)?;
        store.require_source_tables()?;
        if config.refresh_mode == RefreshMode::StagedSwap {
            // A failed swap on an earlier attempt leaves staging behind.
            store.execute_script(&sql::drop_table(&staging))?;
        }

        let rows = with_statement_timeout(
            &store,
            self.name(),
            config.default_args.execution_timeout_secs,
            || match config.build_engine {
                BuildEngine::Sql => {
                    store.execute_script(&sql::create_datamodel_as(&table))?;
                    store.row_count(&table)
                }
                BuildEngine::Native => {
                    let source = store.load_source_data()?;
                    let rows = features::build_rows(&source);
                    store.write_datamodel(&table, &rows)
                }
            },
        )?;

        if config.refresh_mode == RefreshMode::StagedSwap {
            store.execute_atomic(&sql::swap_into_place(&staging, &target))?;
            log::debug!("run={} build: swapped {staging} into {target}", ctx.run_id);
        }

        log::info!(
            "run={} build: {target} rebuilt with {rows} rows ({:?} engine)",
            ctx.run_id,
            config.build_engine
        );
        Ok(StepOutcome { rows_affected: Some(rows) })
    }
}
