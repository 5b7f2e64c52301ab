use crate::{
    config::RefreshMode,
    error::PipelineResult,
    sql,
    state::StepKind,
    store::WarehouseStore,
};

use super::{with_statement_timeout, PipelineStep, StepContext, StepOutcome};

/// Removes the table the build step is about to create. A missing table
/// is a successful no-op.
///
/// With `drop_then_create` that is the target itself; with `staged_swap`
/// only the staging table is dropped and the target stays readable.
#[derive(Debug, Default)]
pub struct ResetStep;

impl ResetStep {
    pub fn new() -> Self { Self }
}

impl PipelineStep for ResetStep {
    fn name(&self) -> &'static str { "delete_table" }

    fn kind(&self) -> StepKind { StepKind::Reset }

    fn execute(&mut self, ctx: &StepContext<'_>) -> PipelineResult<StepOutcome> {
        let config = ctx.config;
        let table = match config.refresh_mode {
            RefreshMode::DropThenCreate => config.target_table.clone(),
            RefreshMode::StagedSwap     => config.staging_table(),
        };

        let store = WarehouseStore::connect(&config.connection)?;
        let existed = store.table_exists(&table)?;
        with_statement_timeout(
            &store,
            self.name(),
            config.default_args.execution_timeout_secs,
            || store.execute_script(&sql::drop_table(&table)),
        )?;

        log::info!(
            "run={} reset: {} {table}",
            ctx.run_id,
            if existed { "dropped" } else { "no existing" }
        );
        Ok(StepOutcome::default())
    }
}
