use super::select::tie_break;
use crate::errors::{OptimizeError, Result};
use crate::pipeline::{Stage, StageContext, StageName, StageOutcome};
use crate::report;
use async_trait::async_trait;

/// Picks the champion and stamps it on the run row.
pub struct BuildReport;

#[async_trait]
impl Stage for BuildReport {
    fn name(&self) -> StageName {
        StageName::BuildReport
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let result = report::assemble(&ctx.store, ctx.run_id, tie_break(ctx))?;
        ctx.store.runs().set_champion(
            ctx.run_id,
            result.champion.id,
            result.counts.evaluations as i64,
        )?;
        tracing::info!(
            event = "champion_selected",
            run_id = ctx.run_id,
            prompt_id = result.champion.id,
            score = result.champion_score,
            baseline_delta = result.baseline.as_ref().map(|b| b.delta),
            tracks = result.tracks.len()
        );
        Ok(StageOutcome::Completed { produced: 1 })
    }
}

/// Hands the assembled result to the configured sink.
pub struct PersistReport;

#[async_trait]
impl Stage for PersistReport {
    fn name(&self) -> StageName {
        StageName::PersistReport
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let result = report::assemble(&ctx.store, ctx.run_id, tie_break(ctx))?;
        let written = ctx.sink.persist(&result).map_err(OptimizeError::Report)?;
        Ok(StageOutcome::Completed {
            produced: written.len(),
        })
    }
}
