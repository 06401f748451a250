use crate::engine::evaluation::standing_for;
use crate::errors::Result;
use crate::model::{Prompt, PromptStage, TestStage};
use crate::pipeline::{Stage, StageContext, StageName, StageOutcome};
use crate::scoring::{self, Standing, TieBreakPolicy};
use async_trait::async_trait;

pub(crate) fn tie_break(ctx: &StageContext) -> TieBreakPolicy {
    TieBreakPolicy {
        baseline_wins_ties: ctx.config.selection.baseline_wins_ties,
    }
}

fn standings(ctx: &StageContext, prompts: &[Prompt], on: TestStage) -> Result<Vec<Standing>> {
    prompts
        .iter()
        .map(|p| standing_for(&ctx.store, ctx.run_id, p, Some(on)))
        .collect()
}

fn promote(
    ctx: &StageContext,
    pool: &[Prompt],
    on: TestStage,
    n: usize,
    to: PromptStage,
    label: &str,
) -> Result<StageOutcome> {
    let selected = scoring::select_top(standings(ctx, pool, on)?, n, tie_break(ctx))?;
    let ids: Vec<i64> = selected.iter().map(|s| s.prompt_id).collect();
    ctx.store.prompts().promote(ctx.run_id, &ids, to)?;

    tracing::info!(
        event = "prompts_selected",
        run_id = ctx.run_id,
        selection = label,
        ranked_on = %on,
        requested = n,
        selected = ids.len(),
        prompt_ids = ?ids,
        best_score = selected.first().map(|s| s.score)
    );
    Ok(StageOutcome::Completed {
        produced: ids.len(),
    })
}

/// Keeps the best K prompts by quick-suite score.
pub struct SelectTopK;

#[async_trait]
impl Stage for SelectTopK {
    fn name(&self) -> StageName {
        StageName::SelectTopK
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let pool = ctx.store.prompts().top_by_score(ctx.run_id, TestStage::Quick)?;
        promote(
            ctx,
            &pool,
            TestStage::Quick,
            ctx.config.selection.top_k,
            PromptStage::QuickFilter,
            "top_k",
        )
    }
}

/// Keeps the best M of the top-K prompts by rigorous-suite score.
pub struct SelectTopM;

#[async_trait]
impl Stage for SelectTopM {
    fn name(&self) -> StageName {
        StageName::SelectTopM
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let pool: Vec<Prompt> = ctx
            .store
            .prompts()
            .top_by_score(ctx.run_id, TestStage::Rigorous)?
            .into_iter()
            .filter(|p| matches!(p.stage, PromptStage::QuickFilter | PromptStage::Rigorous))
            .collect();
        promote(
            ctx,
            &pool,
            TestStage::Rigorous,
            ctx.config.selection.top_m,
            PromptStage::Rigorous,
            "top_m",
        )
    }
}
