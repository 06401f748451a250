use crate::errors::{OptimizeError, Result};
use crate::model::{PromptStage, TestStage};
use crate::pipeline::{Stage, StageContext, StageName, StageOutcome};
use async_trait::async_trait;
use std::sync::Arc;

/// Scores candidate prompts against one test suite.
///
/// Quick evaluation covers every generated prompt. Rigorous evaluation covers
/// the top-K survivors plus the baseline, so the baseline comparison in the
/// report uses the same evidence as the champion.
pub struct EvaluatePrompts {
    stage: TestStage,
}

impl EvaluatePrompts {
    pub fn new(stage: TestStage) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl Stage for EvaluatePrompts {
    fn name(&self) -> StageName {
        match self.stage {
            TestStage::Quick => StageName::EvaluateQuick,
            TestStage::Rigorous => StageName::EvaluateRigorous,
        }
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let candidates = ctx.store.prompts().candidates(ctx.run_id)?;
        let prompts: Vec<_> = match self.stage {
            TestStage::Quick => candidates,
            TestStage::Rigorous => candidates
                .into_iter()
                .filter(|p| p.is_baseline || p.stage != PromptStage::Initial)
                .collect(),
        };
        if prompts.is_empty() {
            return Err(OptimizeError::integrity(format!(
                "no prompts to evaluate at the {} stage",
                self.stage
            )));
        }

        let tests = ctx.store.test_cases().by_stage(ctx.run_id, self.stage)?;
        if tests.is_empty() {
            return Err(OptimizeError::integrity(format!(
                "no {} test cases stored for run {}",
                self.stage, ctx.run_id
            )));
        }

        let scored = ctx
            .evaluator()
            .score_all(
                prompts,
                Arc::new(tests),
                self.stage,
                ctx.config.service.max_concurrent_evaluations,
            )
            .await?;

        Ok(StageOutcome::Completed {
            produced: scored.len(),
        })
    }
}
