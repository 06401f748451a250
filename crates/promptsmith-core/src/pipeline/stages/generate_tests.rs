use crate::errors::{OptimizeError, Result};
use crate::model::TestStage;
use crate::pipeline::{Stage, StageContext, StageName, StageOutcome};
use async_trait::async_trait;

/// Generates the quick or rigorous test suite for the run.
pub struct GenerateTests {
    stage: TestStage,
}

impl GenerateTests {
    pub fn new(stage: TestStage) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl Stage for GenerateTests {
    fn name(&self) -> StageName {
        match self.stage {
            TestStage::Quick => StageName::GenerateQuickTests,
            TestStage::Rigorous => StageName::GenerateRigorousTests,
        }
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let repo = ctx.store.test_cases();
        if repo.count(ctx.run_id, self.stage)? > 0 {
            return Ok(StageOutcome::Completed { produced: 0 });
        }

        let distribution = match self.stage {
            TestStage::Quick => &ctx.config.tests.quick,
            TestStage::Rigorous => &ctx.config.tests.rigorous,
        };
        let mut tests = ctx
            .service
            .generate_test_cases(&ctx.task, self.stage, distribution)
            .await?;
        tests.retain(|t| !t.input.trim().is_empty());

        if tests.is_empty() {
            return Err(OptimizeError::integrity(format!(
                "test generation produced no {} test cases",
                self.stage
            )));
        }
        if tests.len() != distribution.total() {
            tracing::warn!(
                event = "test_count_mismatch",
                run_id = ctx.run_id,
                stage = %self.stage,
                requested = distribution.total(),
                received = tests.len()
            );
        }

        let inserted = repo.insert_many(ctx.run_id, self.stage, &tests)?;
        Ok(StageOutcome::Completed {
            produced: inserted.len(),
        })
    }
}
