use crate::errors::Result;
use crate::pipeline::{Stage, StageContext, StageName, StageOutcome};
use crate::refinement;
use async_trait::async_trait;

pub struct Refine;

#[async_trait]
impl Stage for Refine {
    fn name(&self) -> StageName {
        StageName::Refine
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let produced = refinement::run_tracks(ctx).await?;
        Ok(StageOutcome::Completed { produced })
    }
}
