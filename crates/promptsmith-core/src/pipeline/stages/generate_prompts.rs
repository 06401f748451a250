use crate::errors::{OptimizeError, Result};
use crate::fingerprint::{dedupe_by_fingerprint, prompt_fingerprint};
use crate::model::{NewPrompt, PromptVariant};
use crate::pipeline::{Stage, StageContext, StageName, StageOutcome};
use async_trait::async_trait;
use std::collections::HashSet;

/// Seeds the run with the baseline (when given) and generated candidates.
pub struct GeneratePrompts;

#[async_trait]
impl Stage for GeneratePrompts {
    fn name(&self) -> StageName {
        StageName::GeneratePrompts
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let prompts = ctx.store.prompts();
        if !prompts.candidates(ctx.run_id)?.is_empty() {
            return Ok(StageOutcome::Completed { produced: 0 });
        }

        let wanted = ctx.config.selection.num_initial_prompts;
        let baseline = ctx.task.baseline();
        let variants = ctx
            .service
            .generate_prompt_variants(&ctx.task, wanted, baseline.is_some())
            .await?;

        let mut seen = HashSet::new();
        if let Some(b) = baseline {
            seen.insert(prompt_fingerprint(b));
        }
        let mut variants =
            dedupe_by_fingerprint(variants, |v: &PromptVariant| v.text.as_str(), &mut seen);
        variants.retain(|v| !v.text.trim().is_empty());
        variants.truncate(wanted);

        if variants.len() < wanted {
            tracing::warn!(
                event = "prompt_variants_short",
                run_id = ctx.run_id,
                requested = wanted,
                received = variants.len(),
                "service returned fewer distinct prompt variants than requested"
            );
        }

        let mut rows: Vec<NewPrompt> = Vec::with_capacity(variants.len() + 1);
        if let Some(b) = baseline {
            rows.push(NewPrompt::baseline(b));
        }
        rows.extend(
            variants
                .into_iter()
                .map(|v| NewPrompt::initial(v.text.trim(), v.strategy)),
        );
        if rows.is_empty() {
            return Err(OptimizeError::integrity(
                "prompt generation produced no usable candidates",
            ));
        }

        let inserted = prompts.insert_many(ctx.run_id, &rows)?;
        Ok(StageOutcome::Completed {
            produced: inserted.len(),
        })
    }
}
