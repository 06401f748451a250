//! Ordered optimization stages and the completion-marker protocol around them.

use crate::config::OptimizerConfig;
use crate::engine::evaluation::Evaluator;
use crate::errors::Result;
use crate::model::{StageStatus, TaskSpec};
use crate::providers::guard::GuardedService;
use crate::refinement::TrackRegistry;
use crate::report::ReportSink;
use crate::storage::Store;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

pub mod stages;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    GeneratePrompts,
    GenerateQuickTests,
    EvaluateQuick,
    SelectTopK,
    GenerateRigorousTests,
    EvaluateRigorous,
    SelectTopM,
    Refine,
    BuildReport,
    PersistReport,
}

impl StageName {
    pub const ALL: [StageName; 10] = [
        StageName::GeneratePrompts,
        StageName::GenerateQuickTests,
        StageName::EvaluateQuick,
        StageName::SelectTopK,
        StageName::GenerateRigorousTests,
        StageName::EvaluateRigorous,
        StageName::SelectTopM,
        StageName::Refine,
        StageName::BuildReport,
        StageName::PersistReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::GeneratePrompts => "generate_prompts",
            StageName::GenerateQuickTests => "generate_quick_tests",
            StageName::EvaluateQuick => "evaluate_quick",
            StageName::SelectTopK => "select_top_k",
            StageName::GenerateRigorousTests => "generate_rigorous_tests",
            StageName::EvaluateRigorous => "evaluate_rigorous",
            StageName::SelectTopM => "select_top_m",
            StageName::Refine => "refine",
            StageName::BuildReport => "build_report",
            StageName::PersistReport => "persist_report",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Ran; `produced` counts rows written or prompts affected.
    Completed { produced: usize },
    /// Marker already said completed.
    Skipped,
}

/// Everything a stage may touch, threaded explicitly.
#[derive(Clone)]
pub struct StageContext {
    pub run_id: i64,
    pub task: Arc<TaskSpec>,
    pub config: Arc<OptimizerConfig>,
    pub store: Store,
    pub service: GuardedService,
    pub sink: Arc<dyn ReportSink>,
    pub tracks: TrackRegistry,
    /// Forwarded by a forced resume so terminal track markers are re-run too.
    pub force: bool,
}

impl StageContext {
    pub fn evaluator(&self) -> Evaluator {
        Evaluator {
            run_id: self.run_id,
            store: self.store.clone(),
            service: self.service.clone(),
            task: self.task.clone(),
            weights: self.config.scoring,
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome>;
}

/// Runs one stage under the marker protocol: a completed marker short-circuits
/// unless `force`; otherwise the marker goes `running` then `completed` or
/// `failed`, and the stage's own error is returned unchanged.
pub async fn run_stage(stage: &dyn Stage, ctx: &StageContext, force: bool) -> Result<StageOutcome> {
    let name = stage.name();
    let markers = ctx.store.stage_results();

    if !force {
        if let Some(marker) = markers.get(ctx.run_id, name.as_str())? {
            if marker.status == StageStatus::Completed {
                tracing::info!(event = "stage_skipped", run_id = ctx.run_id, stage = %name);
                return Ok(StageOutcome::Skipped);
            }
        }
    }

    markers.put(ctx.run_id, name.as_str(), StageStatus::Running, None)?;
    tracing::info!(event = "stage_start", run_id = ctx.run_id, stage = %name);
    let started = Instant::now();

    match stage.execute(ctx).await {
        Ok(outcome) => {
            markers.put(ctx.run_id, name.as_str(), StageStatus::Completed, None)?;
            let produced = match outcome {
                StageOutcome::Completed { produced } => produced,
                StageOutcome::Skipped => 0,
            };
            tracing::info!(
                event = "stage_completed",
                run_id = ctx.run_id,
                stage = %name,
                produced,
                duration_ms = started.elapsed().as_millis() as u64
            );
            Ok(outcome)
        }
        Err(e) => {
            let msg = e.to_string();
            if let Err(marker_err) =
                markers.put(ctx.run_id, name.as_str(), StageStatus::Failed, Some(&msg))
            {
                tracing::error!(event = "stage_marker_write_failed", run_id = ctx.run_id, stage = %name, error = %marker_err);
            }
            tracing::error!(event = "stage_failed", run_id = ctx.run_id, stage = %name, error = %msg);
            Err(e)
        }
    }
}

/// The ten stages in execution order.
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    use crate::model::TestStage;
    use stages::*;

    vec![
        Box::new(GeneratePrompts),
        Box::new(GenerateTests::new(TestStage::Quick)),
        Box::new(EvaluatePrompts::new(TestStage::Quick)),
        Box::new(SelectTopK),
        Box::new(GenerateTests::new(TestStage::Rigorous)),
        Box::new(EvaluatePrompts::new(TestStage::Rigorous)),
        Box::new(SelectTopM),
        Box::new(Refine),
        Box::new(BuildReport),
        Box::new(PersistReport),
    ]
}
