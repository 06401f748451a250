use crate::config::OptimizerConfig;
use crate::errors::Result;
use crate::model::{OptimizationResult, RunStatus, TaskSpec};
use crate::pipeline::{default_stages, run_stage, Stage, StageContext};
use crate::providers::guard::{CallPolicy, GuardedService};
use crate::providers::LanguageModelService;
use crate::refinement::TrackRegistry;
use crate::report::{self, ReportSink};
use crate::scoring::TieBreakPolicy;
use crate::storage::Store;
use std::sync::Arc;

/// Drives the stage pipeline for new and resumed runs.
pub struct Orchestrator {
    config: Arc<OptimizerConfig>,
    store: Store,
    service: GuardedService,
    sink: Arc<dyn ReportSink>,
    tracks: TrackRegistry,
    stages: Vec<Box<dyn Stage>>,
}

impl Orchestrator {
    /// Validates `config` before anything touches the store.
    pub fn new(
        config: OptimizerConfig,
        store: Store,
        service: Arc<dyn LanguageModelService>,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self> {
        config.validate()?;
        store.init_schema()?;
        let policy = CallPolicy::from_config(&config.service);
        Ok(Self {
            config: Arc::new(config),
            store,
            service: GuardedService::new(service, policy),
            sink,
            tracks: TrackRegistry::default(),
            stages: default_stages(),
        })
    }

    /// Cancellation handles for refinement tracks of the run in progress.
    pub fn track_controls(&self) -> TrackRegistry {
        self.tracks.clone()
    }

    fn tie_break(&self) -> TieBreakPolicy {
        TieBreakPolicy {
            baseline_wins_ties: self.config.selection.baseline_wins_ties,
        }
    }

    pub async fn optimize(&self) -> Result<OptimizationResult> {
        let task = self.config.task.clone();
        let run_id = self.store.runs().create(&task, &self.config)?;
        tracing::info!(
            event = "run_created",
            run_id,
            provider = self.service.provider_name(),
            has_baseline = task.baseline().is_some()
        );
        self.drive(run_id, task, false).await
    }

    /// Continues a stored run. Completed stages are skipped unless `force`.
    pub async fn resume(&self, run_id: i64, force: bool) -> Result<OptimizationResult> {
        let run = self.store.runs().get(run_id)?;
        self.store.runs().mark_running(run_id)?;
        tracing::info!(event = "run_resumed", run_id, force, previous_status = %run.status);
        self.drive(run_id, run.task, force).await
    }

    /// Reassembles the result of a stored run.
    pub fn result(&self, run_id: i64) -> Result<OptimizationResult> {
        report::assemble(&self.store, run_id, self.tie_break())
    }

    async fn drive(&self, run_id: i64, task: TaskSpec, force: bool) -> Result<OptimizationResult> {
        let ctx = StageContext {
            run_id,
            task: Arc::new(task),
            config: self.config.clone(),
            store: self.store.clone(),
            service: self.service.clone(),
            sink: self.sink.clone(),
            tracks: self.tracks.clone(),
            force,
        };

        for stage in &self.stages {
            if let Err(e) = run_stage(stage.as_ref(), &ctx, force).await {
                let msg = e.to_string();
                if let Err(mark_err) = self.store.runs().finalize(run_id, RunStatus::Failed, Some(&msg)) {
                    tracing::error!(event = "run_mark_failed", run_id, error = %mark_err);
                }
                tracing::error!(event = "run_failed", run_id, stage = %stage.name(), error = %msg);
                return Err(e);
            }
        }

        self.store.runs().finalize(run_id, RunStatus::Completed, None)?;
        let result = self.result(run_id)?;
        tracing::info!(
            event = "run_completed",
            run_id,
            champion_prompt_id = result.champion.id,
            champion_score = result.champion_score,
            elapsed_seconds = result.elapsed_seconds
        );
        Ok(result)
    }
}
