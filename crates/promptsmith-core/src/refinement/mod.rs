//! Parallel refinement tracks seeded by the top-M prompts.

use crate::engine::evaluation::standing_for;
use crate::errors::{OptimizeError, Result};
use crate::model::{PromptStage, RefinementTrackResult, TestStage, TrackStatus, TrackStep};
use crate::pipeline::StageContext;
use crate::providers::guard::{cancel_pair, CancelHandle, CancelToken};
use crate::scoring::{self, SCORE_EPSILON};
use crate::storage::Store;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;

mod track;

pub use track::TrackRunner;

/// Per-track cancellation handles, shared with callers of the orchestrator.
///
/// Cancelling a track that has not started yet makes it fail on its first
/// external call once it does.
#[derive(Clone, Default)]
pub struct TrackRegistry {
    handles: Arc<Mutex<HashMap<i64, CancelHandle>>>,
}

impl TrackRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<i64, CancelHandle>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, track_id: i64) -> CancelToken {
        let mut handles = self.lock();
        handles
            .entry(track_id)
            .or_insert_with(|| cancel_pair().0)
            .token()
    }

    pub fn cancel(&self, track_id: i64) {
        let mut handles = self.lock();
        handles
            .entry(track_id)
            .or_insert_with(|| cancel_pair().0)
            .cancel();
    }

    pub fn cancel_all(&self) {
        for handle in self.lock().values() {
            handle.cancel();
        }
    }

    /// Track ids with a live handle, ascending.
    pub fn active(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn release(&self, track_id: i64) {
        self.lock().remove(&track_id);
    }
}

/// Runs one track per top-M seed, `max_parallel_tracks` at a time.
///
/// Tracks with a terminal marker are skipped, except failed ones when `force`
/// is set. A track failing on an external call is recorded and the others go
/// on; any other error fails the stage once every track has finished.
pub async fn run_tracks(ctx: &StageContext) -> Result<usize> {
    let run_id = ctx.run_id;
    let seeds = ctx.store.prompts().by_stage(run_id, PromptStage::Rigorous)?;
    if seeds.is_empty() {
        return Err(OptimizeError::integrity(
            "no top-M prompts to seed refinement tracks",
        ));
    }
    let standings = seeds
        .iter()
        .map(|p| standing_for(&ctx.store, run_id, p, Some(TestStage::Rigorous)))
        .collect::<Result<Vec<_>>>()?;
    let ranked = scoring::rank(
        standings,
        scoring::TieBreakPolicy {
            baseline_wins_ties: ctx.config.selection.baseline_wins_ties,
        },
    );
    let by_id: HashMap<i64, _> = seeds.into_iter().map(|p| (p.id, p)).collect();

    let tests = Arc::new(ctx.store.test_cases().by_stage(run_id, TestStage::Rigorous)?);
    let sem = Arc::new(Semaphore::new(ctx.config.refinement.max_parallel_tracks.max(1)));
    let mut handles = Vec::new();

    for (rank, standing) in ranked.iter().enumerate() {
        let track_id = rank as i64;
        let seed = by_id.get(&standing.prompt_id).cloned().ok_or_else(|| {
            OptimizeError::integrity(format!("seed prompt {} vanished", standing.prompt_id))
        })?;

        if let Some(outcome) = ctx.store.tracks().get(run_id, track_id)? {
            match outcome.status {
                TrackStatus::Converged => continue,
                TrackStatus::Failed if !ctx.force => continue,
                TrackStatus::Failed => ctx.store.tracks().reopen(run_id, track_id)?,
                TrackStatus::Running => {}
            }
        }
        ctx.store.tracks().start(run_id, track_id, seed.id)?;

        let permit = sem.clone().acquire_owned().await?;
        let token = ctx.tracks.register(track_id);
        let mut track_ctx = ctx.clone();
        track_ctx.service = ctx.service.with_cancel(token);
        let runner = TrackRunner {
            ctx: track_ctx,
            track_id,
            seed,
            tests: tests.clone(),
        };
        let registry = ctx.tracks.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            tracing::info!(event = "track_start", run_id, track_id, seed_prompt_id = runner.seed.id);
            let outcome = runner.run().await;
            registry.release(track_id);
            let tracks = runner.ctx.store.tracks();
            match outcome {
                Ok(reason) => {
                    tracks.finish(run_id, track_id, TrackStatus::Converged, Some(reason), None)?;
                    tracing::info!(event = "track_converged", run_id, track_id, reason = %reason);
                    Ok::<(), OptimizeError>(())
                }
                Err(OptimizeError::Service(e)) => {
                    let msg = e.to_string();
                    tracks.finish(run_id, track_id, TrackStatus::Failed, None, Some(&msg))?;
                    tracing::warn!(event = "track_failed", run_id, track_id, error = %msg);
                    Ok(())
                }
                Err(e) => {
                    let msg = e.to_string();
                    tracks.finish(run_id, track_id, TrackStatus::Failed, None, Some(&msg))?;
                    tracing::error!(event = "track_failed", run_id, track_id, error = %msg);
                    Err(e)
                }
            }
        }));
    }

    let launched = handles.len();
    let mut first_err = None;
    for h in handles {
        if let Err(e) = h.await? {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(launched),
    }
}

/// Rebuilds every track's history from prompts, weakness records and markers.
pub fn track_results(store: &Store, run_id: i64) -> Result<Vec<RefinementTrackResult>> {
    let prompts = store.prompts();
    let mut results = Vec::new();

    for outcome in store.tracks().list(run_id)? {
        let seed = prompts.get(run_id, outcome.seed_prompt_id)?;
        let latest = prompts
            .latest_in_track(run_id, outcome.track_id)?
            .unwrap_or_else(|| seed.clone());
        let lineage = prompts.lineage(run_id, latest.id)?;
        if lineage.first().map(|p| p.id) != Some(seed.id) {
            return Err(OptimizeError::integrity(format!(
                "track {} lineage does not start at seed {}",
                outcome.track_id, seed.id
            )));
        }

        let mut weaknesses: HashMap<u32, _> = store
            .weaknesses()
            .for_track(run_id, outcome.track_id)?
            .into_iter()
            .map(|w| (w.iteration, w))
            .collect();

        let steps: Vec<TrackStep> = lineage
            .iter()
            .map(|p| TrackStep {
                prompt_id: p.id,
                iteration: p.iteration,
                score: p.rigorous_score,
                weakness: weaknesses.remove(&p.iteration),
            })
            .collect();

        let mut best: Option<&TrackStep> = None;
        for step in &steps {
            let Some(score) = step.score else { continue };
            match best.and_then(|b| b.score) {
                Some(b) if score <= b + SCORE_EPSILON => {}
                _ => best = Some(step),
            }
        }
        let (final_prompt_id, final_score) = best
            .map(|s| (s.prompt_id, s.score))
            .unwrap_or((seed.id, seed.rigorous_score));

        let improvement = match (final_score, seed.rigorous_score) {
            (Some(f), Some(s)) => f - s,
            _ => 0.0,
        };

        results.push(RefinementTrackResult {
            track_id: outcome.track_id,
            seed_prompt_id: seed.id,
            steps,
            final_prompt_id,
            final_score,
            status: outcome.status,
            reason: outcome.reason,
            error: outcome.error,
            improvement,
        });
    }
    Ok(results)
}
