mod common;

use common::{config, ScriptedService};
use promptsmith_core::model::{ConvergenceReason, RunStatus, TrackStatus};
use promptsmith_core::report::NullSink;
use promptsmith_core::storage::Store;
use promptsmith_core::Orchestrator;
use std::sync::Arc;

#[tokio::test]
async fn track_stops_at_max_iterations() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let mut cfg = config(3, 2, 1);
    cfg.refinement.max_iterations = 2;
    let svc = Arc::new(ScriptedService::new(vec![2, 3, 4]));
    let orch = Orchestrator::new(cfg, store.clone(), svc, Arc::new(NullSink))?;

    let result = orch.optimize().await?;

    assert_eq!(result.tracks.len(), 1);
    let track = &result.tracks[0];
    assert_eq!(track.reason, Some(ConvergenceReason::MaxIterationsReached));
    let iterations: Vec<u32> = track.steps.iter().map(|s| s.iteration).collect();
    assert_eq!(iterations, vec![0, 1, 2]);
    assert!((track.improvement - 2.0).abs() < 1e-9);
    assert_eq!(Some(track.final_prompt_id), track.steps.last().map(|s| s.prompt_id));

    // one analysis per rewrite, each naming the prompt it was derived from
    let weaknesses = store.weaknesses().for_track(result.run_id, 0)?;
    assert_eq!(weaknesses.len(), 2);
    assert_eq!(store.weaknesses().count(result.run_id)?, 2);
    assert_eq!(weaknesses[0].prompt_id, track.steps[0].prompt_id);
    assert_eq!(weaknesses[0].failed_test_ids.len(), 4);
    assert!(weaknesses[0].description.starts_with("Found 4 weak test cases"));
    assert!(track.steps[0].weakness.is_none());
    assert!(track.steps[2].weakness.is_some());

    let lineage = store
        .prompts()
        .lineage(result.run_id, track.final_prompt_id)?;
    assert_eq!(lineage.len(), 3);
    assert_eq!(lineage[0].id, track.seed_prompt_id);
    Ok(())
}

#[tokio::test]
async fn track_converges_when_rewrites_stop_helping() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let mut svc = ScriptedService::new(vec![2, 3, 4]);
    svc.fix_gain = 0;
    let orch = Orchestrator::new(config(3, 2, 1), store.clone(), Arc::new(svc), Arc::new(NullSink))?;

    let result = orch.optimize().await?;

    let track = &result.tracks[0];
    assert_eq!(track.status, TrackStatus::Converged);
    assert_eq!(track.reason, Some(ConvergenceReason::Converged));
    assert_eq!(track.steps.len(), 2);
    // equal scores keep the earlier prompt
    assert_eq!(track.final_prompt_id, track.seed_prompt_id);
    assert!(track.improvement.abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn failing_track_does_not_sink_the_run() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let mut svc = ScriptedService::new(vec![2, 3, 4]);
    svc.fail_rewrite_containing = Some("candidate-2".into());
    let orch = Orchestrator::new(config(3, 2, 2), store.clone(), Arc::new(svc), Arc::new(NullSink))?;

    let result = orch.optimize().await?;

    assert_eq!(result.tracks.len(), 2);
    let failed = &result.tracks[0];
    assert_eq!(failed.status, TrackStatus::Failed);
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|e| e.contains("refiner unavailable")));
    let healthy = &result.tracks[1];
    assert_eq!(healthy.status, TrackStatus::Converged);

    // failed track's seed still competes, its refinements do not
    assert_eq!(result.champion.id, healthy.final_prompt_id);
    assert_eq!(store.runs().get(result.run_id)?.status, RunStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn cancelled_track_fails_alone() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let svc = Arc::new(ScriptedService::new(vec![2, 3, 4]));
    let orch = Orchestrator::new(config(3, 2, 2), store.clone(), svc, Arc::new(NullSink))?;
    orch.track_controls().cancel(0);

    let result = orch.optimize().await?;

    let cancelled = &result.tracks[0];
    assert_eq!(cancelled.status, TrackStatus::Failed);
    assert!(cancelled
        .error
        .as_deref()
        .is_some_and(|e| e.contains("cancelled")));
    assert_eq!(cancelled.steps.len(), 1);
    assert_eq!(result.tracks[1].status, TrackStatus::Converged);
    assert!(orch.track_controls().active().is_empty());
    Ok(())
}

#[tokio::test]
async fn forced_resume_retries_failed_tracks() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let mut flaky = ScriptedService::new(vec![2, 3, 4]);
    flaky.fail_rewrite_containing = Some("candidate-2".into());
    let first = Orchestrator::new(config(3, 2, 1), store.clone(), Arc::new(flaky), Arc::new(NullSink))?
        .optimize()
        .await?;
    assert_eq!(first.tracks[0].status, TrackStatus::Failed);

    let healthy = Arc::new(ScriptedService::new(vec![2, 3, 4]));
    let orch = Orchestrator::new(config(3, 2, 1), store.clone(), healthy, Arc::new(NullSink))?;

    let unforced = orch.resume(first.run_id, false).await?;
    assert_eq!(unforced.tracks[0].status, TrackStatus::Failed);

    let forced = orch.resume(first.run_id, true).await?;
    let track = &forced.tracks[0];
    assert_eq!(track.status, TrackStatus::Converged);
    assert!(track.error.is_none());
    assert!(track.steps.len() > 1);
    assert_eq!(forced.champion.id, track.final_prompt_id);
    Ok(())
}
