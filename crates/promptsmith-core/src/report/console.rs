use crate::model::{OptimizationResult, TrackStatus, Verdict};

pub fn print_summary(result: &OptimizationResult) {
    let c = &result.counts;
    eprintln!(
        "Run {}: prompts={} top_k={} top_m={} refined={} quick_tests={} rigorous_tests={} evaluations={}",
        result.run_id,
        c.initial_prompts,
        c.top_k,
        c.top_m,
        c.refined_prompts,
        c.quick_tests,
        c.rigorous_tests,
        c.evaluations
    );

    for t in &result.tracks {
        let score = t
            .final_score
            .map(|s| format!("{s:.2}"))
            .unwrap_or_else(|| "-".into());
        match t.status {
            TrackStatus::Failed => eprintln!(
                "FAILED [track {}]: {}",
                t.track_id,
                t.error.as_deref().unwrap_or("unknown error")
            ),
            _ => eprintln!(
                "TRACK [{}]: seed={} final={} score={} iterations={} reason={}",
                t.track_id,
                t.seed_prompt_id,
                t.final_prompt_id,
                score,
                t.steps.len().saturating_sub(1),
                t.reason.map(|r| r.as_str()).unwrap_or("running")
            ),
        }
    }

    eprintln!(
        "Champion: prompt {} score={:.2}",
        result.champion.id, result.champion_score
    );
    match (&result.baseline, result.verdict) {
        (Some(b), Verdict::Improved) => {
            eprintln!("Baseline: {:.2} -> improved by {:+.2}", b.score, b.delta)
        }
        (Some(b), _) => eprintln!("Baseline: {:.2} -> not improved ({:+.2})", b.score, b.delta),
        (None, _) => eprintln!("Baseline: none"),
    }
    if let Some(secs) = result.elapsed_seconds {
        eprintln!("Elapsed: {secs:.1}s");
    }
}
