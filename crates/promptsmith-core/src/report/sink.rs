use crate::model::OptimizationResult;
use anyhow::Context;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Destination for a finished run's artifacts.
pub trait ReportSink: Send + Sync {
    /// Returns the paths written, if any.
    fn persist(&self, result: &OptimizationResult) -> anyhow::Result<Vec<PathBuf>>;
}

/// Discards results. Used when no output directory is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn persist(&self, _result: &OptimizationResult) -> anyhow::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

/// Writes JSON and text artifacts under `<root>/run-NNNN/`.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    root: PathBuf,
}

impl JsonDirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: i64) -> PathBuf {
        self.root.join(format!("run-{run_id:04}"))
    }
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

impl ReportSink for JsonDirSink {
    fn persist(&self, result: &OptimizationResult) -> anyhow::Result<Vec<PathBuf>> {
        let dir = self.run_dir(result.run_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create report dir {}", dir.display()))?;

        let champion_path = dir.join("champion_prompt.txt");
        std::fs::write(&champion_path, &result.champion.text)
            .with_context(|| format!("failed to write {}", champion_path.display()))?;

        let report_path = dir.join("optimization_report.json");
        write_json(&report_path, result)?;

        let history: Vec<_> = result
            .tracks
            .iter()
            .map(|t| {
                json!({
                    "track_id": t.track_id,
                    "seed_prompt_id": t.seed_prompt_id,
                    "status": t.status,
                    "reason": t.reason,
                    "error": t.error,
                    "weaknesses": t.steps.iter().filter_map(|s| s.weakness.as_ref()).collect::<Vec<_>>(),
                })
            })
            .collect();
        let history_path = dir.join("weakness_history.json");
        write_json(&history_path, &history)?;

        let qa_path = dir.join("champion_qa.json");
        write_json(
            &qa_path,
            &json!({
                "prompt_id": result.champion.id,
                "score": result.champion_score,
                "categories": result.champion_evaluations,
            }),
        )?;

        let mut written = vec![champion_path, report_path, history_path, qa_path];
        if let Some(baseline) = &result.baseline {
            let baseline_path = dir.join("baseline_qa.json");
            write_json(
                &baseline_path,
                &json!({
                    "prompt_id": baseline.prompt.id,
                    "score": baseline.score,
                    "delta": baseline.delta,
                    "categories": baseline.evaluations,
                }),
            )?;
            written.push(baseline_path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BaselineComparison, Prompt, PromptStage, RunCounts, Verdict};

    fn result() -> OptimizationResult {
        OptimizationResult {
            run_id: 7,
            champion: Prompt {
                id: 3,
                run_id: 7,
                text: "You are precise.".into(),
                stage: PromptStage::Rigorous,
                strategy: Some("persona".into()),
                quick_score: Some(8.0),
                rigorous_score: Some(7.5),
                average_score: Some(7.75),
                iteration: 0,
                track_id: None,
                parent_prompt_id: None,
                is_baseline: false,
                created_at: "2026-01-01T00:00:00Z".into(),
            },
            champion_score: 7.75,
            baseline: None,
            verdict: Verdict::NoBaseline,
            tracks: vec![],
            champion_evaluations: vec![],
            counts: RunCounts::default(),
            elapsed_seconds: Some(1.5),
        }
    }

    #[test]
    fn writes_all_artifacts_under_run_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = JsonDirSink::new(dir.path());
        let written = sink.persist(&result())?;
        assert_eq!(written.len(), 4);

        let run_dir = dir.path().join("run-0007");
        assert_eq!(
            std::fs::read_to_string(run_dir.join("champion_prompt.txt"))?,
            "You are precise."
        );
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("optimization_report.json"))?)?;
        assert_eq!(report["verdict"], "no_baseline");
        assert_eq!(report["champion"]["id"], 3);
        assert!(!run_dir.join("baseline_qa.json").exists());
        Ok(())
    }

    #[test]
    fn baseline_answers_get_their_own_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut result = result();
        let mut baseline = result.champion.clone();
        baseline.id = 1;
        baseline.is_baseline = true;
        result.baseline = Some(BaselineComparison {
            prompt: baseline,
            score: 6.0,
            delta: 1.75,
            evaluations: vec![],
        });
        result.verdict = Verdict::Improved;

        let written = JsonDirSink::new(dir.path()).persist(&result)?;
        assert_eq!(written.len(), 5);
        let qa: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(
            dir.path().join("run-0007").join("baseline_qa.json"),
        )?)?;
        assert_eq!(qa["prompt_id"], 1);
        assert_eq!(qa["delta"], 1.75);
        assert!(qa["categories"].as_array().is_some_and(|c| c.is_empty()));
        Ok(())
    }
}
