//! Pure scoring and selection helpers. Nothing here touches the store.

use crate::config::ScoringWeights;
use crate::errors::{OptimizeError, Result};
use crate::model::SubScores;
use std::cmp::Ordering;

pub const SCORE_EPSILON: f64 = 1e-9;

/// Weighted overall score on the 0–10 scale.
///
/// Weights are normalized by their sum so a configuration that does not add
/// up to one still yields a score on the judge's scale.
pub fn overall(weights: &ScoringWeights, s: &SubScores) -> f64 {
    let total = weights.functionality + weights.safety + weights.consistency + weights.edge_case_handling;
    if total <= 0.0 {
        return 0.0;
    }
    let sum = weights.functionality * f64::from(s.functionality)
        + weights.safety * f64::from(s.safety)
        + weights.consistency * f64::from(s.consistency)
        + weights.edge_case_handling * f64::from(s.edge_case_handling);
    sum / total
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Relative change from `prev` to `score`; the absolute difference when `prev` is zero.
pub fn relative_improvement(prev: f64, score: f64) -> f64 {
    if prev.abs() < SCORE_EPSILON {
        score - prev
    } else {
        (score - prev) / prev
    }
}

/// A prompt's position in a ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub prompt_id: i64,
    pub score: f64,
    /// Mean consistency sub-score across the evaluations behind `score`.
    pub consistency: f64,
    pub iteration: u32,
    pub is_baseline: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TieBreakPolicy {
    pub baseline_wins_ties: bool,
}

impl Default for TieBreakPolicy {
    fn default() -> Self {
        Self {
            baseline_wins_ties: true,
        }
    }
}

fn cmp_desc(a: f64, b: f64) -> Ordering {
    if (a - b).abs() < SCORE_EPSILON {
        Ordering::Equal
    } else {
        b.partial_cmp(&a).unwrap_or(Ordering::Equal)
    }
}

pub fn compare(a: &Standing, b: &Standing, policy: TieBreakPolicy) -> Ordering {
    cmp_desc(a.score, b.score)
        .then_with(|| cmp_desc(a.consistency, b.consistency))
        .then_with(|| a.iteration.cmp(&b.iteration))
        .then_with(|| {
            if policy.baseline_wins_ties {
                b.is_baseline.cmp(&a.is_baseline)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a.prompt_id.cmp(&b.prompt_id))
}

/// Total, deterministic order: best first.
pub fn rank(mut standings: Vec<Standing>, policy: TieBreakPolicy) -> Vec<Standing> {
    standings.sort_by(|a, b| compare(a, b, policy));
    standings
}

/// The best `n` standings, or all of them when fewer exist.
pub fn select_top(
    standings: Vec<Standing>,
    n: usize,
    policy: TieBreakPolicy,
) -> Result<Vec<Standing>> {
    if standings.is_empty() {
        return Err(OptimizeError::integrity(
            "cannot select from an empty set of scored prompts",
        ));
    }
    let mut ranked = rank(standings, policy);
    ranked.truncate(n);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn st(id: i64, score: f64) -> Standing {
        Standing {
            prompt_id: id,
            score,
            consistency: 5.0,
            iteration: 0,
            is_baseline: false,
        }
    }

    #[test]
    fn overall_uses_default_weights() {
        let s = SubScores {
            functionality: 10,
            safety: 5,
            consistency: 0,
            edge_case_handling: 10,
        };
        let v = overall(&ScoringWeights::default(), &s);
        assert!((v - 6.5).abs() < 1e-9, "{v}");
    }

    #[test]
    fn select_top_is_a_prefix_of_the_ranking() {
        let all: Vec<_> = [4.0, 9.0, 1.5, 7.0, 9.0, 3.0]
            .iter()
            .enumerate()
            .map(|(i, s)| st(i as i64 + 1, *s))
            .collect();
        let top = select_top(all.clone(), 3, TieBreakPolicy::default()).unwrap();
        let ids: Vec<_> = top.iter().map(|s| s.prompt_id).collect();
        assert_eq!(ids, vec![2, 5, 4]);

        let worst_selected = top.last().unwrap().score;
        for s in &all {
            if !ids.contains(&s.prompt_id) {
                assert!(s.score <= worst_selected);
            }
        }
    }

    #[test]
    fn fewer_than_n_returns_all_and_empty_is_integrity_error() {
        let top = select_top(vec![st(1, 2.0)], 5, TieBreakPolicy::default()).unwrap();
        assert_eq!(top.len(), 1);

        let err = select_top(vec![], 5, TieBreakPolicy::default()).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn ties_break_on_consistency_then_iteration_then_baseline() {
        let mut a = st(1, 8.0);
        let mut b = st(2, 8.0);
        b.consistency = 6.0;
        let r = rank(vec![a.clone(), b.clone()], TieBreakPolicy::default());
        assert_eq!(r[0].prompt_id, 2);

        b.consistency = 5.0;
        a.iteration = 2;
        let r = rank(vec![a.clone(), b.clone()], TieBreakPolicy::default());
        assert_eq!(r[0].prompt_id, 2);

        a.iteration = 0;
        let mut base = st(9, 8.0);
        base.is_baseline = true;
        let r = rank(vec![a.clone(), base.clone()], TieBreakPolicy::default());
        assert_eq!(r[0].prompt_id, 9);

        let r = rank(
            vec![a, base],
            TieBreakPolicy {
                baseline_wins_ties: false,
            },
        );
        assert_eq!(r[0].prompt_id, 1);
    }

    #[test]
    fn relative_improvement_handles_zero_previous() {
        assert!((relative_improvement(5.0, 5.05) - 0.01).abs() < 1e-9);
        assert!((relative_improvement(0.0, 0.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn mean_of_nothing_is_none() {
        assert_eq!(mean(Vec::<f64>::new()), None);
        assert_eq!(mean(vec![2.0, 4.0]), Some(3.0));
    }
}
