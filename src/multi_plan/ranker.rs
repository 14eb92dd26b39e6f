//! Scoring of candidate plans after a trial period

use serde::Serialize;

use super::candidate::CandidatePlan;
use crate::stage::{PlanStageStats, StageType};

/// Scores within this distance of the best count as a tie
pub const TIE_EPSILON: f64 = 1e-10;

/// Added to the score of a candidate that reached EOF during the trial
pub const EOF_BONUS: f64 = 1.0;

/// Outcome of ranking the candidates of one trial.
#[derive(Debug, Clone, Serialize)]
pub struct RankingDecision {
    /// Candidate indexes, best first. Failed candidates are absent.
    pub candidate_order: Vec<usize>,
    /// Score of each entry of `candidate_order`
    pub scores: Vec<f64>,
    /// Trial statistics of each entry of `candidate_order`
    pub stats: Vec<PlanStageStats>,
    /// Whether the runner-up scored within [`TIE_EPSILON`] of the winner
    pub tie_for_best: bool,
}

impl RankingDecision {
    /// Index of the winning candidate
    pub fn winner(&self) -> Option<usize> {
        self.candidate_order.first().copied()
    }

    /// Positions in `candidate_order`, after the first, that tie with the
    /// winner
    pub fn tied_runners_up(&self) -> Vec<usize> {
        let best = match self.scores.first() {
            Some(best) => *best,
            None => return Vec::new(),
        };
        self.scores
            .iter()
            .enumerate()
            .skip(1)
            .take_while(|(_, score)| (best - **score).abs() < TIE_EPSILON)
            .map(|(pos, _)| pos)
            .collect()
    }
}

/// Orders candidates by how well they did during the trial.
pub trait PlanRanker {
    /// Ranks the non-failed candidates, or returns `None` if every
    /// candidate failed
    fn rank(&self, candidates: &[CandidatePlan]) -> Option<RankingDecision>;
}

/// Ranks by productivity: results per unit of work.
///
/// `score = 1 + advanced / works + tie-breakers`, plus [`EOF_BONUS`] for a
/// candidate that finished. Tie-breakers reward plans without a fetch and
/// without a blocking sort, each worth `min(1 / (10 * works), 1e-4)`, so
/// they can never outweigh a real productivity difference.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductivityRanker;

impl ProductivityRanker {
    const BASE_SCORE: f64 = 1.0;

    /// Score of one candidate's trial statistics, without the EOF bonus
    pub fn score(stats: &PlanStageStats) -> f64 {
        let works = stats.common.works;
        if works == 0 {
            return Self::BASE_SCORE;
        }
        let productivity = stats.common.advanced as f64 / works as f64;
        let epsilon = (1.0 / (10.0 * works as f64)).min(1e-4);

        let no_fetch_bonus = if stats.contains(StageType::Fetch) { 0.0 } else { epsilon };
        let no_sort_bonus = if stats.contains(StageType::Sort) { 0.0 } else { epsilon };

        Self::BASE_SCORE + productivity + no_fetch_bonus + no_sort_bonus
    }
}

impl PlanRanker for ProductivityRanker {
    fn rank(&self, candidates: &[CandidatePlan]) -> Option<RankingDecision> {
        let mut scored: Vec<(f64, usize, PlanStageStats)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, candidate)| !candidate.failed)
            .map(|(ix, candidate)| {
                let stats = candidate.stats();
                let mut score = Self::score(&stats);
                if stats.common.is_eof {
                    score += EOF_BONUS;
                }
                (score, ix, stats)
            })
            .collect();

        if scored.is_empty() {
            return None;
        }

        // Stable: equal scores keep candidate order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let tie_for_best = scored.len() > 1 && (scored[0].0 - scored[1].0).abs() < TIE_EPSILON;

        let mut decision = RankingDecision {
            candidate_order: Vec::with_capacity(scored.len()),
            scores: Vec::with_capacity(scored.len()),
            stats: Vec::with_capacity(scored.len()),
            tie_for_best,
        };
        for (score, ix, stats) in scored {
            decision.candidate_order.push(ix);
            decision.scores.push(score);
            decision.stats.push(stats);
        }
        Some(decision)
    }
}
