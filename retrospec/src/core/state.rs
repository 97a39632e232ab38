//! Search state threaded through each iteration.
//!
//! The controller never keeps ambient mutable state: the running best, the
//! no-improvement streak, the prompt history and the carried feedback all live
//! in [`SearchState`], which is updated by pure transitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Consecutive non-improving iterations that end the search.
pub const NO_IMPROVEMENT_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    #[serde(rename = "threshold reached")]
    ThresholdReached,
    #[serde(rename = "no improvement for 3 iterations")]
    NoImprovementExhausted,
    #[serde(rename = "max-iters reached")]
    MaxItersReached,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThresholdReached => "threshold reached",
            Self::NoImprovementExhausted => "no improvement for 3 iterations",
            Self::MaxItersReached => "max-iters reached",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    Iterating(u32),
    Done(StopReason),
}

/// The globally best attempt so far.
#[derive(Debug, Clone, PartialEq)]
pub struct BestResult {
    pub iteration: u32,
    pub prompt: String,
    pub patch: String,
    pub tech: f64,
    pub realism: f64,
    pub final_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    pub phase: SearchPhase,
    pub best: Option<BestResult>,
    pub no_improvement: u32,
    /// Every validated prompt seen so far, append-only.
    pub prompt_history: Vec<String>,
    pub feedback_text: String,
    pub previous_prompt: Option<String>,
    pub previous_outcome: Option<String>,
}

impl SearchState {
    pub fn new(initial_feedback: impl Into<String>) -> Self {
        Self {
            phase: SearchPhase::Idle,
            best: None,
            no_improvement: 0,
            prompt_history: Vec::new(),
            feedback_text: initial_feedback.into(),
            previous_prompt: None,
            previous_outcome: None,
        }
    }

    pub fn begin_iteration(&mut self, iteration: u32) {
        self.phase = SearchPhase::Iterating(iteration);
    }

    pub fn extend_history<I, S>(&mut self, prompts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prompt_history.extend(prompts.into_iter().map(Into::into));
    }

    /// Offer the iteration's best attempt. Only a strictly greater final score
    /// replaces the running best; returns whether it did.
    pub fn record_iteration_best(&mut self, candidate: BestResult) -> bool {
        let improved = self
            .best
            .as_ref()
            .is_none_or(|best| candidate.final_score > best.final_score);
        if improved {
            self.best = Some(candidate);
            self.no_improvement = 0;
        } else {
            self.no_improvement += 1;
        }
        improved
    }

    /// Stop check after an iteration, in priority order: threshold,
    /// no-improvement streak, iteration cap.
    pub fn evaluate_stop(
        &mut self,
        iteration_final: f64,
        iteration: u32,
        threshold: f64,
        max_iters: u32,
    ) -> Option<StopReason> {
        let reason = if iteration_final >= threshold {
            Some(StopReason::ThresholdReached)
        } else if self.no_improvement >= NO_IMPROVEMENT_LIMIT {
            Some(StopReason::NoImprovementExhausted)
        } else if iteration >= max_iters {
            Some(StopReason::MaxItersReached)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.phase = SearchPhase::Done(reason);
        }
        reason
    }
}

/// Index of the highest score; the first one wins ties.
pub fn select_best_attempt(scores: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, score) in scores.iter().enumerate() {
        match best {
            Some(current) if *score <= scores[current] => {}
            _ => best = Some(idx),
        }
    }
    best
}

/// `alpha * tech + (1 - alpha) * realism`.
pub fn final_score(alpha: f64, tech: f64, realism: f64) -> f64 {
    alpha * tech + (1.0 - alpha) * realism
}

#[cfg(test)]
mod tests {
    use super::*;

    fn best(iteration: u32, final_score: f64) -> BestResult {
        BestResult {
            iteration,
            prompt: format!("prompt {iteration}"),
            patch: String::new(),
            tech: final_score,
            realism: final_score,
            final_score,
        }
    }

    /// Drive the state as the controller would and return the stop iteration.
    fn simulate(scores: &[f64], threshold: f64, max_iters: u32) -> (SearchState, u32, StopReason) {
        let mut state = SearchState::new("");
        for (idx, score) in scores.iter().enumerate() {
            let iteration = idx as u32 + 1;
            state.begin_iteration(iteration);
            state.record_iteration_best(best(iteration, *score));
            if let Some(reason) = state.evaluate_stop(*score, iteration, threshold, max_iters) {
                return (state, iteration, reason);
            }
        }
        panic!("search did not stop");
    }

    #[test]
    fn best_is_never_downgraded_and_ties_keep_earliest() {
        let (state, stopped_at, reason) = simulate(&[0.3, 0.3, 0.6, 0.5, 0.6], 0.95, 5);
        assert_eq!(stopped_at, 5);
        assert_eq!(reason, StopReason::MaxItersReached);
        let best = state.best.expect("best");
        assert_eq!(best.final_score, 0.6);
        assert_eq!(best.iteration, 3);
        assert_eq!(state.phase, SearchPhase::Done(StopReason::MaxItersReached));
    }

    #[test]
    fn threshold_is_inclusive() {
        let (state, stopped_at, reason) = simulate(&[0.3, 0.3, 0.6, 0.5], 0.6, 10);
        assert_eq!(stopped_at, 3);
        assert_eq!(reason, StopReason::ThresholdReached);
        assert_eq!(reason.to_string(), "threshold reached");
        assert_eq!(state.best.map(|b| b.iteration), Some(3));
    }

    #[test]
    fn three_stale_iterations_stop_the_search() {
        let (state, stopped_at, reason) = simulate(&[0.5, 0.4, 0.5, 0.2, 0.9], 0.95, 50);
        assert_eq!(stopped_at, 4);
        assert_eq!(reason, StopReason::NoImprovementExhausted);
        assert_eq!(state.no_improvement, 3);
    }

    #[test]
    fn improvement_resets_streak() {
        let mut state = SearchState::new("");
        assert!(state.record_iteration_best(best(1, 0.2)));
        assert!(!state.record_iteration_best(best(2, 0.1)));
        assert_eq!(state.no_improvement, 1);
        assert!(state.record_iteration_best(best(3, 0.3)));
        assert_eq!(state.no_improvement, 0);
    }

    #[test]
    fn first_zero_score_still_becomes_best() {
        let mut state = SearchState::new("");
        assert!(state.record_iteration_best(best(1, 0.0)));
        assert_eq!(state.best.map(|b| b.iteration), Some(1));
    }

    #[test]
    fn best_attempt_selection_prefers_first_maximum() {
        assert_eq!(select_best_attempt(&[]), None);
        assert_eq!(select_best_attempt(&[0.2, 0.7, 0.7, 0.1]), Some(1));
        assert_eq!(select_best_attempt(&[0.0]), Some(0));
    }

    #[test]
    fn stop_reason_serializes_as_text() {
        let json = serde_json::to_string(&StopReason::NoImprovementExhausted).expect("serialize");
        assert_eq!(json, "\"no improvement for 3 iterations\"");
    }

    #[test]
    fn final_score_blends_with_alpha() {
        assert!((final_score(0.75, 1.0, 0.0) - 0.75).abs() < 1e-12);
        assert!((final_score(0.0, 1.0, 0.4) - 0.4).abs() < 1e-12);
    }
}
