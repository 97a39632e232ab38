//! Heuristic plausibility of a specification as an organic human request.
//!
//! The heuristic starts from a neutral base and sums independent adjustments
//! (length, path references, identifier density, constants, checklists,
//! step-by-step phrasing, and the presence of problem/behavior/constraint/
//! acceptance language). Each penalty records a diagnostic reason.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::ratio::clamp01;

const BASE_SCORE: f64 = 0.55;
const SOFT_LENGTH_LIMIT: usize = 2600;
const MAX_NUMERIC_LITERALS: usize = 12;
const MAX_BULLETS: usize = 10;
const MAX_STEP_WORDS: usize = 5;
const HEURISTIC_WEIGHT: f64 = 0.6;
const JUDGE_WEIGHT: f64 = 0.4;

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:^|\s)(?:[A-Za-z0-9._-]+/)+[A-Za-z0-9._-]+").expect("path regex")
});
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]{2,}\b").expect("identifier regex"));
static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("numeric regex"));
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*]|\d+\.)\s+").expect("bullet regex"));

const STEP_WORDS: &[&str] = &["then", "after that", "step", "next,"];

struct Bonus {
    keywords: &'static [&'static str],
    reward: f64,
    missing: &'static str,
}

const BONUSES: &[Bonus] = &[
    Bonus {
        keywords: &["problem", "motivation", "currently", "pain point", "context"],
        reward: 0.06,
        missing: "missing clear problem statement/motivation",
    },
    Bonus {
        keywords: &["should", "must", "expected", "behavior", "outcome"],
        reward: 0.06,
        missing: "desired behavior is not explicit enough",
    },
    Bonus {
        keywords: &["non-goal", "out of scope", "do not", "avoid"],
        reward: 0.07,
        missing: "constraints or non-goals are missing",
    },
    Bonus {
        keywords: &["acceptance", "test", "verify", "pass"],
        reward: 0.07,
        missing: "acceptance criteria or test expectations are missing",
    },
];

/// Thresholds for the heuristic. `max_length == 0` means no hard cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealismConfig {
    pub max_path_refs: usize,
    pub max_identifiers: usize,
    pub max_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealismResult {
    pub heuristic_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_score: Option<f64>,
    pub score: f64,
    pub reasons: Vec<String>,
}

impl RealismResult {
    /// Fold an external judge opinion into the combined score.
    pub fn with_judge(mut self, judge_score: f64, justification: &str) -> Self {
        let judge_score = clamp01(judge_score);
        self.judge_score = Some(judge_score);
        self.score = combine_realism(self.heuristic_score, Some(judge_score));
        let justification = justification.trim();
        if !justification.is_empty() {
            self.reasons.push(format!("judge: {justification}"));
        }
        self
    }
}

/// `0.6 * heuristic + 0.4 * judge` when a judge score exists, otherwise the heuristic.
pub fn combine_realism(heuristic: f64, judge: Option<f64>) -> f64 {
    match judge {
        Some(judge) => clamp01(HEURISTIC_WEIGHT * heuristic + JUDGE_WEIGHT * judge),
        None => clamp01(heuristic),
    }
}

pub fn score_realism_heuristic(text: &str, config: &RealismConfig) -> RealismResult {
    let text = text.trim();
    if text.is_empty() {
        return RealismResult {
            heuristic_score: 0.0,
            judge_score: None,
            score: 0.0,
            reasons: Vec::new(),
        };
    }

    let lower = text.to_lowercase();
    let mut score = BASE_SCORE;
    let mut reasons = Vec::new();

    let length = text.len();
    if config.max_length > 0 {
        if length <= config.max_length {
            score += 0.08;
        } else {
            let over = (length - config.max_length) as f64 / config.max_length as f64;
            score -= (over * 0.35).min(0.25);
            reasons.push("prompt is overly long and likely too prescriptive".to_string());
        }
    } else if length <= SOFT_LENGTH_LIMIT {
        score += 0.03;
    } else {
        let over = (length - SOFT_LENGTH_LIMIT) as f64 / SOFT_LENGTH_LIMIT as f64;
        score -= (over * 0.25).min(0.20);
        reasons.push("prompt is very long and may become too prescriptive".to_string());
    }

    let path_refs = count_path_refs(text);
    if path_refs > config.max_path_refs {
        score -= ((path_refs - config.max_path_refs) as f64 * 0.07).min(0.25);
        reasons.push("too many file path references make it look diff-driven".to_string());
    } else if path_refs > 0 {
        score += 0.02;
    }

    let identifiers = count_identifiers(text);
    if identifiers > config.max_identifiers {
        score -= ((identifiers - config.max_identifiers) as f64 * 0.02).min(0.25);
        reasons.push("identifier density is high for a high-level specification".to_string());
    } else {
        score += 0.04;
    }

    if NUMERIC_RE.find_iter(text).count() > MAX_NUMERIC_LITERALS {
        score -= 0.12;
        reasons.push("too many exact constants can indicate overfitting".to_string());
    }

    let bullets = BULLET_RE.find_iter(text).count();
    if bullets > MAX_BULLETS {
        score -= ((bullets - MAX_BULLETS) as f64 * 0.02).min(0.20);
        reasons.push("excessive checklists can encode micro-diffs".to_string());
    }

    let step_words: usize = STEP_WORDS.iter().map(|word| lower.matches(word).count()).sum();
    if step_words > MAX_STEP_WORDS {
        score -= ((step_words - MAX_STEP_WORDS) as f64 * 0.03).min(0.15);
        reasons.push("instruction sequence is too low-level".to_string());
    }

    for bonus in BONUSES {
        if bonus.keywords.iter().any(|keyword| lower.contains(keyword)) {
            score += bonus.reward;
        } else {
            reasons.push(bonus.missing.to_string());
        }
    }

    let heuristic_score = clamp01(score);
    RealismResult {
        heuristic_score,
        judge_score: None,
        score: heuristic_score,
        reasons,
    }
}

fn count_path_refs(text: &str) -> usize {
    PATH_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .collect::<BTreeSet<_>>()
        .len()
}

fn count_identifiers(text: &str) -> usize {
    IDENTIFIER_RE
        .find_iter(text)
        .filter(|m| looks_like_identifier(m.as_str()))
        .count()
}

/// snake_case, ALL_CAPS (3+ chars) or an interior capital.
fn looks_like_identifier(token: &str) -> bool {
    if token.contains('_') {
        return true;
    }
    if token.len() >= 3 && token.to_uppercase() == token {
        return true;
    }
    token.bytes().skip(1).any(|b| b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RealismConfig {
        RealismConfig {
            max_path_refs: 3,
            max_identifiers: 25,
            max_length: 0,
        }
    }

    const ORGANIC: &str = "\
## Context
Currently the importer gives up on the first flaky network error, which is a pain point for users.

## Desired Outcomes
Imports should retry transient failures and the overall behavior must stay predictable.

## Constraints and Non-Goals
Do not change the public configuration surface. Persistent storage is out of scope.

## Acceptance Criteria
Tests verify that a transient failure is retried and a permanent failure is reported.
";

    #[test]
    fn empty_text_scores_zero() {
        let result = score_realism_heuristic("   \n", &config());
        assert_eq!(result.heuristic_score, 0.0);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn organic_request_collects_every_bonus() {
        let result = score_realism_heuristic(ORGANIC, &config());
        let expected = 0.55 + 0.03 + 0.04 + 0.06 + 0.06 + 0.07 + 0.07;
        assert!((result.heuristic_score - expected).abs() < 1e-9, "{result:?}");
        assert!(result.reasons.is_empty(), "{:?}", result.reasons);
    }

    #[test]
    fn missing_categories_record_reasons() {
        let result = score_realism_heuristic("Improve things.", &config());
        assert!(
            result
                .reasons
                .contains(&"acceptance criteria or test expectations are missing".to_string())
        );
        assert!(
            result
                .reasons
                .contains(&"missing clear problem statement/motivation".to_string())
        );
    }

    #[test]
    fn path_heavy_text_is_penalized() {
        let text = "Touch src/a.rs src/b.rs src/c.rs src/d.rs src/e.rs and keep tests passing.";
        let result = score_realism_heuristic(text, &config());
        assert!(
            result
                .reasons
                .iter()
                .any(|reason| reason.contains("file path references"))
        );
    }

    #[test]
    fn identifier_shapes() {
        assert!(looks_like_identifier("snake_case"));
        assert!(looks_like_identifier("HTTP"));
        assert!(looks_like_identifier("camelCase"));
        assert!(!looks_like_identifier("Context"));
        assert!(!looks_like_identifier("plain"));
    }

    #[test]
    fn pathological_input_stays_in_bounds() {
        let noisy = "1. step then FOO_BAR a/b/c 42\n".repeat(400);
        let result = score_realism_heuristic(&noisy, &RealismConfig {
            max_path_refs: 0,
            max_identifiers: 1,
            max_length: 10,
        });
        assert!((0.0..=1.0).contains(&result.heuristic_score));
    }

    #[test]
    fn judge_combination_weights_heuristic_more() {
        assert!((combine_realism(0.5, Some(1.0)) - 0.7).abs() < 1e-12);
        assert_eq!(combine_realism(0.5, None), 0.5);
        assert_eq!(combine_realism(2.0, None), 1.0);
    }

    #[test]
    fn judge_justification_is_recorded() {
        let result = score_realism_heuristic(ORGANIC, &config()).with_judge(1.5, " reads naturally ");
        assert_eq!(result.judge_score, Some(1.0));
        assert_eq!(result.reasons.last().map(String::as_str), Some("judge: reads naturally"));
    }
}
