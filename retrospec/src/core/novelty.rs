//! Token-overlap novelty of a candidate against earlier candidates.

use std::collections::BTreeSet;

use crate::core::ratio::clamp01;

const MIN_TOKEN_LEN: usize = 4;
const TRIM_CHARS: &[char] = &[
    ' ', '\t', '\n', '\r', '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '"', '\'',
    '`',
];

/// `1 - max Jaccard(candidate, h)` over `history`; an empty history is fully novel.
pub fn novelty_score<S: AsRef<str>>(candidate: &str, history: &[S]) -> f64 {
    if history.is_empty() {
        return 1.0;
    }
    let tokens = token_set(candidate);
    let best = history
        .iter()
        .map(|prior| token_jaccard(&tokens, &token_set(prior.as_ref())))
        .fold(0.0_f64, f64::max);
    clamp01(1.0 - best)
}

/// Lower-cased, punctuation-trimmed tokens of at least four characters.
pub fn token_set(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|token| token.trim_matches(TRIM_CHARS))
        .filter(|token| token.len() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

fn token_jaccard(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(right).count();
    let union = left.len() + right.len() - intersection;
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_fully_novel() {
        assert_eq!(novelty_score::<&str>("anything here", &[]), 1.0);
    }

    #[test]
    fn identical_candidate_has_zero_novelty() {
        let text = "Retry transient failures during import.";
        assert_eq!(novelty_score(text, &[text]), 0.0);
    }

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        let history = ["(Retry) TRANSIENT failures, during import!"];
        assert_eq!(novelty_score("retry transient failures during import", &history), 0.0);
    }

    #[test]
    fn short_tokens_are_discarded() {
        let tokens = token_set("a an the cache it's");
        assert_eq!(tokens.into_iter().collect::<Vec<_>>(), vec!["cache", "it's"]);
    }

    #[test]
    fn closest_prior_candidate_decides() {
        let history = [
            "completely unrelated words entirely",
            "retry transient failures quickly",
        ];
        let novelty = novelty_score("retry transient failures during import", &history);
        // 3 shared of 6 distinct tokens.
        assert!((novelty - 0.5).abs() < 1e-12);
    }
}
