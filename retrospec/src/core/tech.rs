//! Technical similarity between a target and a produced change.
//!
//! The score blends three overlap measures:
//! - file-set Jaccard over changed paths,
//! - weighted Jaccard over normalized line multisets,
//! - line-level F1 treating target tokens as ground truth.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::patch::{LineMultiset, parse_unified_diff};
use crate::core::ratio::{clamp01, safe_div};
use crate::core::types::{DiffSnapshot, FileStat};

const FILE_WEIGHT: f64 = 0.40;
const DIFF_WEIGHT: f64 = 0.45;
const F1_WEIGHT: f64 = 0.15;

/// Weighted Jaccard restricted to one file's tokens, plus its line counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerFileScore {
    pub path: String,
    pub similarity: f64,
    pub target: FileStat,
    pub produced: FileStat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechScore {
    pub file_jaccard: f64,
    pub diff_similarity: f64,
    pub line_precision: f64,
    pub line_recall: f64,
    pub line_f1: f64,
    pub score: f64,
    pub per_file: Vec<PerFileScore>,
    pub target_files: usize,
    pub produced_files: usize,
    pub target_totals: FileStat,
    pub produced_totals: FileStat,
}

pub fn score_tech_similarity(target: &DiffSnapshot, produced: &DiffSnapshot) -> TechScore {
    let target_files = target.file_set();
    let produced_files = produced.file_set();
    let file_jaccard = set_jaccard(&target_files, &produced_files);

    let target_lines = parse_unified_diff(&target.patch);
    let produced_lines = parse_unified_diff(&produced.patch);

    let diff_similarity = weighted_jaccard(&target_lines.global, &produced_lines.global);

    let true_positives = overlap(&target_lines.global, &produced_lines.global);
    let line_precision = safe_div(true_positives as f64, total(&produced_lines.global) as f64);
    let line_recall = safe_div(true_positives as f64, total(&target_lines.global) as f64);
    let line_f1 = if line_precision + line_recall == 0.0 {
        0.0
    } else {
        2.0 * line_precision * line_recall / (line_precision + line_recall)
    };

    let empty = LineMultiset::new();
    let per_file = target_files
        .union(&produced_files)
        .map(|path| {
            let left = target_lines.file(path).unwrap_or(&empty);
            let right = produced_lines.file(path).unwrap_or(&empty);
            PerFileScore {
                path: (*path).to_string(),
                similarity: weighted_jaccard(left, right),
                target: target.stat(path),
                produced: produced.stat(path),
            }
        })
        .collect();

    let score = clamp01(
        FILE_WEIGHT * file_jaccard + DIFF_WEIGHT * diff_similarity + F1_WEIGHT * line_f1,
    );

    TechScore {
        file_jaccard,
        diff_similarity,
        line_precision,
        line_recall,
        line_f1,
        score,
        per_file,
        target_files: target_files.len(),
        produced_files: produced_files.len(),
        target_totals: totals(target),
        produced_totals: totals(produced),
    }
}

fn totals(snapshot: &DiffSnapshot) -> FileStat {
    let (added, removed) = snapshot.totals();
    FileStat { added, removed }
}

fn set_jaccard(left: &BTreeSet<&str>, right: &BTreeSet<&str>) -> f64 {
    let intersection = left.intersection(right).count();
    let union = left.union(right).count();
    safe_div(intersection as f64, union as f64)
}

/// `sum(min) / sum(max)` over the union of tokens; empty/empty is 1.
pub fn weighted_jaccard(left: &LineMultiset, right: &LineMultiset) -> f64 {
    let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    let mut min_sum = 0usize;
    let mut max_sum = 0usize;
    for key in keys {
        let a = left.get(key).copied().unwrap_or(0);
        let b = right.get(key).copied().unwrap_or(0);
        min_sum += a.min(b);
        max_sum += a.max(b);
    }
    safe_div(min_sum as f64, max_sum as f64)
}

fn overlap(left: &LineMultiset, right: &LineMultiset) -> usize {
    left.iter()
        .map(|(token, count)| (*count).min(right.get(token).copied().unwrap_or(0)))
        .sum()
}

fn total(multiset: &LineMultiset) -> usize {
    multiset.values().sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_patch(path: &str, added: &[&str], removed: &[&str]) -> String {
        let mut out = format!("diff --git a/{path} b/{path}\n--- a/{path}\n+++ b/{path}\n@@ -1 +1 @@\n");
        for line in removed {
            out.push_str(&format!("-{line}\n"));
        }
        for line in added {
            out.push_str(&format!("+{line}\n"));
        }
        out
    }

    fn a_go() -> String {
        file_patch(
            "a.go",
            &["func A() {", "return 1", "}", "var x = 2", "// note"],
            &["func A() {}"],
        )
    }

    fn b_go() -> String {
        file_patch("b.go", &["package b", "func B() {}"], &[])
    }

    #[test]
    fn identical_snapshots_score_one() {
        let snapshot = DiffSnapshot::from_patch(a_go() + &b_go());
        let score = score_tech_similarity(&snapshot, &snapshot);
        assert_eq!(score.file_jaccard, 1.0);
        assert_eq!(score.diff_similarity, 1.0);
        assert_eq!(score.line_f1, 1.0);
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn empty_snapshots_are_a_perfect_match() {
        let empty = DiffSnapshot::default();
        let score = score_tech_similarity(&empty, &empty);
        assert_eq!(score.file_jaccard, 1.0);
        assert_eq!(score.diff_similarity, 1.0);
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn disjoint_snapshots_score_zero() {
        let target = DiffSnapshot::from_patch(a_go());
        let produced = DiffSnapshot::from_patch(b_go());
        let score = score_tech_similarity(&target, &produced);
        assert_eq!(score.file_jaccard, 0.0);
        assert_eq!(score.diff_similarity, 0.0);
        assert_eq!(score.line_f1, 0.0);
        assert_eq!(score.score, 0.0);
    }

    #[test]
    fn partial_file_match_uses_weighted_formula() {
        let target = DiffSnapshot::from_patch(a_go() + &b_go());
        let produced = DiffSnapshot::from_patch(a_go());
        let score = score_tech_similarity(&target, &produced);

        assert_eq!(score.file_jaccard, 0.5);
        assert!((score.diff_similarity - 0.75).abs() < 1e-12);
        assert_eq!(score.line_precision, 1.0);
        assert!((score.line_recall - 0.75).abs() < 1e-12);
        let f1 = 2.0 * 0.75 / 1.75;
        assert!((score.line_f1 - f1).abs() < 1e-12);

        let expected = 0.40 * 0.5 + 0.45 * 0.75 + 0.15 * f1;
        assert!((score.score - expected).abs() < 1e-12);

        let perfect = score_tech_similarity(&produced, &produced).score;
        let disjoint = score_tech_similarity(&target, &DiffSnapshot::from_patch(file_patch("c.go", &["x"], &[]))).score;
        assert!(score.score < perfect);
        assert!(score.score > disjoint);
    }

    #[test]
    fn per_file_scores_cover_union_in_sorted_order() {
        let target = DiffSnapshot::from_patch(b_go() + &a_go());
        let produced = DiffSnapshot::from_patch(a_go());
        let score = score_tech_similarity(&target, &produced);
        let paths: Vec<_> = score.per_file.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.go", "b.go"]);
        assert_eq!(score.per_file[0].similarity, 1.0);
        assert_eq!(score.per_file[1].similarity, 0.0);
        assert_eq!(score.per_file[0].target, FileStat { added: 5, removed: 1 });
        assert_eq!(score.per_file[1].produced, FileStat::default());
        assert_eq!(score.target_totals, FileStat { added: 7, removed: 1 });
    }

    #[test]
    fn repeated_tokens_count_by_multiplicity() {
        let mut left = LineMultiset::new();
        left.insert("+x".to_string(), 3);
        let mut right = LineMultiset::new();
        right.insert("+x".to_string(), 1);
        assert!((weighted_jaccard(&left, &right) - 1.0 / 3.0).abs() < 1e-12);
    }
}
