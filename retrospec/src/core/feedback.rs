//! Feedback synthesis between iterations.
//!
//! A [`FeedbackPacket`] summarizes how a produced change diverged from the
//! target: file-level differences, coarse intent signals for each side and
//! their gaps. The packet renders to a sorted, line-oriented text block that
//! is handed verbatim to the next generation round.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::tech::{PerFileScore, TechScore};
use crate::core::types::{DiffSnapshot, TestCategory};
use crate::core::validator::strip_tracker_references;

const NOTE_MAX_CHARS: usize = 220;
const ANCHOR_MAX_INTENTS: usize = 5;

pub const ALIGNED_MARKER: &str = "intent categories largely align";
pub const EXECUTION_ISSUE_GAP: &str =
    "coder execution had issues; refine acceptance criteria and constraints";

const TESTS_INTENT: &str = "tests/expectations updated";
const DOCS_INTENT: &str = "documentation behavior or guidance changed";
const CONFIG_INTENT: &str = "configuration behavior changed";

/// Patch-body keyword groups and the intent each implies.
const BODY_INTENTS: &[(&[&str], &str)] = &[
    (&["new file mode", "--- /dev/null"], "new component introduced"),
    (&["deleted file mode", "+++ /dev/null"], "component removal or consolidation"),
    (&["import ", " require(", " from ", " use "], "dependency usage changed"),
    (
        &["error", "err", "exception", "retry", "fallback", "panic"],
        "error handling logic differs",
    ),
    (
        &["log", "logger", "debug", "warn", "trace", "info"],
        "logging behavior differs",
    ),
    (
        &["http", "request", "response", "handler", "route", "endpoint"],
        "request/response behavior changed",
    ),
    (&["cache", "ttl", "evict", "memo"], "caching behavior changed"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackPacket {
    pub iteration: u32,
    pub target_files_changed: usize,
    pub produced_files_changed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub representative_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_count_summaries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unexpected_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_intent_signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produced_intent_signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intent_gaps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_category: Option<TestCategory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl FeedbackPacket {
    /// Merge externally summarized gaps: trimmed, de-duplicated, sorted.
    pub fn merge_gaps<I, S>(&mut self, extra: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let merged: BTreeSet<String> = std::mem::take(&mut self.intent_gaps)
            .into_iter()
            .chain(extra.into_iter().map(|gap| gap.as_ref().to_string()))
            .map(|gap| gap.trim().to_string())
            .filter(|gap| !gap.is_empty())
            .collect();
        self.intent_gaps = merged.into_iter().collect();
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Iteration: {}", self.iteration),
            format!("Target changed files: {}", self.target_files_changed),
        ];
        if self.produced_files_changed > 0 {
            lines.push(format!(
                "Produced changed files: {}",
                self.produced_files_changed
            ));
        }
        push_joined(&mut lines, "Representative paths", &self.representative_paths, ", ");
        if let Some(summary) = &self.tech_summary {
            lines.push(format!("Similarity summary: {summary}"));
        }
        push_joined(
            &mut lines,
            "Line count summary by path",
            &self.line_count_summaries,
            " | ",
        );
        push_joined(
            &mut lines,
            "Missing paths in produced change",
            &self.missing_files,
            ", ",
        );
        push_joined(&mut lines, "Unexpected produced paths", &self.unexpected_files, ", ");
        push_joined(&mut lines, "Target intent signals", &self.target_intent_signals, "; ");
        push_joined(
            &mut lines,
            "Produced intent signals",
            &self.produced_intent_signals,
            "; ",
        );
        push_joined(&mut lines, "Intent gaps", &self.intent_gaps, "; ");
        if let Some(category) = self.test_category {
            lines.push(format!("Tests status category: {category}"));
        }
        for note in &self.notes {
            lines.push(format!("Note: {note}"));
        }
        lines.join("\n")
    }
}

fn push_joined(lines: &mut Vec<String>, label: &str, items: &[String], separator: &str) {
    if !items.is_empty() {
        lines.push(format!("{label}: {}", items.join(separator)));
    }
}

/// Coarse intent signals from changed paths and patch-body keywords, sorted.
pub fn infer_intents(snapshot: &DiffSnapshot) -> Vec<String> {
    if snapshot.is_empty() {
        return Vec::new();
    }

    let mut intents: BTreeSet<&'static str> = BTreeSet::new();
    for path in &snapshot.changed_files {
        let path = path.to_lowercase();
        if is_test_path(&path) {
            intents.insert(TESTS_INTENT);
        }
        if path.ends_with(".md") || path.starts_with("docs/") {
            intents.insert(DOCS_INTENT);
        }
        if path.contains("config") || path.contains("settings") {
            intents.insert(CONFIG_INTENT);
        }
    }

    let patch = snapshot.patch.to_lowercase();
    for (keywords, intent) in BODY_INTENTS {
        if keywords.iter().any(|keyword| patch.contains(keyword)) {
            intents.insert(*intent);
        }
    }

    intents.into_iter().map(str::to_string).collect()
}

fn is_test_path(path: &str) -> bool {
    path.contains("_test.")
        || path.contains("/test")
        || path.starts_with("test/")
        || path.starts_with("tests/")
}

/// Set difference in both directions, phrased as gaps.
pub fn summarize_intent_gap(target: &[String], produced: &[String]) -> Vec<String> {
    let target_set: BTreeSet<&str> = target.iter().map(String::as_str).collect();
    let produced_set: BTreeSet<&str> = produced.iter().map(String::as_str).collect();

    let mut gaps: Vec<String> = target_set
        .difference(&produced_set)
        .map(|intent| format!("target indicates {intent} but produced change may not"))
        .collect();
    gaps.extend(
        produced_set
            .difference(&target_set)
            .map(|intent| format!("produced change may over-focus on {intent}")),
    );
    if gaps.is_empty() {
        gaps.push(ALIGNED_MARKER.to_string());
    }
    gaps
}

/// Packet for iteration 0, built from the target alone.
pub fn build_initial_packet(
    target: &DiffSnapshot,
    commit_message: &str,
    max_path_refs: usize,
) -> FeedbackPacket {
    let mut notes = Vec::new();
    if !commit_message.is_empty() {
        notes.push(sanitize_one_line(commit_message));
    }
    FeedbackPacket {
        iteration: 0,
        target_files_changed: target.changed_files.len(),
        representative_paths: limit_sorted(target.changed_files.iter().cloned(), max_path_refs),
        target_intent_signals: infer_intents(target),
        notes,
        ..FeedbackPacket::default()
    }
}

/// Packet comparing the iteration-best produced change against the target.
pub fn build_iteration_packet(
    iteration: u32,
    target: &DiffSnapshot,
    produced: &DiffSnapshot,
    tech: &TechScore,
    test_category: TestCategory,
    max_path_refs: usize,
) -> FeedbackPacket {
    let target_files = target.file_set();
    let produced_files = produced.file_set();
    let list_limit = max_path_refs * 2;

    let target_intents = infer_intents(target);
    let produced_intents = infer_intents(produced);
    let intent_gaps = summarize_intent_gap(&target_intents, &produced_intents);

    FeedbackPacket {
        iteration,
        target_files_changed: target.changed_files.len(),
        produced_files_changed: produced.changed_files.len(),
        representative_paths: limit_sorted(target.changed_files.iter().cloned(), max_path_refs),
        tech_summary: Some(format!(
            "file overlap {:.2}, diff similarity {:.2}, line F1 {:.2}",
            tech.file_jaccard, tech.diff_similarity, tech.line_f1
        )),
        line_count_summaries: tech
            .per_file
            .iter()
            .take(list_limit)
            .map(line_count_summary)
            .collect(),
        missing_files: limit_sorted(
            target_files.difference(&produced_files).map(|p| p.to_string()),
            list_limit,
        ),
        unexpected_files: limit_sorted(
            produced_files.difference(&target_files).map(|p| p.to_string()),
            list_limit,
        ),
        target_intent_signals: target_intents,
        produced_intent_signals: produced_intents,
        intent_gaps,
        test_category: Some(test_category),
        notes: Vec::new(),
    }
}

fn line_count_summary(file: &PerFileScore) -> String {
    format!(
        "{} target(+{}/-{}) produced(+{}/-{})",
        file.path, file.target.added, file.target.removed, file.produced.added, file.produced.removed
    )
}

fn limit_sorted(items: impl IntoIterator<Item = String>, limit: usize) -> Vec<String> {
    let mut items: Vec<String> = items.into_iter().collect();
    items.sort();
    items.truncate(limit);
    items
}

/// One-line commit note: newlines flattened, tracker refs stripped,
/// whitespace collapsed, capped at 220 characters.
pub fn sanitize_one_line(text: &str) -> String {
    let flattened = text.replace('\n', " ");
    let stripped = strip_tracker_references(&flattened);
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(NOTE_MAX_CHARS).collect()
}

/// Steering line prepended to every generation request.
pub fn objective_anchor(commit_message: &str, target: &DiffSnapshot) -> String {
    let intents = infer_intents(target);
    if intents.is_empty() {
        return "Objective anchor: infer the likely behavioral objective behind the target change and keep the prompt high-level.".to_string();
    }
    let stripped = strip_tracker_references(commit_message);
    let message = match stripped.trim() {
        "" => "target commit objective unavailable",
        message => message,
    };
    let shown: Vec<&str> = intents
        .iter()
        .take(ANCHOR_MAX_INTENTS)
        .map(String::as_str)
        .collect();
    format!(
        "Objective anchor from target metadata: {message}. Intent signals: {}.",
        shown.join("; ")
    )
}

/// Anchor plus the carried feedback text.
pub fn generation_context(anchor: &str, feedback_text: &str) -> String {
    format!("{anchor}\n\n{feedback_text}")
}
