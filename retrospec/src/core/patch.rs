//! Unified diff parsing into normalized line multisets.
//!
//! A changed line becomes a token of the form `+content` or `-content`, where
//! `content` has all whitespace runs collapsed to a single space. Tokens are
//! counted globally and per file; blank changed lines carry no signal and are
//! skipped.

use std::collections::BTreeMap;

use crate::core::types::FileStat;

/// Token -> occurrence count.
pub type LineMultiset = BTreeMap<String, usize>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPatch {
    pub global: LineMultiset,
    pub per_file: BTreeMap<String, LineMultiset>,
}

impl ParsedPatch {
    pub fn file(&self, path: &str) -> Option<&LineMultiset> {
        self.per_file.get(path)
    }
}

/// Extract the post-image path from a `diff --git a/x b/x` header line.
pub fn header_path(line: &str) -> Option<String> {
    if !line.starts_with("diff --git ") {
        return None;
    }
    let path = line.split(' ').nth(3)?;
    Some(path.strip_prefix("b/").unwrap_or(path).to_string())
}

pub fn parse_unified_diff(patch: &str) -> ParsedPatch {
    let mut parsed = ParsedPatch::default();
    let mut current: Option<String> = None;

    for raw in patch.split('\n') {
        let line = raw.trim_end_matches('\r');
        if line.starts_with("diff --git ") {
            if let Some(path) = header_path(line) {
                parsed.per_file.entry(path.clone()).or_default();
                current = Some(path);
            }
            continue;
        }
        if line.starts_with("+++") || line.starts_with("---") || line.starts_with("@@") {
            continue;
        }
        if let Some(content) = line.strip_prefix('+') {
            add_token(&mut parsed, current.as_deref(), '+', content);
        } else if let Some(content) = line.strip_prefix('-') {
            add_token(&mut parsed, current.as_deref(), '-', content);
        }
    }

    parsed
}

fn add_token(parsed: &mut ParsedPatch, file: Option<&str>, sign: char, content: &str) {
    let normalized = normalize_line(content);
    if normalized.is_empty() {
        return;
    }
    let token = format!("{sign}{normalized}");
    if let Some(file) = file {
        *parsed
            .per_file
            .entry(file.to_string())
            .or_default()
            .entry(token.clone())
            .or_insert(0) += 1;
    }
    *parsed.global.entry(token).or_insert(0) += 1;
}

fn normalize_line(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Changed paths and per-file line counts, derived from hunk bodies.
///
/// Only lines inside a hunk (after an `@@` header) are counted, so the
/// `---`/`+++` file headers never inflate the totals.
pub fn changed_paths_and_stats(patch: &str) -> (Vec<String>, BTreeMap<String, FileStat>) {
    let mut files = Vec::new();
    let mut stats: BTreeMap<String, FileStat> = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut in_hunk = false;

    for raw in patch.split('\n') {
        let line = raw.trim_end_matches('\r');
        if let Some(path) = header_path(line) {
            stats.entry(path.clone()).or_default();
            files.push(path.clone());
            current = Some(path);
            in_hunk = false;
            continue;
        }
        if line.starts_with("@@") {
            in_hunk = true;
            continue;
        }
        let (Some(path), true) = (current.as_ref(), in_hunk) else {
            continue;
        };
        let stat = stats.entry(path.clone()).or_default();
        if line.starts_with('+') {
            stat.added += 1;
        } else if line.starts_with('-') {
            stat.removed += 1;
        }
    }

    (files, stats)
}
