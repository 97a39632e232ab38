//! Shared deterministic types for the search core.
//!
//! These types define stable contracts between the scorers, the feedback
//! synthesizer and the controller. They carry no I/O and serialize with stable
//! field order so run logs stay reproducible.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::patch::changed_paths_and_stats;

/// Added/removed line counts for one changed file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub added: usize,
    pub removed: usize,
}

/// Immutable record of a patch, its changed files and per-file line counts.
///
/// `changed_files` is always sorted and de-duplicated, so two snapshots of the
/// same change compare equal regardless of the order git listed the paths in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSnapshot {
    pub patch: String,
    pub changed_files: Vec<String>,
    pub file_stats: BTreeMap<String, FileStat>,
}

impl DiffSnapshot {
    pub fn new<I, S>(patch: impl Into<String>, changed_files: I, file_stats: BTreeMap<String, FileStat>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let files: BTreeSet<String> = changed_files
            .into_iter()
            .map(Into::into)
            .map(|path: String| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .collect();
        Self {
            patch: patch.into(),
            changed_files: files.into_iter().collect(),
            file_stats,
        }
    }

    /// Derive changed files and line counts directly from unified diff text.
    pub fn from_patch(patch: impl Into<String>) -> Self {
        let patch = patch.into();
        let (files, stats) = changed_paths_and_stats(&patch);
        Self::new(patch, files, stats)
    }

    pub fn is_empty(&self) -> bool {
        self.changed_files.is_empty() && self.patch.trim().is_empty()
    }

    pub fn file_set(&self) -> BTreeSet<&str> {
        self.changed_files.iter().map(String::as_str).collect()
    }

    /// Total `(added, removed)` lines across all files.
    pub fn totals(&self) -> (usize, usize) {
        self.file_stats
            .values()
            .fold((0, 0), |(adds, dels), stat| (adds + stat.added, dels + stat.removed))
    }

    pub fn stat(&self, path: &str) -> FileStat {
        self.file_stats.get(path).copied().unwrap_or_default()
    }
}

/// Target commit resolved against its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    #[serde(rename = "targetSHA")]
    pub target_sha: String,
    #[serde(rename = "parentSHA")]
    pub parent_sha: String,
    pub commit_message: String,
}

/// Outcome category of best-effort tests for a produced codebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestCategory {
    #[serde(rename = "not_run")]
    NotRun,
    #[serde(rename = "pass")]
    Pass,
    #[serde(rename = "compilation")]
    Compilation,
    #[serde(rename = "unit-test")]
    UnitTest,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "test-failure")]
    TestFailure,
}

impl TestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRun => "not_run",
            Self::Pass => "pass",
            Self::Compilation => "compilation",
            Self::UnitTest => "unit-test",
            Self::Timeout => "timeout",
            Self::TestFailure => "test-failure",
        }
    }
}

impl fmt::Display for TestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a best-effort test run against an isolated working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub ran: bool,
    pub passed: bool,
    pub category: TestCategory,
    pub summary: String,
}

impl TestRunResult {
    pub fn not_run(summary: impl Into<String>) -> Self {
        Self {
            ran: false,
            passed: true,
            category: TestCategory::NotRun,
            summary: summary.into(),
        }
    }

    /// Tests were skipped because the execution itself failed.
    pub fn skipped_after_failure(summary: impl Into<String>) -> Self {
        Self {
            passed: false,
            ..Self::not_run(summary)
        }
    }

    pub fn timed_out(summary: impl Into<String>) -> Self {
        Self {
            ran: true,
            passed: false,
            category: TestCategory::Timeout,
            summary: summary.into(),
        }
    }

    pub fn passed(summary: impl Into<String>) -> Self {
        Self {
            ran: true,
            passed: true,
            category: TestCategory::Pass,
            summary: summary.into(),
        }
    }

    pub fn failed(category: TestCategory, summary: impl Into<String>) -> Self {
        Self {
            ran: true,
            passed: false,
            category,
            summary: summary.into(),
        }
    }
}
