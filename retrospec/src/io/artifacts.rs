//! Persisted run artifacts under `<workdir>/artifacts/`.
//!
//! These files are the product output of a search. They are always written,
//! independent of `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::feedback::FeedbackPacket;
use crate::core::realism::RealismResult;
use crate::core::state::StopReason;
use crate::core::tech::TechScore;
use crate::core::types::TestRunResult;

/// Stable per-attempt key, e.g. `iter-003-cand-01`.
pub fn attempt_key(iteration: u32, rank: usize) -> String {
    format!("iter-{iteration:03}-cand-{rank:02}")
}

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub workdir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub runs_dir: PathBuf,
    /// Scratch space for agent prompts, last messages and logs.
    pub agent_dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            artifacts_dir: workdir.join("artifacts"),
            runs_dir: workdir.join("runs"),
            agent_dir: workdir.join("agent"),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.artifacts_dir, &self.runs_dir, &self.agent_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn target_patch(&self) -> PathBuf {
        self.artifacts_dir.join("target.patch")
    }

    pub fn attempt_patch(&self, key: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{key}.patch"))
    }

    pub fn attempt_test_log(&self, key: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{key}.tests.log"))
    }

    pub fn best_prompt(&self) -> PathBuf {
        self.artifacts_dir.join("best_prompt.md")
    }

    pub fn best_patch(&self) -> PathBuf {
        self.artifacts_dir.join("best.patch")
    }

    pub fn metrics(&self) -> PathBuf {
        self.artifacts_dir.join("metrics.json")
    }

    pub fn run_log(&self) -> PathBuf {
        self.artifacts_dir.join("run_log.json")
    }
}

/// One generation slot of a candidate pool, valid or not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftLog {
    pub index: usize,
    pub style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope_hints: Vec<String>,
    pub validation_retries: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_spec_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_realism: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novelty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptLog {
    pub candidate_index: usize,
    pub candidate_style: String,
    pub candidate_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coder_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coder_final_message: Option<String>,
    pub tech: TechScore,
    pub realism: RealismResult,
    pub final_score: f64,
    pub test_result: TestRunResult,
    pub produced_patch_path: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produced_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationLog {
    pub iteration: u32,
    pub drafts: Vec<DraftLog>,
    pub coder_attempts: Vec<AttemptLog>,
    /// Index into `coder_attempts`.
    pub selected_attempt: usize,
    pub feedback_packet: FeedbackPacket,
    pub iteration_best_score: f64,
}

/// Full structured record of a search. Rewritten after every iteration, so a
/// run that dies midway still leaves `completed_at` and `stopped_reason` unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    pub repo: String,
    pub target_commit: String,
    pub parent_commit: String,
    pub commit_message: String,
    pub alpha: f64,
    pub threshold: f64,
    pub max_iters: u32,
    pub best_iteration: Option<u32>,
    pub stopped_reason: Option<StopReason>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub iterations: Vec<IterationLog>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub tech_similarity: f64,
    pub realism_score: f64,
    pub final_score: f64,
    pub alpha: f64,
    pub best_iteration: u32,
}

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// Pretty JSON with a trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_keys_are_zero_padded() {
        assert_eq!(attempt_key(3, 1), "iter-003-cand-01");
        assert_eq!(attempt_key(12, 10), "iter-012-cand-10");
    }

    #[test]
    fn artifact_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path());
        paths.ensure().expect("ensure");

        assert!(paths.artifacts_dir.is_dir());
        assert!(paths.runs_dir.is_dir());
        assert!(paths.target_patch().ends_with("artifacts/target.patch"));
        assert!(
            paths
                .attempt_patch("iter-001-cand-02")
                .ends_with("artifacts/iter-001-cand-02.patch")
        );
        assert!(paths.best_prompt().ends_with("artifacts/best_prompt.md"));
        assert!(paths.metrics().ends_with("artifacts/metrics.json"));
    }

    /// Verifies metrics serialize with the camelCase keys consumers read.
    #[test]
    fn metrics_json_uses_camel_case() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("metrics.json");
        let metrics = Metrics {
            tech_similarity: 0.5,
            realism_score: 0.75,
            final_score: 0.5625,
            alpha: 0.75,
            best_iteration: 2,
        };
        write_json(&path, &metrics).expect("write");

        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&contents).expect("parse");
        assert_eq!(value["techSimilarity"], 0.5);
        assert_eq!(value["bestIteration"], 2);
    }

    #[test]
    fn failed_draft_log_omits_absent_scores() {
        let log = DraftLog {
            index: 1,
            style: "minimal-scope request focused on core behavior".to_string(),
            validation_retries: 5,
            generation_error: Some("failed after 5 attempts: empty response".to_string()),
            ..DraftLog::default()
        };
        let value = serde_json::to_value(&log).expect("serialize");
        assert!(value.get("preScore").is_none());
        assert!(value.get("candidatePrompt").is_none());
        assert_eq!(value["validationRetries"], 5);
    }
}
