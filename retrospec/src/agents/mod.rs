//! Agent collaborator contract.
//!
//! The search talks to a coding agent through [`Agent`]: drafting candidate
//! specifications, judging their realism, summarizing intent gaps and
//! executing a specification inside a working copy. Responses are free text
//! that is expected to contain one JSON object; the helpers here extract and
//! parse it leniently.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ratio::clamp01;

pub mod codex;

pub const DEFAULT_RATIONALE: &str = "Prompt focuses on behavioral outcomes and acceptance criteria.";

/// Upper bound on summarized gaps regardless of what the caller asks for.
pub const MAX_GAP_ITEMS: usize = 8;

/// Everything the spec writer sees for one draft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftRequest {
    pub iteration: u32,
    /// Objective anchor plus the carried feedback packet.
    pub feedback_text: String,
    pub max_path_refs: usize,
    pub max_length: usize,
    pub style: String,
    pub previous_prompt: Option<String>,
    pub previous_outcome: Option<String>,
    /// Corrective feedback from the previous failed attempt at this slot.
    pub violation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecCandidate {
    pub candidate_prompt: String,
    pub rationale: String,
    pub scope_hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftResponse {
    pub candidate: SpecCandidate,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub score: f64,
    pub justification: String,
}

/// The agent answered, but not with a usable draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedDraftError {
    pub raw: String,
    pub reason: String,
}

impl fmt::Display for MalformedDraftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed draft response: {}", self.reason)
    }
}

impl std::error::Error for MalformedDraftError {}

pub trait Agent {
    fn generate_draft(&self, request: &DraftRequest) -> Result<DraftResponse>;

    /// Plausibility of `prompt` as an organic request, in `[0,1]`.
    fn judge_realism(&self, prompt: &str, timeout: Duration) -> Result<JudgeVerdict>;

    /// Abstract behavioral differences between two patches, at most
    /// `max_items` entries and none containing code markers.
    fn summarize_intent_gap(
        &self,
        target_patch: &str,
        produced_patch: &str,
        max_items: usize,
        timeout: Duration,
    ) -> Result<Vec<String>>;

    /// Implement `prompt` inside `workdir`; returns the agent's final message.
    fn execute(&self, workdir: &Path, prompt: &str, timeout: Duration) -> Result<String>;
}

/// First balanced `{...}` object in `raw`, skipping braces inside strings.
pub fn extract_json_object(raw: &str) -> Result<&str> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty response");
    }
    let start = raw
        .find('{')
        .ok_or_else(|| anyhow!("no json object start found"))?;

    let mut in_string = false;
    let mut escaped = false;
    let mut depth = 0usize;
    for (offset, byte) in raw.bytes().enumerate().skip(start) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&raw[start..=offset]);
                }
            }
            _ => {}
        }
    }
    bail!("unterminated json object")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCandidate {
    #[serde(default)]
    candidate_prompt: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    scope_hints: Option<Value>,
}

/// Parse a spec writer response. `scopeHints` may be an array, a single
/// string or a comma-separated string.
pub fn parse_spec_candidate(raw: &str) -> Result<SpecCandidate> {
    let blob = extract_json_object(raw).context("extract spec writer json")?;
    let parsed: RawCandidate = serde_json::from_str(blob).context("parse spec writer json")?;

    let candidate_prompt = parsed.candidate_prompt.trim().to_string();
    if candidate_prompt.is_empty() {
        bail!("candidatePrompt is empty");
    }
    let rationale = match parsed.rationale.trim() {
        "" => DEFAULT_RATIONALE.to_string(),
        rationale => rationale.to_string(),
    };
    Ok(SpecCandidate {
        candidate_prompt,
        rationale,
        scope_hints: parsed.scope_hints.map(scope_hints).unwrap_or_default(),
    })
}

fn scope_hints(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default(),
        Value::String(single) => single
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(default)]
    score: f64,
    #[serde(default)]
    justification: String,
}

pub fn parse_judge_verdict(raw: &str) -> Result<JudgeVerdict> {
    let blob = extract_json_object(raw).context("extract judge json")?;
    let parsed: RawVerdict = serde_json::from_str(blob).context("parse judge json")?;
    Ok(JudgeVerdict {
        score: clamp01(parsed.score),
        justification: parsed.justification.trim().to_string(),
    })
}

#[derive(Deserialize)]
struct RawGaps {
    #[serde(default)]
    gaps: Vec<String>,
}

/// `max_items` clamped to `[1, MAX_GAP_ITEMS]`.
pub fn clamp_gap_items(max_items: usize) -> usize {
    max_items.clamp(1, MAX_GAP_ITEMS)
}

pub fn parse_intent_gaps(raw: &str, max_items: usize) -> Result<Vec<String>> {
    let blob = extract_json_object(raw).context("extract intent gap json")?;
    let parsed: RawGaps = serde_json::from_str(blob).context("parse intent gap json")?;
    Ok(filter_gaps(parsed.gaps, max_items))
}

/// Drop blank entries and anything carrying code markers, keep at most
/// `max_items` (clamped).
pub fn filter_gaps<I, S>(gaps: I, max_items: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    gaps.into_iter()
        .map(|gap| gap.as_ref().trim().to_string())
        .filter(|gap| !gap.is_empty() && !gap.contains('`'))
        .take(clamp_gap_items(max_items))
        .collect()
}

pub(crate) fn write_output_schema(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create schema dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write schema {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_chatter() {
        let raw = "Sure! Here you go:\n{\"a\": {\"b\": \"}{\"}, \"c\": \"say \\\"hi\\\"\"}\ntrailing";
        assert_eq!(
            extract_json_object(raw).expect("object"),
            "{\"a\": {\"b\": \"}{\"}, \"c\": \"say \\\"hi\\\"\"}"
        );
    }

    #[test]
    fn extraction_errors_are_specific() {
        assert!(extract_json_object("  ").unwrap_err().to_string().contains("empty response"));
        assert!(
            extract_json_object("no json here")
                .unwrap_err()
                .to_string()
                .contains("no json object start")
        );
        assert!(
            extract_json_object("{\"a\": 1")
                .unwrap_err()
                .to_string()
                .contains("unterminated")
        );
    }

    #[test]
    fn scope_hints_accept_three_shapes() {
        let array = parse_spec_candidate(
            r#"{"candidatePrompt":"p","rationale":"r","scopeHints":["a","b"]}"#,
        )
        .expect("array");
        assert_eq!(array.scope_hints, vec!["a", "b"]);

        let single = parse_spec_candidate(r#"{"candidatePrompt":"p","scopeHints":"solo"}"#)
            .expect("single");
        assert_eq!(single.scope_hints, vec!["solo"]);

        let csv = parse_spec_candidate(r#"{"candidatePrompt":"p","scopeHints":"a, b,, c"}"#)
            .expect("csv");
        assert_eq!(csv.scope_hints, vec!["a", "b", "c"]);

        let mixed = parse_spec_candidate(r#"{"candidatePrompt":"p","scopeHints":["a",1]}"#)
            .expect("mixed");
        assert!(mixed.scope_hints.is_empty());
    }

    /// Verifies blank rationales fall back and blank prompts are rejected.
    #[test]
    fn candidate_defaults_and_rejections() {
        let parsed = parse_spec_candidate("```json\n{\"candidatePrompt\":\"  body  \"}\n```")
            .expect("parse");
        assert_eq!(parsed.candidate_prompt, "body");
        assert_eq!(parsed.rationale, DEFAULT_RATIONALE);

        let err = parse_spec_candidate(r#"{"candidatePrompt":"   "}"#).unwrap_err();
        assert!(err.to_string().contains("candidatePrompt is empty"));
    }

    #[test]
    fn judge_scores_are_clamped() {
        let high = parse_judge_verdict(r#"{"score": 1.7, "justification": " fine "}"#)
            .expect("parse");
        assert_eq!(high.score, 1.0);
        assert_eq!(high.justification, "fine");
        let low = parse_judge_verdict(r#"{"score": -2}"#).expect("parse");
        assert_eq!(low.score, 0.0);
    }

    #[test]
    fn gaps_drop_code_and_respect_limits() {
        let gaps = parse_intent_gaps(
            r#"{"gaps": ["retry policy differs", "uses `foo()`", " ", "logging scope differs", "extra"]}"#,
            2,
        )
        .expect("parse");
        assert_eq!(gaps, vec!["retry policy differs", "logging scope differs"]);
        assert_eq!(clamp_gap_items(0), 1);
        assert_eq!(clamp_gap_items(20), MAX_GAP_ITEMS);
    }
}
