//! Per-iteration candidate pool.
//!
//! Every generation style gets up to [`MAX_DRAFT_ATTEMPTS`] tries at producing
//! a draft that passes the validator, with the exact violation fed back into
//! the next request. Surviving drafts are ranked by a pre-execution score
//! mixing heuristic realism and novelty. One deterministic seed built from the
//! commit message is always offered alongside them.

use std::fmt;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::agents::{Agent, DraftRequest, MalformedDraftError, SpecCandidate};
use crate::core::feedback::{infer_intents, sanitize_one_line};
use crate::core::novelty::novelty_score;
use crate::core::realism::score_realism_heuristic;
use crate::core::types::DiffSnapshot;
use crate::core::validator::{validate_no_code, validate_prompt, validate_structure};
use crate::io::artifacts::DraftLog;
use crate::io::cancel::CancelledError;
use crate::io::config::SearchConfig;

pub const MAX_DRAFT_ATTEMPTS: usize = 5;

pub const SEED_STYLE: &str = "commit-message-seed";
pub const SEED_INDEX: usize = 1000;
const SEED_RATIONALE: &str = "Commit-message anchored seed to stabilize search around likely intent.";
const SEED_MAX_SCOPE: usize = 4;
const GENERIC_SCOPE: [&str; 3] = ["core behavior", "error handling", "test coverage"];

const BASE_STYLES: [&str; 5] = [
    "balanced high-level design request",
    "minimal-scope request focused on core behavior",
    "acceptance-criteria-first request",
    "resilience and error-handling focused request",
    "test-oriented request emphasizing observable behavior",
];
const FILLER_STYLE: &str = "balanced high-level design request with concise constraints";

const PRE_REALISM_WEIGHT: f64 = 0.8;
const PRE_NOVELTY_WEIGHT: f64 = 0.2;

const PARSE_RETRY_FEEDBACK: &str =
    "output must be strict JSON with candidatePrompt/rationale/scopeHints";

/// Every style slot failed and the seed could not be built either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoValidCandidatesError {
    pub iteration: u32,
}

impl fmt::Display for NoValidCandidatesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all candidate generations failed in iteration {}",
            self.iteration
        )
    }
}

impl std::error::Error for NoValidCandidatesError {}

/// A validated draft ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateDraft {
    pub index: usize,
    pub style: String,
    pub prompt: String,
    pub rationale: String,
    pub scope_hints: Vec<String>,
    pub validation_retries: usize,
    pub pre_realism: f64,
    pub novelty: f64,
    pub pre_score: f64,
}

impl CandidateDraft {
    fn scored(
        index: usize,
        style: &str,
        candidate: SpecCandidate,
        validation_retries: usize,
        history: &[String],
        config: &SearchConfig,
    ) -> Self {
        let realism = score_realism_heuristic(&candidate.candidate_prompt, &config.realism_config());
        let novelty = novelty_score(&candidate.candidate_prompt, history);
        Self {
            index,
            style: style.to_string(),
            pre_score: PRE_REALISM_WEIGHT * realism.heuristic_score + PRE_NOVELTY_WEIGHT * novelty,
            pre_realism: realism.heuristic_score,
            novelty,
            prompt: candidate.candidate_prompt,
            rationale: candidate.rationale,
            scope_hints: candidate.scope_hints,
            validation_retries,
        }
    }

    fn log(&self, raw: Option<String>) -> DraftLog {
        DraftLog {
            index: self.index,
            style: self.style.clone(),
            candidate_prompt: Some(self.prompt.clone()),
            rationale: Some(self.rationale.clone()),
            scope_hints: self.scope_hints.clone(),
            validation_retries: self.validation_retries,
            raw_spec_response: raw,
            pre_realism: Some(self.pre_realism),
            novelty: Some(self.novelty),
            pre_score: Some(self.pre_score),
            generation_error: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    /// One entry per slot in generation order, seed last.
    pub drafts: Vec<DraftLog>,
    /// Valid drafts by descending pre-score; ties keep generation order.
    pub ranked: Vec<CandidateDraft>,
}

impl CandidatePool {
    /// Valid prompts in generation order.
    pub fn valid_prompts(&self) -> Vec<String> {
        self.drafts
            .iter()
            .filter_map(|draft| draft.candidate_prompt.clone())
            .collect()
    }
}

/// Inputs shared by every slot of one pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolRequest<'a> {
    pub iteration: u32,
    /// Objective anchor plus the carried feedback text.
    pub context: &'a str,
    pub previous_prompt: Option<&'a str>,
    pub previous_outcome: Option<&'a str>,
    /// Prompts validated in earlier iterations.
    pub history: &'a [String],
    pub commit_message: &'a str,
    pub target: &'a DiffSnapshot,
    pub config: &'a SearchConfig,
}

enum SlotOutcome {
    Valid {
        candidate: SpecCandidate,
        raw: String,
        retries: usize,
    },
    Exhausted {
        raw: Option<String>,
        error: String,
    },
}

/// Fails with [`NoValidCandidatesError`] when nothing validated.
#[instrument(skip_all, fields(iteration = request.iteration))]
pub fn build_pool<A: Agent + ?Sized>(agent: &A, request: &PoolRequest<'_>) -> Result<CandidatePool> {
    let styles = candidate_styles(request.config.candidates_per_iter);
    info!(count = styles.len(), "generating candidate drafts");

    let mut pool = CandidatePool::default();
    for (index, style) in styles.into_iter().enumerate() {
        match generate_valid(agent, request, style)? {
            SlotOutcome::Valid {
                candidate,
                raw,
                retries,
            } => {
                let draft = CandidateDraft::scored(
                    index,
                    style,
                    candidate,
                    retries,
                    request.history,
                    request.config,
                );
                debug!(index, pre_score = draft.pre_score, retries, "draft validated");
                pool.drafts.push(draft.log(Some(raw)));
                pool.ranked.push(draft);
            }
            SlotOutcome::Exhausted { raw, error } => {
                warn!(index, style, error = %error, "draft slot dropped");
                pool.drafts.push(DraftLog {
                    index,
                    style: style.to_string(),
                    validation_retries: MAX_DRAFT_ATTEMPTS,
                    raw_spec_response: raw,
                    generation_error: Some(error),
                    ..DraftLog::default()
                });
            }
        }
    }

    if let Some(seed) = seed_candidate(
        request.commit_message,
        request.target,
        request.history,
        request.config,
    ) {
        pool.drafts.push(seed.log(None));
        pool.ranked.push(seed);
    }

    if pool.ranked.is_empty() {
        return Err(NoValidCandidatesError {
            iteration: request.iteration,
        }
        .into());
    }
    pool.ranked
        .sort_by(|a, b| b.pre_score.total_cmp(&a.pre_score));
    Ok(pool)
}

fn generate_valid<A: Agent + ?Sized>(
    agent: &A,
    request: &PoolRequest<'_>,
    style: &str,
) -> Result<SlotOutcome> {
    let mut violation: Option<String> = None;
    let mut last_raw: Option<String> = None;
    let mut last_error = String::from("unknown spec writer failure");

    for attempt in 0..MAX_DRAFT_ATTEMPTS {
        let draft_request = DraftRequest {
            iteration: request.iteration,
            feedback_text: request.context.to_string(),
            max_path_refs: request.config.max_path_refs,
            max_length: request.config.max_length,
            style: style.to_string(),
            previous_prompt: request.previous_prompt.map(str::to_string),
            previous_outcome: request.previous_outcome.map(str::to_string),
            violation_reason: violation.take(),
        };

        let response = match agent.generate_draft(&draft_request) {
            Ok(response) => response,
            Err(err) => {
                if err.downcast_ref::<CancelledError>().is_some() {
                    return Err(err);
                }
                if let Some(malformed) = err.downcast_ref::<MalformedDraftError>() {
                    last_raw = Some(malformed.raw.clone());
                }
                debug!(attempt, err = %format!("{err:#}"), "draft generation failed");
                last_error = format!("{err:#}");
                violation = Some(PARSE_RETRY_FEEDBACK.to_string());
                continue;
            }
        };
        last_raw = Some(response.raw.clone());

        let candidate = response.candidate;
        if let Err(found) = validate_no_code(&candidate.candidate_prompt, request.config.max_length) {
            debug!(attempt, violation = %found, "draft violates no-code rules");
            last_error = found.to_string();
            violation = Some(format!("no-code constraint violation: {found}"));
            continue;
        }
        if let Err(found) = validate_structure(&candidate.candidate_prompt) {
            debug!(attempt, violation = %found, "draft violates structure");
            last_error = found.to_string();
            violation = Some(format!("structured format violation: {found}"));
            continue;
        }

        return Ok(SlotOutcome::Valid {
            candidate: SpecCandidate {
                candidate_prompt: candidate.candidate_prompt.trim().to_string(),
                rationale: candidate.rationale.trim().to_string(),
                scope_hints: candidate.scope_hints,
            },
            raw: response.raw,
            retries: attempt,
        });
    }

    Ok(SlotOutcome::Exhausted {
        raw: last_raw,
        error: format!("failed after {MAX_DRAFT_ATTEMPTS} attempts: {last_error}"),
    })
}

/// The first `n` base styles, padded with a filler style.
pub fn candidate_styles(n: usize) -> Vec<&'static str> {
    let mut styles: Vec<&'static str> = BASE_STYLES.iter().copied().take(n).collect();
    styles.resize(n, FILLER_STYLE);
    styles
}

/// Deterministic candidate derived from the commit message and the target's
/// intent signals. `None` when the message is empty or the result does not
/// validate.
pub fn seed_candidate(
    commit_message: &str,
    target: &DiffSnapshot,
    history: &[String],
    config: &SearchConfig,
) -> Option<CandidateDraft> {
    let objective = sanitize_one_line(commit_message);
    let objective = objective.trim_end_matches('.').trim();
    if objective.is_empty() {
        return None;
    }

    let intents = infer_intents(target);
    let scope: Vec<String> = if intents.is_empty() {
        GENERIC_SCOPE.iter().map(|s| s.to_string()).collect()
    } else {
        intents.into_iter().take(SEED_MAX_SCOPE).collect()
    };

    let mut prompt = seed_prompt(&objective.to_lowercase(), &scope);
    if config.max_length > 0 && prompt.len() > config.max_length {
        let mut cut = config.max_length;
        while !prompt.is_char_boundary(cut) {
            cut -= 1;
        }
        prompt.truncate(cut);
    }
    if let Err(violation) = validate_prompt(&prompt, config.max_length) {
        debug!(violation = %violation, "seed candidate omitted");
        return None;
    }

    Some(CandidateDraft::scored(
        SEED_INDEX,
        SEED_STYLE,
        SpecCandidate {
            candidate_prompt: prompt,
            rationale: SEED_RATIONALE.to_string(),
            scope_hints: scope,
        },
        0,
        history,
        config,
    ))
}

fn seed_prompt(objective: &str, scope: &[String]) -> String {
    format!(
        "# Context\n\
         We need to {objective}, while keeping existing behavior stable for current users.\n\n\
         # Desired Outcomes\n\
         The change should be complete end to end, covering {scope} so the affected areas behave consistently and predictably.\n\n\
         # Constraints and Non-Goals\n\
         Keep scope focused on this objective, avoid unrelated refactors, and preserve existing interfaces unless the change requires otherwise.\n\n\
         # Acceptance Criteria\n\
         The new behavior is observable in normal use, error paths are explicit, and tests cover both successful and unsuccessful scenarios.",
        scope = scope.join(", "),
    )
}
