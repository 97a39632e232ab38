//! Candidate pool generation against a scripted spec writer.

use retrospec::io::cancel::CancelledError;
use retrospec::io::config::SearchConfig;
use retrospec::pool::{
    CandidatePool, MAX_DRAFT_ATTEMPTS, NoValidCandidatesError, PoolRequest, SEED_INDEX,
    SEED_STYLE, build_pool,
};
use retrospec::test_support::{ScriptedAgent, ScriptedDraft, snapshot_for, well_formed_spec};

fn build(
    agent: &ScriptedAgent,
    config: &SearchConfig,
    message: &str,
    history: &[String],
) -> anyhow::Result<CandidatePool> {
    let target = snapshot_for("src/cache.rs", &["fn evict() {}"]);
    build_pool(
        agent,
        &PoolRequest {
            iteration: 2,
            context: "Objective anchor: keep it high-level.\n\nIteration: 1",
            previous_prompt: Some("earlier prompt"),
            previous_outcome: Some("tech 0.10 realism 0.70 final 0.25 test=pass"),
            history,
            commit_message: message,
            target: &target,
            config,
        },
    )
}

fn config(candidates: usize) -> SearchConfig {
    SearchConfig {
        candidates_per_iter: candidates,
        coder_runs_per_iter: 1,
        ..SearchConfig::default()
    }
}

#[test]
fn requests_carry_style_context_and_previous_attempt() {
    let agent = ScriptedAgent::new(vec![
        ScriptedDraft::Spec(well_formed_spec("cache eviction")),
        ScriptedDraft::Spec(well_formed_spec("cache expiry")),
    ]);

    build(&agent, &config(2), "", &[]).expect("pool");

    let requests = agent.draft_requests.borrow();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].style, "balanced high-level design request");
    assert_eq!(requests[1].style, "minimal-scope request focused on core behavior");
    for request in requests.iter() {
        assert_eq!(request.iteration, 2);
        assert!(request.feedback_text.starts_with("Objective anchor"));
        assert_eq!(request.previous_prompt.as_deref(), Some("earlier prompt"));
        assert!(request.violation_reason.is_none());
    }
}

#[test]
fn ranking_is_by_descending_pre_score() {
    let spec = well_formed_spec("cache eviction");
    let agent = ScriptedAgent::new(vec![
        ScriptedDraft::Spec(spec.clone()),
        ScriptedDraft::Spec(well_formed_spec("request routing under heavy load")),
    ]);
    let history = vec![spec.trim().to_string()];

    let pool = build(&agent, &config(2), "", &history).expect("pool");

    assert_eq!(pool.ranked.len(), 2);
    assert!(pool.ranked[0].pre_score >= pool.ranked[1].pre_score);
    // The repeated prompt has no novelty left and ranks last.
    assert_eq!(pool.ranked[1].index, 0);
    assert_eq!(pool.ranked[1].novelty, 0.0);
}

/// Verifies an exhausted slot is logged and the remaining slots still count.
#[test]
fn exhausted_slot_is_logged_with_its_last_error() {
    let mut drafts = vec![ScriptedDraft::Fail("backend unavailable".to_string()); MAX_DRAFT_ATTEMPTS];
    drafts.push(ScriptedDraft::Spec(well_formed_spec("cache eviction")));
    let agent = ScriptedAgent::new(drafts);

    let pool = build(&agent, &config(2), "", &[]).expect("pool");

    assert_eq!(pool.drafts.len(), 2);
    let failed = &pool.drafts[0];
    assert_eq!(failed.validation_retries, MAX_DRAFT_ATTEMPTS);
    let error = failed.generation_error.as_deref().expect("generation error");
    assert!(error.starts_with("failed after 5 attempts"), "got {error}");
    assert!(error.contains("backend unavailable"));
    assert_eq!(pool.ranked.len(), 1);
    assert_eq!(pool.ranked[0].index, 1);
    assert_eq!(pool.valid_prompts().len(), 1);
}

#[test]
fn seed_joins_the_pool_last() {
    let agent = ScriptedAgent::new(vec![ScriptedDraft::Spec(well_formed_spec("cache eviction"))]);

    let pool = build(&agent, &config(1), "Evict stale cache entries", &[]).expect("pool");

    assert_eq!(pool.drafts.len(), 2);
    let seed = &pool.drafts[1];
    assert_eq!(seed.index, SEED_INDEX);
    assert_eq!(seed.style, SEED_STYLE);
    assert!(seed.raw_spec_response.is_none());
    assert_eq!(pool.valid_prompts().len(), 2);
}

#[test]
fn empty_pool_is_an_error() {
    let agent = ScriptedAgent::new(Vec::new());

    let err = build(&agent, &config(1), "", &[]).unwrap_err();

    assert_eq!(
        err.downcast_ref::<NoValidCandidatesError>(),
        Some(&NoValidCandidatesError { iteration: 2 })
    );
    assert_eq!(agent.draft_requests.borrow().len(), MAX_DRAFT_ATTEMPTS);
}

#[test]
fn cancellation_is_not_retried() {
    let agent = ScriptedAgent::new(vec![ScriptedDraft::Cancelled]);

    let err = build(&agent, &config(3), "", &[]).unwrap_err();

    assert!(err.downcast_ref::<CancelledError>().is_some());
    assert_eq!(agent.draft_requests.borrow().len(), 1);
}

#[test]
fn length_cap_rejects_long_drafts() {
    let long = well_formed_spec(&"very detailed cache topic ".repeat(20));
    let agent = ScriptedAgent::new(vec![
        ScriptedDraft::Spec(long),
        ScriptedDraft::Spec(well_formed_spec("cache")),
    ]);
    let config = SearchConfig {
        max_length: 400,
        ..config(1)
    };

    let pool = build(&agent, &config, "", &[]).expect("pool");

    let requests = agent.draft_requests.borrow();
    let reason = requests[1].violation_reason.as_deref().expect("violation");
    assert!(reason.contains("exceeds max length"), "got {reason}");
    assert_eq!(pool.ranked[0].validation_retries, 1);
}
