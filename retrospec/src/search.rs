//! Search controller: the iteration loop.
//!
//! Each iteration builds a candidate pool, executes the top-ranked drafts in
//! isolated working copies, scores what they produced, feeds the best
//! attempt's divergence back into the next round and checks the stop rules.
//! Everything the loop carries between iterations lives in [`SearchState`].

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::agents::Agent;
use crate::agents::codex::{CodexAgent, CodexAgentConfig};
use crate::core::feedback::{
    EXECUTION_ISSUE_GAP, FeedbackPacket, build_initial_packet, build_iteration_packet,
    generation_context, objective_anchor,
};
use crate::core::realism::score_realism_heuristic;
use crate::core::state::{BestResult, SearchState, StopReason, final_score, select_best_attempt};
use crate::core::tech::score_tech_similarity;
use crate::core::types::{CommitInfo, DiffSnapshot, TestRunResult};
use crate::io::artifacts::{
    ArtifactPaths, AttemptLog, IterationLog, Metrics, RunLog, attempt_key, write_json, write_text,
};
use crate::io::cancel::{CancelToken, CancelledError};
use crate::io::config::SearchConfig;
use crate::io::executor::{CodexExecutor, ExecTimeoutError};
use crate::io::git::prepare_base_repo;
use crate::io::test_runner::{RootTestRunner, TestRequest, TestRunner};
use crate::io::workspace::{GitWorkspace, Workspace};
use crate::pool::{CandidateDraft, PoolRequest, build_pool};

const SKIPPED_TESTS_SUMMARY: &str = "coder session failed before test run";
const TIMED_OUT_SUMMARY: &str = "coder session timed out";

/// The loop ended without a single scored attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoBestResultError;

impl fmt::Display for NoBestResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no successful iteration produced a candidate")
    }
}

impl std::error::Error for NoBestResultError {}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: BestResult,
    pub stop_reason: StopReason,
    pub iterations: u32,
    pub artifacts_dir: PathBuf,
}

/// One executed draft with everything needed to log and compare it.
struct Attempt {
    log: AttemptLog,
    produced: DiffSnapshot,
}

pub struct SearchController<'a, A: ?Sized, W: ?Sized, T: ?Sized> {
    agent: &'a A,
    workspace: &'a W,
    tests: &'a T,
    config: &'a SearchConfig,
    paths: &'a ArtifactPaths,
    cancel: CancelToken,
}

impl<'a, A, W, T> SearchController<'a, A, W, T>
where
    A: Agent + ?Sized,
    W: Workspace + ?Sized,
    T: TestRunner + ?Sized,
{
    pub fn new(
        agent: &'a A,
        workspace: &'a W,
        tests: &'a T,
        config: &'a SearchConfig,
        paths: &'a ArtifactPaths,
        cancel: CancelToken,
    ) -> Self {
        Self {
            agent,
            workspace,
            tests,
            config,
            paths,
            cancel,
        }
    }

    /// Run the search for `commit`, whose change is `target`.
    #[instrument(skip_all, fields(target = %commit.target_sha))]
    pub fn run(&self, repo: &str, commit: &CommitInfo, target: &DiffSnapshot) -> Result<SearchOutcome> {
        let config = self.config;
        self.paths.ensure()?;
        write_text(&self.paths.target_patch(), &target.patch)?;

        let initial = build_initial_packet(target, &commit.commit_message, config.max_path_refs);
        let anchor = objective_anchor(&commit.commit_message, target);
        let mut state = SearchState::new(initial.render());

        let mut run_log = RunLog {
            repo: repo.to_string(),
            target_commit: commit.target_sha.clone(),
            parent_commit: commit.parent_sha.clone(),
            commit_message: commit.commit_message.clone(),
            alpha: config.alpha,
            threshold: config.threshold,
            max_iters: config.max_iters,
            best_iteration: None,
            stopped_reason: None,
            started_at: Utc::now(),
            completed_at: None,
            iterations: Vec::new(),
        };

        let mut stop_reason = StopReason::MaxItersReached;
        let mut iterations = 0;
        for iteration in 1..=config.max_iters {
            self.cancel.check()?;
            state.begin_iteration(iteration);
            iterations = iteration;

            let (log, best) = self.iterate(iteration, commit, target, &anchor, &mut state)?;
            let iteration_best = log.iteration_best_score;
            run_log.iterations.push(log);
            state.record_iteration_best(best);
            run_log.best_iteration = state.best.as_ref().map(|best| best.iteration);
            write_json(&self.paths.run_log(), &run_log)?;

            if let Some(reason) =
                state.evaluate_stop(iteration_best, iteration, config.threshold, config.max_iters)
            {
                stop_reason = reason;
                break;
            }
        }

        let best = state.best.clone().ok_or(NoBestResultError)?;
        info!(
            iteration = best.iteration,
            final_score = best.final_score,
            reason = %stop_reason,
            "search finished"
        );

        write_text(&self.paths.best_prompt(), &format!("{}\n", best.prompt))?;
        write_text(&self.paths.best_patch(), &best.patch)?;
        run_log.stopped_reason = Some(stop_reason);
        run_log.completed_at = Some(Utc::now());
        write_json(&self.paths.run_log(), &run_log)?;
        write_json(
            &self.paths.metrics(),
            &Metrics {
                tech_similarity: best.tech,
                realism_score: best.realism,
                final_score: best.final_score,
                alpha: config.alpha,
                best_iteration: best.iteration,
            },
        )?;

        Ok(SearchOutcome {
            best,
            stop_reason,
            iterations,
            artifacts_dir: self.paths.artifacts_dir.clone(),
        })
    }

    /// One full iteration. Returns its log and the iteration-best candidate;
    /// `state` gets the new history, feedback and previous-attempt context.
    fn iterate(
        &self,
        iteration: u32,
        commit: &CommitInfo,
        target: &DiffSnapshot,
        anchor: &str,
        state: &mut SearchState,
    ) -> Result<(IterationLog, BestResult)> {
        let config = self.config;
        let context = generation_context(anchor, &state.feedback_text);
        let pool = build_pool(
            self.agent,
            &PoolRequest {
                iteration,
                context: &context,
                previous_prompt: state.previous_prompt.as_deref(),
                previous_outcome: state.previous_outcome.as_deref(),
                history: &state.prompt_history,
                commit_message: &commit.commit_message,
                target,
                config,
            },
        )
        .with_context(|| format!("generate candidates for iteration {iteration}"))?;
        state.extend_history(pool.valid_prompts());

        let budget = config.coder_runs_per_iter.min(pool.ranked.len());
        info!(iteration, budget, valid = pool.ranked.len(), "executing top drafts");
        let mut attempts = Vec::with_capacity(budget);
        for (rank, draft) in pool.ranked.iter().take(budget).enumerate() {
            attempts.push(self.execute_attempt(iteration, rank + 1, draft, &commit.parent_sha, target)?);
        }

        let scores: Vec<f64> = attempts.iter().map(|a| a.log.final_score).collect();
        let selected = select_best_attempt(&scores)
            .ok_or_else(|| anyhow!("iteration {iteration} executed no attempts"))?;
        let chosen = &attempts[selected];

        let packet = self.feedback_packet(iteration, target, chosen)?;
        state.feedback_text = packet.render();
        state.previous_prompt = Some(chosen.log.candidate_prompt.clone());
        state.previous_outcome = Some(format!(
            "tech {:.2} realism {:.2} final {:.2} test={}",
            chosen.log.tech.score,
            chosen.log.realism.score,
            chosen.log.final_score,
            chosen.log.test_result.category
        ));
        info!(
            iteration,
            final_score = chosen.log.final_score,
            tech = chosen.log.tech.score,
            realism = chosen.log.realism.score,
            "iteration best attempt"
        );

        let best = BestResult {
            iteration,
            prompt: chosen.log.candidate_prompt.clone(),
            patch: chosen.produced.patch.clone(),
            tech: chosen.log.tech.score,
            realism: chosen.log.realism.score,
            final_score: chosen.log.final_score,
        };
        let log = IterationLog {
            iteration,
            drafts: pool.drafts,
            selected_attempt: selected,
            feedback_packet: packet,
            iteration_best_score: best.final_score,
            coder_attempts: attempts.into_iter().map(|a| a.log).collect(),
        };
        Ok((log, best))
    }

    #[instrument(skip_all, fields(iteration = iteration, rank = rank, style = %draft.style))]
    fn execute_attempt(
        &self,
        iteration: u32,
        rank: usize,
        draft: &CandidateDraft,
        parent_sha: &str,
        target: &DiffSnapshot,
    ) -> Result<Attempt> {
        self.cancel.check()?;
        let key = attempt_key(iteration, rank);
        let run_dir = self
            .workspace
            .create(&key, parent_sha)
            .with_context(|| format!("create worktree for iteration {iteration} candidate {rank}"))?;

        let attempt = self.score_attempt(&key, &run_dir, draft, target);
        self.cleanup(&run_dir);
        attempt.with_context(|| format!("score iteration {iteration} candidate {rank}"))
    }

    /// Runs the coder in `run_dir` and scores the result. The caller owns
    /// the working copy and removes it whatever this returns.
    fn score_attempt(
        &self,
        key: &str,
        run_dir: &Path,
        draft: &CandidateDraft,
        target: &DiffSnapshot,
    ) -> Result<Attempt> {
        let config = self.config;
        let execution = self.agent.execute(run_dir, &draft.prompt, config.timeout());
        if let Err(err) = &execution {
            if err.downcast_ref::<CancelledError>().is_some() {
                return Err(anyhow!(CancelledError));
            }
            warn!(err = %format!("{err:#}"), "execution failed, scoring partial result");
        }

        let produced = self
            .workspace
            .snapshot(run_dir)
            .context("snapshot produced patch")?;

        let tech = score_tech_similarity(target, &produced);
        let realism = score_realism_heuristic(&draft.prompt, &config.realism_config());
        let realism = match self.agent.judge_realism(&draft.prompt, config.judge_timeout()) {
            Ok(verdict) => realism.with_judge(verdict.score, &verdict.justification),
            Err(err) => {
                self.propagate_cancel(&err)?;
                warn!(err = %format!("{err:#}"), "judge unavailable, using heuristic realism");
                realism
            }
        };
        let final_score = final_score(config.alpha, tech.score, realism.score);

        let test_result = match &execution {
            Ok(_) => self
                .tests
                .run(&TestRequest {
                    workdir: run_dir.to_path_buf(),
                    log_path: self.paths.attempt_test_log(key),
                    timeout: config.test_timeout(),
                    output_limit_bytes: config.test_output_limit_bytes,
                })
                .context("run tests")?,
            Err(err) if err.downcast_ref::<ExecTimeoutError>().is_some() => {
                TestRunResult::timed_out(TIMED_OUT_SUMMARY)
            }
            Err(_) => TestRunResult::skipped_after_failure(SKIPPED_TESTS_SUMMARY),
        };

        let patch_path = self.paths.attempt_patch(key);
        write_text(&patch_path, &produced.patch)?;
        debug!(
            final_score,
            tech = tech.score,
            realism = realism.score,
            category = %test_result.category,
            "attempt scored"
        );

        let (coder_error, coder_final_message) = match execution {
            Ok(message) => (None, Some(message).filter(|m| !m.is_empty())),
            Err(err) => (Some(format!("{err:#}")), None),
        };

        Ok(Attempt {
            log: AttemptLog {
                candidate_index: draft.index,
                candidate_style: draft.style.clone(),
                candidate_prompt: draft.prompt.clone(),
                coder_error,
                coder_final_message,
                tech,
                realism,
                final_score,
                test_result,
                produced_patch_path: patch_path,
                produced_files: produced.changed_files.clone(),
            },
            produced,
        })
    }

    fn feedback_packet(
        &self,
        iteration: u32,
        target: &DiffSnapshot,
        chosen: &Attempt,
    ) -> Result<FeedbackPacket> {
        let config = self.config;
        let mut packet = build_iteration_packet(
            iteration,
            target,
            &chosen.produced,
            &chosen.log.tech,
            chosen.log.test_result.category,
            config.max_path_refs,
        );
        if chosen.log.coder_error.is_some() {
            packet.merge_gaps([EXECUTION_ISSUE_GAP]);
        }
        match self.agent.summarize_intent_gap(
            &target.patch,
            &chosen.produced.patch,
            config.gap_max_items,
            config.judge_timeout(),
        ) {
            Ok(gaps) => packet.merge_gaps(gaps),
            Err(err) => {
                self.propagate_cancel(&err)?;
                warn!(err = %format!("{err:#}"), "intent gap summary unavailable");
            }
        }
        Ok(packet)
    }

    fn propagate_cancel(&self, err: &anyhow::Error) -> Result<()> {
        if err.downcast_ref::<CancelledError>().is_some() || self.cancel.is_cancelled() {
            return Err(anyhow!(CancelledError));
        }
        Ok(())
    }

    fn cleanup(&self, run_dir: &Path) {
        if self.config.keep_runs {
            return;
        }
        if let Err(err) = self.workspace.remove(run_dir) {
            warn!(err = %format!("{err:#}"), path = %run_dir.display(), "failed to clean up worktree");
        }
    }
}

/// A complete run request from the command line.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub repo: String,
    pub commit: String,
    pub workdir: PathBuf,
    pub config: SearchConfig,
}

/// Acquire the repository, resolve the target and search with the real
/// collaborators. Infrastructure failures here abort before any iteration.
#[instrument(skip_all, fields(repo = %request.repo, commit = %request.commit))]
pub fn run_search(request: &RunRequest, cancel: CancelToken) -> Result<SearchOutcome> {
    let config = &request.config;
    config.validate()?;
    let paths = ArtifactPaths::new(&request.workdir);
    paths.ensure()?;

    let base = prepare_base_repo(&request.repo, &request.workdir)?;
    let commit = base.resolve_commit(&request.commit)?;
    let target = base
        .snapshot_between(&commit.parent_sha, &commit.target_sha)
        .context("collect target patch")?;
    info!(files = target.changed_files.len(), "collected target patch");

    let agent = CodexAgent::new(
        CodexExecutor::new(cancel.clone()),
        CodexAgentConfig {
            context_dir: base.workdir().to_path_buf(),
            scratch_dir: paths.agent_dir.clone(),
            model: config.resolved_model(),
            draft_timeout: config.timeout(),
            output_limit_bytes: config.agent_output_limit_bytes,
        },
    );
    let workspace = GitWorkspace::new(base, paths.runs_dir.clone());
    let tests = RootTestRunner::new(cancel.clone());

    SearchController::new(&agent, &workspace, &tests, config, &paths, cancel).run(
        &request.repo,
        &commit,
        &target,
    )
}
