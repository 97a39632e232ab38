//! [`Agent`] backed by `codex exec` through an [`Executor`].
//!
//! Each call gets its own numbered scratch directory holding the rendered
//! prompt, the agent's last message and the executor log, so a run can be
//! audited after the fact.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use super::{
    Agent, DraftRequest, DraftResponse, JudgeVerdict, MalformedDraftError, clamp_gap_items,
    parse_intent_gaps, parse_judge_verdict, parse_spec_candidate, write_output_schema,
};
use crate::io::artifacts::write_text;
use crate::io::executor::{ExecRequest, Executor, Sandbox, execute_and_read};
use crate::io::prompt::PromptEngine;

const SPEC_CANDIDATE_SCHEMA: &str = include_str!("../../schemas/spec_candidate.schema.json");
const JUDGE_SCHEMA: &str = include_str!("../../schemas/judge.schema.json");
const INTENT_GAPS_SCHEMA: &str = include_str!("../../schemas/intent_gaps.schema.json");

#[derive(Debug, Clone)]
pub struct CodexAgentConfig {
    /// Where read-only calls run; usually the base clone.
    pub context_dir: PathBuf,
    /// Per-call scratch directories are created here.
    pub scratch_dir: PathBuf,
    pub model: Option<String>,
    pub draft_timeout: Duration,
    pub output_limit_bytes: usize,
}

pub struct CodexAgent<E: Executor> {
    executor: E,
    engine: PromptEngine,
    config: CodexAgentConfig,
    calls: AtomicU32,
}

impl<E: Executor> CodexAgent<E> {
    pub fn new(executor: E, config: CodexAgentConfig) -> Self {
        Self {
            executor,
            engine: PromptEngine::new(),
            config,
            calls: AtomicU32::new(0),
        }
    }

    fn call_dir(&self, kind: &str) -> PathBuf {
        let seq = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        self.config.scratch_dir.join(format!("{seq:04}-{kind}"))
    }

    fn schema(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.config.scratch_dir.join("schemas").join(name);
        write_output_schema(&path, contents)?;
        Ok(path)
    }

    fn request(
        &self,
        call_dir: &Path,
        workdir: &Path,
        prompt: String,
        schema: Option<PathBuf>,
        timeout: Duration,
        sandbox: Sandbox,
    ) -> Result<ExecRequest> {
        write_text(&call_dir.join("prompt.md"), &prompt)?;
        Ok(ExecRequest {
            workdir: workdir.to_path_buf(),
            prompt,
            output_schema_path: schema,
            output_path: call_dir.join("last_message.txt"),
            log_path: call_dir.join("executor.log"),
            timeout,
            output_limit_bytes: self.config.output_limit_bytes,
            sandbox,
            model: self.config.model.clone(),
        })
    }
}

impl<E: Executor> Agent for CodexAgent<E> {
    #[instrument(skip_all, fields(iteration = request.iteration, style = %request.style))]
    fn generate_draft(&self, request: &DraftRequest) -> Result<DraftResponse> {
        let call_dir = self.call_dir("draft");
        let prompt = self.engine.render_spec_writer(request)?;
        let schema = self.schema("spec_candidate.schema.json", SPEC_CANDIDATE_SCHEMA)?;
        let exec = self.request(
            &call_dir,
            &self.config.context_dir,
            prompt,
            Some(schema),
            self.config.draft_timeout,
            Sandbox::ReadOnly,
        )?;
        let raw = execute_and_read(&self.executor, &exec).context("spec writer call")?;
        match parse_spec_candidate(&raw) {
            Ok(candidate) => Ok(DraftResponse { candidate, raw }),
            Err(err) => {
                debug!(err = %format!("{err:#}"), "spec writer returned malformed output");
                Err(MalformedDraftError {
                    raw,
                    reason: format!("{err:#}"),
                }
                .into())
            }
        }
    }

    #[instrument(skip_all)]
    fn judge_realism(&self, prompt: &str, timeout: Duration) -> Result<JudgeVerdict> {
        let call_dir = self.call_dir("judge");
        let rendered = self.engine.render_judge(prompt)?;
        let schema = self.schema("judge.schema.json", JUDGE_SCHEMA)?;
        let exec = self.request(
            &call_dir,
            &self.config.context_dir,
            rendered,
            Some(schema),
            timeout,
            Sandbox::ReadOnly,
        )?;
        let raw = execute_and_read(&self.executor, &exec).context("judge call")?;
        parse_judge_verdict(&raw)
    }

    #[instrument(skip_all, fields(max_items))]
    fn summarize_intent_gap(
        &self,
        target_patch: &str,
        produced_patch: &str,
        max_items: usize,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        let max_items = clamp_gap_items(max_items);
        let call_dir = self.call_dir("gaps");
        let rendered = self
            .engine
            .render_intent_gap(target_patch, produced_patch, max_items)?;
        let schema = self.schema("intent_gaps.schema.json", INTENT_GAPS_SCHEMA)?;
        let exec = self.request(
            &call_dir,
            &self.config.context_dir,
            rendered,
            Some(schema),
            timeout,
            Sandbox::ReadOnly,
        )?;
        let raw = execute_and_read(&self.executor, &exec).context("intent gap call")?;
        parse_intent_gaps(&raw, max_items)
    }

    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    fn execute(&self, workdir: &Path, prompt: &str, timeout: Duration) -> Result<String> {
        let call_dir = self.call_dir("coder");
        let rendered = self.engine.render_coder(prompt)?;
        let exec = self.request(
            &call_dir,
            workdir,
            rendered,
            None,
            timeout,
            Sandbox::FullAccess,
        )?;
        execute_and_read(&self.executor, &exec)
    }
}
