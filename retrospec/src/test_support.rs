//! Test-only fakes for the search collaborators and fixture builders.
//!
//! Each fake pops scripted responses in call order and records what it was
//! asked, so tests can drive whole iterations without a coding agent or git.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::agents::{
    Agent, DraftRequest, DraftResponse, JudgeVerdict, MalformedDraftError, SpecCandidate,
};
use crate::core::types::{DiffSnapshot, TestRunResult};
use crate::io::cancel::CancelledError;
use crate::io::executor::ExecTimeoutError;
use crate::io::test_runner::{TestRequest, TestRunner};
use crate::io::workspace::Workspace;

/// A four-section specification about `topic` that passes the validator.
pub fn well_formed_spec(topic: &str) -> String {
    format!(
        "# Context\n\
         Users report that {topic} behaves inconsistently today.\n\n\
         # Desired Outcomes\n\
         - {topic} should work the same way on every request.\n\n\
         # Constraints and Non-Goals\n\
         - Keep the public interface unchanged.\n\n\
         # Acceptance Criteria\n\
         - Tests demonstrate the expected behavior for {topic}.\n"
    )
}

/// Unified diff that adds `lines` to a new file at `path`.
pub fn patch_for(path: &str, lines: &[&str]) -> String {
    let mut patch = format!(
        "diff --git a/{path} b/{path}\n\
         new file mode 100644\n\
         --- /dev/null\n\
         +++ b/{path}\n\
         @@ -0,0 +1,{} @@\n",
        lines.len()
    );
    for line in lines {
        patch.push('+');
        patch.push_str(line);
        patch.push('\n');
    }
    patch
}

/// Snapshot of [`patch_for`].
pub fn snapshot_for(path: &str, lines: &[&str]) -> DiffSnapshot {
    DiffSnapshot::from_patch(patch_for(path, lines))
}

/// One scripted spec writer reply.
#[derive(Debug, Clone)]
pub enum ScriptedDraft {
    /// A parsed candidate with this prompt.
    Spec(String),
    /// Text that could not be parsed as a candidate.
    Malformed(String),
    /// A transport failure.
    Fail(String),
    Cancelled,
}

/// One scripted coder session.
#[derive(Debug, Clone)]
pub enum ScriptedExecution {
    Done(String),
    Fail(String),
    TimedOut,
    Cancelled,
}

/// [`Agent`] answering from queues.
///
/// Empty draft queues answer malformed, empty execution queues answer
/// `Done("done")`. A `None` judge or gap list fails the call; a cancelled
/// judge fails with [`CancelledError`].
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    drafts: RefCell<VecDeque<ScriptedDraft>>,
    executions: RefCell<VecDeque<ScriptedExecution>>,
    judge_score: Option<f64>,
    judge_cancelled: bool,
    gaps: Option<Vec<String>>,
    pub draft_requests: RefCell<Vec<DraftRequest>>,
    pub executed: RefCell<Vec<(PathBuf, String)>>,
    pub judged: RefCell<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(drafts: Vec<ScriptedDraft>) -> Self {
        Self {
            drafts: RefCell::new(drafts.into()),
            ..Self::default()
        }
    }

    pub fn with_executions(self, executions: Vec<ScriptedExecution>) -> Self {
        *self.executions.borrow_mut() = executions.into();
        self
    }

    pub fn with_judge(mut self, score: f64) -> Self {
        self.judge_score = Some(score);
        self
    }

    pub fn with_cancelled_judge(mut self) -> Self {
        self.judge_cancelled = true;
        self
    }

    pub fn with_gaps(mut self, gaps: &[&str]) -> Self {
        self.gaps = Some(gaps.iter().map(|gap| gap.to_string()).collect());
        self
    }

    pub fn executed_prompts(&self) -> Vec<String> {
        self.executed
            .borrow()
            .iter()
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

impl Agent for ScriptedAgent {
    fn generate_draft(&self, request: &DraftRequest) -> Result<DraftResponse> {
        self.draft_requests.borrow_mut().push(request.clone());
        let next = self
            .drafts
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ScriptedDraft::Malformed("no scripted draft".to_string()));
        match next {
            ScriptedDraft::Spec(prompt) => Ok(DraftResponse {
                raw: format!("{{\"candidatePrompt\": {prompt:?}}}"),
                candidate: SpecCandidate {
                    candidate_prompt: prompt,
                    rationale: "scripted".to_string(),
                    scope_hints: Vec::new(),
                },
            }),
            ScriptedDraft::Malformed(raw) => Err(MalformedDraftError {
                raw,
                reason: "no json object start found".to_string(),
            }
            .into()),
            ScriptedDraft::Fail(message) => Err(anyhow!(message)),
            ScriptedDraft::Cancelled => Err(anyhow!(CancelledError)),
        }
    }

    fn judge_realism(&self, prompt: &str, _timeout: Duration) -> Result<JudgeVerdict> {
        self.judged.borrow_mut().push(prompt.to_string());
        if self.judge_cancelled {
            return Err(anyhow!(CancelledError));
        }
        match self.judge_score {
            Some(score) => Ok(JudgeVerdict {
                score,
                justification: "scripted verdict".to_string(),
            }),
            None => bail!("judge unavailable"),
        }
    }

    fn summarize_intent_gap(
        &self,
        _target_patch: &str,
        _produced_patch: &str,
        max_items: usize,
        _timeout: Duration,
    ) -> Result<Vec<String>> {
        match &self.gaps {
            Some(gaps) => Ok(gaps.iter().take(max_items).cloned().collect()),
            None => bail!("gap summary unavailable"),
        }
    }

    fn execute(&self, workdir: &Path, prompt: &str, timeout: Duration) -> Result<String> {
        self.executed
            .borrow_mut()
            .push((workdir.to_path_buf(), prompt.to_string()));
        let next = self
            .executions
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ScriptedExecution::Done("done".to_string()));
        match next {
            ScriptedExecution::Done(message) => Ok(message),
            ScriptedExecution::Fail(message) => Err(anyhow!(message)),
            ScriptedExecution::TimedOut => Err(ExecTimeoutError { timeout }.into()),
            ScriptedExecution::Cancelled => Err(anyhow!(CancelledError)),
        }
    }
}

/// [`Workspace`] creating plain directories under `root` and returning
/// scripted snapshots (`None` fails the snapshot; an empty queue yields an
/// empty diff).
#[derive(Debug)]
pub struct ScriptedWorkspace {
    root: PathBuf,
    snapshots: RefCell<VecDeque<Option<DiffSnapshot>>>,
    pub created: RefCell<Vec<(String, String)>>,
    pub removed: RefCell<Vec<PathBuf>>,
}

impl ScriptedWorkspace {
    pub fn new(root: impl Into<PathBuf>, snapshots: Vec<Option<DiffSnapshot>>) -> Self {
        Self {
            root: root.into(),
            snapshots: RefCell::new(snapshots.into()),
            created: RefCell::new(Vec::new()),
            removed: RefCell::new(Vec::new()),
        }
    }

    pub fn created_keys(&self) -> Vec<String> {
        self.created.borrow().iter().map(|(key, _)| key.clone()).collect()
    }
}

impl Workspace for ScriptedWorkspace {
    fn create(&self, key: &str, commit: &str) -> Result<PathBuf> {
        let path = self.root.join(key);
        fs::create_dir_all(&path).with_context(|| format!("create {}", path.display()))?;
        self.created
            .borrow_mut()
            .push((key.to_string(), commit.to_string()));
        Ok(path)
    }

    fn snapshot(&self, _workdir: &Path) -> Result<DiffSnapshot> {
        match self.snapshots.borrow_mut().pop_front() {
            Some(Some(snapshot)) => Ok(snapshot),
            Some(None) => bail!("scripted snapshot failure"),
            None => Ok(DiffSnapshot::default()),
        }
    }

    fn remove(&self, workdir: &Path) -> Result<()> {
        self.removed.borrow_mut().push(workdir.to_path_buf());
        fs::remove_dir_all(workdir).with_context(|| format!("remove {}", workdir.display()))
    }
}

/// [`TestRunner`] returning scripted results; an empty queue passes.
#[derive(Debug, Default)]
pub struct ScriptedTestRunner {
    results: RefCell<VecDeque<TestRunResult>>,
    error: Option<String>,
    pub requests: RefCell<Vec<TestRequest>>,
}

impl ScriptedTestRunner {
    pub fn new(results: Vec<TestRunResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            ..Self::default()
        }
    }

    /// A runner whose every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestRunResult> {
        self.requests.borrow_mut().push(request.clone());
        if let Some(message) = &self.error {
            bail!("{message}");
        }
        Ok(self
            .results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| TestRunResult::passed("scripted tests passed")))
    }
}

/// Throwaway git repository with a committer identity configured.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo dir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet", "--initial-branch=main"])?;
        repo.git(&["config", "user.email", "tests@example.com"])?;
        repo.git(&["config", "user.name", "Retrospec Tests"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, contents: &str) -> Result<()> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Stage everything and commit; returns the new commit sha.
    pub fn commit(&self, message: &str) -> Result<String> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "-m", message])?;
        Ok(self.git(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("run git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
