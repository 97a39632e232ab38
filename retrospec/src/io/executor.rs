//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples the agent contract from the actual backend
//! (currently `codex exec`). Tests use scripted executors that write
//! predetermined last messages without spawning processes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::cancel::{CancelToken, CancelledError};
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::test_runner::floor_char_boundary;

/// How much the agent may touch in its working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sandbox {
    /// Drafting, judging and summarizing only read.
    ReadOnly,
    /// Execution edits files and runs tests in an isolated working copy.
    FullAccess,
}

impl Sandbox {
    fn as_arg(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::FullAccess => "danger-full-access",
        }
    }
}

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the executor process.
    pub workdir: PathBuf,
    /// Prompt text fed to the agent on stdin.
    pub prompt: String,
    /// JSON Schema constraining the final message, when structured output is expected.
    pub output_schema_path: Option<PathBuf>,
    /// Path where the agent writes its final message.
    pub output_path: PathBuf,
    /// Path to write executor stdout/stderr log.
    pub log_path: PathBuf,
    pub timeout: Duration,
    /// Truncate executor output logs beyond this many bytes.
    pub output_limit_bytes: usize,
    pub sandbox: Sandbox,
    pub model: Option<String>,
}

/// Returned when an executor invocation exceeds its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecTimeoutError {
    pub timeout: Duration,
}

impl fmt::Display for ExecTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent timed out after {}s", self.timeout.as_secs())
    }
}

impl std::error::Error for ExecTimeoutError {}

/// Abstraction over agent execution backends.
pub trait Executor {
    /// Run the agent. On success the final message is at `request.output_path`.
    fn exec(&self, request: &ExecRequest) -> Result<()>;
}

/// Executor that spawns `codex exec`.
#[derive(Debug, Clone, Default)]
pub struct CodexExecutor {
    cancel: Option<CancelToken>,
}

impl CodexExecutor {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }
}

impl Executor for CodexExecutor {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), sandbox = ?request.sandbox))]
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        if let Some(cancel) = &self.cancel {
            cancel.check()?;
        }
        info!(workdir = %request.workdir.display(), "starting codex exec");

        if let Some(schema) = &request.output_schema_path
            && !schema.exists()
        {
            return Err(anyhow!("missing output schema {}", schema.display()));
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let cmd = codex_command(request);
        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            self.cancel.as_ref(),
        )
        .context("run codex exec")?;

        write_executor_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.cancelled {
            return Err(CancelledError.into());
        }
        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "codex exec timed out"
            );
            return Err(ExecTimeoutError {
                timeout: request.timeout,
            }
            .into());
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "codex exec failed");
            return Err(anyhow!(
                "codex exec failed with status {:?}",
                output.status.code()
            ));
        }

        debug!("codex exec completed successfully");
        Ok(())
    }
}

/// `codex exec` reading the prompt from stdin and writing its final
/// message to `request.output_path`.
fn codex_command(request: &ExecRequest) -> Command {
    let mut cmd = Command::new("codex");
    cmd.current_dir(&request.workdir).args([
        "exec",
        "-c",
        "model_reasoning_effort=medium",
        "--sandbox",
        request.sandbox.as_arg(),
        "--skip-git-repo-check",
    ]);
    if let Some(model) = &request.model {
        cmd.arg("--model").arg(model);
    }
    if let Some(schema) = &request.output_schema_path {
        cmd.arg("--output-schema").arg(schema);
    }
    cmd.arg("--output-last-message")
        .arg(&request.output_path)
        .arg("-");
    cmd
}

/// Execute the agent and return its trimmed final message.
#[instrument(skip_all, fields(output_path = %request.output_path.display()))]
pub fn execute_and_read<E: Executor + ?Sized>(executor: &E, request: &ExecRequest) -> Result<String> {
    executor.exec(request)?;
    if !request.output_path.exists() {
        return Err(anyhow!(
            "missing executor output {}",
            request.output_path.display()
        ));
    }
    let contents = fs::read_to_string(&request.output_path)
        .with_context(|| format!("read agent output {}", request.output_path.display()))?;
    Ok(contents.trim().to_string())
}

fn write_executor_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create executor log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("executor"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("executor"));
    if output.timed_out {
        buf.push_str("\n[executor timed out]\n");
    }
    if output.cancelled {
        buf.push_str("\n[executor cancelled]\n");
    }

    if buf.len() > output_limit {
        let cut = floor_char_boundary(&buf, output_limit);
        buf = format!("{}\n[truncated {} bytes]\n", &buf[..cut], buf.len() - cut);
    }
    fs::write(path, buf).with_context(|| format!("write executor log {}", path.display()))
}
