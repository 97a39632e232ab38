//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::cancel::CancelToken;

/// How often a waiting child is checked against the cancellation token.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        truncation_notice(label, "stdout", self.stdout_truncated)
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        truncation_notice(label, "stderr", self.stderr_truncated)
    }

    /// Stdout and stderr as one lossy string, stdout first.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }
}

fn truncation_notice(label: &str, stream: &str, dropped: usize) -> String {
    if dropped == 0 {
        return String::new();
    }
    format!("\n[{label} {stream} truncated {dropped} bytes]\n")
}

/// How the wait for a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Exited,
    TimedOut,
    Cancelled,
}

/// The first `limit` bytes of a stream plus a count of everything dropped.
#[derive(Debug, Default)]
struct BoundedCapture {
    bytes: Vec<u8>,
    dropped: usize,
}

impl BoundedCapture {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        let keep = chunk.len().min(limit.saturating_sub(self.bytes.len()));
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.dropped += chunk.len() - keep;
    }
}

type CaptureHandle = thread::JoinHandle<Result<BoundedCapture>>;

/// Run `cmd` under a deadline, capturing both streams.
///
/// Both pipes are drained on their own threads before stdin is written, so a
/// chatty child can never block on a full pipe. At most `output_limit_bytes`
/// per stream are kept; the rest is counted and discarded. When `cancel`
/// fires the child is killed and the output is marked `cancelled`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: Option<&CancelToken>,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn command");
        anyhow!(err).context("spawn command")
    })?;

    let stdout = capture(child.stdout.take(), "stdout", output_limit_bytes)?;
    let stderr = capture(child.stderr.take(), "stderr", output_limit_bytes)?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading closes the pipe early.
        if let Err(err) = pipe.write_all(input) {
            debug!(err = %err, "child stopped reading stdin");
        }
    }

    let (status, outcome) = wait_until(&mut child, timeout, cancel)?;
    let stdout = finish(stdout).context("collect stdout")?;
    let stderr = finish(stderr).context("collect stderr")?;

    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_truncated = stdout.dropped,
            stderr_truncated = stderr.dropped,
            "output truncated"
        );
    }
    debug!(exit_code = ?status.code(), ?outcome, "command finished");

    Ok(CommandOutput {
        status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.dropped,
        stderr_truncated: stderr.dropped,
        timed_out: outcome == WaitOutcome::TimedOut,
        cancelled: outcome == WaitOutcome::Cancelled,
    })
}

fn capture<R>(pipe: Option<R>, name: &str, limit: usize) -> Result<CaptureHandle>
where
    R: Read + Send + 'static,
{
    let pipe = pipe.ok_or_else(|| anyhow!("{name} was not piped"))?;
    Ok(thread::spawn(move || drain(pipe, limit)))
}

fn finish(handle: CaptureHandle) -> Result<BoundedCapture> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn drain<R: Read>(mut reader: R, limit: usize) -> Result<BoundedCapture> {
    let mut captured = BoundedCapture::default();
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk).context("read output")?;
        if read == 0 {
            return Ok(captured);
        }
        captured.push(&chunk[..read], limit);
    }
}

/// Wait for `child`, killing it at the deadline or when `cancel` fires.
fn wait_until(
    child: &mut Child,
    timeout: Duration,
    cancel: Option<&CancelToken>,
) -> Result<(ExitStatus, WaitOutcome)> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let stop = if remaining.is_zero() {
            Some(WaitOutcome::TimedOut)
        } else if cancel.is_some_and(CancelToken::is_cancelled) {
            Some(WaitOutcome::Cancelled)
        } else {
            None
        };
        if let Some(outcome) = stop {
            warn!(?outcome, timeout_secs = timeout.as_secs(), "killing command");
            child.kill().context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            return Ok((status, outcome));
        }

        let slice = match cancel {
            Some(_) => remaining.min(POLL_INTERVAL),
            None => remaining,
        };
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            return Ok((status, WaitOutcome::Exited));
        }
    }
}
