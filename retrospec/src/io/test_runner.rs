//! Best-effort test runner for a produced working copy.
//!
//! The runner looks for a root-level build marker for each supported
//! ecosystem, runs the first matching test command under a timeout and
//! classifies the outcome. Only cancellation is passed up as an error: a
//! command that cannot even start is reported as a failing category.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{TestCategory, TestRunResult};
use crate::io::cancel::{CancelToken, CancelledError};
use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Marker file, program and arguments, in detection order.
const ECOSYSTEMS: &[(&str, &str, &[&str])] = &[
    ("go.mod", "go", &["test", "./..."]),
    ("package.json", "npm", &["test"]),
    ("Cargo.toml", "cargo", &["test"]),
];

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestRunResult>;
}

/// Runs the first recognized root-level test command.
#[derive(Debug, Clone, Default)]
pub struct RootTestRunner {
    cancel: Option<CancelToken>,
}

impl RootTestRunner {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }
}

impl TestRunner for RootTestRunner {
    #[instrument(skip_all, fields(workdir = %request.workdir.display()))]
    fn run(&self, request: &TestRequest) -> Result<TestRunResult> {
        let Some((marker, program, args)) = detect_ecosystem(&request.workdir) else {
            debug!("no recognized test marker");
            return Ok(TestRunResult::not_run(
                "no recognized test command at repository root",
            ));
        };
        if let Some(cancel) = &self.cancel {
            cancel.check()?;
        }
        info!(marker, program, "running best-effort tests");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        let output = match run_command_with_timeout(
            cmd,
            None,
            request.timeout,
            request.output_limit_bytes,
            self.cancel.as_ref(),
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), program, "test command could not start");
                return Ok(TestRunResult::failed(
                    TestCategory::TestFailure,
                    format!("{program} could not start"),
                ));
            }
        };
        write_test_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.timed_out {
            return Ok(TestRunResult::timed_out(format!("{program} timed out")));
        }
        if output.cancelled {
            return Err(anyhow!(CancelledError));
        }
        if output.status.success() {
            return Ok(TestRunResult::passed(format!("{program} passed")));
        }
        let category = classify_failure(&output.combined_text());
        Ok(TestRunResult::failed(
            category,
            format!("{program} failed ({category})"),
        ))
    }
}

fn detect_ecosystem(workdir: &Path) -> Option<(&'static str, &'static str, &'static [&'static str])> {
    ECOSYSTEMS
        .iter()
        .copied()
        .find(|(marker, _, _)| workdir.join(marker).exists())
}

/// Categorize failing test output by keyword.
pub fn classify_failure(output: &str) -> TestCategory {
    let output = output.to_lowercase();
    if contains_any(&output, &["compile", "build failed", "syntax error"]) {
        TestCategory::Compilation
    } else if contains_any(&output, &["assert", "expected", "failed", "panic"]) {
        TestCategory::UnitTest
    } else {
        TestCategory::TestFailure
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn write_test_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create test log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("tests"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("tests"));
    if output.timed_out {
        buf.push_str("\n[tests timed out]\n");
    }

    if buf.len() > output_limit {
        let cut = floor_char_boundary(&buf, output_limit);
        let truncated = format!("{}\n[truncated {} bytes]\n", &buf[..cut], buf.len() - cut);
        fs::write(path, truncated).with_context(|| format!("write test log {}", path.display()))?;
        return Ok(());
    }

    fs::write(path, buf).with_context(|| format!("write test log {}", path.display()))
}

pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path) -> TestRequest {
        TestRequest {
            workdir: dir.to_path_buf(),
            log_path: dir.join("logs").join("tests.log"),
            timeout: Duration::from_secs(5),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    #[test]
    fn classification_prefers_compilation() {
        assert_eq!(
            classify_failure("error: could not compile `x`\ntest failed"),
            TestCategory::Compilation
        );
        assert_eq!(
            classify_failure("--- FAIL: TestX\n    expected 1, got 2"),
            TestCategory::UnitTest
        );
        assert_eq!(classify_failure("exit status 1"), TestCategory::TestFailure);
        assert_eq!(classify_failure("SyntaxError: Syntax Error here"), TestCategory::Compilation);
    }

    /// Verifies a directory without markers is reported as not run.
    #[test]
    fn no_marker_means_not_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = RootTestRunner::default()
            .run(&request(temp.path()))
            .expect("run");
        assert!(!result.ran);
        assert!(result.passed);
        assert_eq!(result.category, TestCategory::NotRun);
        assert_eq!(
            result.summary,
            "no recognized test command at repository root"
        );
    }

    #[test]
    fn cancellation_is_an_error_not_a_category() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("package.json"), "{}").expect("write");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = RootTestRunner::new(cancel)
            .run(&request(temp.path()))
            .unwrap_err();

        assert!(err.downcast_ref::<CancelledError>().is_some());
        assert!(!temp.path().join("logs").exists());
    }

    #[test]
    fn detection_follows_ecosystem_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("Cargo.toml"), "").expect("write");
        fs::write(temp.path().join("package.json"), "{}").expect("write");
        let (marker, program, _) = detect_ecosystem(temp.path()).expect("detected");
        assert_eq!(marker, "package.json");
        assert_eq!(program, "npm");
    }

    #[test]
    fn char_boundary_never_splits_utf8() {
        let text = "aé";
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(floor_char_boundary(text, 10), 3);
    }
}
