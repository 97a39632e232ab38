//! Search configuration, loaded from an optional TOML file and CLI overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::realism::RealismConfig;
use crate::io::test_runner::DEFAULT_OUTPUT_LIMIT_BYTES;

/// Environment fallback for the agent model.
pub const MODEL_ENV: &str = "RETROSPEC_MODEL";

/// Best-effort tests never get less than this.
const MIN_TEST_TIMEOUT_SECS: u64 = 30;

/// Search configuration (TOML).
///
/// Missing fields default to the values below, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub max_iters: u32,
    /// Stop once an iteration's best final score reaches this.
    pub threshold: f64,
    /// Per-attempt execution timeout in seconds.
    pub timeout_secs: u64,
    /// Weight of technical similarity against realism.
    pub alpha: f64,
    pub max_path_refs: usize,
    pub max_identifiers: usize,
    /// Prompt length cap in bytes; `0` means unlimited.
    pub max_length: usize,
    pub candidates_per_iter: usize,
    pub coder_runs_per_iter: usize,
    /// Keep isolated working copies after scoring.
    pub keep_runs: bool,
    pub judge_timeout_secs: u64,
    pub gap_max_items: usize,
    pub agent_output_limit_bytes: usize,
    pub test_output_limit_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_iters: 8,
            threshold: 0.9,
            timeout_secs: 600,
            alpha: 0.75,
            max_path_refs: 3,
            max_identifiers: 25,
            max_length: 0,
            candidates_per_iter: 3,
            coder_runs_per_iter: 2,
            keep_runs: false,
            judge_timeout_secs: 90,
            gap_max_items: 4,
            agent_output_limit_bytes: 100_000,
            test_output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            model: None,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iters == 0 {
            bail!("max_iters must be > 0");
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            bail!("threshold must be in [0,1]");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be > 0");
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            bail!("alpha must be in [0,1]");
        }
        if self.max_identifiers < 1 {
            bail!("max_identifiers must be >= 1");
        }
        if self.candidates_per_iter < 1 {
            bail!("candidates_per_iter must be >= 1");
        }
        if self.coder_runs_per_iter < 1 {
            bail!("coder_runs_per_iter must be >= 1");
        }
        if self.coder_runs_per_iter > self.candidates_per_iter {
            bail!("coder_runs_per_iter must be <= candidates_per_iter");
        }
        if self.judge_timeout_secs == 0 {
            bail!("judge_timeout_secs must be > 0");
        }
        if self.agent_output_limit_bytes == 0 || self.test_output_limit_bytes == 0 {
            bail!("output limits must be > 0");
        }
        Ok(())
    }

    pub fn realism_config(&self) -> RealismConfig {
        RealismConfig {
            max_path_refs: self.max_path_refs,
            max_identifiers: self.max_identifiers,
            max_length: self.max_length,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn judge_timeout(&self) -> Duration {
        Duration::from_secs(self.judge_timeout_secs)
    }

    /// `max(30s, timeout / 4)`.
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs((self.timeout_secs / 4).max(MIN_TEST_TIMEOUT_SECS))
    }

    /// Configured model, else [`MODEL_ENV`], else the backend default.
    pub fn resolved_model(&self) -> Option<String> {
        let configured = self
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        configured.or_else(|| {
            env::var(MODEL_ENV)
                .ok()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
        })
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = overrides.$field {
                    self.$field = value;
                })*
            };
        }
        take!(
            max_iters,
            threshold,
            timeout_secs,
            alpha,
            max_path_refs,
            max_identifiers,
            max_length,
            candidates_per_iter,
            coder_runs_per_iter,
        );
        if overrides.keep_runs {
            self.keep_runs = true;
        }
        if let Some(model) = &overrides.model {
            self.model = Some(model.clone());
        }
    }
}

/// Command-line values layered over the file config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_iters: Option<u32>,
    pub threshold: Option<f64>,
    pub timeout_secs: Option<u64>,
    pub alpha: Option<f64>,
    pub max_path_refs: Option<usize>,
    pub max_identifiers: Option<usize>,
    pub max_length: Option<usize>,
    pub candidates_per_iter: Option<usize>,
    pub coder_runs_per_iter: Option<usize>,
    pub keep_runs: bool,
    pub model: Option<String>,
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SearchConfig::default()`. Validation is
/// left to the caller so overrides can be applied first.
pub fn load_config(path: &Path) -> Result<SearchConfig> {
    if !path.exists() {
        return Ok(SearchConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SearchConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
