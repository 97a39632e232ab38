//! Reverse-engineer a natural-language specification from a commit.
//!
//! `retrospec run` drives the search against a repository and commit;
//! the remaining subcommands expose the config file and the pure scorers.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use retrospec::core::tech::score_tech_similarity;
use retrospec::core::types::DiffSnapshot;
use retrospec::core::validator::validate_prompt;
use retrospec::exit_codes;
use retrospec::io::cancel::{CancelToken, CancelledError};
use retrospec::io::config::{ConfigOverrides, SearchConfig, load_config, write_config};
use retrospec::logging;
use retrospec::search::{RunRequest, SearchOutcome, run_search};

const DEFAULT_CONFIG_PATH: &str = "retrospec.toml";

#[derive(Parser)]
#[command(
    name = "retrospec",
    version,
    about = "Search for a specification that reproduces a commit"
)]
struct Cli {
    /// Log search progress to stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search for the best specification for a commit.
    Run(RunArgs),
    /// Write the default configuration file.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Check a specification file against the no-code and structure rules.
    Validate {
        file: PathBuf,
        /// Maximum length in characters, 0 for unlimited.
        #[arg(long, default_value_t = 0)]
        max_length: usize,
    },
    /// Print the technical similarity of two patch files as JSON.
    Score {
        #[arg(long)]
        target: PathBuf,
        #[arg(long)]
        produced: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Local path or remote reference (`owner/repo`, host path or URL).
    #[arg(long)]
    repo: String,
    /// Target commit; must have a parent.
    #[arg(long)]
    commit: String,
    #[arg(long, default_value = "./work")]
    workdir: PathBuf,
    /// Config file; `retrospec.toml` is used when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    max_iters: Option<u32>,
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long)]
    alpha: Option<f64>,
    #[arg(long)]
    max_path_refs: Option<usize>,
    #[arg(long)]
    max_identifiers: Option<usize>,
    #[arg(long)]
    max_length: Option<usize>,
    #[arg(long)]
    candidates_per_iter: Option<usize>,
    #[arg(long)]
    coder_runs_per_iter: Option<usize>,
    /// Keep per-attempt worktrees after scoring.
    #[arg(long)]
    keep_runs: bool,
    #[arg(long)]
    model: Option<String>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            max_iters: self.max_iters,
            threshold: self.threshold,
            timeout_secs: self.timeout_secs,
            alpha: self.alpha,
            max_path_refs: self.max_path_refs,
            max_identifiers: self.max_identifiers,
            max_length: self.max_length,
            candidates_per_iter: self.candidates_per_iter,
            coder_runs_per_iter: self.coder_runs_per_iter,
            keep_runs: self.keep_runs,
            model: self.model.clone(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::InitConfig { path, force } => report(cmd_init_config(&path, force)),
        Command::Validate { file, max_length } => cmd_validate(&file, max_length),
        Command::Score { target, produced } => report(cmd_score(&target, &produced)),
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn report(result: Result<()>) -> i32 {
    match result {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    }
}

fn cmd_run(args: &RunArgs) -> i32 {
    let request = match run_request(args) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::INVALID;
        }
    };

    let cancel = CancelToken::new();
    if let Err(err) = cancel.install_ctrlc_handler() {
        eprintln!("{err:#}");
        return exit_codes::FAILED;
    }

    match run_search(&request, cancel) {
        Ok(outcome) => {
            print_outcome(&outcome);
            exit_codes::OK
        }
        Err(err) if err.downcast_ref::<CancelledError>().is_some() => {
            eprintln!("{err:#}");
            exit_codes::CANCELLED
        }
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FAILED
        }
    }
}

fn run_request(args: &RunArgs) -> Result<RunRequest> {
    let mut config = match &args.config {
        Some(path) if !path.exists() => bail!("config file {} not found", path.display()),
        Some(path) => load_config(path)?,
        None => load_config(Path::new(DEFAULT_CONFIG_PATH))?,
    };
    config.apply(&args.overrides());
    config.validate()?;

    let workdir = std::path::absolute(&args.workdir)
        .with_context(|| format!("resolve workdir {}", args.workdir.display()))?;
    Ok(RunRequest {
        repo: args.repo.clone(),
        commit: args.commit.clone(),
        workdir,
        config,
    })
}

fn print_outcome(outcome: &SearchOutcome) {
    let best = &outcome.best;
    println!("Best iteration: {}", best.iteration);
    println!("Technical similarity: {:.4}", best.tech);
    println!("Realism score: {:.4}", best.realism);
    println!("Final score: {:.4}", best.final_score);
    println!("Stop reason: {}", outcome.stop_reason);
    println!("Artifacts: {}", outcome.artifacts_dir.display());
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &SearchConfig::default())?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_validate(file: &Path, max_length: usize) -> i32 {
    let text = match fs::read_to_string(file).with_context(|| format!("read {}", file.display())) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::INVALID;
        }
    };
    match validate_prompt(text.trim(), max_length) {
        Ok(()) => {
            println!("ok");
            exit_codes::OK
        }
        Err(violation) => {
            println!("{violation}");
            exit_codes::INVALID
        }
    }
}

fn cmd_score(target: &Path, produced: &Path) -> Result<()> {
    let target = read_patch(target)?;
    let produced = read_patch(produced)?;
    let score = score_tech_similarity(&target, &produced);
    println!(
        "{}",
        serde_json::to_string_pretty(&score).context("serialize score")?
    );
    Ok(())
}

fn read_patch(path: &Path) -> Result<DiffSnapshot> {
    let patch = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(DiffSnapshot::from_patch(patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "retrospec",
            "run",
            "--repo",
            "owner/repo",
            "--commit",
            "abc123",
            "--max-iters",
            "2",
            "--keep-runs",
            "--verbose",
        ]);
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.workdir, PathBuf::from("./work"));
        let overrides = args.overrides();
        assert_eq!(overrides.max_iters, Some(2));
        assert!(overrides.keep_runs);
        assert_eq!(overrides.alpha, None);
    }

    #[test]
    fn parse_init_config_defaults() {
        let cli = Cli::parse_from(["retrospec", "init-config"]);
        assert!(matches!(
            cli.command,
            Command::InitConfig { ref path, force: false } if path == Path::new(DEFAULT_CONFIG_PATH)
        ));
    }

    #[test]
    fn run_requires_repo_and_commit() {
        assert!(Cli::try_parse_from(["retrospec", "run", "--repo", "x"]).is_err());
    }

    #[test]
    fn explicit_missing_config_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cli = Cli::parse_from([
            "retrospec",
            "run",
            "--repo",
            ".",
            "--commit",
            "HEAD",
            "--config",
            temp.path().join("missing.toml").to_str().expect("utf8"),
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let err = run_request(&args).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn invalid_override_fails_validation() {
        let cli = Cli::parse_from([
            "retrospec",
            "run",
            "--repo",
            ".",
            "--commit",
            "HEAD",
            "--alpha",
            "1.5",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(run_request(&args).is_err());
    }
}
