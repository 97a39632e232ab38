//! Git adapter for the search.
//!
//! Everything version-control related goes through `git` subprocesses:
//! acquiring the base clone, resolving the target commit (with fetch
//! fallbacks), extracting diff snapshots and managing isolated worktrees.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{CommitInfo, DiffSnapshot, FileStat};

static OWNER_REPO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+(?:\.git)?$").expect("owner/repo regex")
});
static HOST_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.-]+/[A-Za-z0-9_.-]+(?:/[A-Za-z0-9_.-]+)?(?:\.git)?$")
        .expect("host/path regex")
});

const KNOWN_HOSTS: &[&str] = &["github.com/", "gitlab.com/", "bitbucket.org/"];

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Fail unless `commit` resolves locally, fetching in widening steps:
    /// the SHA itself, then all tags and branches, then an unshallow fetch.
    #[instrument(skip_all, fields(commit))]
    pub fn ensure_commit_available(&self, commit: &str) -> Result<()> {
        let commit = commit.trim();
        if commit.is_empty() {
            bail!("empty commit");
        }
        if self.commit_exists(commit) {
            return Ok(());
        }

        debug!("commit not local, fetching by sha");
        if self.run_checked(&["fetch", "--no-tags", "origin", commit]).is_ok()
            && self.commit_exists(commit)
        {
            return Ok(());
        }

        debug!("fetching all tags and branches");
        self.best_effort(&["fetch", "--tags", "origin"]);
        self.best_effort(&[
            "fetch",
            "--no-tags",
            "origin",
            "+refs/heads/*:refs/remotes/origin/*",
        ]);
        if self.commit_exists(commit) {
            return Ok(());
        }

        if self.is_shallow() {
            debug!("unshallowing clone");
            self.best_effort(&["fetch", "--unshallow", "origin"]);
            if self.commit_exists(commit) {
                return Ok(());
            }
        }

        let verify = format!("{commit}^{{commit}}");
        self.run_checked(&["rev-parse", "--verify", &verify])
            .context("target commit not available after fetch")?;
        Ok(())
    }

    /// Resolve the target commit, its parent and its message.
    #[instrument(skip_all, fields(commit))]
    pub fn resolve_commit(&self, commit: &str) -> Result<CommitInfo> {
        self.ensure_commit_available(commit)?;
        let commit = commit.trim();
        let target = self.run_capture(&["rev-parse", commit])?;
        let parent_ref = format!("{commit}^");
        let parent = self
            .run_capture(&["rev-parse", &parent_ref])
            .context("resolve parent commit (target must have a parent)")?;
        let message = self.run_capture(&["show", "-s", "--format=%s%n%b", commit])?;
        let info = CommitInfo {
            target_sha: target.trim().to_string(),
            parent_sha: parent.trim().to_string(),
            commit_message: message.trim().to_string(),
        };
        info!(target = %info.target_sha, parent = %info.parent_sha, "resolved target commit");
        Ok(info)
    }

    /// Snapshot of the change between two revisions.
    pub fn snapshot_between(&self, from: &str, to: &str) -> Result<DiffSnapshot> {
        self.snapshot(&[from, to])
    }

    /// Snapshot of a working copy against its checked-out commit, including
    /// files the agent created but never staged.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn snapshot_worktree(&self) -> Result<DiffSnapshot> {
        self.run_checked(&["add", "--intent-to-add", "."])
            .context("register untracked files")?;
        self.snapshot(&[])
    }

    /// Renames show as a deletion plus an addition so the patch, name list
    /// and numstat all key files by the same plain paths.
    fn snapshot(&self, revs: &[&str]) -> Result<DiffSnapshot> {
        let diff = |flags: &[&str]| -> Result<String> {
            let mut args = vec!["diff", "--no-renames"];
            args.extend_from_slice(flags);
            args.extend_from_slice(revs);
            self.run_capture(&args)
        };
        let patch = diff(&["--no-color"])?;
        let names = diff(&["--name-only"])?;
        let numstat = diff(&["--numstat"])?;
        let snapshot = DiffSnapshot::new(patch, parse_name_list(&names), parse_numstat(&numstat));
        debug!(files = snapshot.changed_files.len(), "collected diff snapshot");
        Ok(snapshot)
    }

    /// Create a detached worktree at `commit`, clearing stale registrations first.
    #[instrument(skip_all, fields(path = %path.display(), commit))]
    pub fn add_worktree(&self, path: &Path, commit: &str) -> Result<()> {
        let path_arg = path.to_string_lossy();
        self.best_effort(&["worktree", "remove", "--force", &path_arg]);
        self.best_effort(&["worktree", "prune"]);
        if path.exists() {
            fs::remove_dir_all(path)
                .with_context(|| format!("clean worktree path {}", path.display()))?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create runs dir {}", parent.display()))?;
        }
        self.run_checked(&["worktree", "add", "--detach", &path_arg, commit])?;
        Ok(())
    }

    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        let path_arg = path.to_string_lossy();
        self.run_checked(&["worktree", "remove", "--force", &path_arg])?;
        self.best_effort(&["worktree", "prune"]);
        Ok(())
    }

    pub fn origin_url(&self) -> Result<String> {
        Ok(self
            .run_capture(&["remote", "get-url", "origin"])?
            .trim()
            .to_string())
    }

    fn commit_exists(&self, commit: &str) -> bool {
        let verify = format!("{commit}^{{commit}}");
        self.run(&["rev-parse", "--verify", "--quiet", &verify])
            .is_ok_and(|out| out.status.success())
    }

    fn is_shallow(&self) -> bool {
        self.run_capture(&["rev-parse", "--is-shallow-repository"])
            .is_ok_and(|out| out.trim() == "true")
    }

    fn best_effort(&self, args: &[&str]) {
        if let Err(err) = self.run_checked(args) {
            debug!(err = %format!("{err:#}"), "best-effort git command failed");
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Fresh `--no-hardlinks` clone of `repo` at `<workdir>/base`.
///
/// A local source's own `origin` URL is copied onto the clone so later fetch
/// fallbacks reach the real upstream.
#[instrument(skip_all, fields(repo))]
pub fn prepare_base_repo(repo: &str, workdir: &Path) -> Result<Git> {
    fs::create_dir_all(workdir)
        .with_context(|| format!("create workdir {}", workdir.display()))?;
    let base = workdir.join("base");
    if base.exists() {
        fs::remove_dir_all(&base)
            .with_context(|| format!("remove existing base repo {}", base.display()))?;
    }

    let local_source = local_source_path(repo);
    let source = match &local_source {
        Some(path) => path.to_string_lossy().into_owned(),
        None => remote_clone_url(repo)?,
    };
    info!(source = %source, "cloning base repository");

    let base_arg = base.to_string_lossy();
    Git::new(workdir).run_checked(&["clone", "--no-hardlinks", &source, &base_arg])?;
    let git = Git::new(&base);

    if let Some(local) = local_source {
        match Git::new(&local).origin_url() {
            Ok(url) if !url.is_empty() => git.best_effort(&["remote", "set-url", "origin", &url]),
            Ok(_) => {}
            Err(err) => debug!(err = %format!("{err:#}"), "local source has no origin remote"),
        }
    }

    Ok(git)
}

/// Absolute path of `repo` when it names an existing local directory,
/// expanding a leading `~/`.
pub fn local_source_path(repo: &str) -> Option<PathBuf> {
    let repo = repo.trim();
    if repo.is_empty() {
        return None;
    }
    let candidates = [
        Some(PathBuf::from(repo)),
        repo.strip_prefix("~/")
            .and_then(|rest| dirs::home_dir().map(|home| home.join(rest))),
    ];
    candidates.into_iter().flatten().find_map(|path| {
        if !path.exists() {
            return None;
        }
        match std::path::absolute(&path) {
            Ok(abs) => Some(abs),
            Err(err) => {
                warn!(err = %err, path = %path.display(), "failed to absolutize path");
                None
            }
        }
    })
}

/// Map a non-local repository reference to a clonable URL.
pub fn remote_clone_url(repo: &str) -> Result<String> {
    let repo = repo.trim();
    if repo.is_empty() {
        bail!("empty repository argument");
    }
    if repo.contains("://") || repo.starts_with("git@") {
        return Ok(repo.to_string());
    }
    if KNOWN_HOSTS.iter().any(|host| repo.starts_with(host)) {
        return Ok(format!("https://{repo}"));
    }
    if OWNER_REPO_RE.is_match(repo) {
        return Ok(format!("https://github.com/{repo}"));
    }
    if HOST_PATH_RE.is_match(repo) {
        return Ok(format!("https://{repo}"));
    }
    bail!("repository path not found locally and not recognized as URL: {repo}")
}

/// Non-empty lines of `git diff --name-only`, sorted.
pub fn parse_name_list(output: &str) -> Vec<String> {
    let mut names: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

/// Per-path counts from `git diff --numstat`; binary (`-`) counts are zero.
pub fn parse_numstat(output: &str) -> BTreeMap<String, FileStat> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().splitn(3, '\t');
            let added = parts.next()?;
            let removed = parts.next()?;
            let path = parts.next()?;
            Some((
                path.to_string(),
                FileStat {
                    added: parse_count(added),
                    removed: parse_count(removed),
                },
            ))
        })
        .collect()
}

fn parse_count(raw: &str) -> usize {
    raw.parse().unwrap_or(0)
}
