//! Git-backed collaborators against throwaway repositories.

use std::fs;

use retrospec::io::git::prepare_base_repo;
use retrospec::io::workspace::{GitWorkspace, Workspace};
use retrospec::test_support::TestRepo;

/// Two commits: a base file, then a change touching it and adding a README.
fn two_commit_repo() -> (TestRepo, String, String) {
    let repo = TestRepo::new().expect("repo");
    repo.write("src/lib.rs", "fn parse() {}\n").expect("write");
    let parent = repo.commit("Initial parser").expect("commit");
    repo.write("src/lib.rs", "fn parse() {}\nfn parse_strict() {}\n")
        .expect("write");
    repo.write("README.md", "Strict parsing is available.\n")
        .expect("write");
    let target = repo
        .commit("Add strict parsing mode\n\nRejects trailing input.")
        .expect("commit");
    (repo, parent, target)
}

fn repo_arg(repo: &TestRepo) -> String {
    repo.path().to_string_lossy().into_owned()
}

#[test]
fn resolves_target_and_collects_its_patch() {
    let (repo, parent, target) = two_commit_repo();
    let work = tempfile::tempdir().expect("tempdir");

    let base = prepare_base_repo(&repo_arg(&repo), work.path()).expect("clone");
    assert_eq!(base.workdir(), work.path().join("base"));

    let info = base.resolve_commit(&target).expect("resolve");
    assert_eq!(info.target_sha, target);
    assert_eq!(info.parent_sha, parent);
    assert!(info.commit_message.starts_with("Add strict parsing mode"));
    assert!(info.commit_message.contains("Rejects trailing input."));

    let snapshot = base
        .snapshot_between(&info.parent_sha, &info.target_sha)
        .expect("snapshot");
    assert!(snapshot.changed_files.contains(&"src/lib.rs".to_string()));
    assert!(snapshot.changed_files.contains(&"README.md".to_string()));
    let stat = snapshot.stat("src/lib.rs");
    assert_eq!((stat.added, stat.removed), (1, 0));
    assert!(snapshot.patch.contains("+fn parse_strict() {}"));
}

#[test]
fn root_commit_is_rejected() {
    let repo = TestRepo::new().expect("repo");
    repo.write("a.txt", "a\n").expect("write");
    let root = repo.commit("Root").expect("commit");
    let work = tempfile::tempdir().expect("tempdir");

    let base = prepare_base_repo(&repo_arg(&repo), work.path()).expect("clone");
    let err = base.resolve_commit(&root).unwrap_err();

    assert!(
        format!("{err:#}").contains("target must have a parent"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn unknown_commit_is_reported_after_fetch_fallbacks() {
    let (repo, _, _) = two_commit_repo();
    let work = tempfile::tempdir().expect("tempdir");
    let base = prepare_base_repo(&repo_arg(&repo), work.path()).expect("clone");

    let err = base
        .resolve_commit("0123456789abcdef0123456789abcdef01234567")
        .unwrap_err();

    assert!(
        format!("{err:#}").contains("target commit not available after fetch"),
        "unexpected error: {err:#}"
    );
}

/// Verifies a worktree starts at the parent and its snapshot sees both
/// modified and brand-new files.
#[test]
fn worktree_snapshot_includes_untracked_files() {
    let (repo, parent, _) = two_commit_repo();
    let work = tempfile::tempdir().expect("tempdir");
    let base = prepare_base_repo(&repo_arg(&repo), work.path()).expect("clone");
    let workspace = GitWorkspace::new(base, work.path().join("runs"));

    let path = workspace.create("iter-001-cand-01", &parent).expect("create");
    assert_eq!(path, work.path().join("runs/iter-001-cand-01"));
    let contents = fs::read_to_string(path.join("src/lib.rs")).expect("read");
    assert_eq!(contents, "fn parse() {}\n");

    fs::write(path.join("src/lib.rs"), "fn parse() {}\nfn parse_lenient() {}\n").expect("edit");
    fs::write(path.join("src/strict.rs"), "pub fn strict() {}\n").expect("new file");

    let snapshot = workspace.snapshot(&path).expect("snapshot");
    assert!(snapshot.changed_files.contains(&"src/lib.rs".to_string()));
    assert!(snapshot.changed_files.contains(&"src/strict.rs".to_string()));
    assert!(snapshot.patch.contains("+pub fn strict() {}"));

    workspace.remove(&path).expect("remove");
    assert!(!path.exists());
}

#[test]
fn recreating_a_key_replaces_the_stale_copy() {
    let (repo, parent, _) = two_commit_repo();
    let work = tempfile::tempdir().expect("tempdir");
    let base = prepare_base_repo(&repo_arg(&repo), work.path()).expect("clone");
    let workspace = GitWorkspace::new(base, work.path().join("runs"));

    let path = workspace.create("iter-001-cand-01", &parent).expect("create");
    fs::write(path.join("leftover.txt"), "stale\n").expect("write");

    let again = workspace.create("iter-001-cand-01", &parent).expect("recreate");
    assert_eq!(again, path);
    assert!(!again.join("leftover.txt").exists());
    assert!(workspace.snapshot(&again).expect("snapshot").is_empty());
}

#[test]
fn base_clone_is_rebuilt_on_every_run() {
    let (repo, _, target) = two_commit_repo();
    let work = tempfile::tempdir().expect("tempdir");

    let first = prepare_base_repo(&repo_arg(&repo), work.path()).expect("clone");
    fs::write(first.workdir().join("scratch.txt"), "junk\n").expect("write");

    let second = prepare_base_repo(&repo_arg(&repo), work.path()).expect("reclone");
    assert!(!second.workdir().join("scratch.txt").exists());
    assert_eq!(second.resolve_commit(&target).expect("resolve").target_sha, target);
}

#[test]
fn renamed_files_are_keyed_by_plain_paths() {
    let repo = TestRepo::new().expect("repo");
    repo.write("src/old_name.rs", "fn parse() {}\nfn strict() {}\nfn lenient() {}\n")
        .expect("write");
    let parent = repo.commit("Initial parser").expect("commit");
    repo.git(&["mv", "src/old_name.rs", "src/parser.rs"]).expect("git mv");
    let target = repo.commit("Rename parser module").expect("commit");
    let work = tempfile::tempdir().expect("tempdir");
    let base = prepare_base_repo(&repo_arg(&repo), work.path()).expect("clone");

    let snapshot = base.snapshot_between(&parent, &target).expect("snapshot");

    assert_eq!(snapshot.changed_files, vec!["src/old_name.rs", "src/parser.rs"]);
    assert_eq!(snapshot.file_stats.len(), 2);
    assert_eq!(snapshot.stat("src/old_name.rs").removed, 3);
    assert_eq!(snapshot.stat("src/parser.rs").added, 3);
    assert!(!snapshot.patch.contains("rename from"));
}
