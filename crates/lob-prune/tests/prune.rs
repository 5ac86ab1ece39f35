//! End-to-end prune tests over throwaway git repositories and stores.

use std::path::Path;
use std::process::Command;

use lob_git::GitRepo;
use lob_prune::PruneEngine;
use lob_store::{enumerate_root, LobStore};
use lob_transfer::{Provider, TransferError};
use lob_types::{format_pointer, LobInfo, LobSha, Options, PruneEvent};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "Fred Bloggs")
        .env("GIT_AUTHOR_EMAIL", "fred@bloggs.com")
        .env("GIT_COMMITTER_NAME", "Fred Bloggs")
        .env("GIT_COMMITTER_EMAIL", "fred@bloggs.com")
        .output()
        .expect("failed to spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn init_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/master"]);
    git(dir.path(), &["config", "user.name", "Fred Bloggs"]);
    git(dir.path(), &["config", "user.email", "fred@bloggs.com"]);
    dir
}

fn test_data(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Store `count` objects and return their infos.
async fn store_objects(store: &LobStore, count: usize) -> Vec<LobInfo> {
    let mut infos = Vec::new();
    for i in 0..count {
        let data = test_data(120 + i, 0x1000 + i as u32);
        infos.push(store.store(std::io::Cursor::new(&data), b"").await.unwrap());
    }
    infos
}

fn write_pointer(dir: &Path, rel: &str, sha: &LobSha) {
    std::fs::write(dir.join(rel), format_pointer(sha)).unwrap();
    git(dir, &["add", rel]);
}

fn options() -> Options {
    Options {
        retention_refs_days: 90,
        retention_commits_head: 30,
        retention_commits_other: 0,
        ..Options::default()
    }
}

/// Scenario: 20 stored objects, commits referencing 0..=11, staged
/// pointers for 12 and 13; a prune must delete exactly 14..=19.
async fn prune_scenario(shared: bool) {
    let repo_dir = init_repo();
    let store_dir = TempDir::new().unwrap();
    let shared_root = if shared {
        let path = store_dir.path().join("shared");
        std::fs::create_dir_all(&path).unwrap();
        Some(path)
    } else {
        None
    };
    let store = LobStore::new(store_dir.path().join("local"), shared_root.clone(), 100).unwrap();

    let infos = store_objects(&store, 20).await;

    // Commit pointers for the first 12, two per commit.
    for pair in infos[..12].chunks(2) {
        for info in pair {
            write_pointer(repo_dir.path(), &format!("file_{}.bin", info.sha), &info.sha);
        }
        git(repo_dir.path(), &["commit", "-q", "-m", "add binaries"]);
    }
    // Stage 12 and 13 without committing.
    write_pointer(repo_dir.path(), "staged_a.bin", &infos[12].sha);
    write_pointer(repo_dir.path(), "staged_b.bin", &infos[13].sha);

    let repo = GitRepo::open(repo_dir.path());
    let opts = options();
    let engine = PruneEngine::new(&store, &repo, &opts);

    let mut events = Vec::new();
    let mut deleted = engine
        .prune_old(false, None, &mut |e| events.push(e))
        .await
        .unwrap();
    deleted.sort();

    let mut expected: Vec<LobSha> = infos[14..].iter().map(|i| i.sha).collect();
    expected.sort();
    assert_eq!(deleted, expected, "exactly the unreferenced objects go");

    let mut remaining = store.enumerate().await.unwrap();
    remaining.sort();
    let mut kept: Vec<LobSha> = infos[..14].iter().map(|i| i.sha).collect();
    kept.sort();
    assert_eq!(remaining, kept, "referenced and staged objects survive");

    if let Some(shared_root) = shared_root {
        let mut shared_left = enumerate_root(&shared_root).await.unwrap();
        shared_left.sort();
        assert_eq!(
            shared_left, kept,
            "shared copies of pruned objects must be reclaimed too"
        );
    }

    // Deleted events match the removed set; retained sets were reported.
    let event_deleted: Vec<LobSha> = events
        .iter()
        .filter_map(|e| match e {
            PruneEvent::Deleted(sha) => Some(*sha),
            _ => None,
        })
        .collect();
    let mut event_deleted_sorted = event_deleted;
    event_deleted_sorted.sort();
    assert_eq!(event_deleted_sorted, deleted);
    assert!(events.iter().any(|e| matches!(e, PruneEvent::Working)));
    assert!(events
        .iter()
        .any(|e| matches!(e, PruneEvent::RetainReferenced(_))));
}

#[tokio::test]
async fn test_prune_deletes_only_unreferenced() {
    prune_scenario(false).await;
}

#[tokio::test]
async fn test_prune_with_shared_root_reclaims_both_copies() {
    prune_scenario(true).await;
}

#[tokio::test]
async fn test_prune_dry_run_deletes_nothing() {
    let repo_dir = init_repo();
    git(repo_dir.path(), &["commit", "--allow-empty", "-q", "-m", "base"]);
    let store_dir = TempDir::new().unwrap();
    let store = LobStore::new(store_dir.path().join("local"), None, 100).unwrap();
    let infos = store_objects(&store, 3).await;

    let repo = GitRepo::open(repo_dir.path());
    let opts = options();
    let engine = PruneEngine::new(&store, &repo, &opts);

    let deleted = engine.prune_old(true, None, &mut |_| {}).await.unwrap();
    assert_eq!(deleted.len(), 3, "dry run reports the delete set");
    assert_eq!(
        store.enumerate().await.unwrap().len(),
        infos.len(),
        "dry run performs no file operations"
    );
}

#[tokio::test]
async fn test_retention_window_keeps_replaced_states() {
    let repo_dir = init_repo();
    let store_dir = TempDir::new().unwrap();
    let store = LobStore::new(store_dir.path().join("local"), None, 100).unwrap();
    let infos = store_objects(&store, 2).await;

    // Old state committed, then replaced; both commits are recent, so the
    // HEAD window retains the replaced state via the '-' diff side.
    write_pointer(repo_dir.path(), "data.bin", &infos[0].sha);
    git(repo_dir.path(), &["commit", "-q", "-m", "old state"]);
    write_pointer(repo_dir.path(), "data.bin", &infos[1].sha);
    git(repo_dir.path(), &["commit", "-q", "-m", "new state"]);

    let repo = GitRepo::open(repo_dir.path());
    let opts = options();
    let engine = PruneEngine::new(&store, &repo, &opts);

    let deleted = engine.prune_old(false, None, &mut |_| {}).await.unwrap();
    assert!(deleted.is_empty(), "both states fall inside the window");
    assert_eq!(store.enumerate().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_prune_unreferenced() {
    let repo_dir = init_repo();
    let store_dir = TempDir::new().unwrap();
    let store = LobStore::new(store_dir.path().join("local"), None, 100).unwrap();
    let infos = store_objects(&store, 4).await;

    write_pointer(repo_dir.path(), "committed.bin", &infos[0].sha);
    git(repo_dir.path(), &["commit", "-q", "-m", "committed"]);
    write_pointer(repo_dir.path(), "staged.bin", &infos[1].sha);

    let repo = GitRepo::open(repo_dir.path());
    let opts = options();
    let engine = PruneEngine::new(&store, &repo, &opts);

    let mut deleted = engine.prune_unreferenced(false, &mut |_| {}).await.unwrap();
    deleted.sort();
    let mut expected = vec![infos[2].sha, infos[3].sha];
    expected.sort();
    assert_eq!(deleted, expected);

    let mut remaining = store.enumerate().await.unwrap();
    remaining.sort();
    let mut kept = vec![infos[0].sha, infos[1].sha];
    kept.sort();
    assert_eq!(remaining, kept);
}

/// Test double standing in for a remote in safe mode.
struct FixedPresenceProvider {
    present: Vec<LobSha>,
}

#[async_trait::async_trait]
impl Provider for FixedPresenceProvider {
    fn type_id(&self) -> &'static str {
        "fixed"
    }

    fn validate_config(&self, _remote: &str) -> Result<(), TransferError> {
        Ok(())
    }

    async fn upload(
        &self,
        _remote: &str,
        _files: &[String],
        _from_dir: &Path,
        _force: bool,
        _progress: lob_transfer::ProgressFn<'_>,
    ) -> Result<(), TransferError> {
        Ok(())
    }

    async fn download(
        &self,
        _remote: &str,
        _files: &[String],
        _to_dir: &Path,
        _progress: lob_transfer::ProgressFn<'_>,
    ) -> Result<(), TransferError> {
        Ok(())
    }

    async fn check_files_present(
        &self,
        _remote: &str,
        sha: &LobSha,
    ) -> Result<bool, TransferError> {
        Ok(self.present.contains(sha))
    }
}

#[tokio::test]
async fn test_safe_mode_keeps_objects_absent_on_remote() {
    let repo_dir = init_repo();
    git(repo_dir.path(), &["commit", "--allow-empty", "-q", "-m", "base"]);
    let store_dir = TempDir::new().unwrap();
    let store = LobStore::new(store_dir.path().join("local"), None, 100).unwrap();
    let infos = store_objects(&store, 2).await;

    let repo = GitRepo::open(repo_dir.path());
    let opts = options();
    let engine = PruneEngine::new(&store, &repo, &opts);

    // Only the first object exists on the remote; only it may be deleted.
    let provider = FixedPresenceProvider {
        present: vec![infos[0].sha],
    };
    let deleted = engine
        .prune_old(false, Some(&provider), &mut |_| {})
        .await
        .unwrap();
    assert_eq!(deleted, vec![infos[0].sha]);

    let remaining = store.enumerate().await.unwrap();
    assert_eq!(remaining, vec![infos[1].sha]);
}

fn commit_at(dir: &Path, message: &str, date: &str) {
    let out = Command::new("git")
        .current_dir(dir)
        .args(["commit", "-q", "-m", message])
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .env("GIT_AUTHOR_NAME", "Fred Bloggs")
        .env("GIT_AUTHOR_EMAIL", "fred@bloggs.com")
        .env("GIT_COMMITTER_NAME", "Fred Bloggs")
        .env("GIT_COMMITTER_EMAIL", "fred@bloggs.com")
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "commit failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

#[tokio::test]
async fn test_pushed_and_aged_out_objects_are_pruned() {
    // Three states of one file. The oldest state's validity ends before
    // HEAD's retention window opens, so once history is pushed it is the
    // only deletable object; unpushed it must be kept.
    let work = init_repo();
    let remote_dir = TempDir::new().unwrap();
    git(remote_dir.path(), &["init", "-q", "--bare"]);
    git(
        work.path(),
        &["remote", "add", "origin", remote_dir.path().to_str().unwrap()],
    );

    let store_dir = TempDir::new().unwrap();
    let store = LobStore::new(store_dir.path().join("local"), None, 100).unwrap();
    let infos = store_objects(&store, 3).await;

    write_pointer(work.path(), "data.bin", &infos[0].sha);
    commit_at(work.path(), "first state", "2005-01-01T12:00:00+00:00");
    write_pointer(work.path(), "data.bin", &infos[1].sha);
    commit_at(work.path(), "second state", "2005-02-01T12:00:00+00:00");
    write_pointer(work.path(), "data.bin", &infos[2].sha);
    // Tip commit: the 30-day HEAD window reaches back to 2005-05-02,
    // covering this commit (whose '-' side retains the second state) but
    // not the first state.
    commit_at(work.path(), "third state", "2005-06-01T12:00:00+00:00");

    let repo = GitRepo::open(work.path());
    let opts = options();

    // Unpushed: the aged-out state is still held by the unpushed walk.
    {
        let engine = PruneEngine::new(&store, &repo, &opts);
        let deleted = engine.prune_old(true, None, &mut |_| {}).await.unwrap();
        assert!(
            deleted.is_empty(),
            "unpushed history keeps everything: {deleted:?}"
        );
    }

    // Push, then only the first state may go.
    git(work.path(), &["push", "-q", "origin", "master:master"]);
    {
        let engine = PruneEngine::new(&store, &repo, &opts);
        let deleted = engine.prune_old(false, None, &mut |_| {}).await.unwrap();
        assert_eq!(deleted, vec![infos[0].sha]);

        let mut remaining = store.enumerate().await.unwrap();
        remaining.sort();
        let mut kept = vec![infos[1].sha, infos[2].sha];
        kept.sort();
        assert_eq!(remaining, kept);
    }
}
