//! Diff and tree scans that extract pointer references from history.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::LazyLock;

use chrono::Duration;
use lob_types::{parse_pointer, LobSha, POINTER_LEN};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::GitError;
use crate::filter::PathFilter;
use crate::repo::GitRepo;

/// The `-G` pattern selecting commits whose diffs touch pointer lines.
pub const SHA_LINE_PATTERN: &str = "^git-lob: [A-Fa-f0-9]{40}$";

/// One regex captures both commit headers and pointer diff lines.
static SCAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(commitsha|\+git-lob|-git-lob): ([A-Fa-f0-9]{40})$").unwrap()
});

/// Diff headers carry the working-tree-relative path on the `b/` side.
static DIFF_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^diff --git a/(.*) b/(.*)$").unwrap());

/// The pointer digests one commit references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLobRefs {
    /// Full 40-hex commit digest.
    pub commit: String,
    /// Digests referenced by the commit's diff, in diff order.
    pub lob_shas: Vec<LobSha>,
}

/// A parsed line of a `log -p` / `diff` stream.
enum ScanEvent {
    Commit(String),
    Added(LobSha),
    Removed(LobSha),
    FileHeader(String),
}

fn scan_event(line: &str) -> Option<ScanEvent> {
    if let Some(caps) = SCAN_RE.captures(line) {
        let sha = LobSha::parse(&caps[2]).ok()?;
        return Some(match &caps[1] {
            "commitsha" => ScanEvent::Commit(caps[2].to_string()),
            "+git-lob" => ScanEvent::Added(sha),
            _ => ScanEvent::Removed(sha),
        });
    }
    if let Some(caps) = DIFF_HEADER_RE.captures(line) {
        return Some(ScanEvent::FileHeader(caps[2].to_string()));
    }
    None
}

impl GitRepo {
    /// Commits referencing pointer records within a range, grouped per
    /// commit in ascending order (parents before children).
    ///
    /// The range is exclusive of `from` and inclusive of `to`; either side
    /// may be empty (`to` alone, `from..HEAD`, or the full history when
    /// both are empty). `additions` selects `+` diff lines, `removals`
    /// selects `-` lines. Paths are matched against `filter` via the diff
    /// headers.
    pub async fn commits_referencing_lobs_in_range(
        &self,
        from: &str,
        to: &str,
        additions: bool,
        removals: bool,
        filter: &PathFilter,
    ) -> Result<Vec<CommitLobRefs>, GitError> {
        let mut args: Vec<String> = [
            "log",
            "--format=commitsha: %H",
            "-p",
            "--topo-order",
            "--first-parent",
            "--reverse",
            "-G",
            SHA_LINE_PATTERN,
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        match (from.is_empty(), to.is_empty()) {
            (false, false) => args.push(format!("{from}..{to}")),
            (true, false) => args.push(to.to_string()),
            (false, true) => args.push(format!("{from}..HEAD")),
            (true, true) => {}
        }

        let mut out = Vec::new();
        self.scan_commit_groups(&args, additions, removals, filter, |group| {
            out.push(group);
            false
        })
        .await?;
        Ok(out)
    }

    /// Stream a grouped `log -p` scan, invoking `on_commit` once per commit
    /// that referenced at least one pointer after filtering. The callback
    /// returns `true` to terminate early, which kills the subprocess.
    async fn scan_commit_groups<F>(
        &self,
        args: &[String],
        additions: bool,
        removals: bool,
        filter: &PathFilter,
        mut on_commit: F,
    ) -> Result<(), GitError>
    where
        F: FnMut(CommitLobRefs) -> bool,
    {
        let (mut child, mut lines) = self.spawn_lines(args)?;
        let mut current: Option<CommitLobRefs> = None;
        let mut path_allowed = true;
        let mut quit = false;

        while let Some(line) = lines.next_line().await? {
            match scan_event(&line) {
                Some(ScanEvent::Commit(sha)) => {
                    if let Some(group) = current.take() {
                        if !group.lob_shas.is_empty() && on_commit(group) {
                            quit = true;
                            break;
                        }
                    }
                    current = Some(CommitLobRefs {
                        commit: sha,
                        lob_shas: Vec::new(),
                    });
                    path_allowed = true;
                }
                Some(ScanEvent::FileHeader(path)) => {
                    path_allowed = filter.allows(&path);
                }
                Some(ScanEvent::Added(sha)) if additions && path_allowed => {
                    if let Some(group) = current.as_mut() {
                        group.lob_shas.push(sha);
                    }
                }
                Some(ScanEvent::Removed(sha)) if removals && path_allowed => {
                    if let Some(group) = current.as_mut() {
                        group.lob_shas.push(sha);
                    }
                }
                _ => {}
            }
        }

        if quit {
            child.kill().await.ok();
            return Ok(());
        }
        if let Some(group) = current.take() {
            if !group.lob_shas.is_empty() {
                on_commit(group);
            }
        }
        child.wait().await?;
        Ok(())
    }

    /// Digests referenced by the working tree of one commit.
    ///
    /// Enumerates blobs of exactly the pointer-record size with
    /// `ls-tree -r -l --full-tree`, then reads each candidate through one
    /// long-running `cat-file --batch` subprocess.
    pub async fn lobs_at_checkout(
        &self,
        commit: &str,
        filter: &PathFilter,
    ) -> Result<Vec<LobSha>, GitError> {
        let commit = self.resolve_full_sha(commit).await?;
        let (mut child, mut lines) =
            self.spawn_lines(["ls-tree", "-r", "-l", "--full-tree", commit.as_str()])?;

        let mut candidates = Vec::new();
        while let Some(line) = lines.next_line().await? {
            // <mode> <type> <sha> <size>\t<path>
            let Some((meta, path)) = line.split_once('\t') else {
                continue;
            };
            let fields: Vec<&str> = meta.split_whitespace().collect();
            if fields.len() != 4 || fields[1] != "blob" {
                continue;
            }
            if fields[3] != POINTER_LEN.to_string() {
                continue;
            }
            if filter.allows(path) {
                candidates.push(fields[2].to_string());
            }
        }
        child.wait().await?;

        self.read_pointer_blobs(&candidates).await
    }

    /// Pipe blob digests through `cat-file --batch` and collect the LOB
    /// digests of well-formed pointer blobs.
    async fn read_pointer_blobs(&self, blobs: &[String]) -> Result<Vec<LobSha>, GitError> {
        if blobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut child = Command::new("git")
            .current_dir(self.work_dir())
            .args(["cat-file", "--batch"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GitError::Parse("cat-file stdin not captured".to_string()))?;
        let mut stdout = BufReader::new(
            child
                .stdout
                .take()
                .ok_or_else(|| GitError::Parse("cat-file stdout not captured".to_string()))?,
        );

        let mut found = BTreeSet::new();
        for blob in blobs {
            stdin.write_all(format!("{blob}\n").as_bytes()).await?;
            stdin.flush().await?;

            let mut header = String::new();
            if stdout.read_line(&mut header).await? == 0 {
                break;
            }
            let header = header.trim_end();
            if header.ends_with("missing") {
                continue;
            }
            // <sha> blob <size>
            let size: usize = header
                .rsplit(' ')
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| GitError::Parse(format!("bad cat-file header: {header}")))?;

            // Contents plus the trailing newline cat-file appends.
            let mut content = vec![0u8; size + 1];
            stdout.read_exact(&mut content).await?;
            if let Some(sha) = parse_pointer(&content[..size]) {
                found.insert(sha);
            }
        }
        drop(stdin);
        child.wait().await?;

        debug!(candidates = blobs.len(), pointers = found.len(), "scanned pointer blobs");
        Ok(found.into_iter().collect())
    }

    /// Digests needed to check out a commit plus everything referenced
    /// within `days` of its commit date.
    ///
    /// The snapshot supplies the checkout state; the `-` side of diffs in
    /// the date window supplies states replaced inside the window. Also
    /// returns the earliest commit examined, the starting point for
    /// downstream unpushed walks.
    pub async fn lobs_at_checkout_and_recent(
        &self,
        commit: &str,
        days: i64,
        filter: &PathFilter,
    ) -> Result<(Vec<LobSha>, String), GitError> {
        let commit = self.resolve_full_sha(commit).await?;
        let mut shas: BTreeSet<LobSha> =
            self.lobs_at_checkout(&commit, filter).await?.into_iter().collect();

        if days <= 0 {
            return Ok((shas.into_iter().collect(), commit));
        }

        let summary = self.commit_summary(&commit).await?;
        let since = summary.commit_date - Duration::days(days);
        let mut args: Vec<String> = [
            "log",
            "--format=commitsha: %H",
            "-p",
            "--topo-order",
            "--first-parent",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        args.push(format!("--since={}", since.to_rfc3339()));
        args.push("-G".to_string());
        args.push(SHA_LINE_PATTERN.to_string());
        args.push(commit.clone());

        let (mut child, mut lines) = self.spawn_lines(&args)?;
        let mut earliest = commit.clone();
        let mut path_allowed = true;
        while let Some(line) = lines.next_line().await? {
            match scan_event(&line) {
                // Output is descending, so the last header seen is the
                // earliest commit in the window.
                Some(ScanEvent::Commit(sha)) => earliest = sha,
                Some(ScanEvent::FileHeader(path)) => path_allowed = filter.allows(&path),
                Some(ScanEvent::Removed(sha)) if path_allowed => {
                    shas.insert(sha);
                }
                _ => {}
            }
        }
        child.wait().await?;

        Ok((shas.into_iter().collect(), earliest))
    }

    /// Every pointer digest added by any commit reachable from any ref.
    ///
    /// Used by the unreferenced prune, which must consider the whole ref
    /// graph rather than one first-parent chain.
    pub async fn all_lob_references(&self, filter: &PathFilter) -> Result<Vec<LobSha>, GitError> {
        let args: Vec<String> = [
            "log",
            "--all",
            "--no-color",
            "--format=commitsha: %H",
            "-p",
            "-G",
            SHA_LINE_PATTERN,
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        let (mut child, mut lines) = self.spawn_lines(&args)?;
        let mut shas = BTreeSet::new();
        let mut path_allowed = true;
        while let Some(line) = lines.next_line().await? {
            match scan_event(&line) {
                Some(ScanEvent::FileHeader(path)) => path_allowed = filter.allows(&path),
                Some(ScanEvent::Added(sha)) if path_allowed => {
                    shas.insert(sha);
                }
                Some(ScanEvent::Commit(_)) => path_allowed = true,
                _ => {}
            }
        }
        child.wait().await?;
        Ok(shas.into_iter().collect())
    }

    /// Pointer digests referenced by the staging area (index).
    pub async fn staged_lob_references(
        &self,
        filter: &PathFilter,
    ) -> Result<Vec<LobSha>, GitError> {
        let args: Vec<String> = ["diff", "--cached", "--no-color", "-G", SHA_LINE_PATTERN]
            .into_iter()
            .map(str::to_string)
            .collect();
        let (mut child, mut lines) = self.spawn_lines(&args)?;
        let mut shas = BTreeSet::new();
        let mut path_allowed = true;
        while let Some(line) = lines.next_line().await? {
            match scan_event(&line) {
                Some(ScanEvent::FileHeader(path)) => path_allowed = filter.allows(&path),
                Some(ScanEvent::Added(sha)) if path_allowed => {
                    shas.insert(sha);
                }
                _ => {}
            }
        }
        child.wait().await?;
        Ok(shas.into_iter().collect())
    }

    /// Walk ancestors of `commit` not present on `remote`, invoking the
    /// callback per commit with its `+`-side pointer references, ascending.
    ///
    /// The callback returns `true` to terminate early.
    pub async fn walk_unpushed_lob_refs<F>(
        &self,
        remote: &str,
        commit: &str,
        filter: &PathFilter,
        on_commit: F,
    ) -> Result<(), GitError>
    where
        F: FnMut(CommitLobRefs) -> bool,
    {
        let commit = self.resolve_full_sha(commit).await?;
        let mut args: Vec<String> = [
            "log",
            "--format=commitsha: %H",
            "-p",
            "--topo-order",
            "--first-parent",
            "--reverse",
            "-G",
            SHA_LINE_PATTERN,
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        args.push(commit);
        args.push("--not".to_string());
        args.push(format!("--remotes={remote}"));

        self.scan_commit_groups(&args, true, false, filter, on_commit)
            .await
    }
}
