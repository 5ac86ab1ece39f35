//! The repository context and subprocess plumbing.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{LazyLock, Mutex};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::error::GitError;

static SHA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{8,40}$").unwrap());

/// Whether `s` looks like an abbreviated or full commit digest.
pub fn is_sha(s: &str) -> bool {
    SHA_RE.is_match(s)
}

/// Whether `s` is a full 40-hex commit digest.
pub fn is_full_sha(s: &str) -> bool {
    s.len() == 40 && is_sha(s)
}

/// Handle on one git working tree.
///
/// The working directory is fixed at construction. The current-branch
/// answer is cached from the first query; callers that switch branches must
/// call [`invalidate_current_branch`](Self::invalidate_current_branch).
pub struct GitRepo {
    work_dir: PathBuf,
    current_branch: Mutex<Option<String>>,
}

impl GitRepo {
    /// Open a repository rooted at (or below) `work_dir`.
    pub fn open(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            current_branch: Mutex::new(None),
        }
    }

    /// The working directory every subprocess runs in.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub(crate) fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.work_dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run git and capture trimmed stdout; a failure status becomes
    /// [`GitError::Command`] carrying stderr.
    pub(crate) async fn run<I, S>(&self, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<String> = args
            .into_iter()
            .map(|s| s.as_ref().to_string_lossy().into_owned())
            .collect();
        debug!(args = %args.join(" "), "running git");
        let output = self.command(&args).output().await?;
        if !output.status.success() {
            return Err(GitError::Command {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run git and return stdout split into non-empty lines.
    pub(crate) async fn run_lines<I, S>(&self, args: I) -> Result<Vec<String>, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Ok(self
            .run(args)
            .await?
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Spawn git with stdout piped for line-by-line streaming.
    ///
    /// The caller owns the child; dropping or killing it cancels the
    /// subprocess without draining its remaining output.
    pub(crate) fn spawn_lines<I, S>(
        &self,
        args: I,
    ) -> Result<(Child, Lines<BufReader<ChildStdout>>), GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = self.command(args).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GitError::Parse("child stdout not captured".to_string()))?;
        Ok((child, BufReader::new(stdout).lines()))
    }

    /// Expand a ref to a full 40-hex digest; an input already matching is
    /// passed through untouched.
    pub async fn resolve_full_sha(&self, reference: &str) -> Result<String, GitError> {
        if is_full_sha(reference) {
            return Ok(reference.to_string());
        }
        let out = self
            .run(["rev-parse", reference])
            .await
            .map_err(|_| GitError::BadRef(reference.to_string()))?;
        let sha = out.trim().to_string();
        if !is_full_sha(&sha) {
            return Err(GitError::BadRef(reference.to_string()));
        }
        Ok(sha)
    }

    /// The current branch name, cached from the first query.
    ///
    /// A detached HEAD reports `"HEAD"`.
    pub async fn current_branch(&self) -> Result<String, GitError> {
        if let Some(cached) = self.current_branch.lock().unwrap().clone() {
            return Ok(cached);
        }
        let name = self
            .run(["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string();
        *self.current_branch.lock().unwrap() = Some(name.clone());
        Ok(name)
    }

    /// Drop the cached current-branch answer after a checkout.
    pub fn invalidate_current_branch(&self) {
        *self.current_branch.lock().unwrap() = None;
    }

    /// Names of all configured remotes.
    pub async fn list_remotes(&self) -> Result<Vec<String>, GitError> {
        self.run_lines(["remote"]).await
    }

    /// Flattened `git config --list` output as a `key → value` map.
    ///
    /// Later entries win, matching git's own precedence.
    pub async fn load_config(&self) -> Result<BTreeMap<String, String>, GitError> {
        let mut map = BTreeMap::new();
        for line in self.run_lines(["config", "--list"]).await? {
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.to_string(), value.to_string());
            }
        }
        Ok(map)
    }
}
