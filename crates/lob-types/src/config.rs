//! Runtime configuration for git-lob.
//!
//! The options record is built once at startup and passed by reference
//! through every entry point; no global state.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default chunk size: 32 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Default day window for fetching refs.
pub const DEFAULT_FETCH_REFS_DAYS: i64 = 90;

/// Default day window of history fetched for HEAD.
pub const DEFAULT_FETCH_COMMITS_HEAD: i64 = 30;

/// Default day window of history fetched for other refs.
pub const DEFAULT_FETCH_COMMITS_OTHER: i64 = 0;

/// Runtime options shared by every subsystem.
///
/// Retention windows default to the corresponding fetch windows so that a
/// prune never deletes what a fetch would bring back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Target bytes per chunk for newly stored objects.
    pub chunk_size: u64,
    /// Process-wide shared object store, or `None` for local-only storage.
    pub shared_store: Option<PathBuf>,
    /// Refs with commits newer than this many days are fetched.
    pub fetch_refs_days: i64,
    /// Days of history fetched below HEAD.
    pub fetch_commits_head: i64,
    /// Days of history fetched below other recent refs.
    pub fetch_commits_other: i64,
    /// Refs with commits newer than this many days are retained by prune.
    pub retention_refs_days: i64,
    /// Days of history retained below HEAD.
    pub retention_commits_head: i64,
    /// Days of history retained below other recent refs.
    pub retention_commits_other: i64,
    /// Remote consulted by prune. Empty means "origin"; `*` auto-detects.
    pub prune_remote: String,
    /// Flattened git configuration, keyed `section.name` or
    /// `remote.<name>.<key>`.
    pub git_config: BTreeMap<String, String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            shared_store: None,
            fetch_refs_days: DEFAULT_FETCH_REFS_DAYS,
            fetch_commits_head: DEFAULT_FETCH_COMMITS_HEAD,
            fetch_commits_other: DEFAULT_FETCH_COMMITS_OTHER,
            retention_refs_days: DEFAULT_FETCH_REFS_DAYS,
            retention_commits_head: DEFAULT_FETCH_COMMITS_HEAD,
            retention_commits_other: DEFAULT_FETCH_COMMITS_OTHER,
            prune_remote: String::new(),
            git_config: BTreeMap::new(),
        }
    }
}

impl Options {
    /// The prune remote with the empty-string default applied.
    ///
    /// The `*` wildcard is resolved by the prune engine, which needs the
    /// list of remotes to pick from.
    pub fn effective_prune_remote(&self) -> &str {
        if self.prune_remote.is_empty() {
            "origin"
        } else {
            &self.prune_remote
        }
    }

    /// Look up a per-remote configuration key, e.g.
    /// `remote.origin.git-lob-path`.
    pub fn remote_setting(&self, remote: &str, key: &str) -> Option<&str> {
        self.git_config
            .get(&format!("remote.{remote}.{key}"))
            .map(String::as_str)
    }
}
