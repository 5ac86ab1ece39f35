//! Subprocess bridge to the host version-control system.
//!
//! Everything the rest of the workspace needs from git is exposed here as
//! methods on [`GitRepo`], each implemented by invoking `git` as a
//! subprocess and parsing a deterministic textual output:
//!
//! - ref resolution and enumeration ([`GitRef`], [`RefKind`])
//! - refspec parsing ([`RefSpec`])
//! - batched first-parent history walks
//! - commit summaries ([`CommitSummary`])
//! - diff and tree scans extracting pointer references
//!   ([`CommitLobRefs`], [`PathFilter`])
//!
//! Long outputs (`log -p`) are streamed line by line, never buffered whole;
//! early termination kills the child process.

mod error;
mod filter;
mod history;
mod lobs;
mod refs;
mod refspec;
mod repo;
mod summary;

pub use error::GitError;
pub use filter::PathFilter;
pub use lobs::CommitLobRefs;
pub use refs::{GitRef, RefKind};
pub use refspec::{RangeOp, RefSpec};
pub use repo::{is_full_sha, is_sha, GitRepo};
pub use summary::CommitSummary;
