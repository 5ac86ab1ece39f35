//! Error types for the prune engine.

use lob_git::GitError;
use lob_store::StoreError;
use lob_transfer::TransferError;

/// Errors that can occur while computing or applying a prune.
#[derive(Debug, thiserror::Error)]
pub enum PruneError {
    /// The git bridge failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// The object store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The transfer provider failed while confirming remote presence.
    #[error(transparent)]
    Remote(#[from] TransferError),

    /// The prune configuration cannot be satisfied.
    #[error("prune configuration error: {0}")]
    Config(String),
}
