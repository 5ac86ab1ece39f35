//! Error types for transfer operations.

/// Errors that can occur while transferring files to or from a remote.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The remote's configuration is missing or invalid.
    #[error("configuration invalid for remote '{remote}': {reason}")]
    Config {
        /// The remote the configuration belongs to.
        remote: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Per-file failures collected across a whole batch.
    ///
    /// The batch runs to completion (or abort) before this is returned.
    #[error("{}", .messages.join("\n"))]
    Batch {
        /// One message per failed file.
        messages: Vec<String>,
    },

    /// The provider signalled a failure talking to the remote.
    #[error("remote error: {0}")]
    Remote(String),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
