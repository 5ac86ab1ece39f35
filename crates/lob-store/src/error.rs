//! Error types for object store operations.

use lob_types::LobSha;

/// Errors that can occur during object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Meta or chunk files are absent and shared-store recovery was not
    /// possible.
    #[error("object not found: {0}")]
    NotFound(LobSha),

    /// Size mismatch, digest mismatch, or meta parse failure. Carries every
    /// digest that failed when checking multiple.
    #[error("integrity check failed for: {}", format_shas(.failed))]
    Integrity {
        /// The digests that failed the check.
        failed: Vec<LobSha>,
    },

    /// Meta file could not be encoded or decoded.
    #[error("meta file error: {0}")]
    Meta(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_shas(shas: &[LobSha]) -> String {
    shas.iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl StoreError {
    /// Whether this error means the object simply is not present.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
