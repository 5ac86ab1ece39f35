//! The provider capability.

use std::path::Path;

use lob_types::LobSha;

use crate::error::TransferError;

/// Progress callback: `(filename, skipped, bytes_done, bytes_total)`,
/// returning `true` to abort the batch. Abort takes effect at file
/// boundaries; the file in flight is finished or discarded, later files
/// are untouched.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(&str, bool, u64, u64) -> bool + Send);

/// A transfer backend for one kind of remote.
///
/// Implementations collect per-file error messages and return them as one
/// [`TransferError::Batch`] after attempting every file, unless the
/// progress callback aborted first.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used in configuration (`git-lob-provider`).
    fn type_id(&self) -> &'static str;

    /// Check that the remote has everything this provider needs configured.
    fn validate_config(&self, remote: &str) -> Result<(), TransferError>;

    /// Upload named files from `from_dir` to the remote. Existing remote
    /// files of identical size are skipped unless `force` is set.
    async fn upload(
        &self,
        remote: &str,
        files: &[String],
        from_dir: &Path,
        force: bool,
        progress: ProgressFn<'_>,
    ) -> Result<(), TransferError>;

    /// Download named files from the remote into `to_dir`, overwriting.
    async fn download(
        &self,
        remote: &str,
        files: &[String],
        to_dir: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<(), TransferError>;

    /// Whether every file of the object is present on the remote at the
    /// correct size. Safe-mode pruning refuses to delete local objects
    /// this returns `false` (or an error) for.
    async fn check_files_present(&self, remote: &str, sha: &LobSha)
        -> Result<bool, TransferError>;
}
