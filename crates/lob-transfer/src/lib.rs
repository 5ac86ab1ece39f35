//! Moving object files between stores and remotes.
//!
//! [`Provider`] is the capability a remote backend implements: upload and
//! download of named files with progress and abort, plus the existence
//! predicate safe-mode pruning relies on. [`FilesystemProvider`] transfers
//! via mounted volumes, the simplest backend.
//!
//! Receiving sides place files safely: writes go to `tempupload*` /
//! `tempdownload*` in the destination directory and are renamed into place
//! on completion, so an interruption never leaves a half-written file under
//! its final name.

mod error;
mod filesystem;
mod traits;

use lob_types::LobInfo;

pub use error::TransferError;
pub use filesystem::{gc_stale_temp_files, FilesystemProvider, TEMP_AGE_LIMIT};
pub use traits::{ProgressFn, Provider};

/// Relative file names (meta first, then chunks) backing one object, in the
/// forward-slash shape providers exchange.
pub fn object_file_list(info: &LobInfo) -> Vec<String> {
    let mut files = vec![lob_store::rel_meta_path(&info.sha)
        .to_string_lossy()
        .into_owned()];
    for i in 0..info.num_chunks {
        files.push(
            lob_store::rel_chunk_path(&info.sha, i)
                .to_string_lossy()
                .into_owned(),
        );
    }
    files
}
