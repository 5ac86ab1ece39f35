//! Filesystem transfer provider: remotes reached via mounted volumes.
//!
//! The remote binary store is named by the per-remote git configuration
//! key `remote.<name>.git-lob-path`. Uploads and downloads both write
//! through a temporary file in the destination directory and rename on
//! completion; interrupted runs leave `tempupload*` / `tempdownload*`
//! files that are safe to reclaim once older than [`TEMP_AGE_LIMIT`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use lob_types::{LobInfo, LobSha};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::traits::{ProgressFn, Provider};

/// Copy buffer unit, matching the store's streaming unit.
const BUF_SIZE: usize = 131_072;

/// Temporary files older than this may be garbage-collected.
pub const TEMP_AGE_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Transfers binaries by copying them to and from locations on the file
/// system.
pub struct FilesystemProvider {
    git_config: BTreeMap<String, String>,
}

impl FilesystemProvider {
    /// Build a provider over a flattened git configuration map.
    pub fn new(git_config: BTreeMap<String, String>) -> Self {
        Self { git_config }
    }

    fn remote_root(&self, remote: &str) -> Result<PathBuf, TransferError> {
        let key = format!("remote.{remote}.git-lob-path");
        match self.git_config.get(&key).filter(|p| !p.is_empty()) {
            Some(path) => Ok(PathBuf::from(path)),
            None => Err(TransferError::Config {
                remote: remote.to_string(),
                reason: format!("missing setting {key}"),
            }),
        }
    }

    /// Copy one file towards the remote. Returns error messages for this
    /// file and whether the progress callback requested an abort.
    async fn upload_single(
        &self,
        remote: &str,
        filename: &str,
        from_dir: &Path,
        to_root: &Path,
        force: bool,
        progress: &mut (dyn FnMut(&str, bool, u64, u64) -> bool + Send),
    ) -> (Vec<String>, bool) {
        let src = from_dir.join(filename);
        let src_size = match fs::metadata(&src).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                // Keep going with other files.
                return (vec![format!("unable to stat {}: {e}", src.display())], false);
            }
        };

        let dest = to_root.join(filename);
        if !force {
            if let Ok(meta) = fs::metadata(&dest).await {
                if meta.len() == src_size {
                    // Already present at the right size.
                    return (Vec::new(), progress(filename, true, src_size, src_size));
                }
            }
        }

        match copy_via_temp(&src, &dest, "tempupload", filename, src_size, progress).await {
            Ok(aborted) => (Vec::new(), aborted),
            Err(CopyError::Aborted) => (Vec::new(), true),
            Err(CopyError::Failed(msg)) => (
                vec![format!("problem uploading {} to {remote}: {msg}", src.display())],
                false,
            ),
        }
    }

    async fn download_single(
        &self,
        remote: &str,
        filename: &str,
        from_root: &Path,
        to_dir: &Path,
        progress: &mut (dyn FnMut(&str, bool, u64, u64) -> bool + Send),
    ) -> (Vec<String>, bool) {
        let src = from_root.join(filename);
        let src_size = match fs::metadata(&src).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return (vec![format!("unable to stat {}: {e}", src.display())], false);
            }
        };

        // Downloads always overwrite; the caller only asks for what it
        // wants fetched.
        let dest = to_dir.join(filename);
        match copy_via_temp(&src, &dest, "tempdownload", filename, src_size, progress).await {
            Ok(aborted) => (Vec::new(), aborted),
            Err(CopyError::Aborted) => (Vec::new(), true),
            Err(CopyError::Failed(msg)) => (
                vec![format!("problem downloading {} from {remote}: {msg}", src.display())],
                false,
            ),
        }
    }
}

#[async_trait::async_trait]
impl Provider for FilesystemProvider {
    fn type_id(&self) -> &'static str {
        "filesystem"
    }

    fn validate_config(&self, remote: &str) -> Result<(), TransferError> {
        let root = self.remote_root(remote)?;
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(TransferError::Config {
                remote: remote.to_string(),
                reason: format!("{} is not a directory", root.display()),
            }),
            Err(_) => Err(TransferError::Config {
                remote: remote.to_string(),
                reason: format!("{} does not exist", root.display()),
            }),
        }
    }

    async fn upload(
        &self,
        remote: &str,
        files: &[String],
        from_dir: &Path,
        force: bool,
        progress: ProgressFn<'_>,
    ) -> Result<(), TransferError> {
        let root = self.remote_root(remote)?;
        self.validate_config(remote)?;

        let mut errors = Vec::new();
        for filename in files {
            let (mut errs, abort) = self
                .upload_single(remote, filename, from_dir, &root, force, progress)
                .await;
            errors.append(&mut errs);
            if abort {
                debug!(remote, "upload batch aborted by callback");
                break;
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransferError::Batch { messages: errors })
        }
    }

    async fn download(
        &self,
        remote: &str,
        files: &[String],
        to_dir: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<(), TransferError> {
        let root = self.remote_root(remote)?;
        self.validate_config(remote)?;

        let mut errors = Vec::new();
        for filename in files {
            let (mut errs, abort) = self
                .download_single(remote, filename, &root, to_dir, progress)
                .await;
            errors.append(&mut errs);
            if abort {
                debug!(remote, "download batch aborted by callback");
                break;
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransferError::Batch { messages: errors })
        }
    }

    async fn check_files_present(
        &self,
        remote: &str,
        sha: &LobSha,
    ) -> Result<bool, TransferError> {
        let root = self.remote_root(remote)?;

        let meta_path = root.join(lob_store::rel_meta_path(sha));
        let bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let Ok(info) = serde_json::from_slice::<LobInfo>(&bytes) else {
            // An unparseable remote meta counts as not safely present.
            return Ok(false);
        };

        for i in 0..info.num_chunks {
            let chunk = root.join(lob_store::rel_chunk_path(sha, i));
            let expected = info.expected_chunk_size(i);
            match fs::metadata(&chunk).await {
                Ok(meta) if meta.len() == expected => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

enum CopyError {
    Aborted,
    Failed(String),
}

/// Copy `src` to `dest` through a prefixed temporary in the destination
/// directory, reporting progress per buffer unit. Returns whether the
/// callback asked to abort after the copy completed.
async fn copy_via_temp(
    src: &Path,
    dest: &Path,
    temp_prefix: &str,
    filename: &str,
    src_size: u64,
    progress: &mut (dyn FnMut(&str, bool, u64, u64) -> bool + Send),
) -> Result<bool, CopyError> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|e| CopyError::Failed(format!("unable to create dir {}: {e}", parent.display())))?;

    let tmp = tempfile::Builder::new()
        .prefix(temp_prefix)
        .tempfile_in(parent)
        .map_err(|e| CopyError::Failed(format!("unable to create temp file: {e}")))?;
    let mut out = tokio::fs::File::from_std(
        tmp.as_file()
            .try_clone()
            .map_err(|e| CopyError::Failed(e.to_string()))?,
    );

    let mut input = fs::File::open(src)
        .await
        .map_err(|e| CopyError::Failed(format!("unable to read {}: {e}", src.display())))?;

    if progress(filename, false, 0, src_size) {
        return Err(CopyError::Aborted);
    }

    let mut copied = 0u64;
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| CopyError::Failed(e.to_string()))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .await
            .map_err(|e| CopyError::Failed(e.to_string()))?;
        copied += n as u64;
        if src_size > 0 && progress(filename, false, copied, src_size) {
            return Err(CopyError::Aborted);
        }
    }
    out.flush().await.map_err(|e| CopyError::Failed(e.to_string()))?;
    drop(out);

    if copied != src_size {
        return Err(CopyError::Failed(format!(
            "byte count does not agree ({copied}/{src_size})"
        )));
    }

    // Remove first to cope with force and wrong-size leftovers.
    let _ = fs::remove_file(dest).await;
    tmp.persist(dest)
        .map_err(|e| CopyError::Failed(e.error.to_string()))?;
    Ok(false)
}

/// Reclaim interrupted-transfer temporaries older than [`TEMP_AGE_LIMIT`]
/// anywhere below `root`. Returns how many files were removed.
pub async fn gc_stale_temp_files(root: &Path) -> Result<usize, TransferError> {
    let mut removed = 0;
    let mut stack = vec![root.to_path_buf()];
    let now = SystemTime::now();

    while let Some(dir) = stack.pop() {
        let mut rd = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = rd.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("tempupload") && !name.starts_with("tempdownload") {
                continue;
            }
            let meta = entry.metadata().await?;
            let stale = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .is_some_and(|age| age > TEMP_AGE_LIMIT);
            if stale {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "unable to remove stale temp file");
                } else {
                    removed += 1;
                }
            }
        }
    }
    Ok(removed)
}
