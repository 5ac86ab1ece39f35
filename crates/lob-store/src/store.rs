//! The content-addressed object store.
//!
//! Layout per root: `<root>/<d[0:3]>/<d[3:6]>/<digest>_meta` plus
//! `<digest>_<n>` chunk files. When a shared root is configured every object
//! lives physically once in the shared root and is hard-linked into the
//! local root, so both paths resolve to the same inode.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use lob_types::{LobInfo, LobSha};
use regex::Regex;
use sha1::{Digest, Sha1};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, warn};

use crate::chunker::{chunk_stream, BUF_SIZE};
use crate::error::StoreError;

/// Filenames that belong to the store: `<40 hex>_meta` or `<40 hex>_<n>`.
static LOB_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}_(meta|\d+)$").unwrap());

/// Content-addressed object store over one local root and an optional
/// process-wide shared root.
pub struct LobStore {
    local_root: PathBuf,
    shared_root: Option<PathBuf>,
    chunk_size: u64,
}

impl LobStore {
    /// Open a store. The local root is created if missing; the shared root,
    /// when given, must already exist (it is configured process-wide).
    pub fn new(
        local_root: impl Into<PathBuf>,
        shared_root: Option<PathBuf>,
        chunk_size: u64,
    ) -> Result<Self, StoreError> {
        let local_root = local_root.into();
        std::fs::create_dir_all(&local_root)?;
        Ok(Self {
            local_root,
            shared_root,
            chunk_size,
        })
    }

    /// The per-repository root holding (links to) every object.
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// The process-wide shared root, if configured.
    pub fn shared_root(&self) -> Option<&Path> {
        self.shared_root.as_deref()
    }

    /// Chunk size applied to newly stored objects.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    // -------------------------------------------------------------------
    // Path derivation
    // -------------------------------------------------------------------

    fn rel_dir(sha: &LobSha) -> PathBuf {
        rel_splay_dir(sha)
    }

    fn meta_name(sha: &LobSha) -> String {
        format!("{sha}_meta")
    }

    fn chunk_name(sha: &LobSha, index: u32) -> String {
        format!("{sha}_{index}")
    }

    fn local_dir(&self, sha: &LobSha) -> PathBuf {
        self.local_root.join(Self::rel_dir(sha))
    }

    fn local_meta_path(&self, sha: &LobSha) -> PathBuf {
        self.local_dir(sha).join(Self::meta_name(sha))
    }

    fn local_chunk_path(&self, sha: &LobSha, index: u32) -> PathBuf {
        self.local_dir(sha).join(Self::chunk_name(sha, index))
    }

    fn shared_dir(&self, shared: &Path, sha: &LobSha) -> PathBuf {
        shared.join(Self::rel_dir(sha))
    }

    /// Root new objects are physically written into.
    fn primary_root(&self) -> &Path {
        self.shared_root.as_deref().unwrap_or(&self.local_root)
    }

    /// Relative paths of every file backing an object, meta first.
    ///
    /// All paths are relative to the local root (objects are hard-linked
    /// there even when a shared root holds the bytes).
    pub fn file_list(info: &LobInfo) -> Vec<PathBuf> {
        let dir = Self::rel_dir(&info.sha);
        let mut files = vec![dir.join(Self::meta_name(&info.sha))];
        for i in 0..info.num_chunks {
            files.push(dir.join(Self::chunk_name(&info.sha, i)));
        }
        files
    }

    // -------------------------------------------------------------------
    // Store
    // -------------------------------------------------------------------

    /// Stream an object into the store.
    ///
    /// `leader` is a prefix the caller already consumed while probing the
    /// stream; it becomes the first bytes of the payload. Chunks are placed
    /// before the meta file so a reader never sees a meta file without its
    /// chunks. Existing files of the correct size are left untouched.
    pub async fn store<R>(&self, reader: R, leader: &[u8]) -> Result<LobInfo, StoreError>
    where
        R: AsyncRead + Unpin,
    {
        let spool_root = self.primary_root().to_path_buf();
        fs::create_dir_all(&spool_root).await?;

        let streamed = chunk_stream(reader, leader, self.chunk_size, &spool_root).await?;
        let info = LobInfo {
            sha: streamed.sha,
            size: streamed.total_size,
            num_chunks: streamed.chunks.len() as u32,
            chunk_size: self.chunk_size,
        };

        for (index, tmp) in streamed.chunks.into_iter().enumerate() {
            let index = index as u32;
            let dest = self
                .primary_root()
                .join(Self::rel_dir(&info.sha))
                .join(Self::chunk_name(&info.sha, index));
            self.place_temp(tmp, &dest, info.expected_chunk_size(index))
                .await?;
        }

        // Meta is written last: its presence marks the object complete.
        let meta_bytes = serde_json::to_vec(&info)?;
        let meta_dest = self
            .primary_root()
            .join(Self::rel_dir(&info.sha))
            .join(Self::meta_name(&info.sha));
        if !file_is_size(&meta_dest, meta_bytes.len() as u64).await {
            let mut tmp = tempfile::Builder::new()
                .prefix("tempmeta")
                .tempfile_in(&spool_root)?;
            std::io::Write::write_all(&mut tmp, &meta_bytes)?;
            self.place_temp(tmp, &meta_dest, meta_bytes.len() as u64)
                .await?;
        } else {
            debug!(sha = %info.sha, "meta file already present and valid");
            self.link_if_shared(&meta_dest).await?;
        }

        debug!(sha = %info.sha, size = info.size, chunks = info.num_chunks, "stored object");
        Ok(info)
    }

    /// Move a temporary into place, skipping when the destination already
    /// has the expected size, then hard-link shared files into the local
    /// root.
    async fn place_temp(
        &self,
        tmp: NamedTempFile,
        dest: &Path,
        expected_size: u64,
    ) -> Result<(), StoreError> {
        if file_is_size(dest, expected_size).await {
            debug!(path = %dest.display(), "destination already present and valid");
            drop(tmp);
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            // An existing wrong-sized file would survive some rename
            // implementations; clear it first.
            remove_if_exists(dest).await?;
            tmp.persist(dest).map_err(|e| e.error)?;
        }
        self.link_if_shared(dest).await
    }

    /// If `path` lives in the shared root, re-establish the local hard link.
    async fn link_if_shared(&self, path: &Path) -> Result<(), StoreError> {
        let Some(shared) = self.shared_root.as_deref() else {
            return Ok(());
        };
        let Ok(rel) = path.strip_prefix(shared) else {
            return Ok(());
        };
        let link_path = self.local_root.join(rel);
        if let Some(parent) = link_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        remove_if_exists(&link_path).await?;
        fs::hard_link(path, &link_path).await?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Info & recovery
    // -------------------------------------------------------------------

    /// Read and parse the meta file, recovering from the shared store if
    /// the local copy is missing.
    pub async fn info(&self, sha: &LobSha) -> Result<LobInfo, StoreError> {
        match self.read_local_info(sha).await {
            Ok(info) => Ok(info),
            Err(StoreError::NotFound(_)) if self.recover_from_shared(sha).await => {
                self.read_local_info(sha).await
            }
            Err(e) => Err(e),
        }
    }

    /// Read the local meta file without attempting recovery.
    async fn read_local_info(&self, sha: &LobSha) -> Result<LobInfo, StoreError> {
        let path = self.local_meta_path(sha);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*sha));
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(info) => Ok(info),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to parse meta file");
                Err(StoreError::Integrity { failed: vec![*sha] })
            }
        }
    }

    /// Re-establish local hard links for any file of this object that is
    /// missing or the wrong size locally but intact in the shared store.
    ///
    /// Returns `true` when the object is complete locally afterwards. Link
    /// failures are logged and reported as unrecoverable rather than
    /// propagated; the caller falls back to its not-found path.
    async fn recover_from_shared(&self, sha: &LobSha) -> bool {
        let Some(shared) = self.shared_root.clone() else {
            return false;
        };

        let local_meta = self.local_meta_path(sha);
        if !file_exists(&local_meta).await {
            let shared_meta = self.shared_dir(&shared, sha).join(Self::meta_name(sha));
            if !file_exists(&shared_meta).await {
                return false;
            }
            if let Err(e) = self.link_if_shared(&shared_meta).await {
                warn!(sha = %sha, error = %e, "unable to re-link shared meta file");
                return false;
            }
        }

        let Ok(info) = self.read_local_info(sha).await else {
            return false;
        };
        for i in 0..info.num_chunks {
            let expected = info.expected_chunk_size(i);
            let local_chunk = self.local_chunk_path(sha, i);
            if file_is_size(&local_chunk, expected).await {
                continue;
            }
            let shared_chunk = self.shared_dir(&shared, sha).join(Self::chunk_name(sha, i));
            if !file_is_size(&shared_chunk, expected).await {
                return false;
            }
            if let Err(e) = self.link_if_shared(&shared_chunk).await {
                warn!(sha = %sha, chunk = i, error = %e, "unable to re-link shared chunk");
                return false;
            }
        }
        debug!(sha = %sha, "recovered object from shared store");
        true
    }

    // -------------------------------------------------------------------
    // Retrieve
    // -------------------------------------------------------------------

    /// Stream an object to `out`.
    ///
    /// Every chunk is validated for presence and size before the first byte
    /// is written, so a retrieval either completes entirely or writes
    /// nothing.
    pub async fn retrieve<W>(&self, sha: &LobSha, out: &mut W) -> Result<LobInfo, StoreError>
    where
        W: AsyncWrite + Unpin,
    {
        let info = self.info(sha).await?;

        for i in 0..info.num_chunks {
            let expected = info.expected_chunk_size(i);
            let path = self.local_chunk_path(sha, i);
            if file_is_size(&path, expected).await {
                continue;
            }
            let recovered =
                self.recover_from_shared(sha).await && file_is_size(&path, expected).await;
            if !recovered {
                return if file_exists(&path).await {
                    Err(StoreError::Integrity { failed: vec![*sha] })
                } else {
                    Err(StoreError::NotFound(*sha))
                };
            }
        }

        let mut written = 0u64;
        for i in 0..info.num_chunks {
            let mut file = fs::File::open(self.local_chunk_path(sha, i)).await?;
            written += tokio::io::copy(&mut file, out).await?;
        }
        if written != info.size {
            return Err(StoreError::Integrity { failed: vec![*sha] });
        }
        debug!(sha = %sha, chunks = info.num_chunks, size = written, "retrieved object");
        Ok(info)
    }

    // -------------------------------------------------------------------
    // Delete
    // -------------------------------------------------------------------

    /// Unlink all local files of an object; shared counterparts whose hard
    /// link count has dropped to one are removed as well.
    pub async fn delete(&self, sha: &LobSha) -> Result<(), StoreError> {
        let prefix = format!("{sha}_");
        for path in files_with_prefix(&self.local_dir(sha), &prefix).await? {
            remove_if_exists(&path).await?;
            debug!(path = %path.display(), "deleted");
        }

        if let Some(shared) = self.shared_root.clone() {
            for path in files_with_prefix(&self.shared_dir(&shared, sha), &prefix).await? {
                if hard_link_count(&path).await == Some(1) {
                    remove_if_exists(&path).await?;
                    debug!(path = %path.display(), "deleted orphaned shared file");
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------

    /// Check one object.
    ///
    /// The shallow check confirms the meta file parses and every chunk
    /// exists at its expected size. `deep` additionally re-reads all chunk
    /// bytes through SHA-1 and compares with the stored digest. Purely
    /// observational apart from shared-store re-linking.
    pub async fn check_integrity(&self, sha: &LobSha, deep: bool) -> Result<(), StoreError> {
        let info = self.info(sha).await?;

        for i in 0..info.num_chunks {
            let expected = info.expected_chunk_size(i);
            let path = self.local_chunk_path(sha, i);
            if !file_is_size(&path, expected).await {
                let recovered =
                    self.recover_from_shared(sha).await && file_is_size(&path, expected).await;
                if !recovered {
                    return Err(StoreError::Integrity { failed: vec![*sha] });
                }
            }
        }

        if deep {
            let mut hasher = Sha1::new();
            let mut buf = vec![0u8; BUF_SIZE];
            for i in 0..info.num_chunks {
                let mut file = fs::File::open(self.local_chunk_path(sha, i)).await?;
                loop {
                    let n = file.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
            }
            let actual = LobSha::from(<[u8; 20]>::from(hasher.finalize()));
            if actual != *sha {
                warn!(expected = %sha, actual = %actual, "content digest mismatch");
                return Err(StoreError::Integrity { failed: vec![*sha] });
            }
        }
        Ok(())
    }

    /// Check several objects, aggregating every failing digest into one
    /// [`StoreError::Integrity`].
    pub async fn check_many(&self, shas: &[LobSha], deep: bool) -> Result<(), StoreError> {
        let mut failed = Vec::new();
        for sha in shas {
            if self.check_integrity(sha, deep).await.is_err() {
                failed.push(*sha);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Integrity { failed })
        }
    }

    /// Every digest with at least one file in the local root.
    pub async fn enumerate(&self) -> Result<Vec<LobSha>, StoreError> {
        enumerate_root(&self.local_root).await
    }
}

/// Two-level splay directory for a digest: `d[0:3]/d[3:6]`.
///
/// Shared by every root that uses the store layout, including remote
/// content roots maintained by transfer providers.
pub fn rel_splay_dir(sha: &LobSha) -> PathBuf {
    let hex = sha.to_string();
    Path::new(&hex[0..3]).join(&hex[3..6])
}

/// Relative path of an object's meta file within a store root.
pub fn rel_meta_path(sha: &LobSha) -> PathBuf {
    rel_splay_dir(sha).join(format!("{sha}_meta"))
}

/// Relative path of one chunk file within a store root.
pub fn rel_chunk_path(sha: &LobSha, index: u32) -> PathBuf {
    rel_splay_dir(sha).join(format!("{sha}_{index}"))
}

/// Walk a store root's two fan-out levels and collect every digest with at
/// least one matching file. Filenames not matching the store pattern are
/// ignored.
pub async fn enumerate_root(root: &Path) -> Result<Vec<LobSha>, StoreError> {
    let mut shas = BTreeSet::new();

    let mut level0 = match fs::read_dir(root).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    while let Some(d0) = level0.next_entry().await? {
        if !d0.file_type().await?.is_dir() {
            continue;
        }
        let mut level1 = fs::read_dir(d0.path()).await?;
        while let Some(d1) = level1.next_entry().await? {
            if !d1.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(d1.path()).await?;
            while let Some(entry) = files.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if LOB_FILE_RE.is_match(name) {
                    if let Ok(sha) = LobSha::parse(&name[..40]) {
                        shas.insert(sha);
                    }
                }
            }
        }
    }
    Ok(shas.into_iter().collect())
}

/// Files in `dir` whose name starts with `prefix`. Missing dir yields an
/// empty list.
pub(crate) async fn files_with_prefix(
    dir: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>, StoreError> {
    let mut out = Vec::new();
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = rd.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(prefix) {
                out.push(entry.path());
            }
        }
    }
    out.sort();
    Ok(out)
}

pub(crate) async fn file_exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

pub(crate) async fn file_is_size(path: &Path, expected: u64) -> bool {
    match fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() == expected,
        Err(_) => false,
    }
}

/// Hard-link count of a file; `None` when it cannot be read. Advisory only:
/// a racing peer may change the count between observation and action.
pub(crate) async fn hard_link_count(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    fs::metadata(path).await.ok().map(|m| m.nlink())
}

pub(crate) async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
