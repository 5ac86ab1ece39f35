//! Reclamation sweep for shared store roots.
//!
//! [`LobStore::delete`](crate::LobStore::delete) unlinks orphaned shared
//! files as objects are pruned, but a repository deleted wholesale never
//! goes through that path. The sweep walks the shared root directly and
//! removes any file whose hard-link count has dropped to one (no local
//! repository still links it).

use std::path::Path;

use lob_types::{LobSha, PruneEvent};
use tracing::warn;

use crate::error::StoreError;
use crate::store::{enumerate_root, files_with_prefix, hard_link_count, remove_if_exists};

/// Sweep a shared root, deleting files with no remaining external links.
///
/// Returns the digests that had at least one file reclaimed. In dry-run
/// mode the same [`PruneEvent::Deleted`] events fire but nothing is
/// removed. A failure to delete one file is logged and the sweep carries
/// on.
pub async fn sweep_shared(
    shared_root: &Path,
    dry_run: bool,
    callback: &mut dyn FnMut(PruneEvent),
) -> Result<Vec<LobSha>, StoreError> {
    let mut reclaimed = Vec::new();

    for sha in enumerate_root(shared_root).await? {
        let hex = sha.to_string();
        let dir = shared_root.join(&hex[0..3]).join(&hex[3..6]);
        let mut deleted_any = false;

        for path in files_with_prefix(&dir, &format!("{sha}_")).await? {
            callback(PruneEvent::Working);
            // Link count 1 means only the shared copy remains. A racing
            // peer that re-links just before our unlink keeps its own name
            // alive; that file is picked up by a later sweep.
            if hard_link_count(&path).await != Some(1) {
                continue;
            }
            if !deleted_any {
                callback(PruneEvent::Deleted(sha));
                deleted_any = true;
            }
            if !dry_run {
                if let Err(e) = remove_if_exists(&path).await {
                    warn!(path = %path.display(), error = %e, "unable to delete shared file");
                }
            }
        }
        if deleted_any {
            reclaimed.push(sha);
        }
    }

    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LobStore;
    use tempfile::TempDir;

    fn test_data(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut state: u32 = 0xBADC_0FFE;
        for _ in 0..size {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            data.push((state >> 16) as u8);
        }
        data
    }

    async fn store_with_shared(dir: &TempDir) -> (LobStore, std::path::PathBuf) {
        let shared = dir.path().join("shared");
        std::fs::create_dir_all(&shared).unwrap();
        let store = LobStore::new(dir.path().join("local"), Some(shared.clone()), 100).unwrap();
        (store, shared)
    }

    #[tokio::test]
    async fn test_sweep_keeps_linked_files() {
        let dir = TempDir::new().unwrap();
        let (store, shared) = store_with_shared(&dir).await;
        let info = store
            .store(std::io::Cursor::new(test_data(150)), b"")
            .await
            .unwrap();

        let mut events = Vec::new();
        let reclaimed = sweep_shared(&shared, false, &mut |e| events.push(e))
            .await
            .unwrap();
        assert!(reclaimed.is_empty(), "linked files must survive the sweep");

        let mut out = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut out);
        store.retrieve(&info.sha, &mut cursor).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_reclaims_orphans() {
        let dir = TempDir::new().unwrap();
        let (store, shared) = store_with_shared(&dir).await;
        let info = store
            .store(std::io::Cursor::new(test_data(150)), b"")
            .await
            .unwrap();

        // Repository vanishes without a prune.
        std::fs::remove_dir_all(store.local_root()).unwrap();

        let mut deleted = Vec::new();
        let reclaimed = sweep_shared(&shared, false, &mut |e| {
            if let PruneEvent::Deleted(sha) = e {
                deleted.push(sha);
            }
        })
        .await
        .unwrap();

        assert_eq!(reclaimed, vec![info.sha]);
        assert_eq!(deleted, vec![info.sha]);
        assert!(enumerate_root(&shared).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_dry_run_reports_but_keeps() {
        let dir = TempDir::new().unwrap();
        let (store, shared) = store_with_shared(&dir).await;
        let info = store
            .store(std::io::Cursor::new(test_data(80)), b"")
            .await
            .unwrap();
        std::fs::remove_dir_all(store.local_root()).unwrap();

        let reclaimed = sweep_shared(&shared, true, &mut |_| {}).await.unwrap();
        assert_eq!(reclaimed, vec![info.sha]);
        assert_eq!(
            enumerate_root(&shared).await.unwrap(),
            vec![info.sha],
            "dry run must not delete"
        );
    }
}
