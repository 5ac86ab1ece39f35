//! Retain-set construction and deletion.

use std::collections::{BTreeSet, HashSet};

use chrono::{Duration, Utc};
use lob_git::{GitRepo, PathFilter};
use lob_store::LobStore;
use lob_transfer::Provider;
use lob_types::{LobSha, Options, PruneEvent};
use tracing::{debug, warn};

use crate::error::PruneError;

/// Policy-driven prune over one repository's object store.
///
/// All cross-component references are one-way: the engine borrows the
/// store, the bridge, and the options record.
pub struct PruneEngine<'a> {
    store: &'a LobStore,
    repo: &'a GitRepo,
    options: &'a Options,
}

impl<'a> PruneEngine<'a> {
    /// Build an engine over borrowed collaborators.
    pub fn new(store: &'a LobStore, repo: &'a GitRepo, options: &'a Options) -> Self {
        Self {
            store,
            repo,
            options,
        }
    }

    /// Resolve the configured prune remote, expanding the `*` wildcard to
    /// `origin` when present, otherwise the first remote reported by git.
    async fn resolve_prune_remote(&self, require_remote: bool) -> Result<String, PruneError> {
        let configured = self.options.effective_prune_remote();
        if configured != "*" {
            return Ok(configured.to_string());
        }
        let remotes = self.repo.list_remotes().await?;
        if remotes.iter().any(|r| r == "origin") {
            return Ok("origin".to_string());
        }
        match remotes.into_iter().next() {
            Some(first) => Ok(first),
            None if require_remote => Err(PruneError::Config(
                "no remotes exist, cannot prune in safe mode".to_string(),
            )),
            None => Ok("origin".to_string()),
        }
    }

    /// Add retained digests for one commit: the checkout-plus-window query
    /// when the ref itself is retained, then the unpushed walk from the
    /// earliest commit examined.
    async fn retain_for_commit(
        &self,
        commit: &str,
        days: i64,
        not_pushed_only: bool,
        remote: &str,
        retain: &mut BTreeSet<LobSha>,
        callback: &mut dyn FnMut(PruneEvent),
    ) -> Result<(), PruneError> {
        let filter = PathFilter::all();

        let earliest = if not_pushed_only {
            // This ref is out of the retention window; only unpushed
            // references keep its objects alive.
            commit.to_string()
        } else {
            callback(PruneEvent::Working);
            let (lobs, earliest) = self
                .repo
                .lobs_at_checkout_and_recent(commit, days, &filter)
                .await?;
            for sha in lobs {
                if retain.insert(sha) {
                    callback(PruneEvent::RetainByDate(sha));
                }
            }
            earliest
        };

        // The snapshot queries use the '-' side of diffs between commits;
        // the unpushed walk picks up the '+' side on the commits
        // themselves, from the earliest examined point backwards.
        self.repo
            .walk_unpushed_lob_refs(remote, &earliest, &filter, |group| {
                callback(PruneEvent::Working);
                for sha in group.lob_shas {
                    if retain.insert(sha) {
                        callback(PruneEvent::RetainNotPushed(sha));
                    }
                }
                false
            })
            .await?;
        Ok(())
    }

    /// Remove objects outside the retention policy.
    ///
    /// Builds the retain set (HEAD window, recent refs, unpushed history,
    /// staged index), then deletes every locally enumerated digest not in
    /// it. With a provider, each candidate's files are confirmed present on
    /// the prune remote before deletion; absent or unverifiable objects are
    /// kept. Returns the deleted digests. In dry-run mode the same
    /// callbacks fire but no file operation happens.
    pub async fn prune_old(
        &self,
        dry_run: bool,
        safe_provider: Option<&dyn Provider>,
        callback: &mut dyn FnMut(PruneEvent),
    ) -> Result<Vec<LobSha>, PruneError> {
        let remote = self.resolve_prune_remote(safe_provider.is_some()).await?;
        if let Some(provider) = safe_provider {
            provider.validate_config(&remote)?;
        }

        let mut retain = BTreeSet::new();
        let mut refs_done = HashSet::new();

        // HEAD always keeps its window.
        debug!(days = self.options.retention_commits_head, "retaining HEAD history");
        let head = self.repo.resolve_full_sha("HEAD").await?;
        self.retain_for_commit(
            &head,
            self.options.retention_commits_head,
            false,
            &remote,
            &mut retain,
            callback,
        )
        .await?;
        refs_done.insert(head);

        // All refs in descending commit-date order. Once one falls outside
        // the refs window, all following do too and only their unpushed
        // history matters.
        let earliest_ref_date = Utc::now() - Duration::days(self.options.retention_refs_days);
        let mut outside_ref_retention = false;
        for git_ref in self.repo.list_all_refs().await? {
            callback(PruneEvent::Working);
            if !refs_done.insert(git_ref.sha.clone()) {
                continue;
            }

            let not_pushed_only = if outside_ref_retention {
                true
            } else {
                match self.repo.commit_summary(&git_ref.sha).await {
                    Ok(summary)
                        if summary.commit_date.with_timezone(&Utc) < earliest_ref_date =>
                    {
                        outside_ref_retention = true;
                        true
                    }
                    // Unknown date: be safe and treat the ref as recent.
                    _ => false,
                }
            };

            if !not_pushed_only {
                debug!(
                    ref_name = %git_ref.name,
                    days = self.options.retention_commits_other,
                    "retaining ref history"
                );
            }
            self.retain_for_commit(
                &git_ref.sha,
                self.options.retention_commits_other,
                not_pushed_only,
                &remote,
                &mut retain,
                callback,
            )
            .await?;
        }

        // Staged-but-uncommitted pointers must survive too.
        for sha in self.repo.staged_lob_references(&PathFilter::all()).await? {
            if retain.insert(sha) {
                callback(PruneEvent::RetainReferenced(sha));
            }
        }

        self.delete_complement(&retain, dry_run, safe_provider.map(|p| (p, remote.as_str())), callback)
            .await
    }

    /// Delete anything no reachable commit and no staged change references.
    pub async fn prune_unreferenced(
        &self,
        dry_run: bool,
        callback: &mut dyn FnMut(PruneEvent),
    ) -> Result<Vec<LobSha>, PruneError> {
        let filter = PathFilter::all();
        let mut referenced = BTreeSet::new();

        for sha in self.repo.all_lob_references(&filter).await? {
            callback(PruneEvent::Working);
            if referenced.insert(sha) {
                callback(PruneEvent::RetainReferenced(sha));
            }
        }
        for sha in self.repo.staged_lob_references(&filter).await? {
            callback(PruneEvent::Working);
            if referenced.insert(sha) {
                callback(PruneEvent::RetainReferenced(sha));
            }
        }

        self.delete_complement(&referenced, dry_run, None, callback)
            .await
    }

    /// Delete every locally stored digest not in `retain`.
    async fn delete_complement(
        &self,
        retain: &BTreeSet<LobSha>,
        dry_run: bool,
        safe: Option<(&dyn Provider, &str)>,
        callback: &mut dyn FnMut(PruneEvent),
    ) -> Result<Vec<LobSha>, PruneError> {
        let mut removed = Vec::new();
        for sha in self.store.enumerate().await? {
            callback(PruneEvent::Working);
            if retain.contains(&sha) {
                continue;
            }

            if let Some((provider, remote)) = safe {
                match provider.check_files_present(remote, &sha).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(%sha, remote, "not present on remote, keeping");
                        continue;
                    }
                    Err(e) => {
                        debug!(%sha, remote, error = %e, "remote check failed, keeping");
                        continue;
                    }
                }
            }

            if !dry_run {
                if let Err(e) = self.store.delete(&sha).await {
                    // One bad object must not abort the whole prune.
                    warn!(%sha, error = %e, "unable to delete, skipping");
                    continue;
                }
            }
            callback(PruneEvent::Deleted(sha));
            removed.push(sha);
        }
        Ok(removed)
    }
}
