//! Batched first-parent history walks.

use crate::error::GitError;
use crate::repo::GitRepo;

/// Commits fetched per `git log` invocation while walking.
const WALK_BATCH: usize = 50;

impl GitRepo {
    /// Walk first-parent ancestry from `start`, invoking the callback with
    /// `(current, parent)` digests in descending order.
    ///
    /// `parent` is the empty string at the root commit, where the walk
    /// stops. The callback returns `true` to terminate early.
    pub async fn walk_history<F>(&self, start: &str, mut callback: F) -> Result<(), GitError>
    where
        F: FnMut(&str, &str) -> bool,
    {
        let mut cursor = self.resolve_full_sha(start).await?;

        loop {
            let batch = WALK_BATCH.to_string();
            let lines = self
                .run_lines([
                    "log",
                    "-n",
                    batch.as_str(),
                    "--topo-order",
                    "--first-parent",
                    "--format=%H %P",
                    cursor.as_str(),
                ])
                .await?;
            if lines.is_empty() {
                return Ok(());
            }

            let mut last_parent = String::new();
            let mut seen = 0;
            for line in &lines {
                let mut parts = line.split_whitespace();
                let sha = parts
                    .next()
                    .ok_or_else(|| GitError::Parse(format!("empty log line: {line}")))?;
                // Only the first parent matters on a --first-parent walk.
                let parent = parts.next().unwrap_or("");
                if callback(sha, parent) {
                    return Ok(());
                }
                last_parent = parent.to_string();
                seen += 1;
            }

            if last_parent.is_empty() || seen < WALK_BATCH {
                // Reached the root commit.
                return Ok(());
            }
            // Continue from the first parent of the last commit; the next
            // batch starts there so nothing is visited twice.
            cursor = last_parent;
        }
    }
}
