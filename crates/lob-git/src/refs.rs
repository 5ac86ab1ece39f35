//! Ref enumeration: branches, tags, remotes, and upstream tracking.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::GitError;
use crate::repo::GitRepo;

/// Field separator for `for-each-ref` formats; does not occur in ref names.
const FIELD_SEP: char = '\u{241E}';

/// Matches `git branch -vv` lines that carry a tracking ref, stopping at
/// `]` or `:` to cope with ahead/behind markers.
static TRACKING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[* ] (\S+)\s+[a-fA-F0-9]+\s+\[([^/]+)/([^:\]]+)[\]:]").unwrap()
});

/// What kind of ref a [`GitRef`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// The symbolic HEAD.
    Head,
    /// A branch under `refs/heads`.
    LocalBranch,
    /// A branch under `refs/remotes/<remote>`.
    RemoteBranch,
    /// A tag under `refs/tags`; annotated tags dereference to commits.
    LocalTag,
}

/// A named ref resolved to the full digest of the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    /// Symbolic name (`master`, `origin/master`, `v1.0`, `HEAD`).
    pub name: String,
    /// Classification of the ref.
    pub kind: RefKind,
    /// Full 40-hex commit digest.
    pub sha: String,
}

impl GitRepo {
    /// Short names of all local branches.
    pub async fn list_local_branches(&self) -> Result<Vec<String>, GitError> {
        self.run_lines(["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .await
    }

    /// Branch names on one remote, without the remote prefix and without
    /// the symbolic HEAD entry.
    pub async fn list_remote_branches(&self, remote: &str) -> Result<Vec<String>, GitError> {
        let prefix = format!("refs/remotes/{remote}/");
        let pattern = format!("refs/remotes/{remote}");
        let lines = self
            .run_lines(["for-each-ref", "--format=%(refname)", pattern.as_str()])
            .await?;
        Ok(lines
            .iter()
            .filter_map(|l| l.strip_prefix(&prefix))
            .filter(|name| *name != "HEAD")
            .map(str::to_string)
            .collect())
    }

    /// Every ref relevant to retention: HEAD first, then local branches,
    /// remote branches, and tags in descending commit-date order.
    ///
    /// Annotated tags are dereferenced to the commit they tag.
    pub async fn list_all_refs(&self) -> Result<Vec<GitRef>, GitError> {
        let mut refs = Vec::new();

        let head_sha = self.resolve_full_sha("HEAD").await?;
        refs.push(GitRef {
            name: "HEAD".to_string(),
            kind: RefKind::Head,
            sha: head_sha,
        });

        let format = format!(
            "--format=%(refname){FIELD_SEP}%(objectname){FIELD_SEP}%(*objectname)"
        );
        let lines = self
            .run_lines([
                "for-each-ref",
                "--sort=-committerdate",
                format.as_str(),
                "refs/heads",
                "refs/remotes",
                "refs/tags",
            ])
            .await?;

        for line in lines {
            let fields: Vec<&str> = line.split(FIELD_SEP).collect();
            if fields.len() != 3 {
                return Err(GitError::Parse(format!("unexpected for-each-ref line: {line}")));
            }
            let (refname, objectname, peeled) = (fields[0], fields[1], fields[2]);
            // A non-empty peeled digest means an annotated tag; use the
            // commit it points at.
            let sha = if peeled.is_empty() { objectname } else { peeled };

            let (name, kind) = if let Some(name) = refname.strip_prefix("refs/heads/") {
                (name.to_string(), RefKind::LocalBranch)
            } else if let Some(name) = refname.strip_prefix("refs/remotes/") {
                if name == "HEAD" || name.ends_with("/HEAD") {
                    continue;
                }
                (name.to_string(), RefKind::RemoteBranch)
            } else if let Some(name) = refname.strip_prefix("refs/tags/") {
                (name.to_string(), RefKind::LocalTag)
            } else {
                continue;
            };

            refs.push(GitRef {
                name,
                kind,
                sha: sha.to_string(),
            });
        }
        Ok(refs)
    }

    /// The upstream tracking branch of a local branch, as `git pull` would
    /// use it. Returns empty strings when the branch tracks nothing.
    pub async fn upstream_branch(&self, local_branch: &str) -> Result<(String, String), GitError> {
        // Super-verbose listing carries the tracking ref in brackets:
        //   branch1   387def9 [origin/branch1] message
        // * master    aec3297 [origin/master: behind 1] message
        for line in self.run_lines(["branch", "-vv"]).await? {
            if let Some(caps) = TRACKING_RE.captures(&line) {
                if &caps[1] == local_branch {
                    return Ok((caps[2].to_string(), caps[3].to_string()));
                }
            }
        }
        Ok((String::new(), String::new()))
    }
}
