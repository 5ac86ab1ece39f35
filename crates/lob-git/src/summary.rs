//! Commit summaries.

use chrono::{DateTime, FixedOffset};

use crate::error::GitError;
use crate::repo::GitRepo;

/// Field separator for the summary format: U+241E SYMBOL FOR RECORD
/// SEPARATOR. Commit subjects never contain it, so pipes and other
/// punctuation in subjects survive verbatim.
const SUMMARY_SEP: char = '\u{241E}';

/// A parsed commit summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    /// Full 40-hex commit digest.
    pub sha: String,
    /// Abbreviated digest.
    pub short_sha: String,
    /// Parent digests, first parent first. Empty at the root commit.
    pub parents: Vec<String>,
    /// Author name.
    pub author_name: String,
    /// Author email.
    pub author_email: String,
    /// Author date.
    pub author_date: DateTime<FixedOffset>,
    /// Committer name.
    pub committer_name: String,
    /// Committer email.
    pub committer_email: String,
    /// Committer date.
    pub commit_date: DateTime<FixedOffset>,
    /// Subject line, verbatim.
    pub subject: String,
}

impl GitRepo {
    /// Summary of the commit a ref resolves to.
    pub async fn commit_summary(&self, reference: &str) -> Result<CommitSummary, GitError> {
        let format = format!(
            "--format=%H{0}%h{0}%P{0}%an{0}%ae{0}%ad{0}%cn{0}%ce{0}%cd{0}%s",
            SUMMARY_SEP
        );
        let out = self
            .run(["log", "-n", "1", format.as_str(), "--date=rfc", reference])
            .await?;
        parse_summary(out.trim_end_matches('\n'))
    }
}

fn parse_summary(line: &str) -> Result<CommitSummary, GitError> {
    let fields: Vec<&str> = line.splitn(10, SUMMARY_SEP).collect();
    if fields.len() != 10 {
        return Err(GitError::Parse(format!(
            "expected 10 summary fields, got {}: {line}",
            fields.len()
        )));
    }
    Ok(CommitSummary {
        sha: fields[0].to_string(),
        short_sha: fields[1].to_string(),
        parents: fields[2].split_whitespace().map(str::to_string).collect(),
        author_name: fields[3].to_string(),
        author_email: fields[4].to_string(),
        author_date: DateTime::parse_from_rfc2822(fields[5])?,
        committer_name: fields[6].to_string(),
        committer_email: fields[7].to_string(),
        commit_date: DateTime::parse_from_rfc2822(fields[8])?,
        subject: fields[9].to_string(),
    })
}
