//! Error types for the git bridge.

/// Errors that can occur while driving git.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// The git subprocess exited with a failure status.
    #[error("git {args} failed: {stderr}")]
    Command {
        /// The arguments the subprocess was invoked with.
        args: String,
        /// Trimmed stderr of the failed invocation.
        stderr: String,
    },

    /// Output from git did not match the expected shape.
    #[error("unable to parse git output: {0}")]
    Parse(String),

    /// A ref could not be resolved to a full 40-hex digest.
    #[error("unable to resolve '{0}' to a commit digest")]
    BadRef(String),

    /// A commit date could not be parsed.
    #[error("unable to parse commit date: {0}")]
    Date(#[from] chrono::ParseError),

    /// An include/exclude glob pattern was malformed.
    #[error("invalid path filter pattern '{pattern}': {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// The underlying glob error.
        source: glob::PatternError,
    },

    /// An I/O error occurred spawning or reading the subprocess.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
