//! Shared types for git-lob.
//!
//! This crate defines the core vocabulary used across the workspace:
//! the content digest ([`LobSha`]), the per-object metadata record
//! ([`LobInfo`]), the working-tree pointer record, the prune event
//! taxonomy ([`PruneEvent`]), and configuration ([`Options`]).

mod config;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

pub use config::Options;

/// Byte length of a pointer record: `"git-lob: "` plus 40 hex characters.
pub const POINTER_LEN: usize = 49;

/// Literal prefix of every pointer record.
pub const POINTER_PREFIX: &str = "git-lob: ";

/// Content-addressed identifier for a LOB: SHA-1 over the full payload.
///
/// Rendered as 40 lowercase hex characters. The digest of a stored object
/// equals the SHA-1 of the concatenation of its chunks in order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct LobSha([u8; 20]);

impl LobSha {
    /// Compute the digest of a byte slice in one shot.
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Return the raw 20-byte representation.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Render as a 40-character lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Parse a 40-character hex string (either case accepted).
    pub fn parse(s: &str) -> Result<Self, ShaParseError> {
        if s.len() != 40 {
            return Err(ShaParseError::Length(s.len()));
        }
        let mut bytes = [0u8; 20];
        let raw = s.as_bytes();
        for (i, byte) in bytes.iter_mut().enumerate() {
            let hi = hex_nibble(raw[i * 2]).ok_or(ShaParseError::InvalidChar)?;
            let lo = hex_nibble(raw[i * 2 + 1]).ok_or(ShaParseError::InvalidChar)?;
            *byte = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Failure to parse a hex digest string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShaParseError {
    /// Input was not exactly 40 characters.
    #[error("digest must be 40 hex characters, got {0}")]
    Length(usize),
    /// Input contained a non-hex character.
    #[error("digest contains a non-hex character")]
    InvalidChar,
}

impl From<[u8; 20]> for LobSha {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl FromStr for LobSha {
    type Err = ShaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LobSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for LobSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LobSha({self})")
    }
}

impl Serialize for LobSha {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LobSha {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Metadata record for a stored LOB.
///
/// Persisted as UTF-8 JSON in the object's `_meta` file. The chunk size is
/// recorded per object because the configured size may change between store
/// and retrieve; retrieval always uses the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobInfo {
    /// Digest of the full object payload.
    #[serde(rename = "SHA")]
    pub sha: LobSha,
    /// Total size of the object in bytes (all chunks).
    #[serde(rename = "Size")]
    pub size: u64,
    /// Number of chunks making up the object. Zero for an empty object.
    #[serde(rename = "NumChunks")]
    pub num_chunks: u32,
    /// Chunk size in effect when the object was stored.
    #[serde(rename = "ChunkSize")]
    pub chunk_size: u64,
}

impl LobInfo {
    /// Expected size of chunk `index` given this record.
    ///
    /// A single-chunk object's chunk is the full size; every chunk before
    /// the last is exactly `chunk_size`; the last is the remainder.
    pub fn expected_chunk_size(&self, index: u32) -> u64 {
        if self.num_chunks == 1 {
            self.size
        } else if index + 1 < self.num_chunks {
            self.chunk_size
        } else {
            self.size - u64::from(self.num_chunks - 1) * self.chunk_size
        }
    }
}

/// Render the pointer record for a digest.
///
/// The result is exactly [`POINTER_LEN`] bytes; callers writing it into the
/// working tree append no trailing newline so that the committed blob size
/// stays constant.
pub fn format_pointer(sha: &LobSha) -> String {
    format!("{POINTER_PREFIX}{sha}")
}

/// Parse a pointer record, tolerating trailing whitespace.
///
/// Returns `None` when the input is not a well-formed pointer line.
pub fn parse_pointer(data: &[u8]) -> Option<LobSha> {
    let text = std::str::from_utf8(data).ok()?;
    let rest = text.strip_prefix(POINTER_PREFIX)?;
    LobSha::parse(rest.trim_end()).ok()
}

/// Events emitted by the prune engine and the shared-store sweep.
///
/// In dry-run mode the same events fire even though no file operation is
/// performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneEvent {
    /// Progress tick, no digest attached.
    Working,
    /// A digest is retained because a commit or the index references it.
    RetainReferenced(LobSha),
    /// A digest is retained because its referencing commit is inside the
    /// retention window.
    RetainByDate(LobSha),
    /// A digest is retained because its referencing commit is not pushed.
    RetainNotPushed(LobSha),
    /// A digest is being deleted.
    Deleted(LobSha),
}
