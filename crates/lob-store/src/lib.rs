//! On-disk object storage for git-lob.
//!
//! This crate provides:
//! - [`chunker`] — streaming SHA-1 hashing coupled with fixed-size chunk
//!   splitting into temporary files.
//! - [`LobStore`] — the content-addressed store: placement, retrieval,
//!   integrity checking, deletion, and dual-root hard-link handling.
//! - [`sweep_shared`] — reclamation of shared-store files whose last
//!   external hard link has gone away.
//!
//! Objects are splayed two directory levels deep on the first six hex
//! characters of the digest, with one `_meta` JSON file and zero or more
//! `_<n>` chunk files per object.

pub mod chunker;
mod error;
mod store;
mod sweep;

pub use chunker::{chunk_stream, ChunkedStream, BUF_SIZE};
pub use error::StoreError;
pub use store::{enumerate_root, rel_chunk_path, rel_meta_path, rel_splay_dir, LobStore};
pub use sweep::sweep_shared;
