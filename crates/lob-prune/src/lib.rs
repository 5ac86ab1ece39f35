//! Retention and prune engine.
//!
//! Cross-references commit history with pointer records to compute the set
//! of stored objects still reachable (the retain set), then reclaims the
//! complement from the object store. Two strategies:
//!
//! - [`PruneEngine::prune_old`] — policy-driven retention: HEAD and recent
//!   refs keep a date window of history, unpushed commits keep their
//!   references regardless of age, and the index keeps what it stages.
//! - [`PruneEngine::prune_unreferenced`] — delete anything no commit on any
//!   ref and no staged change references.
//!
//! Safe mode confirms each candidate's files exist on the prune remote
//! before deletion; dry-run reports without touching disk.

mod engine;
mod error;

pub use engine::PruneEngine;
pub use error::PruneError;
