//! Derived asset cache.
//!
//! This crate tracks everything folio derives from the photo tree: which
//! photo represents an album, and where the resized rendition of a photo
//! lives. The cache is process-local and ephemeral. The photo tree is the
//! source of truth; if the scratch directory is wiped, entries are detected
//! as stale on the next read and derived again.
//!
//! # Architecture
//! - [`CacheKey`]: a 128-bit fingerprint of the logical inputs of a
//!   derivation (never of file contents).
//! - [`DerivedAssetCache`]: the key → location map, shared by handle.
//! - [`ArtifactStore`]: the scratch directory holding derived bytes. Writes go
//!   to a temporary file that is atomically renamed into place on commit, so a
//!   location in the map always names a complete file.
//! - [`InFlight`]: tracks derivations in progress so that concurrent requests
//!   for the same key wait for one producer instead of duplicating work.

mod artifact;
pub mod error;
mod inflight;
mod key;
mod store;

pub use crate::artifact::{ArtifactStore, PendingArtifact};
pub use crate::inflight::{Claim, InFlight, ProducerGuard, Waiter};
pub use crate::key::CacheKey;
pub use crate::store::DerivedAssetCache;
use std::sync::Arc;

pub type CacheHandle = Arc<DerivedAssetCache>;
