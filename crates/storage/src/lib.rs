//! Filesystem side of the album tree.
//!
//! - [`AlbumPath`] is the normalized, root-relative address of an album (or
//!   photo) and can never point outside the static files root.
//! - [`PathCatalog`] lists a single album, classifying each child as an
//!   [`Entry::Album`] or an [`Entry::Photo`] in a deterministic order.

mod catalog;
pub mod error;
mod path;

pub use crate::catalog::{Entry, Listing, PathCatalog};
pub use crate::path::AlbumPath;
use std::sync::Arc;

pub type CatalogHandle = Arc<PathCatalog>;
