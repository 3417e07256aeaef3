//! Album thumbnails.
//!
//! Given an album in the photo tree, find a photo that can stand for it
//! ([`ThumbnailResolver`]), derive a resized copy of it once
//! ([`RenderPipeline`]), and serve every later request for it from the
//! scratch directory. [`Gallery`] wires the pieces together from
//! configuration and turns errors into client-safe [`Failure`]s.

pub mod error;
mod gallery;
mod pipeline;
mod resolve;

pub use crate::gallery::{Failure, Gallery, GalleryOptions, ThumbnailQuery};
pub use crate::pipeline::{Origin, RenderPipeline, Served};
pub use crate::resolve::{DEFAULT_MAX_DEPTH, ThumbnailResolver};
pub use folio_storage::{AlbumPath, Entry, Listing};
