use crate::error::{ErrorKind, Result};
use folio_cache::{CacheHandle, CacheKey};
use folio_storage::{AlbumPath, CatalogHandle, PathCatalog};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::instrument;

pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Picks the photo that represents an album.
///
/// An album is represented by its first photo in name order. An album without
/// photos of its own borrows one from its sub-albums, depth first in name
/// order: when the first sub-album turns out to be empty the next one is
/// tried, until the whole subtree (down to `max_depth` levels) is exhausted.
///
/// Answers are memoized in the shared cache for every album on the way down
/// to the photo, and double-checked against the filesystem before reuse.
#[derive(Debug, Clone)]
pub struct ThumbnailResolver {
    catalog: CatalogHandle,
    cache: CacheHandle,
    max_depth: usize,
}

impl ThumbnailResolver {
    pub fn new(catalog: CatalogHandle, cache: CacheHandle) -> Self {
        Self {
            catalog,
            cache,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Absolute path of the photo representing `album`.
    ///
    /// # Errors
    ///
    /// [`NoThumbnail`](ErrorKind::NoThumbnail) when the album can't be listed
    /// or nothing under it is a photo.
    #[instrument(level = "debug", skip_all, fields(album = %album))]
    pub async fn resolve(&self, album: &AlbumPath) -> Result<PathBuf> {
        let key = CacheKey::album(album);
        if let Some(memo) = self.cache.get(&key).await {
            if PathCatalog::is_readable_file(&memo).await {
                tracing::debug!(source = %memo.display(), "Thumbnail source memo hit");
                return Ok(memo);
            }
            self.cache.evict_stale(&key, &memo).await;
        }

        let mut visited = HashSet::new();
        let mut pending = vec![album.clone()];
        while let Some(current) = pending.pop() {
            // Symlinked directories can loop back on themselves.
            if let Ok(canonical) = self.catalog.canonical(&current).await
                && !visited.insert(canonical)
            {
                tracing::debug!(album = %current, "Skipping album already visited through a symlink");
                continue;
            }
            let listing = match self.catalog.list(&current).await {
                Ok(listing) => listing,
                Err(e) if current == *album => return Err(e.raise(ErrorKind::NoThumbnail)),
                Err(e) => {
                    tracing::debug!(album = %current, error = ?e, "Skipping unreadable album");
                    continue;
                },
            };

            if let Some(photo) = listing.photos().next() {
                let source = self.catalog.absolute(&current).join(photo.name());
                self.memoize(album, &current, &source).await;
                tracing::debug!(source = %source.display(), "Thumbnail source resolved");
                return Ok(source);
            }

            if current.depth() - album.depth() >= self.max_depth {
                tracing::debug!(album = %current, max_depth = self.max_depth, "Not descending any deeper");
                continue;
            }
            // Reversed so the first album in name order is popped first.
            for entry in listing.albums().collect::<Vec<_>>().into_iter().rev() {
                match current.child(entry.name()) {
                    Ok(child) => pending.push(child),
                    Err(e) => tracing::debug!(album = %current, error = ?e, "Skipping sub-album"),
                }
            }
            tracing::trace!(album = %current, pending = pending.len(), "Descending into sub-albums");
        }
        exn::bail!(ErrorKind::NoThumbnail);
    }

    /// Remember `source` for `found` and every album between it and `requested`.
    async fn memoize(&self, requested: &AlbumPath, found: &AlbumPath, source: &Path) {
        let mut album = Some(found.clone());
        while let Some(current) = album {
            self.cache.put(CacheKey::album(&current), source).await;
            if current == *requested {
                break;
            }
            album = current.parent();
        }
    }
}
