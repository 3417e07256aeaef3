use crate::CacheKey;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Map from [`CacheKey`] to the location of a previously produced artifact.
///
/// Entries live behind a [`RwLock`], so all methods work on `&self` and the
/// cache can be shared between request tasks through a
/// [`CacheHandle`](crate::CacheHandle). The lock is never held across I/O.
///
/// The cache performs no liveness check of its own: a location returned by
/// [`get()`](Self::get) may have disappeared since it was stored. Callers
/// verify by opening it and call [`evict_stale()`](Self::evict_stale) when it
/// is gone.
///
/// Writes are "last write wins". Two concurrent producers of the same key
/// both succeed; whichever [`put()`](Self::put) lands last is kept.
///
/// # Examples
///
/// ```
/// use folio_cache::{CacheKey, DerivedAssetCache};
/// use folio_storage::AlbumPath;
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = DerivedAssetCache::new();
/// let key = CacheKey::album(&AlbumPath::new("2020").unwrap());
/// assert_eq!(cache.get(&key).await, None);
///
/// cache.put(key, "/srv/photos/2020/beach.jpg").await;
/// assert_eq!(cache.get(&key).await.as_deref(), Some(Path::new("/srv/photos/2020/beach.jpg")));
/// # }
/// ```
#[derive(Debug, Default)]
pub struct DerivedAssetCache {
    entries: RwLock<HashMap<CacheKey, PathBuf>>,
}

impl DerivedAssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored location for `key`. A miss is not an error.
    pub async fn get(&self, key: &CacheKey) -> Option<PathBuf> {
        self.entries.read().await.get(key).cloned()
    }

    /// Store `location` under `key`, replacing (and returning) any previous
    /// location.
    pub async fn put(&self, key: CacheKey, location: impl Into<PathBuf>) -> Option<PathBuf> {
        let location = location.into();
        tracing::trace!(key = %key, location = %location.display(), "Cache entry stored");
        self.entries.write().await.insert(key, location)
    }

    /// Remove `key` unconditionally.
    pub async fn evict(&self, key: &CacheKey) -> Option<PathBuf> {
        self.entries.write().await.remove(key)
    }

    /// Remove `key` only if it still points at `stale`.
    ///
    /// Between reading a stale location and evicting it, another task may
    /// already have stored a fresh one; that entry is left untouched. Returns
    /// `true` if an entry was removed.
    pub async fn evict_stale(&self, key: &CacheKey, stale: &Path) -> bool {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|current| current == stale) {
            entries.remove(key);
            tracing::warn!(key = %key, location = %stale.display(), "Evicted stale cache entry");
            return true;
        }
        false
    }

    /// Drop every entry. Returns how many there were.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let cleared = entries.len();
        entries.clear();
        cleared
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(n: u8) -> CacheKey {
        CacheKey::derived(Path::new("photo.jpg"), "1x1", n)
    }

    #[tokio::test]
    async fn test_miss_is_none() {
        let cache = DerivedAssetCache::new();
        assert_eq!(cache.get(&key(1)).await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = DerivedAssetCache::new();
        assert_eq!(cache.put(key(1), "/tmp/a").await, None);
        assert_eq!(cache.put(key(1), "/tmp/b").await, Some(PathBuf::from("/tmp/a")));
        assert_eq!(cache.get(&key(1)).await, Some(PathBuf::from("/tmp/b")));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_evict() {
        let cache = DerivedAssetCache::new();
        cache.put(key(1), "/tmp/a").await;
        assert_eq!(cache.evict(&key(1)).await, Some(PathBuf::from("/tmp/a")));
        assert_eq!(cache.evict(&key(1)).await, None);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = DerivedAssetCache::new();
        cache.put(key(1), "/tmp/a").await;
        cache.put(key(2), "/tmp/b").await;
        assert_eq!(cache.clear().await, 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_evict_stale_keeps_fresh_entries() {
        let cache = DerivedAssetCache::new();
        cache.put(key(1), "/tmp/fresh").await;
        assert!(!cache.evict_stale(&key(1), Path::new("/tmp/old")).await);
        assert_eq!(cache.get(&key(1)).await, Some(PathBuf::from("/tmp/fresh")));
        assert!(cache.evict_stale(&key(1), Path::new("/tmp/fresh")).await);
        assert_eq!(cache.get(&key(1)).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access() {
        let cache = Arc::new(DerivedAssetCache::new());
        let tasks: Vec<_> = (0..64u8)
            .map(|n| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache.put(key(n % 8), format!("/tmp/{n}")).await;
                    cache.get(&key(n % 8)).await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert_eq!(cache.len().await, 8);
    }
}
