//! Album listings from the local filesystem.
//!
//! Files are read via `tokio::fs` relative to the configured static files
//! root. A listing is a single directory level; walking the tree is left to
//! the callers that need it.

use crate::error::{ErrorKind, Result};
use crate::path::AlbumPath;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs::{self, DirEntry};

/// Image extensions recognised as photos, matched case-insensitively against
/// the end of the file name.
static PHOTO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(jpg|jpeg|bmp|gif|png|tif)$").expect("photo pattern is valid"));

/// A classified child of an album directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A sub-directory.
    Album { name: String },
    /// A file with a recognised image extension.
    Photo {
        name: String,
        /// File name without the image extension.
        stem: String,
        /// The image extension as written on disk (without the dot).
        extension: String,
    },
}
impl Entry {
    /// Classify a file (not a directory) by name. Returns `None` when the name
    /// doesn't carry an image extension.
    pub fn photo(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let found = PHOTO_PATTERN.captures(&name)?;
        let (whole, extension) = (found.get(0)?, found.get(1)?);
        Some(Self::Photo {
            stem: name[..whole.start()].to_string(),
            extension: extension.as_str().to_string(),
            name,
        })
    }

    pub fn album(name: impl Into<String>) -> Self {
        Self::Album { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Album { name } | Self::Photo { name, .. } => name,
        }
    }

    pub fn is_album(&self) -> bool {
        matches!(self, Self::Album { .. })
    }

    pub fn is_photo(&self) -> bool {
        matches!(self, Self::Photo { .. })
    }
}

/// The classified contents of one album, sorted by name.
///
/// Ordering is byte-wise lexicographic on the entry name, so "first photo"
/// and "first album" mean the same thing on every filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    entries: Vec<Entry>,
}
impl Listing {
    pub fn new(mut entries: Vec<Entry>) -> Self {
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        Self { entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn photos(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.is_photo())
    }

    pub fn albums(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.is_album())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
impl IntoIterator for Listing {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Read-only view of the album tree rooted at the static files directory.
///
/// # Examples
///
/// ```no_run
/// use folio_storage::{AlbumPath, PathCatalog};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = PathCatalog::new("/srv/photos")?;
/// let listing = catalog.list(&AlbumPath::new("2020")?).await?;
/// for photo in listing.photos() {
///     println!("{}", photo.name());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PathCatalog {
    /// Static files root
    root: PathBuf,
}
impl PathCatalog {
    /// Create a catalog over `root`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if the path is not
    /// absolute or is not a directory, and [`NotFound`](ErrorKind::NotFound)
    /// if it doesn't exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if !root.exists() {
            exn::bail!(ErrorKind::NotFound(root));
        }
        if !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute filesystem location of an album (or photo) path.
    pub fn absolute(&self, path: &AlbumPath) -> PathBuf {
        self.root.join(path.as_path())
    }

    /// List and classify the direct children of an album.
    ///
    /// Children that are neither directories nor photos are skipped, as are
    /// names that aren't valid UTF-8 and entries whose metadata can't be read
    /// (most likely broken symlinks).
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) when the album doesn't
    /// exist or isn't a directory, and
    /// [`PermissionDenied`](ErrorKind::PermissionDenied) when it can't be read.
    pub async fn list(&self, album: &AlbumPath) -> Result<Listing> {
        let directory = self.absolute(album);
        let mut reader = fs::read_dir(&directory).await.map_err(|e| ErrorKind::from_io(e, album.as_path()))?;
        let mut entries = Vec::new();
        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => exn::bail!(ErrorKind::from_io(e, album.as_path())),
            };
            if let Some(classified) = Self::classify(entry).await {
                entries.push(classified);
            }
        }
        tracing::trace!(album = %album, entries = entries.len(), "Listed album");
        Ok(Listing::new(entries))
    }

    async fn classify(entry: DirEntry) -> Option<Entry> {
        let path = entry.path();
        let Ok(name) = entry.file_name().into_string() else {
            tracing::debug!(path = %path.display(), "Skipping entry with non UTF-8 name");
            return None;
        };
        // Follow symlinks: a linked directory is still an album.
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                return None;
            },
        };
        if metadata.is_dir() {
            return Some(Entry::album(name));
        }
        Entry::photo(name)
    }

    /// Canonical location of an album, with symlinks resolved. Used to spot
    /// cycles when walking the tree.
    pub async fn canonical(&self, album: &AlbumPath) -> Result<PathBuf> {
        let absolute = self.absolute(album);
        Ok(fs::canonicalize(&absolute).await.map_err(|e| ErrorKind::from_io(e, album.as_path()))?)
    }

    /// Whether `path` currently names a regular file that can be opened.
    pub async fn is_readable_file(path: &Path) -> bool {
        match fs::File::open(path).await {
            Ok(file) => file.metadata().await.is_ok_and(|m| m.is_file()),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"data").unwrap();
    }

    #[rstest]
    #[case("beach.jpg", "beach", "jpg")]
    #[case("BEACH.JPG", "BEACH", "JPG")]
    #[case("scan.tif", "scan", "tif")]
    #[case("old.bmp", "old", "bmp")]
    #[case("anim.Gif", "anim", "Gif")]
    #[case("photo.jpeg", "photo", "jpeg")]
    #[case("shot.png", "shot", "png")]
    #[case("two.dots.png", "two.dots", "png")]
    fn test_photo_classification(#[case] name: &str, #[case] stem: &str, #[case] extension: &str) {
        let entry = Entry::photo(name).unwrap();
        assert_eq!(
            entry,
            Entry::Photo {
                name: name.to_string(),
                stem: stem.to_string(),
                extension: extension.to_string()
            }
        );
    }

    #[rstest]
    #[case("notes.txt")]
    #[case("jpg")]
    #[case("movie.mp4")]
    #[case("photo.jpg.bak")]
    #[case("scan.tiff")]
    fn test_non_photos(#[case] name: &str) {
        assert!(Entry::photo(name).is_none());
    }

    #[test]
    fn test_new_requires_absolute_existing_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(PathCatalog::new(temp_dir.path()).is_ok());
        assert!(PathCatalog::new("relative/path").is_err());
        let missing = PathCatalog::new(temp_dir.path().join("missing")).unwrap_err();
        assert!(matches!(&*missing, ErrorKind::NotFound(_)));
        touch(temp_dir.path(), "file.jpg");
        assert!(PathCatalog::new(temp_dir.path().join("file.jpg")).is_err());
    }

    #[tokio::test]
    async fn test_list_classifies_and_sorts() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "2020/zebra.jpg");
        touch(temp_dir.path(), "2020/apple.PNG");
        touch(temp_dir.path(), "2020/readme.txt");
        touch(temp_dir.path(), "2020/trip/beach.jpg");
        std::fs::create_dir_all(temp_dir.path().join("2020/birthday")).unwrap();
        let catalog = PathCatalog::new(temp_dir.path()).unwrap();

        let listing = catalog.list(&AlbumPath::new("2020").unwrap()).await.unwrap();
        let names: Vec<_> = listing.entries().iter().map(Entry::name).collect();
        assert_eq!(names, ["apple.PNG", "birthday", "trip", "zebra.jpg"]);
        let photos: Vec<_> = listing.photos().map(Entry::name).collect();
        assert_eq!(photos, ["apple.PNG", "zebra.jpg"]);
        let albums: Vec<_> = listing.albums().map(Entry::name).collect();
        assert_eq!(albums, ["birthday", "trip"]);
    }

    #[tokio::test]
    async fn test_directory_named_like_photo_is_album() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("odd.jpg")).unwrap();
        let catalog = PathCatalog::new(temp_dir.path()).unwrap();
        let listing = catalog.list(&AlbumPath::root()).await.unwrap();
        assert_eq!(listing.entries(), [Entry::album("odd.jpg")]);
    }

    #[tokio::test]
    async fn test_list_empty_album() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("empty")).unwrap();
        let catalog = PathCatalog::new(temp_dir.path()).unwrap();
        let listing = catalog.list(&AlbumPath::new("empty").unwrap()).await.unwrap();
        assert!(listing.is_empty());
        assert_eq!(listing.len(), 0);
    }

    #[tokio::test]
    async fn test_list_missing_album() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "photo.jpg");
        let catalog = PathCatalog::new(temp_dir.path()).unwrap();
        let err = catalog.list(&AlbumPath::new("nope").unwrap()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        // A file is not an album either.
        let err = catalog.list(&AlbumPath::new("photo.jpg").unwrap()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_broken_symlinks_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "real.jpg");
        std::os::unix::fs::symlink(temp_dir.path().join("gone.jpg"), temp_dir.path().join("dangling.jpg")).unwrap();
        let catalog = PathCatalog::new(temp_dir.path()).unwrap();
        let listing = catalog.list(&AlbumPath::root()).await.unwrap();
        let names: Vec<_> = listing.entries().iter().map(Entry::name).collect();
        assert_eq!(names, ["real.jpg"]);
    }

    #[tokio::test]
    async fn test_is_readable_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "photo.jpg");
        assert!(PathCatalog::is_readable_file(&temp_dir.path().join("photo.jpg")).await);
        assert!(!PathCatalog::is_readable_file(&temp_dir.path().join("missing.jpg")).await);
        assert!(!PathCatalog::is_readable_file(temp_dir.path()).await);
    }
}
