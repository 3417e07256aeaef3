//! Album path normalization.
//!
//! Every path handed to the catalog is relative to the static files root.
//! [`AlbumPath`] guarantees that it stays that way: traversal past the root
//! is rejected, everything else is resolved into plain components.

use crate::error::{ErrorKind, Result};
use std::borrow::Cow;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Component, Path, PathBuf};

/// A normalized path relative to the static files root.
///
/// The empty path is the root album itself.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use folio_storage::AlbumPath;
/// // Valid paths
/// assert!(AlbumPath::new("2020/trip").is_ok());
/// assert!(AlbumPath::new("2020/../2021").is_ok()); // (never leaves root)
/// assert!(AlbumPath::new("/").unwrap().is_root());
/// // Invalid paths
/// assert!(AlbumPath::new("../etc/passwd").is_err());
/// assert!(AlbumPath::new("a/../../b").is_err());
/// assert!(AlbumPath::new("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     AlbumPath::new("/wrong/../still-wrong/.././correct//./album/").unwrap().as_path(),
///     Path::new("correct/album")
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlbumPath(PathBuf);

impl AlbumPath {
    /// The root album.
    pub fn root() -> Self {
        Self::default()
    }

    /// Normalize `path` into an album path.
    ///
    /// Leading, trailing and repeated separators and `.` components are
    /// dropped; `..` is resolved as long as it never climbs above the root.
    /// Null bytes are rejected.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(s) => {
                    // Null bytes pass through Path::components() on Unix but
                    // truncate C strings in syscalls.
                    if s.as_encoded_bytes().contains(&0) {
                        exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                    }
                    components.push(s);
                },
                Component::CurDir | Component::RootDir => {},
                Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
                Component::ParentDir => {
                    if components.pop().is_none() {
                        exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                    }
                },
            }
        }
        Ok(Self(components.into_iter().collect()))
    }

    /// Decode and normalize the path portion of a request URL.
    ///
    /// Percent-escapes (`%20` and friends) are decoded before normalization,
    /// so an encoded `..` is caught just like a literal one.
    ///
    /// ```
    /// use folio_storage::AlbumPath;
    /// let album = AlbumPath::from_request("/Summer%20Trip/day%201/").unwrap();
    /// assert_eq!(album.to_string(), "Summer Trip/day 1");
    /// assert!(AlbumPath::from_request("/%2E%2E/secret").is_err());
    /// ```
    pub fn from_request(request_path: &str) -> Result<Self> {
        let decoded = urlencoding::decode(request_path)
            .map_err(|_| exn::Exn::from(ErrorKind::InvalidPath(PathBuf::from(request_path))))?;
        Self::new(decoded.as_ref())
    }

    pub fn is_root(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Last component, or `None` for the root album.
    pub fn name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }

    /// Path of a direct child of this album.
    ///
    /// Children come from directory listings, so a name is a single
    /// component; anything else is rejected.
    pub fn child(&self, name: &str) -> Result<Self> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !name.contains('\0') => Ok(Self(self.0.join(name))),
            _ => exn::bail!(ErrorKind::InvalidPath(self.0.join(name))),
        }
    }

    /// Enclosing album, or `None` for the root album.
    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(|parent| Self(parent.to_path_buf()))
    }

    /// URL of this album under `url_root`, followed by `tail` segments.
    ///
    /// Every segment is percent-encoded, so
    /// [`from_request()`](Self::from_request) reads the album back.
    ///
    /// ```
    /// use folio_storage::AlbumPath;
    /// let album = AlbumPath::new("Summer Trip").unwrap();
    /// assert_eq!(album.to_url("/photos/", &["photo", "beach"]), "/photos/Summer%20Trip/photo/beach");
    /// assert_eq!(AlbumPath::root().to_url("/", &[]), "/");
    /// ```
    pub fn to_url(&self, url_root: &str, tail: &[&str]) -> String {
        let mut url = url_root.trim_end_matches('/').to_string();
        let album = self.0.iter().map(|segment| segment.to_string_lossy());
        for segment in album.chain(tail.iter().map(|segment| Cow::Borrowed(*segment))) {
            url.push('/');
            url.push_str(&urlencoding::encode(&segment));
        }
        if url.is_empty() {
            url.push('/');
        }
        url
    }

    /// Number of components below the root.
    pub fn depth(&self) -> usize {
        self.0.components().count()
    }
}

impl Display for AlbumPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut first = true;
        for component in self.0.components() {
            if !first {
                f.write_str("/")?;
            }
            write!(f, "{}", component.as_os_str().to_string_lossy())?;
            first = false;
        }
        Ok(())
    }
}

impl AsRef<Path> for AlbumPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl TryFrom<&str> for AlbumPath {
    type Error = crate::error::Error;
    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2020/trip", "2020/trip")]
    #[case("/2020/trip/", "2020/trip")]
    #[case("2020//trip", "2020/trip")]
    #[case("./2020/./trip", "2020/trip")]
    #[case("2020/trip/..", "2020")]
    #[case("2020///", "2020")]
    fn test_normalization(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(AlbumPath::new(input).unwrap().as_path(), Path::new(expected));
    }

    #[rstest]
    #[case("")]
    #[case("/")]
    #[case(".")]
    #[case("./")]
    #[case("//")]
    #[case("a/..")]
    fn test_root_paths(#[case] input: &str) {
        let album = AlbumPath::new(input).unwrap();
        assert!(album.is_root());
        assert_eq!(album.to_string(), "");
        assert_eq!(album.name(), None);
        assert_eq!(album.depth(), 0);
    }

    #[rstest]
    #[case("..")]
    #[case("../..")]
    #[case("../etc/passwd")]
    #[case("a/../../b")]
    #[case("a\0b")]
    fn test_rejected_paths(#[case] input: &str) {
        let err = AlbumPath::new(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_request_paths_are_decoded() {
        let album = AlbumPath::from_request("/My%20Albums/2020%2Ftrip/").unwrap();
        assert_eq!(album.as_path(), Path::new("My Albums/2020/trip"));
        assert_eq!(album.name(), Some("trip"));
        assert_eq!(album.depth(), 3);
    }

    #[test]
    fn test_encoded_traversal_is_rejected() {
        assert!(AlbumPath::from_request("/%2e%2e/%2e%2e/etc").is_err());
        assert!(AlbumPath::from_request("/a%00b").is_err());
    }

    #[rstest]
    #[case("", "/", &[], "/")]
    #[case("", "", &[], "/")]
    #[case("2020/trip", "/", &[], "/2020/trip")]
    #[case("My Trip", "/gallery/", &["photo", "day #1"], "/gallery/My%20Trip/photo/day%20%231")]
    #[case("", "/gallery", &["a?b"], "/gallery/a%3Fb")]
    fn test_to_url(#[case] album: &str, #[case] root: &str, #[case] tail: &[&str], #[case] expected: &str) {
        let album = AlbumPath::new(album).unwrap();
        let url = album.to_url(root, tail);
        assert_eq!(url, expected);
        if tail.is_empty() {
            let path = url.strip_prefix(root.trim_end_matches('/')).unwrap();
            assert_eq!(AlbumPath::from_request(path).unwrap(), album);
        }
    }

    #[test]
    fn test_child() {
        let album = AlbumPath::new("2020").unwrap();
        assert_eq!(album.child("trip").unwrap().to_string(), "2020/trip");
        assert_eq!(AlbumPath::root().child("2020").unwrap(), album);
        assert!(album.child("..").is_err());
        assert!(album.child("a/b").is_err());
        assert!(album.child("").is_err());
    }

    #[test]
    fn test_parent() {
        let album = AlbumPath::new("2020/trip").unwrap();
        let parent = album.parent().unwrap();
        assert_eq!(parent.to_string(), "2020");
        assert!(parent.parent().unwrap().is_root());
        assert_eq!(AlbumPath::root().parent(), None);
    }
}
