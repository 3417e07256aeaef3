use folio_storage::AlbumPath;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::path::Path;

/// Width of the fingerprint in bytes (128 bits).
const KEY_BYTES: usize = 16;

/// Fingerprint identifying one cache entry.
///
/// Derived with BLAKE3 from a domain-separated encoding of the logical
/// inputs: every variable-length field is length-prefixed, so two different
/// inputs never hash the same bytes (`"a/b" + "1x2"` and `"a/b1" + "x2"` stay
/// distinct). The digest is truncated to 128 bits and rendered as 32 hex
/// characters, which doubles as the artifact file name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; KEY_BYTES]);

impl CacheKey {
    /// Key memoizing which photo represents an album.
    pub fn album(album: &AlbumPath) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"album\0");
        field(&mut hasher, album.as_path().as_os_str().as_encoded_bytes());
        Self::finish(hasher)
    }

    /// Key of a derived rendition of `source`, for a `"WxH"` dimensions string
    /// and an encoder quality.
    pub fn derived(source: &Path, dimensions: &str, quality: u8) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"derived\0");
        field(&mut hasher, source.as_os_str().as_encoded_bytes());
        field(&mut hasher, dimensions.as_bytes());
        hasher.update(&[quality]);
        Self::finish(hasher)
    }

    fn finish(hasher: blake3::Hasher) -> Self {
        let mut bytes = [0; KEY_BYTES];
        bytes.copy_from_slice(&hasher.finalize().as_bytes()[..KEY_BYTES]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

fn field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Debug for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "CacheKey({self})")
    }
}
