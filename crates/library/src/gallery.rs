use crate::error::{ErrorKind, Result};
use crate::pipeline::{RenderPipeline, Served};
use crate::resolve::{DEFAULT_MAX_DEPTH, ThumbnailResolver};
use derive_more::Display;
use exn::ResultExt;
use folio_cache::{ArtifactStore, CacheHandle, DerivedAssetCache};
use folio_config::Config;
use folio_storage::{AlbumPath, CatalogHandle, Entry, Listing, PathCatalog};
use folio_transform::{DEFAULT_TIMEOUT, Dimensions, EngineHandle, Quality};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Per-request overrides of the configured thumbnail parameters, typically
/// from a query string (`?w=320&h=240&q=60`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThumbnailQuery {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u8>,
}

/// A request that could not be served, reduced to what a client may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("{status} {message}")]
pub struct Failure {
    pub status: u16,
    pub message: &'static str,
}
impl From<&ErrorKind> for Failure {
    fn from(kind: &ErrorKind) -> Self {
        Self {
            status: kind.status(),
            message: kind.public_message(),
        }
    }
}

/// Everything about a gallery that isn't a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryOptions {
    pub title: String,
    pub url_root: String,
    pub dimensions: Dimensions,
    pub quality: Quality,
    pub max_depth: usize,
    pub timeout: Duration,
}
impl Default for GalleryOptions {
    fn default() -> Self {
        Self {
            title: "Photos".to_string(),
            url_root: "/".to_string(),
            dimensions: Dimensions::default(),
            quality: Quality::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
impl TryFrom<&Config> for GalleryOptions {
    type Error = crate::error::Error;
    fn try_from(config: &Config) -> Result<Self> {
        Ok(Self {
            title: config.title.clone(),
            url_root: config.url_root.clone(),
            dimensions: Dimensions::new(config.thumbnail.width, config.thumbnail.height)
                .or_raise(|| ErrorKind::Config)?,
            quality: Quality::new(config.thumbnail.quality).or_raise(|| ErrorKind::Config)?,
            max_depth: config.resolver.max_depth,
            timeout: config.transform.timeout(),
        })
    }
}

/// The photo album tree and its thumbnails.
///
/// This is the surface an HTTP layer or the CLI talks to: request paths go
/// in, listings and thumbnail bytes come out, and failures come back as
/// [`Failure`]s that are safe to show.
#[derive(Debug, Clone)]
pub struct Gallery {
    catalog: CatalogHandle,
    cache: CacheHandle,
    pipeline: RenderPipeline,
    options: GalleryOptions,
}

impl Gallery {
    /// Build a gallery and all of its collaborators from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let options = GalleryOptions::try_from(config)?;
        let catalog = PathCatalog::new(&config.static_files).or_raise(|| ErrorKind::Storage)?;
        let artifacts = ArtifactStore::new(&config.cache.scratch_dir).or_raise(|| ErrorKind::Cache)?;
        let engine = folio_transform::engine(config.transform.engine).or_raise(|| ErrorKind::Config)?;
        tracing::info!(
            static_files = %config.static_files.display(),
            scratch_dir = %config.cache.scratch_dir.display(),
            engine = engine.name(),
            "Gallery ready"
        );
        Ok(Self::with_parts(
            Arc::new(catalog),
            Arc::new(DerivedAssetCache::new()),
            artifacts,
            engine,
            options,
        ))
    }

    /// Assemble a gallery from ready-made parts.
    pub fn with_parts(
        catalog: CatalogHandle,
        cache: CacheHandle,
        artifacts: ArtifactStore,
        engine: EngineHandle,
        options: GalleryOptions,
    ) -> Self {
        let resolver = ThumbnailResolver::new(catalog.clone(), cache.clone()).with_max_depth(options.max_depth);
        let pipeline = RenderPipeline::new(resolver, cache.clone(), artifacts, engine).with_timeout(options.timeout);
        Self {
            catalog,
            cache,
            pipeline,
            options,
        }
    }

    /// Heading for an album: its own name, or the gallery title for the root.
    pub fn album_title<'a>(&'a self, album: &'a AlbumPath) -> &'a str {
        album.name().unwrap_or(&self.options.title)
    }

    /// Page an entry of `album` links to: the sub-album itself, or the
    /// photo's own page under `photo/`, named without its extension.
    pub fn entry_url(&self, album: &AlbumPath, entry: &Entry) -> String {
        match entry {
            Entry::Album { name } => album.to_url(&self.options.url_root, &[name.as_str()]),
            Entry::Photo { stem, .. } => album.to_url(&self.options.url_root, &["photo", stem.as_str()]),
        }
    }

    /// URL of a photo's file; `None` for albums.
    pub fn photo_src(&self, album: &AlbumPath, entry: &Entry) -> Option<String> {
        entry
            .is_photo()
            .then(|| album.to_url(&self.options.url_root, &[entry.name()]))
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    /// Album path for the path portion of a request URL, which may be
    /// percent-encoded.
    pub fn friendly_path(request_path: &str) -> Result<AlbumPath> {
        AlbumPath::from_request(request_path).or_raise(|| ErrorKind::InvalidPath)
    }

    /// Children of an album, albums and photos interleaved in name order.
    pub async fn list(&self, album: &AlbumPath) -> Result<Listing> {
        self.catalog.list(album).await.or_raise(|| ErrorKind::NotFound)
    }

    /// Absolute path of the photo representing `album`.
    pub async fn resolve(&self, album: &AlbumPath) -> Result<PathBuf> {
        self.pipeline.resolver().resolve(album).await
    }

    /// Forget every derived thumbnail and empty the scratch directory.
    /// Returns the number of files removed.
    pub async fn purge(&self) -> Result<usize> {
        self.cache.clear().await;
        self.pipeline.artifacts().purge().await.or_raise(|| ErrorKind::Cache)
    }

    /// Write the thumbnail for `album` to `response`, with the configured
    /// parameters overridden by `query`.
    pub async fn thumbnail<W>(&self, album: &AlbumPath, query: &ThumbnailQuery, response: &mut W) -> Result<Served>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let (dimensions, quality) = self.parameters(query)?;
        self.pipeline.serve_thumbnail(album, dimensions, quality, response).await
    }

    /// Serve the thumbnail for a raw request path.
    ///
    /// Any failure is logged in full and reduced to a [`Failure`].
    pub async fn resolve_and_serve<W>(
        &self,
        request_path: &str,
        query: &ThumbnailQuery,
        response: &mut W,
    ) -> std::result::Result<Served, Failure>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let served = async {
            let album = Self::friendly_path(request_path)?;
            self.thumbnail(&album, query, response).await
        }
        .await;
        served.map_err(|e| {
            let failure = Failure::from(&*e);
            if failure.status >= 500 {
                tracing::warn!(request_path, status = failure.status, error = ?e, "Thumbnail request failed");
            } else {
                tracing::debug!(request_path, status = failure.status, error = ?e, "Thumbnail request failed");
            }
            failure
        })
    }

    fn parameters(&self, query: &ThumbnailQuery) -> Result<(Dimensions, Quality)> {
        let defaults = &self.options;
        let dimensions = Dimensions::new(
            query.width.unwrap_or(defaults.dimensions.width()),
            query.height.unwrap_or(defaults.dimensions.height()),
        )
        .or_raise(|| ErrorKind::InvalidQuery)?;
        let quality = match query.quality {
            Some(quality) => Quality::new(quality).or_raise(|| ErrorKind::InvalidQuery)?,
            None => defaults.quality,
        };
        Ok((dimensions, quality))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Origin;
    use folio_transform::{MockBehaviour, MockTransformer, TransformRequest};
    use rstest::rstest;
    use tempfile::TempDir;

    struct Fixture {
        photos: TempDir,
        _scratch: TempDir,
        engine: MockTransformer,
        gallery: Gallery,
    }

    fn fixture(files: &[&str], behaviour: MockBehaviour) -> Fixture {
        let photos = tempfile::tempdir().unwrap();
        for file in files {
            let path = photos.path().join(file);
            if file.ends_with('/') {
                std::fs::create_dir_all(&path).unwrap();
            } else {
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, file.as_bytes()).unwrap();
            }
        }
        let scratch = tempfile::tempdir().unwrap();
        let engine = MockTransformer::new(behaviour);
        let gallery = Gallery::with_parts(
            Arc::new(PathCatalog::new(photos.path()).unwrap()),
            Arc::new(DerivedAssetCache::new()),
            ArtifactStore::new(scratch.path()).unwrap(),
            Arc::new(engine.clone()),
            GalleryOptions::default(),
        );
        Fixture {
            photos,
            _scratch: scratch,
            engine,
            gallery,
        }
    }

    async fn serve(gallery: &Gallery, path: &str, query: ThumbnailQuery) -> (std::result::Result<Served, Failure>, Vec<u8>) {
        let mut response = Vec::new();
        let served = gallery.resolve_and_serve(path, &query, &mut response).await;
        (served, response)
    }

    #[tokio::test]
    async fn test_trip_scenario() {
        let fixture = fixture(&["albums/2020/trip/beach.jpg", "albums/2020/trip/dune.jpg"], MockBehaviour::Succeed);
        let beach = fixture.photos.path().join("albums/2020/trip/beach.jpg");
        let album = Gallery::friendly_path("/albums/2020/").unwrap();
        assert_eq!(fixture.gallery.resolve(&album).await.unwrap(), beach);

        let (first, first_bytes) = serve(&fixture.gallery, "/albums/2020", ThumbnailQuery::default()).await;
        let first = first.unwrap();
        assert_eq!(first.origin, Origin::Derived);
        assert_eq!(first.source, beach);
        let request = TransformRequest::new(Dimensions::new(200, 200).unwrap(), Quality::new(40).unwrap());
        assert_eq!(first_bytes, MockTransformer::expected_output(b"albums/2020/trip/beach.jpg", &request));

        let (second, second_bytes) = serve(&fixture.gallery, "/albums/2020", ThumbnailQuery::default()).await;
        assert_eq!(second.unwrap().origin, Origin::Cached);
        assert_eq!(second_bytes, first_bytes);
        assert_eq!(fixture.engine.calls(), 1);
    }

    #[rstest]
    #[case::empty_album(&["albums/empty/"], "/albums/empty", 404, "No thumbnail found for this album")]
    #[case::missing_album(&["albums/"], "/albums/nowhere", 404, "No thumbnail found for this album")]
    #[case::traversal(&["albums/"], "/albums/%2e%2e/%2e%2e/etc", 400, "Invalid path")]
    #[tokio::test]
    async fn test_failures(
        #[case] files: &[&str],
        #[case] path: &str,
        #[case] status: u16,
        #[case] message: &str,
    ) {
        let fixture = fixture(files, MockBehaviour::Succeed);
        let (served, response) = serve(&fixture.gallery, path, ThumbnailQuery::default()).await;
        let failure = served.unwrap_err();
        assert_eq!((failure.status, failure.message), (status, message));
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_transform_failure_is_500() {
        let fixture = fixture(&["a/photo.jpg"], MockBehaviour::FailImmediately);
        let (served, _) = serve(&fixture.gallery, "/a", ThumbnailQuery::default()).await;
        assert_eq!(
            served.unwrap_err(),
            Failure {
                status: 500,
                message: "Error converting image"
            }
        );
    }

    #[tokio::test]
    async fn test_query_overrides() {
        let fixture = fixture(&["My Trip/photo.png"], MockBehaviour::Succeed);
        let query = ThumbnailQuery {
            width: Some(64),
            height: None,
            quality: Some(90),
        };
        let (served, response) = serve(&fixture.gallery, "/My%20Trip/", query).await;
        served.unwrap();
        assert!(response.starts_with(b"64x200@90:"));

        let bad = ThumbnailQuery {
            quality: Some(0),
            ..ThumbnailQuery::default()
        };
        let (served, _) = serve(&fixture.gallery, "/My%20Trip/", bad).await;
        assert_eq!(served.unwrap_err().status, 400);
        assert_eq!(fixture.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_purge() {
        let fixture = fixture(&["a/photo.jpg"], MockBehaviour::Succeed);
        serve(&fixture.gallery, "/a", ThumbnailQuery::default()).await.0.unwrap();
        assert_eq!(fixture.gallery.purge().await.unwrap(), 1);
        assert!(fixture.gallery.cache().is_empty().await);

        let (served, _) = serve(&fixture.gallery, "/a", ThumbnailQuery::default()).await;
        assert_eq!(served.unwrap().origin, Origin::Derived);
        assert_eq!(fixture.engine.calls(), 2);
    }

    #[test]
    fn test_links() {
        let fixture = fixture(&[], MockBehaviour::Succeed);
        let gallery = Gallery::with_parts(
            fixture.gallery.catalog.clone(),
            fixture.gallery.cache.clone(),
            fixture.gallery.pipeline.artifacts().clone(),
            Arc::new(fixture.engine.clone()),
            GalleryOptions {
                title: "Holidays".to_string(),
                url_root: "/gallery/".to_string(),
                ..GalleryOptions::default()
            },
        );
        let album = AlbumPath::new("2020/My Trip").unwrap();
        let photo = Entry::photo("beach.JPG").unwrap();
        let sub = Entry::album("day 1");

        assert_eq!(gallery.album_title(&album), "My Trip");
        assert_eq!(gallery.album_title(&AlbumPath::root()), "Holidays");
        assert_eq!(gallery.entry_url(&album, &sub), "/gallery/2020/My%20Trip/day%201");
        assert_eq!(gallery.entry_url(&album, &photo), "/gallery/2020/My%20Trip/photo/beach");
        assert_eq!(gallery.photo_src(&album, &photo).unwrap(), "/gallery/2020/My%20Trip/beach.JPG");
        assert_eq!(gallery.photo_src(&album, &sub), None);
        assert_eq!(gallery.entry_url(&AlbumPath::root(), &sub), "/gallery/day%201");
    }

    #[tokio::test]
    async fn test_list() {
        let fixture = fixture(&["a/b.jpg", "a/c/", "a/a.txt", "a/0.gif"], MockBehaviour::Succeed);
        let listing = fixture.gallery.list(&AlbumPath::new("a").unwrap()).await.unwrap();
        let names: Vec<_> = listing.entries().iter().map(|e| e.name()).collect();
        assert_eq!(names, ["0.gif", "b.jpg", "c"]);
        let err = fixture.gallery.list(&AlbumPath::new("nope").unwrap()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound);
    }

    #[test]
    fn test_new_from_config() {
        let photos = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let mut config = Config {
            static_files: photos.path().to_path_buf(),
            ..Config::default()
        };
        config.cache.scratch_dir = scratch.path().join("thumbs");
        config.transform.engine = folio_config::Engine::Native;
        config.thumbnail.width = 320;
        let gallery = Gallery::new(&config).unwrap();
        assert_eq!(gallery.album_title(&AlbumPath::root()), "Photos");
        assert_eq!(gallery.options.dimensions.to_string(), "320x200");
        assert!(scratch.path().join("thumbs").is_dir());

        config.static_files = photos.path().join("missing");
        assert_eq!(*Gallery::new(&config).unwrap_err(), ErrorKind::Storage);
        config.static_files = PathBuf::new();
        assert_eq!(*Gallery::new(&config).unwrap_err(), ErrorKind::Config);
    }
}
