//! Resolve, derive, cache and stream album thumbnails.
//!
//! [`RenderPipeline::serve_thumbnail()`] is the whole request path:
//!
//! 1. Resolve the album to a source photo ([`ThumbnailResolver`]).
//! 2. Key the derived image on source path, dimensions and quality.
//! 3. On a cache hit, stream the artifact. A hit whose file has vanished is
//!    evicted and treated as a miss.
//! 4. On a miss, either derive it or, when another request already is, wait
//!    for that one and go back to 3.
//! 5. Deriving runs in a task of its own, bounded by the transform timeout.
//!    Engine output goes to a scratch file and, through a bounded queue, to
//!    the response. The scratch file is renamed into place and registered in
//!    the cache only once the engine has finished successfully.
//!
//! Cache failures never fail a request; the response is just not cached. A
//! client that goes away or stops reading mid-response doesn't stop the
//! artifact from being finished and cached, nor does it keep waiting requests
//! from getting it, but the call still reports
//! [`Response`](ErrorKind::Response).

use crate::error::{ErrorKind, Result};
use crate::resolve::ThumbnailResolver;
use exn::ResultExt;
use folio_asyncutils::{ChannelWriter, TakeUntilErrExt, Tee};
use folio_cache::{ArtifactStore, CacheHandle, CacheKey, Claim, InFlight, ProducerGuard};
use folio_storage::AlbumPath;
use folio_transform::{
    DEFAULT_TIMEOUT, Dimensions, EngineHandle, OUTPUT_CONTENT_TYPE, Quality, TransformRequest,
};
use futures::StreamExt;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, instrument};

/// Buffer size when streaming a cached artifact.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Engine chunks queued for a response before it is cut off. Engines emit at
/// most 64 KiB per chunk (or the whole image in one), so a thumbnail fits.
const RESPONSE_BACKLOG: usize = 32;

/// Where the bytes of a served thumbnail came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// An artifact from an earlier request.
    Cached,
    /// Transformed for this request.
    Derived,
}
impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Cached => "cached",
            Self::Derived => "derived",
        })
    }
}

/// A thumbnail that was written to the response in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub origin: Origin,
    /// The photo the thumbnail was made from.
    pub source: PathBuf,
    /// Bytes written to the response.
    pub bytes: u64,
    pub content_type: &'static str,
}

#[derive(Clone)]
pub struct RenderPipeline {
    resolver: ThumbnailResolver,
    cache: CacheHandle,
    artifacts: ArtifactStore,
    inflight: InFlight,
    engine: EngineHandle,
    timeout: Duration,
}

impl Debug for RenderPipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RenderPipeline")
            .field("resolver", &self.resolver)
            .field("artifacts", &self.artifacts)
            .field("engine", &self.engine.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RenderPipeline {
    pub fn new(resolver: ThumbnailResolver, cache: CacheHandle, artifacts: ArtifactStore, engine: EngineHandle) -> Self {
        Self {
            resolver,
            cache,
            artifacts,
            inflight: InFlight::new(),
            engine,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Upper bound on a single transform.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resolver(&self) -> &ThumbnailResolver {
        &self.resolver
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Write the thumbnail for `album` to `response`.
    ///
    /// # Errors
    ///
    /// - [`NoThumbnail`](ErrorKind::NoThumbnail): nothing to make a thumbnail from.
    /// - [`NotFound`](ErrorKind::NotFound): the source photo vanished before it could be read.
    /// - [`Transform`](ErrorKind::Transform): the engine failed or ran past the
    ///   timeout. Part of the output may already have reached `response`.
    /// - [`Response`](ErrorKind::Response): `response` stopped accepting bytes,
    ///   or took them too slowly to keep up.
    #[instrument(skip_all, fields(album = %album, dimensions = %dimensions, quality = %quality))]
    pub async fn serve_thumbnail<W>(
        &self,
        album: &AlbumPath,
        dimensions: Dimensions,
        quality: Quality,
        response: &mut W,
    ) -> Result<Served>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let source = self.resolver.resolve(album).await?;
        let key = CacheKey::derived(&source, &dimensions.to_string(), quality.get());
        loop {
            if let Some(served) = self.serve_cached(&key, &source, response).await? {
                return Ok(served);
            }
            match self.inflight.claim(key) {
                Claim::Waiter(waiter) => waiter.wait().await,
                Claim::Producer(guard) => {
                    // Someone may have finished between our miss and our claim.
                    if let Some(served) = self.serve_cached(&key, &source, response).await? {
                        return Ok(served);
                    }
                    let request = TransformRequest::new(dimensions, quality).with_timeout(self.timeout);
                    return self.derive(key, &source, request, guard, response).await;
                },
            }
        }
    }

    /// Stream the cached artifact for `key`, if there is one.
    async fn serve_cached<W>(&self, key: &CacheKey, source: &Path, response: &mut W) -> Result<Option<Served>>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let Some(location) = self.cache.get(key).await else {
            tracing::debug!(key = %key, "Thumbnail cache miss");
            return Ok(None);
        };
        let mut artifact = match self.artifacts.open(&location).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(key = %key, location = %location.display(), error = ?e, "Cached artifact unreadable");
                self.cache.evict_stale(key, &location).await;
                return Ok(None);
            },
        };
        tracing::debug!(key = %key, location = %location.display(), "Thumbnail cache hit");

        let mut buffer = vec![0; COPY_BUFFER_SIZE];
        let mut bytes = 0;
        loop {
            let n = artifact.read(&mut buffer).await.or_raise(|| ErrorKind::Cache)?;
            if n == 0 {
                break;
            }
            response.write_all(&buffer[..n]).await.or_raise(|| ErrorKind::Response)?;
            bytes += n as u64;
        }
        response.flush().await.or_raise(|| ErrorKind::Response)?;
        Ok(Some(Served {
            origin: Origin::Cached,
            source: source.to_path_buf(),
            bytes,
            content_type: OUTPUT_CONTENT_TYPE,
        }))
    }

    /// Derive the artifact for `key` in a task of its own, streaming its
    /// output to `response` as it is produced.
    ///
    /// The task owns `guard` and never waits on `response`: a client that
    /// falls [`RESPONSE_BACKLOG`] chunks behind is cut off, so one that stops
    /// reading holds up nobody but itself. The task also outlives this call
    /// if it is dropped, and still finishes the artifact.
    async fn derive<W>(
        &self,
        key: CacheKey,
        source: &Path,
        request: TransformRequest,
        guard: ProducerGuard,
        response: &mut W,
    ) -> Result<Served>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let input = File::open(source).await.or_raise(|| ErrorKind::NotFound)?;
        let (sender, mut chunks) = ChannelWriter::channel(RESPONSE_BACKLOG);
        let production = tokio::spawn(
            self.clone()
                .produce(key, source.to_path_buf(), input, request, sender, guard)
                .in_current_span(),
        );

        let mut delivered = 0;
        let mut delivery = Ok(());
        while let Some(chunk) = chunks.recv().await {
            if let Err(e) = response.write_all(&chunk).await {
                delivery = Err(e);
                break;
            }
            delivered += chunk.len() as u64;
        }
        if delivery.is_ok() {
            delivery = response.flush().await;
        }
        drop(chunks);

        let produced = match production.await {
            Ok(produced) => produced?,
            Err(e) => return Err(e).or_raise(|| ErrorKind::Transform),
        };
        if let Err(e) = delivery {
            tracing::debug!(key = %key, error = %e, "Response closed before the thumbnail was complete");
            return Err(e).or_raise(|| ErrorKind::Response);
        }
        if delivered < produced {
            tracing::debug!(key = %key, delivered, produced, "Response fell behind and was cut off");
            exn::bail!(ErrorKind::Response);
        }
        Ok(Served {
            origin: Origin::Derived,
            source: source.to_path_buf(),
            bytes: delivered,
            content_type: OUTPUT_CONTENT_TYPE,
        })
    }

    /// Run the engine over `input`, teeing its output into a new artifact and
    /// `response`, then commit and cache the artifact. Returns the number of
    /// bytes produced.
    async fn produce(
        self,
        key: CacheKey,
        source: PathBuf,
        input: File,
        request: TransformRequest,
        response: ChannelWriter,
        guard: ProducerGuard,
    ) -> Result<u64> {
        let deadline = Instant::now() + request.timeout;
        let mut tee = match self.artifacts.create(&key).await {
            Ok(pending) => Tee::new(pending, response),
            Err(e) => {
                tracing::warn!(key = %key, error = ?e, "Could not create artifact; serving uncached");
                Tee::right_only(io::Error::other("no scratch artifact"), response)
            },
        };
        tracing::debug!(key = %key, source = %source.display(), engine = self.engine.name(), "Deriving thumbnail");

        // The deadline holds whether or not the engine honours `request.timeout`.
        let mut output = timeout_at(deadline, self.engine.transform(Box::pin(input), request))
            .await
            .or_raise(|| ErrorKind::Transform)?
            .or_raise(|| ErrorKind::Transform)?
            .take_until_err();
        let mut artifact_failed = false;
        let mut response_closed = false;
        while let Some(chunk) = timeout_at(deadline, output.next()).await.or_raise(|| ErrorKind::Transform)? {
            // Dropping the tee drops the pending artifact, which removes it.
            let chunk = chunk.or_raise(|| ErrorKind::Transform)?;
            tee.write_all(&chunk).await.or_raise(|| ErrorKind::Response)?;
            if !artifact_failed && let Some(e) = tee.left().error() {
                tracing::warn!(key = %key, error = %e, "Could not write artifact; serving uncached");
                artifact_failed = true;
            }
            if !response_closed && let Some(e) = tee.right().error() {
                tracing::debug!(key = %key, error = %e, "Response branch closed; still deriving the artifact");
                response_closed = true;
            }
        }
        // Flush failures show up as closed branches below.
        _ = tee.flush().await;
        if tee.written() == 0 {
            exn::bail!(ErrorKind::Transform);
        }

        let bytes = tee.written();
        let (artifact, response) = tee.into_inner();
        // Everything is queued; let the response drain while the artifact commits.
        drop(response);
        if let Ok(pending) = artifact {
            match pending.commit().await {
                Ok(location) => {
                    self.cache.put(key, &location).await;
                    tracing::info!(key = %key, location = %location.display(), bytes, "New thumbnail artifact");
                },
                Err(e) => tracing::warn!(key = %key, error = ?e, "Could not commit artifact; not cached"),
            }
        }
        drop(guard);
        Ok(bytes)
    }
}
