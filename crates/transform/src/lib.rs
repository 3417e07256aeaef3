//! Image transform engines.
//!
//! The rest of folio treats resizing as an opaque capability: hand a
//! [`Transformer`] a source byte stream and a [`TransformRequest`], get back
//! a stream of JPEG bytes or a [`TransformError`](error::ErrorKind). Two
//! engines are provided:
//!
//! | Engine | How |
//! |---|---|
//! | [`MagickTransformer`] | ImageMagick (`magick`/`convert`) or GraphicsMagick (`gm convert`) child process, streaming through stdin/stdout |
//! | [`NativeTransformer`] | `image` crate, decode + resize + JPEG encode on a blocking thread |
//!
//! [`engine()`] picks one according to an [`Engine`] preference.

pub mod error;
mod magick;
#[cfg(feature = "mock")]
mod mock;
mod native;
mod request;

use crate::error::Result;
pub use crate::magick::MagickTransformer;
#[cfg(feature = "mock")]
pub use crate::mock::{MockBehaviour, MockTransformer};
pub use crate::native::NativeTransformer;
pub use crate::request::{DEFAULT_QUALITY, DEFAULT_TIMEOUT, Dimensions, Quality, TransformRequest};
use async_trait::async_trait;
use futures::Stream;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Source bytes handed to an engine.
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;
/// Derived bytes coming out of an engine, chunk by chunk. An `Err` item ends
/// the stream; whatever came before it must be discarded.
pub type TransformStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send + 'static>>;
pub type EngineHandle = Arc<dyn Transformer>;

/// Media type of everything the engines produce.
pub const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";

/// An image resizing engine.
///
/// # Examples
///
/// ```no_run
/// use folio_transform::{Dimensions, NativeTransformer, Quality, TransformRequest, Transformer};
/// use futures::TryStreamExt;
///
/// # async fn example() -> folio_transform::error::Result<()> {
/// let source = tokio::fs::File::open("/srv/photos/beach.jpg").await.unwrap();
/// let request = TransformRequest::new(Dimensions::new(200, 200)?, Quality::default());
/// let chunks: Vec<Vec<u8>> = NativeTransformer::new()
///     .transform(Box::pin(source), request)
///     .await?
///     .try_collect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Engine name, for logging.
    fn name(&self) -> &str;

    /// Resize `source` to fit `request.dimensions`, re-encoding as JPEG at
    /// `request.quality`.
    ///
    /// Errors may surface either from this call or as an item of the returned
    /// stream. Engines must give up with
    /// [`Timeout`](error::ErrorKind::Timeout) once `request.timeout` has
    /// passed, and report [`EmptyOutput`](error::ErrorKind::EmptyOutput)
    /// rather than ending a stream that yielded nothing.
    async fn transform(&self, source: BoxAsyncRead, request: TransformRequest) -> Result<TransformStream>;
}

/// Which engine to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// ImageMagick/GraphicsMagick when installed, otherwise in-process.
    #[default]
    Auto,
    Magick,
    Native,
}
impl Display for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Magick => "magick",
            Self::Native => "native",
        })
    }
}

/// Build the engine for a preference.
///
/// # Errors
///
/// [`EngineNotFound`](error::ErrorKind::EngineNotFound) when
/// [`Engine::Magick`] is requested but no binary is installed.
pub fn engine(preference: Engine) -> Result<EngineHandle> {
    let handle: EngineHandle = match preference {
        Engine::Magick => Arc::new(MagickTransformer::discover()?),
        Engine::Native => Arc::new(NativeTransformer::new()),
        Engine::Auto => match MagickTransformer::discover() {
            Ok(magick) => Arc::new(magick),
            Err(_) => {
                tracing::info!("No ImageMagick/GraphicsMagick found; using in-process transforms");
                Arc::new(NativeTransformer::new())
            },
        },
    };
    tracing::debug!(engine = handle.name(), "Transform engine selected");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names() {
        assert_eq!(Engine::default(), Engine::Auto);
        assert_eq!(Engine::Native.to_string(), "native");
    }

    #[test]
    fn test_native_engine_always_available() {
        assert_eq!(engine(Engine::Native).unwrap().name(), "native");
        // Whatever is installed, auto never fails.
        assert!(engine(Engine::Auto).is_ok());
    }
}
