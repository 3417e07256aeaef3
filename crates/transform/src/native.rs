use crate::error::{ErrorKind, Result};
use crate::{BoxAsyncRead, TransformRequest, TransformStream, Transformer};
use async_trait::async_trait;
use exn::ResultExt;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tokio::io::AsyncReadExt;
use tokio::time::{Instant, timeout_at};

/// Pure Rust engine built on the `image` crate.
///
/// Always available, at the cost of holding the whole source and the decoded
/// pixels in memory for the duration of the transform.
#[derive(Debug, Clone, Default)]
pub struct NativeTransformer {
    _priv: (),
}
impl NativeTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transformer for NativeTransformer {
    fn name(&self) -> &str {
        "native"
    }

    async fn transform(&self, mut source: BoxAsyncRead, request: TransformRequest) -> Result<TransformStream> {
        let deadline = Instant::now() + request.timeout;
        let work = async move {
            let mut input = Vec::new();
            source.read_to_end(&mut input).await.or_raise(|| ErrorKind::Io)?;
            // The decoder detects the format from the content, not the name.
            tokio::task::spawn_blocking(move || encode(&input, request))
                .await
                .or_raise(|| ErrorKind::Io)?
        };
        let output = match timeout_at(deadline, work).await {
            Ok(output) => output?,
            Err(_) => {
                // The blocking thread runs to completion regardless; its result is discarded.
                tracing::warn!(timeout = ?request.timeout, "In-process transform timed out");
                exn::bail!(ErrorKind::Timeout);
            },
        };
        if output.is_empty() {
            exn::bail!(ErrorKind::EmptyOutput);
        }
        tracing::trace!(bytes = output.len(), "In-process transform finished");
        Ok(Box::pin(futures::stream::once(async move { Ok(output) })))
    }
}

fn encode(input: &[u8], request: TransformRequest) -> Result<Vec<u8>> {
    let image = image::load_from_memory(input).or_raise(|| ErrorKind::Decode)?;
    let (width, height) = (request.dimensions.width(), request.dimensions.height());
    // JPEG has no alpha channel.
    let resized = DynamicImage::ImageRgb8(image.resize(width, height, FilterType::Triangle).to_rgb8());
    let mut output = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut output, request.quality.get());
    resized.write_with_encoder(encoder).or_raise(|| ErrorKind::Encode)?;
    Ok(output)
}
