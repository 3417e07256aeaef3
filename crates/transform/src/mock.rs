use crate::error::{ErrorKind, Result};
use crate::{BoxAsyncRead, TransformRequest, TransformStream, Transformer};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// What a [`MockTransformer`] does when called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MockBehaviour {
    /// Emit `"WxH@Q:"` followed by the source bytes, in two chunks.
    #[default]
    Succeed,
    /// Emit the first chunk, then fail.
    FailMidStream,
    /// Fail before returning a stream.
    FailImmediately,
    /// Return a stream that yields nothing.
    Empty,
}

/// Deterministic engine for tests.
///
/// Output is a readable function of its input, so tests can assert what was
/// transformed with which parameters without decoding images.
#[derive(Debug, Clone, Default)]
pub struct MockTransformer {
    behaviour: MockBehaviour,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}
impl MockTransformer {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            ..Self::default()
        }
    }

    /// Sleep this long before producing anything.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times [`transform()`](Transformer::transform) was called,
    /// shared between clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// What a successful transform of `source` produces.
    pub fn expected_output(source: &[u8], request: &TransformRequest) -> Vec<u8> {
        let mut output = header(request);
        output.extend_from_slice(source);
        output
    }
}

fn header(request: &TransformRequest) -> Vec<u8> {
    format!("{}@{}:", request.dimensions, request.quality).into_bytes()
}

#[async_trait]
impl Transformer for MockTransformer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transform(&self, mut source: BoxAsyncRead, request: TransformRequest) -> Result<TransformStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.behaviour == MockBehaviour::FailImmediately {
            exn::bail!(ErrorKind::Failed(1));
        }
        let mut input = Vec::new();
        source.read_to_end(&mut input).await.or_raise(|| ErrorKind::Io)?;
        let behaviour = self.behaviour;
        Ok(Box::pin(stream! {
            match behaviour {
                MockBehaviour::Empty => yield Err(exn::Exn::from(ErrorKind::EmptyOutput)),
                MockBehaviour::FailMidStream => {
                    yield Ok(header(&request));
                    yield Err(exn::Exn::from(ErrorKind::Failed(1)));
                },
                _ => {
                    yield Ok(header(&request));
                    yield Ok(input);
                },
            }
        }))
    }
}
