use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// One side of a [`Tee`].
#[derive(Debug)]
pub enum Branch<W> {
    Open(W),
    /// The writer failed and has been dropped; nothing more is written to it.
    Failed(io::Error),
}
impl<W> Branch<W> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    pub fn error(&self) -> Option<&io::Error> {
        match self {
            Self::Open(_) => None,
            Self::Failed(e) => Some(e),
        }
    }

    pub fn into_result(self) -> io::Result<W> {
        match self {
            Self::Open(writer) => Ok(writer),
            Self::Failed(e) => Err(e),
        }
    }
}
impl<W: AsyncWrite + Unpin> Branch<W> {
    async fn write_all(&mut self, buf: &[u8]) {
        if let Self::Open(writer) = self
            && let Err(e) = writer.write_all(buf).await
        {
            *self = Self::Failed(e);
        }
    }

    async fn flush(&mut self) {
        if let Self::Open(writer) = self
            && let Err(e) = writer.flush().await
        {
            *self = Self::Failed(e);
        }
    }
}

/// Writes every chunk to two writers at once.
///
/// The branches fail independently: once a write to one side errors, that
/// side is closed and the other carries on alone. Only when both sides have
/// failed does writing report an error.
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use folio_asyncutils::Tee;
///
/// let mut tee = Tee::new(Vec::new(), Vec::new());
/// tee.write_all(b"hello").await.unwrap();
/// let (left, right) = tee.into_inner();
/// assert_eq!(left.unwrap(), b"hello");
/// assert_eq!(right.unwrap(), b"hello");
/// # });
/// ```
#[derive(Debug)]
pub struct Tee<L, R> {
    left: Branch<L>,
    right: Branch<R>,
    written: u64,
}
impl<L, R> Tee<L, R>
where
    L: AsyncWrite + Unpin,
    R: AsyncWrite + Unpin,
{
    pub fn new(left: L, right: R) -> Self {
        Self {
            left: Branch::Open(left),
            right: Branch::Open(right),
            written: 0,
        }
    }

    /// Only the right side; the left side starts out closed with `reason`.
    pub fn right_only(reason: io::Error, right: R) -> Self {
        Self {
            left: Branch::Failed(reason),
            right: Branch::Open(right),
            written: 0,
        }
    }

    /// Write `buf` to both open sides concurrently.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::BrokenPipe`] once neither side is open.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        futures::join!(self.left.write_all(buf), self.right.write_all(buf));
        self.ensure_open()?;
        self.written += buf.len() as u64;
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        futures::join!(self.left.flush(), self.right.flush());
        self.ensure_open()
    }

    /// Bytes accepted by at least one side.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn left(&self) -> &Branch<L> {
        &self.left
    }

    pub fn right(&self) -> &Branch<R> {
        &self.right
    }

    pub fn into_inner(self) -> (io::Result<L>, io::Result<R>) {
        (self.left.into_result(), self.right.into_result())
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.left.is_open() || self.right.is_open() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "both sides of the tee have failed"))
        }
    }
}
