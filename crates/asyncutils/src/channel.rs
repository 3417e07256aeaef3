use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Hands every write to a bounded channel, without ever waiting for room.
///
/// A write that finds the channel full fails instead of pending, so a
/// receiver that falls behind can't hold up the writer. As one side of a
/// [`Tee`](crate::Tee) that closes just this branch. Writes after the
/// receiver is gone fail with [`BrokenPipe`](io::ErrorKind::BrokenPipe).
///
/// The sender is released on the first failure and on shutdown; the receiver
/// then sees the channel end after whatever was already queued.
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use folio_asyncutils::ChannelWriter;
/// use tokio::io::AsyncWriteExt;
///
/// let (mut writer, mut chunks) = ChannelWriter::channel(4);
/// writer.write_all(b"hello").await.unwrap();
/// drop(writer);
/// assert_eq!(chunks.recv().await.unwrap(), b"hello");
/// assert_eq!(chunks.recv().await, None);
/// # });
/// ```
#[derive(Debug)]
pub struct ChannelWriter {
    sender: Option<mpsc::Sender<Vec<u8>>>,
}

impl ChannelWriter {
    pub fn new(sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self { sender: Some(sender) }
    }

    /// A writer plus the receiving end of a channel that queues up to
    /// `backlog` chunks.
    pub fn channel(backlog: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(backlog);
        (Self::new(sender), receiver)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.as_ref().is_none_or(mpsc::Sender::is_closed)
    }
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(mut self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let Some(sender) = &self.sender else {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        };
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let err = match sender.try_send(buf.to_vec()) {
            Ok(()) => return Poll::Ready(Ok(buf.len())),
            Err(TrySendError::Full(_)) => io::Error::other("receiver fell behind"),
            Err(TrySendError::Closed(_)) => io::ErrorKind::BrokenPipe.into(),
        };
        self.sender = None;
        Poll::Ready(Err(err))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.sender = None;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tee;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_full_channel_fails_instead_of_waiting() {
        let (mut writer, mut chunks) = ChannelWriter::channel(2);
        writer.write_all(b"a").await.unwrap();
        writer.write_all(b"b").await.unwrap();
        let err = writer.write_all(b"c").await.unwrap_err();
        assert_eq!(err.to_string(), "receiver fell behind");
        assert!(writer.is_closed());

        // What was queued before the failure still arrives, then the channel ends.
        assert_eq!(chunks.recv().await.unwrap(), b"a");
        assert_eq!(chunks.recv().await.unwrap(), b"b");
        assert_eq!(chunks.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_broken_pipe() {
        let (mut writer, chunks) = ChannelWriter::channel(2);
        drop(chunks);
        assert!(writer.is_closed());
        let err = writer.write_all(b"a").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_unread_branch_does_not_hold_up_the_tee() {
        let (writer, _chunks) = ChannelWriter::channel(1);
        let mut tee = Tee::new(Vec::new(), writer);
        for chunk in [&b"ab"[..], b"cd", b"ef"] {
            tee.write_all(chunk).await.unwrap();
        }
        assert!(!tee.right().is_open());
        let (left, _) = tee.into_inner();
        assert_eq!(left.unwrap(), b"abcdef");
    }
}
