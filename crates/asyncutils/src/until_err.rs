use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

pin_project! {
    /// Stream adapter returned by [`TakeUntilErrExt::take_until_err`].
    #[derive(Debug)]
    #[must_use = "streams do nothing unless polled"]
    pub struct TakeUntilErr<S> {
        #[pin]
        inner: S,
        done: bool,
    }
}

impl<S, T, E> Stream for TakeUntilErr<S>
where
    S: Stream<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        let item = ready!(this.inner.poll_next(cx));
        match &item {
            None | Some(Err(_)) => *this.done = true,
            Some(Ok(_)) => {},
        }
        Poll::Ready(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done { (0, Some(0)) } else { (0, self.inner.size_hint().1) }
    }
}

pub trait TakeUntilErrExt: Stream + Sized {
    /// Yield items up to and including the first `Err`, then end.
    ///
    /// The inner stream is never polled again after an error or after it
    /// ended, so it need not be fused.
    fn take_until_err(self) -> TakeUntilErr<Self> {
        TakeUntilErr { inner: self, done: false }
    }
}
impl<S, T, E> TakeUntilErrExt for S where S: Stream<Item = Result<T, E>> {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::stream;

    #[tokio::test]
    async fn test_stops_after_first_error() {
        let items = stream::iter(vec![Ok(1), Ok(2), Err("boom"), Ok(3), Err("again")]);
        let seen: Vec<_> = items.take_until_err().collect().await;
        assert_eq!(seen, [Ok(1), Ok(2), Err("boom")]);
    }

    #[tokio::test]
    async fn test_passes_through_clean_stream() {
        let items = stream::iter(vec![Ok::<_, ()>(1), Ok(2)]);
        let mut stream = items.take_until_err();
        assert_eq!(stream.next().await, Some(Ok(1)));
        assert_eq!(stream.next().await, Some(Ok(2)));
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.size_hint(), (0, Some(0)));
    }
}
