//! Byte-counting wrapper for streamed request bodies.

use super::progress::ProgressObserver;
use bytes::Bytes;
use futures_util::{ready, Stream};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};

/// Minimum gap between two progress callbacks
const UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Passes chunks through unchanged and reports the running byte total to an
/// observer, at most once per [`UPDATE_INTERVAL`] plus once at end of stream.
pub struct ProgressStream<S> {
    inner: S,
    sent: u64,
    last_report: Instant,
    observer: Arc<dyn ProgressObserver>,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            inner,
            sent: 0,
            last_report: Instant::now(),
            observer,
        }
    }

    /// Bytes yielded so far
    pub fn bytes_transferred(&self) -> u64 {
        self.sent
    }
}

impl<S, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.sent += chunk.len() as u64;
                if this.last_report.elapsed() >= UPDATE_INTERVAL {
                    this.observer.on_progress(this.sent);
                    this.last_report = Instant::now();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => {
                this.observer.on_progress(this.sent);
                Poll::Ready(None)
            }
        }
    }
}
