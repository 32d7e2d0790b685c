//! Body decorator that mirrors streamed bytes into a capture buffer

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::BytesMut;
use hyper::body::{Body, Bytes, Frame, SizeHint};
use tokio::sync::oneshot;

/// Shared accumulator for the bytes observed by a [`TeeBody`].
///
/// Cloning is cheap; all clones view the same bytes.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<BytesMut>>,
}

impl CaptureBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, chunk: &[u8]) {
        if let Ok(mut buf) = self.inner.lock() {
            buf.extend_from_slice(chunk);
        }
    }

    /// Copy of the bytes accumulated so far
    #[must_use]
    pub fn snapshot(&self) -> Bytes {
        self.inner
            .lock()
            .map(|buf| Bytes::copy_from_slice(&buf))
            .unwrap_or_default()
    }

    /// Number of bytes accumulated so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    /// Whether no bytes have been observed yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body wrapper that forwards every frame unchanged while appending data
/// frames to a [`CaptureBuffer`].
///
/// `size_hint` and `is_end_stream` delegate to the inner body, so framing
/// (content-length vs chunked) survives the wrap. When the stream ends an
/// optional completion signal fires exactly once; dropping the body before
/// the end drops the signal instead, which the receiver observes as an
/// aborted exchange.
pub struct TeeBody<B> {
    inner: Pin<Box<B>>,
    buffer: CaptureBuffer,
    completion: Option<oneshot::Sender<()>>,
    finished: bool,
}

impl<B> TeeBody<B>
where
    B: Body<Data = Bytes>,
{
    /// Wrap a body; observed bytes accumulate into `buffer`
    pub fn new(inner: B, buffer: CaptureBuffer) -> Self {
        Self::build(inner, buffer, None)
    }

    /// Wrap a body and fire `completion` once the stream ends.
    ///
    /// A body that is already at end of stream fires immediately: the
    /// transport never polls a bodiless message again.
    pub fn with_completion(
        inner: B,
        buffer: CaptureBuffer,
        completion: oneshot::Sender<()>,
    ) -> Self {
        Self::build(inner, buffer, Some(completion))
    }

    fn build(inner: B, buffer: CaptureBuffer, completion: Option<oneshot::Sender<()>>) -> Self {
        let mut body = Self {
            inner: Box::pin(inner),
            buffer,
            completion,
            finished: false,
        };

        if body.inner.is_end_stream() {
            body.finish();
        }

        body
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Some(tx) = self.completion.take() {
            let _ = tx.send(());
        }
    }
}

impl<B> Body for TeeBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match this.inner.as_mut().poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.buffer.push(data);
                }
                // Content-length bodies report done after the final frame
                // and are never polled again
                if this.inner.is_end_stream() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
