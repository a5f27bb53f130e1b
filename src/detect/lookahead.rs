//! Rewindable lookahead over a one-shot byte stream
//!
//! Protocol detectors need to look at the first bytes of a connection without
//! taking them away from whichever handler ends up owning it. The reader keeps
//! every byte it pulls from the stream; [`reset`](LookaheadReader::reset)
//! rewinds to the start of that buffer so the next detector sees the same
//! prefix, and [`stop`](LookaheadReader::stop) turns the buffer into a finite
//! replay that ends with EOF instead of touching the stream again.
//!
//! ```text
//!  buf: [ consumed | buffered, unread | spare ]
//!       0        rpos               wpos     len
//! ```

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Initial buffer allocation
pub const PEEK_BUFFER_SIZE: usize = 8192;

/// Maximum bytes pulled from the stream per read call, and the growth step
pub const PEEK_READ_SIZE: usize = 4096;

/// Peek buffer over a raw stream
#[derive(Debug)]
pub struct LookaheadReader<S> {
    inner: S,
    buf: Vec<u8>,
    /// Bytes buffered from the stream
    wpos: usize,
    /// Bytes consumed by the current reader
    rpos: usize,
    stopped: bool,
}

impl<S> LookaheadReader<S> {
    /// Wrap a stream
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            wpos: 0,
            rpos: 0,
            stopped: false,
        }
    }

    /// Rewind the read cursor to the start of the buffered prefix
    pub fn reset(&mut self) {
        self.rpos = 0;
    }

    /// Stop pulling from the stream; reads past the buffer return EOF
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Whether [`stop`](Self::stop) was called
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether the reader is stopped and every buffered byte was consumed
    pub fn is_drained(&self) -> bool {
        self.stopped && self.rpos == self.wpos
    }

    /// Everything pulled from the stream so far
    pub fn buffered(&self) -> &[u8] {
        &self.buf[..self.wpos]
    }

    /// Buffered bytes not yet consumed
    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.rpos..self.wpos]
    }

    /// Free the buffer once it has been fully replayed
    pub fn release(&mut self) {
        if self.is_drained() {
            self.buf = Vec::new();
            self.rpos = 0;
            self.wpos = 0;
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn reserve_chunk(&mut self) {
        if self.buf.is_empty() {
            self.buf.resize(PEEK_BUFFER_SIZE, 0);
        }
        if self.buf.len() < self.wpos + PEEK_READ_SIZE {
            let len = self.buf.len() + PEEK_READ_SIZE;
            self.buf.resize(len, 0);
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for LookaheadReader<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.rpos < this.wpos {
            let n = out.remaining().min(this.wpos - this.rpos);
            out.put_slice(&this.buf[this.rpos..this.rpos + n]);
            this.rpos += n;
            return Poll::Ready(Ok(()));
        }

        if this.stopped || out.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // At most one chunk from the stream per call
        this.reserve_chunk();
        let start = this.wpos;
        let mut chunk = ReadBuf::new(&mut this.buf[start..start + PEEK_READ_SIZE]);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk))?;
        let n = chunk.filled().len();
        this.wpos += n;

        let take = n.min(out.remaining());
        out.put_slice(&this.buf[start..start + take]);
        this.rpos = start + take;

        Poll::Ready(Ok(()))
    }
}
