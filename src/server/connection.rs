//! Classified connection handed to a handler
//!
//! Reads replay the prefix consumed during detection and then continue on the
//! raw stream; writes always go straight to the raw stream.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::detect::LookaheadReader;

/// Byte stream a connection can be built on
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

/// Type-erased raw stream
pub type BoxedStream = Box<dyn RawStream>;

/// Accepted connection
pub struct Connection {
    id: u64,
    peer_addr: Option<SocketAddr>,
    reader: LookaheadReader<BoxedStream>,
}

impl Connection {
    /// Wrap a raw stream, ready for detection
    pub fn new(id: u64, stream: BoxedStream, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer_addr,
            reader: LookaheadReader::new(stream),
        }
    }

    /// Connection ID assigned by the router
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address, if the transport has one
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Lookahead reader used by detectors
    pub fn lookahead_mut(&mut self) -> &mut LookaheadReader<BoxedStream> {
        &mut self.reader
    }

    /// Rewind and freeze the peek buffer so handler reads replay it
    pub fn finish_detection(&mut self) {
        self.reader.reset();
        self.reader.stop();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("replay", &self.reader.remaining().len())
            .finish()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.reader.is_stopped() && !this.reader.is_drained() {
            let before = out.filled().len();
            ready!(Pin::new(&mut this.reader).poll_read(cx, out))?;
            if out.filled().len() > before {
                return Poll::Ready(Ok(()));
            }
        }

        if this.reader.is_stopped() {
            this.reader.release();
            return Pin::new(this.reader.get_mut()).poll_read(cx, out);
        }

        Pin::new(&mut this.reader).poll_read(cx, out)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(self.get_mut().reader.get_mut()).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().reader.get_mut()).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().reader.get_mut()).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_replays_prefix_then_stream() {
        let (mut client, server) = tokio::io::duplex(256);
        client.write_all(b"SOURCE /live ICE/1.0\r\n").await.unwrap();

        let mut conn = Connection::new(1, Box::new(server), None);
        let mut line = [0u8; 6];
        conn.lookahead_mut().read_exact(&mut line).await.unwrap();
        conn.finish_detection();

        client.write_all(b"audio").await.unwrap();
        drop(client);

        let mut all = Vec::new();
        conn.read_to_end(&mut all).await.unwrap();
        assert_eq!(all, b"SOURCE /live ICE/1.0\r\naudio");
    }

    #[tokio::test]
    async fn test_writes_reach_raw_stream() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut conn = Connection::new(7, Box::new(server), "127.0.0.1:9000".parse().ok());
        assert_eq!(conn.id(), 7);
        assert_eq!(conn.peer_addr().map(|a| a.port()), Some(9000));

        conn.finish_detection();
        conn.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();

        let mut buf = [0u8; 19];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"HTTP/1.0 200 OK\r\n\r\n");
    }
}
