//! Source read loop
//!
//! Reads the encoder's stream and hands every read to the [`Source`], which
//! forwards it to the mount's fan-out or discards it depending on whether the
//! source is active. The loop ends on EOF, on a read error, or when the
//! mount asks the source to stop.

use std::io;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::mount::Source;
use crate::stats::SessionStats;

/// Why a source session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEnd {
    /// Encoder closed the connection
    Eof,
    /// Mount asked the source to stop
    Shutdown,
}

/// Drives one source connection
pub struct SourceSession<'a, R> {
    source: &'a Source,
    reader: R,
    buf: Vec<u8>,
    stats: SessionStats,
}

impl<'a, R> SourceSession<'a, R>
where
    R: AsyncRead + Unpin,
{
    /// Create a session reading at most `read_size` bytes at a time
    pub fn new(source: &'a Source, reader: R, read_size: usize) -> Self {
        Self {
            source,
            reader,
            buf: vec![0u8; read_size.max(1)],
            stats: SessionStats::new(),
        }
    }

    /// Pump until the encoder disconnects or the source is shut down
    pub async fn run(&mut self) -> io::Result<SourceEnd> {
        let started = Instant::now();
        let result = self.pump().await;
        self.stats.duration = started.elapsed();
        self.stats.calculate_bitrate();
        result
    }

    async fn pump(&mut self) -> io::Result<SourceEnd> {
        let Self {
            source,
            reader,
            buf,
            stats,
        } = self;

        loop {
            tokio::select! {
                biased;

                _ = source.shutdown_requested() => return Ok(SourceEnd::Shutdown),

                read = reader.read(&mut buf[..]) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(SourceEnd::Eof);
                    }
                    stats.bytes_received += n as u64;
                    source.write(&buf[..n])?;
                }
            }
        }
    }

    /// Statistics so far
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::fanout::{Fanout, RingBuffer};
    use crate::mount::SourceId;

    fn source() -> Source {
        Source::new(SourceId::new("/live", "127.0.0.1"), 0)
    }

    #[tokio::test]
    async fn test_pumps_until_eof() {
        let source = source();
        let fanout = Arc::new(Fanout::new());
        let mut ring = RingBuffer::new(16);
        fanout.add(Arc::new(ring.writer()));
        source.redirect(fanout);

        let reader = tokio_test::io::Builder::new()
            .read(b"ID3")
            .read(b"audio")
            .build();
        let mut session = SourceSession::new(&source, reader, 4096);

        assert_eq!(session.run().await.unwrap(), SourceEnd::Eof);
        assert_eq!(session.stats().bytes_received, 8);
        assert_eq!(source.bytes_received(), 8);

        let mut buf = [0u8; 8];
        ring.read_full(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ID3audio");
    }

    #[tokio::test]
    async fn test_small_read_size_splits_reads() {
        let source = source();
        let reader = tokio_test::io::Builder::new().read(b"abcdefgh").build();
        let mut session = SourceSession::new(&source, reader, 3);

        session.run().await.unwrap();
        assert_eq!(session.stats().bytes_received, 8);
    }

    #[tokio::test]
    async fn test_read_error_ends_session() {
        let source = source();
        let reader = tokio_test::io::Builder::new()
            .read(b"abc")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut session = SourceSession::new(&source, reader, 4096);

        let err = session.run().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(session.stats().bytes_received, 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_source() {
        let source = source();
        let (_client, server) = tokio::io::duplex(64);
        let mut session = SourceSession::new(&source, server, 4096);

        source.shutdown();
        let end = tokio::time::timeout(Duration::from_secs(1), session.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, SourceEnd::Shutdown);
    }
}
