//! Listener write loop
//!
//! Drains a listener's ring buffer to its connection. In plain mode bytes are
//! forwarded as they arrive. In interleaved mode the loop reads exactly one
//! metadata interval of audio, writes it, then writes one ICY metadata block:
//! a single zero byte when the title is unchanged, the full block otherwise.
//!
//! Every cycle's writes are flushed and must complete within the write
//! timeout. On any exit the ring buffer is closed, so the fan-out evicts it
//! on its next write.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::watch;

use crate::fanout::RingBuffer;
use crate::icecast::metadata::{metadata_block, EMPTY_BLOCK};
use crate::stats::SessionStats;

/// Read size in plain mode
pub const PLAIN_READ_SIZE: usize = 16 * 1024;

/// How the listener receives the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerMode {
    /// Raw audio bytes
    Plain,
    /// Audio with an ICY metadata block every `interval` bytes
    Interleaved { interval: usize },
}

impl ListenerMode {
    pub fn metadata_interval(&self) -> Option<usize> {
        match self {
            ListenerMode::Plain => None,
            ListenerMode::Interleaved { interval } => Some(*interval),
        }
    }
}

/// Drives one listener connection
pub struct ListenerSession<W: AsyncWrite> {
    ring: RingBuffer,
    now_playing: watch::Receiver<Arc<str>>,
    writer: BufWriter<W>,
    mode: ListenerMode,
    write_timeout: Duration,
    /// Title carried by the last metadata block
    last_title: Arc<str>,
    stats: SessionStats,
}

impl<W> ListenerSession<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        ring: RingBuffer,
        now_playing: watch::Receiver<Arc<str>>,
        writer: W,
        mode: ListenerMode,
        write_timeout: Duration,
    ) -> Self {
        let buffer_size = match mode {
            ListenerMode::Plain => PLAIN_READ_SIZE,
            ListenerMode::Interleaved { interval } => interval + 1,
        };

        Self {
            ring,
            now_playing,
            writer: BufWriter::with_capacity(buffer_size, writer),
            mode,
            write_timeout,
            last_title: Arc::from(""),
            stats: SessionStats::new(),
        }
    }

    /// Stream until the ring closes or the connection fails
    ///
    /// A closed ring (mount destroyed, listener evicted) ends the session
    /// with `Ok`; a write error or timeout ends it with `Err`.
    pub async fn run(&mut self) -> io::Result<()> {
        let started = Instant::now();

        let result = match self.mode {
            ListenerMode::Plain => self.plain_loop().await,
            ListenerMode::Interleaved { interval } => self.interleaved_loop(interval.max(1)).await,
        };

        self.ring.close();
        self.stats.dropped_chunks = self.ring.dropped();
        self.stats.duration = started.elapsed();
        self.stats.calculate_bitrate();
        result
    }

    async fn plain_loop(&mut self) -> io::Result<()> {
        let mut buf = vec![0u8; PLAIN_READ_SIZE];

        loop {
            let n = self.ring.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            self.send(&[&buf[..n]]).await?;
        }
    }

    async fn interleaved_loop(&mut self, interval: usize) -> io::Result<()> {
        let mut buf = vec![0u8; interval];

        loop {
            match self.ring.read_full(&mut buf).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            }

            let current = Arc::clone(&self.now_playing.borrow());
            if *current == *self.last_title {
                self.send(&[&buf[..], &EMPTY_BLOCK[..]]).await?;
            } else {
                let block = metadata_block(&current);
                self.send(&[&buf[..], &block[..]]).await?;
                self.last_title = current;
                self.stats.metadata_blocks += 1;
            }
        }
    }

    /// Write and flush `parts` within the write timeout
    async fn send(&mut self, parts: &[&[u8]]) -> io::Result<()> {
        let writer = &mut self.writer;
        let write = async {
            for part in parts {
                writer.write_all(part).await?;
            }
            writer.flush().await
        };

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => {
                result?;
                self.stats.bytes_sent += parts.iter().map(|p| p.len() as u64).sum::<u64>();
                Ok(())
            }
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "listener write timed out",
            )),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Underlying writer
    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }
}
