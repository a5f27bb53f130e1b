//! Per-listener drop-oldest buffer
//!
//! A bounded queue of chunks, one chunk per write. Writes never wait: when the
//! queue is full the oldest unread chunk is evicted to make room. Reads wait
//! until a chunk is available, and a chunk larger than the caller's buffer is
//! kept and handed out over several reads.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::pool::ChunkPool;
use super::sink::ChunkSink;

/// Allocation size of ring chunks
pub const RING_CHUNK_SIZE: usize = 4096;

struct State {
    queue: VecDeque<BytesMut>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    capacity: usize,
    readable: Notify,
    pool: ChunkPool,
    dropped: AtomicU64,
}

impl Shared {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let chunk = self.pool.chunk_from(data);
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            if state.closed {
                drop(state);
                self.pool.put(chunk);
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "ring buffer closed"));
            }

            while state.queue.len() >= self.capacity {
                match state.queue.pop_front() {
                    Some(old) => evicted.push(old),
                    None => break,
                }
            }
            state.queue.push_back(chunk);
        }

        if !evicted.is_empty() {
            self.dropped.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            for old in evicted {
                self.pool.put(old);
            }
        }

        self.readable.notify_one();
        Ok(data.len())
    }

    fn close(&self) {
        let drained: Vec<BytesMut> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.queue.drain(..).collect()
        };

        for chunk in drained {
            self.pool.put(chunk);
        }
        self.readable.notify_one();
    }
}

/// Reading end of a ring buffer
///
/// Dropping it closes the buffer, so the writer side starts failing and gets
/// evicted from whatever fan-out it is registered with.
pub struct RingBuffer {
    shared: Arc<Shared>,
    /// Partially read chunk
    cache: Option<BytesMut>,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` chunks
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                capacity,
                readable: Notify::new(),
                pool: ChunkPool::new(RING_CHUNK_SIZE, capacity + 1),
                dropped: AtomicU64::new(0),
            }),
            cache: None,
        }
    }

    /// Writing end, to be registered with a fan-out
    pub fn writer(&self) -> RingWriter {
        RingWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Write a chunk, evicting the oldest if full
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.shared.write(data)
    }

    /// Read into `buf`, waiting for data
    ///
    /// Returns `Ok(0)` once the buffer is closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return Ok(0);
                }
                if self.cache.is_none() {
                    self.cache = state.queue.pop_front();
                }
            }

            if let Some(chunk) = self.cache.as_mut() {
                let n = buf.len().min(chunk.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                chunk.advance(n);
                if chunk.is_empty() {
                    if let Some(done) = self.cache.take() {
                        self.shared.pool.put(done);
                    }
                }
                return Ok(n);
            }

            self.shared.readable.notified().await;
        }
    }

    /// Fill `buf` completely
    ///
    /// Fails with `UnexpectedEof` if the buffer closes first.
    pub async fn read_full(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(())
    }

    /// Close both ends
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Number of queued chunks
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunks evicted because the reader fell behind
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Writing end of a ring buffer
#[derive(Clone)]
pub struct RingWriter {
    shared: Arc<Shared>,
}

impl RingWriter {
    /// Chunks evicted because the reader fell behind
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl ChunkSink for RingWriter {
    fn write_chunk(&self, data: &[u8]) -> io::Result<usize> {
        self.shared.write(data)
    }

    fn close(&self) {
        self.shared.close();
    }
}
