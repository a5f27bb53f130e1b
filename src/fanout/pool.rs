//! Reusable chunk buffers
//!
//! Ring buffers copy every write into a chunk of their own. Chunks that were
//! read or evicted come back here so sustained streaming does not allocate
//! per write.

use bytes::BytesMut;
use parking_lot::Mutex;

/// Default chunk allocation size
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// A pool of reusable byte chunks
#[derive(Debug)]
pub struct ChunkPool {
    free: Mutex<Vec<BytesMut>>,
    chunk_size: usize,
    max_pooled: usize,
}

impl ChunkPool {
    /// Create a pool keeping at most `max_pooled` idle chunks
    pub fn new(chunk_size: usize, max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            chunk_size,
            max_pooled,
        }
    }

    /// Take an empty chunk, allocating if none is idle
    pub fn get(&self) -> BytesMut {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.chunk_size))
    }

    /// Copy `data` into a pooled chunk
    pub fn chunk_from(&self, data: &[u8]) -> BytesMut {
        let mut chunk = self.get();
        chunk.extend_from_slice(data);
        chunk
    }

    /// Return a chunk; it is dropped if the pool is full
    pub fn put(&self, mut chunk: BytesMut) {
        chunk.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(chunk);
        }
    }

    /// Number of idle chunks
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for ChunkPool {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, 16)
    }
}
