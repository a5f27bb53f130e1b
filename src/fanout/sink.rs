//! Chunk sinks
//!
//! Everything a source writes into implements [`ChunkSink`]: the broadcast
//! fan-out, each listener's ring buffer, and the discard sink that parked
//! sources write into.

use std::io;
use std::sync::{Arc, OnceLock};

/// Non-blocking byte sink
///
/// `write_chunk` must never wait on a consumer. Returning an error or a
/// short count tells the caller this sink is done.
pub trait ChunkSink: Send + Sync {
    fn write_chunk(&self, data: &[u8]) -> io::Result<usize>;

    /// Release the sink; later writes should fail
    fn close(&self) {}
}

/// Sink that accepts and forgets everything
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl ChunkSink for Discard {
    fn write_chunk(&self, data: &[u8]) -> io::Result<usize> {
        Ok(data.len())
    }
}

/// Shared discard sink
pub fn discard() -> Arc<dyn ChunkSink> {
    static DISCARD: OnceLock<Arc<dyn ChunkSink>> = OnceLock::new();
    Arc::clone(DISCARD.get_or_init(|| Arc::new(Discard)))
}

/// Whether `sink` is the shared discard sink
pub fn is_discard(sink: &Arc<dyn ChunkSink>) -> bool {
    Arc::ptr_eq(sink, &discard())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_accepts_everything() {
        let sink = discard();
        assert_eq!(sink.write_chunk(b"abc").unwrap(), 3);
        assert_eq!(sink.write_chunk(&[]).unwrap(), 0);
        sink.close();
        assert_eq!(sink.write_chunk(b"still fine").unwrap(), 10);
    }

    #[test]
    fn test_discard_is_shared() {
        assert!(is_discard(&discard()));
        let other: Arc<dyn ChunkSink> = Arc::new(Discard);
        assert!(!is_discard(&other));
    }
}
