//! Source-to-listener data path
//!
//! One [`Fanout`] per mount replicates the active source's bytes into one
//! [`RingBuffer`] per listener. Neither step waits on a consumer: a listener
//! that falls behind loses its oldest chunks, and a listener whose buffer is
//! closed is evicted on the next write.

pub mod broadcast;
pub mod pool;
pub mod ring;
pub mod sink;

pub use broadcast::Fanout;
pub use pool::ChunkPool;
pub use ring::{RingBuffer, RingWriter};
pub use sink::{discard, is_discard, ChunkSink, Discard};
