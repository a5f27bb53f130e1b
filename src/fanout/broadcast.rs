//! One producer, many independent consumers
//!
//! The active source writes into a [`Fanout`], which copies every write into
//! each registered sink. A sink that fails or accepts less than the full
//! write is evicted; the producer always sees a full-length write.
//!
//! ```text
//!   add(sink) ──► pending queue ──┐
//!                                 ▼ drained at the start of write()
//!   source ──► write(bytes) ──► [ ring, ring, ring, ... ] ──► listeners
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::sink::ChunkSink;

struct Sinks {
    pending: mpsc::UnboundedReceiver<Arc<dyn ChunkSink>>,
    active: Vec<Arc<dyn ChunkSink>>,
}

/// Broadcast fan-out
///
/// Registration only touches the pending queue, so it never waits on a
/// write in progress. The sink list lock is uncontended while a single
/// source is live: besides the producer's `write`, only `close` (mount
/// teardown) and `sink_count` take it from other tasks.
pub struct Fanout {
    register: mpsc::UnboundedSender<Arc<dyn ChunkSink>>,
    sinks: Mutex<Sinks>,
    closed: AtomicBool,
    evicted: AtomicU64,
}

impl Fanout {
    pub fn new() -> Self {
        let (register, pending) = mpsc::unbounded_channel();
        Self {
            register,
            sinks: Mutex::new(Sinks {
                pending,
                active: Vec::new(),
            }),
            closed: AtomicBool::new(false),
            evicted: AtomicU64::new(0),
        }
    }

    /// Register a sink; it receives every write from the next one on
    ///
    /// Adding to a closed fan-out closes the sink right away.
    pub fn add(&self, sink: Arc<dyn ChunkSink>) {
        if self.closed.load(Ordering::Acquire) {
            sink.close();
            return;
        }
        if let Err(mpsc::error::SendError(sink)) = self.register.send(sink) {
            sink.close();
        }
    }

    /// Deliver `data` to every sink, evicting the ones that fail
    ///
    /// Always reports the full length.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut sinks = self.sinks.lock();

        while let Ok(sink) = sinks.pending.try_recv() {
            sinks.active.push(sink);
        }

        let mut i = 0;
        while i < sinks.active.len() {
            match sinks.active[i].write_chunk(data) {
                Ok(n) if n == data.len() => i += 1,
                _ => {
                    let sink = sinks.active.swap_remove(i);
                    sink.close();
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        data.len()
    }

    /// Close every sink, pending or active
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let mut sinks = self.sinks.lock();
        sinks.pending.close();
        while let Ok(sink) = sinks.pending.try_recv() {
            sink.close();
        }
        for sink in sinks.active.drain(..) {
            sink.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sinks that received the last write
    pub fn sink_count(&self) -> usize {
        self.sinks.lock().active.len()
    }

    /// Sinks evicted so far
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkSink for Fanout {
    fn write_chunk(&self, data: &[u8]) -> io::Result<usize> {
        Ok(self.write(data))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::fanout::ring::RingBuffer;

    #[derive(Default)]
    struct Recording {
        data: Mutex<Vec<u8>>,
        closed: AtomicBool,
    }

    impl ChunkSink for Recording {
        fn write_chunk(&self, data: &[u8]) -> io::Result<usize> {
            self.data.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    struct Failing {
        calls: AtomicUsize,
    }

    impl ChunkSink for Failing {
        fn write_chunk(&self, _data: &[u8]) -> io::Result<usize> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(io::ErrorKind::BrokenPipe.into())
        }
    }

    struct Short;

    impl ChunkSink for Short {
        fn write_chunk(&self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len() / 2)
        }
    }

    #[test]
    fn test_delivers_to_all_sinks() {
        let fanout = Fanout::new();
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        fanout.add(a.clone());
        fanout.add(b.clone());

        assert_eq!(fanout.write(b"abc"), 3);
        assert_eq!(fanout.write(b"def"), 3);

        assert_eq!(&a.data.lock()[..], b"abcdef");
        assert_eq!(&b.data.lock()[..], b"abcdef");
        assert_eq!(fanout.sink_count(), 2);
    }

    #[test]
    fn test_registration_applies_on_next_write() {
        let fanout = Fanout::new();
        let early = Arc::new(Recording::default());
        fanout.add(early.clone());
        fanout.write(b"one");

        let late = Arc::new(Recording::default());
        fanout.add(late.clone());
        assert_eq!(fanout.sink_count(), 1);

        fanout.write(b"two");
        assert_eq!(&early.data.lock()[..], b"onetwo");
        assert_eq!(&late.data.lock()[..], b"two");
    }

    #[test]
    fn test_failing_sink_evicted_others_unaffected() {
        let fanout = Fanout::new();
        let good = Arc::new(Recording::default());
        let bad = Arc::new(Failing {
            calls: AtomicUsize::new(0),
        });
        fanout.add(bad.clone());
        fanout.add(good.clone());
        fanout.add(Arc::new(Short));

        assert_eq!(fanout.write(b"first"), 5);
        assert_eq!(fanout.sink_count(), 1);
        assert_eq!(fanout.evicted(), 2);

        assert_eq!(fanout.write(b"second"), 6);
        assert_eq!(bad.calls.load(Ordering::Relaxed), 1);
        assert_eq!(&good.data.lock()[..], b"firstsecond");
    }

    #[test]
    fn test_write_without_sinks_reports_full_length() {
        let fanout = Fanout::new();
        assert_eq!(fanout.write_chunk(b"nobody listening").unwrap(), 16);
    }

    #[test]
    fn test_close_closes_sinks() {
        let fanout = Fanout::new();
        let active = Arc::new(Recording::default());
        fanout.add(active.clone());
        fanout.write(b"x");

        let pending = Arc::new(Recording::default());
        fanout.add(pending.clone());

        fanout.close();
        assert!(fanout.is_closed());
        assert!(active.closed.load(Ordering::Relaxed));
        assert!(pending.closed.load(Ordering::Relaxed));

        let late = Arc::new(Recording::default());
        fanout.add(late.clone());
        assert!(late.closed.load(Ordering::Relaxed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_from_another_task_during_writes() {
        let fanout = Arc::new(Fanout::new());
        let sink = Arc::new(Recording::default());
        fanout.add(sink.clone());
        fanout.write(b"x");

        let writer = Arc::clone(&fanout);
        let producer = tokio::task::spawn_blocking(move || {
            for _ in 0..1000 {
                assert_eq!(writer.write(b"abcd"), 4);
            }
        });

        let closer = Arc::clone(&fanout);
        tokio::spawn(async move { closer.close() }).await.unwrap();
        producer.await.unwrap();

        assert_eq!(fanout.sink_count(), 0);
        assert!(sink.closed.load(Ordering::Relaxed));
        assert_eq!(fanout.write(b"after"), 5);
    }

    #[tokio::test]
    async fn test_dropped_listener_ring_is_evicted() {
        let fanout = Fanout::new();
        let mut kept = RingBuffer::new(4);
        let gone = RingBuffer::new(4);
        fanout.add(Arc::new(kept.writer()));
        fanout.add(Arc::new(gone.writer()));

        fanout.write(b"a");
        assert_eq!(fanout.sink_count(), 2);

        drop(gone);
        fanout.write(b"b");
        assert_eq!(fanout.sink_count(), 1);

        let mut buf = [0u8; 1];
        kept.read_full(&mut buf).await.unwrap();
        assert_eq!(&buf, b"a");
        kept.read_full(&mut buf).await.unwrap();
        assert_eq!(&buf, b"b");
    }
}
