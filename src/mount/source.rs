//! Connected sources
//!
//! A [`Source`] is the producer half of a source connection. The connection
//! task reads the encoder's stream and calls [`Source::write`]; the mount
//! worker decides where those bytes go by redirecting the source's output
//! between the mount's fan-out and the discard sink.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::queue::Named;
use crate::fanout::{discard, is_discard, ChunkSink};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Identifies a source for metadata routing
///
/// Two connections from the same host to the same mount share an id, so a
/// metadata update from that host applies to whichever of them is newest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId {
    pub mount: String,
    pub host: String,
}

impl SourceId {
    pub fn new(mount: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            mount: mount.into(),
            host: host.into(),
        }
    }

    /// Id for a connection from `peer`
    pub fn from_peer(mount: impl Into<String>, peer: Option<IpAddr>) -> Self {
        let host = match peer {
            Some(ip) => ip.to_string(),
            None => "unknown".to_string(),
        };
        Self::new(mount, host)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.mount, self.host)
    }
}

/// A source connected to a mount
pub struct Source {
    serial: u64,
    id: SourceId,
    priority: i32,
    user: Option<String>,
    output: Mutex<Arc<dyn ChunkSink>>,
    shutdown: Notify,
    bytes_received: AtomicU64,
    connected_at: Instant,
}

impl Source {
    /// Create a source that discards its data until it is made active
    pub fn new(id: SourceId, priority: i32) -> Self {
        Self {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            id,
            priority,
            user: None,
            output: Mutex::new(discard()),
            shutdown: Notify::new(),
            bytes_received: AtomicU64::new(0),
            connected_at: Instant::now(),
        }
    }

    /// Attach the authenticated user name
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    /// Process-unique serial number
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Send subsequent writes to `sink`
    ///
    /// Takes effect between writes: a write in progress finishes against the
    /// previous sink.
    pub fn redirect(&self, sink: Arc<dyn ChunkSink>) {
        *self.output.lock() = sink;
    }

    /// Whether the source is feeding a mount rather than the discard sink
    pub fn is_active(&self) -> bool {
        !is_discard(&self.output.lock())
    }

    /// Forward bytes read from the encoder to the current output
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.output.lock().write_chunk(data)
    }

    /// Ask the connection task feeding this source to stop
    ///
    /// Idempotent, and a request made before the task starts waiting is
    /// still observed.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }
}

impl Named for Source {
    type Name = SourceId;

    fn name(&self) -> &SourceId {
        &self.id
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("serial", &self.serial)
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("user", &self.user)
            .finish()
    }
}
