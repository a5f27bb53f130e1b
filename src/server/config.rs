//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Default ICY metadata interval in bytes
pub const DEFAULT_METADATA_INTERVAL: usize = 16000;

/// Default number of chunks a listener may fall behind before dropping
pub const DEFAULT_LISTENER_BUFFER_CHUNKS: usize = 64;

/// Default source read size
pub const DEFAULT_SOURCE_READ_SIZE: usize = 4096;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Protocol detection must finish within this time
    pub detect_timeout: Duration,

    /// Request head must be read within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Maximum request line a detector will peek at
    pub max_request_line: usize,

    /// Maximum request head (request line + headers) a handler will read
    pub max_head_size: usize,

    /// Read size for source streams
    pub source_read_size: usize,

    /// Per-listener ring buffer capacity in chunks
    pub listener_buffer_chunks: usize,

    /// Bytes of audio between ICY metadata blocks
    pub metadata_interval: usize,

    /// A listener write stalled for longer than this is dropped
    pub listener_write_timeout: Duration,

    /// Priority for sources that do not ask for one
    pub default_source_priority: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_connections: 0, // Unlimited
            detect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
            max_request_line: 2048,
            max_head_size: 16 * 1024,
            source_read_size: DEFAULT_SOURCE_READ_SIZE,
            listener_buffer_chunks: DEFAULT_LISTENER_BUFFER_CHUNKS,
            metadata_interval: DEFAULT_METADATA_INTERVAL,
            listener_write_timeout: Duration::from_secs(30),
            default_source_priority: 0,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set detection timeout
    pub fn detect_timeout(mut self, timeout: Duration) -> Self {
        self.detect_timeout = timeout;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the ICY metadata interval (clamped to at least 1 byte)
    pub fn metadata_interval(mut self, interval: usize) -> Self {
        self.metadata_interval = interval.max(1);
        self
    }

    /// Set the listener ring buffer capacity (clamped to at least 1 chunk)
    pub fn listener_buffer_chunks(mut self, chunks: usize) -> Self {
        self.listener_buffer_chunks = chunks.max(1);
        self
    }

    /// Set the listener write timeout
    pub fn listener_write_timeout(mut self, timeout: Duration) -> Self {
        self.listener_write_timeout = timeout;
        self
    }

    /// Set the default source priority
    pub fn default_source_priority(mut self, priority: i32) -> Self {
        self.default_source_priority = priority;
        self
    }
}
