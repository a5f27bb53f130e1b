//! Relay server listener
//!
//! Handles the TCP accept loop, classifies each connection through the
//! detector registry and spawns the chosen handler.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::detect::DetectorRegistry;
use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::handler::Handler;

const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Relay server
pub struct RelayServer {
    config: ServerConfig,
    detectors: Arc<DetectorRegistry>,
    next_conn_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Create a new server with the given configuration and detectors
    pub fn new(config: ServerConfig, detectors: Arc<DetectorRegistry>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            detectors,
            next_conn_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the detector registry
    pub fn detectors(&self) -> &Arc<DetectorRegistry> {
        &self.detectors
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// Returns only when accepting fails with a non-transient error.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Relay server listening");
        }

        let mut delay = Duration::ZERO;
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    delay = Duration::ZERO;
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) if is_transient(&e) => {
                    delay = next_backoff(delay);
                    tracing::warn!(
                        error = %e,
                        retry_ms = delay.as_millis() as u64,
                        "Transient accept error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection, stopping");
                    return Err(e.into());
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = match self.acquire_permit() {
            Ok(permit) => permit,
            Err(()) => {
                tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                return;
            }
        };

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(conn_id = conn_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(conn_id = conn_id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let conn = Connection::new(conn_id, Box::new(socket), Some(peer_addr));
        let detectors = Arc::clone(&self.detectors);
        let detect_timeout = self.config.detect_timeout;

        tokio::spawn(async move {
            let _permit = permit;
            dispatch(conn, detectors, detect_timeout).await;
        });
    }

    fn acquire_permit(&self) -> std::result::Result<Option<OwnedSemaphorePermit>, ()> {
        match self.connection_semaphore {
            Some(ref sem) => sem.clone().try_acquire_owned().map(Some).map_err(|_| ()),
            None => Ok(None),
        }
    }
}

/// Classify a connection and run its handler under a panic boundary
pub async fn dispatch(mut conn: Connection, detectors: Arc<DetectorRegistry>, detect_timeout: Duration) {
    let conn_id = conn.id();

    let detected = tokio::time::timeout(detect_timeout, detectors.detect(conn.lookahead_mut())).await;
    let handler = match detected {
        Ok(Some(handler)) => handler,
        Ok(None) => {
            tracing::debug!(conn_id = conn_id, "Unsupported stream, closing connection");
            return;
        }
        Err(_) => {
            tracing::debug!(conn_id = conn_id, "Protocol detection timed out");
            return;
        }
    };

    conn.finish_detection();
    supervise(handler, conn).await;
}

/// Run a handler in its own task and log if it panics
///
/// The connection is owned by the handler future, so it is closed when the
/// task unwinds.
pub async fn supervise(handler: Handler, conn: Connection) {
    let conn_id = conn.id();
    let peer = conn.peer_addr();
    let name = handler.name().to_string();

    let task = tokio::spawn(async move { handler.serve(conn).await });

    match task.await {
        Ok(()) => {
            tracing::debug!(conn_id = conn_id, handler = %name, "Connection closed");
        }
        Err(e) if e.is_panic() => {
            let panic = e.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(
                conn_id = conn_id,
                peer = ?peer,
                handler = %name,
                panic = %message,
                "Handler panicked"
            );
        }
        Err(e) => {
            tracing::debug!(conn_id = conn_id, error = %e, "Handler task cancelled");
        }
    }
}

/// Accept errors worth retrying
fn is_transient(e: &io::Error) -> bool {
    const EMFILE: i32 = 24;
    const ENFILE: i32 = 23;
    const ENOBUFS: i32 = 105;
    const ENOMEM: i32 = 12;

    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => true,
        _ => matches!(e.raw_os_error(), Some(EMFILE | ENFILE | ENOBUFS | ENOMEM)),
    }
}

fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        ACCEPT_BACKOFF_START
    } else {
        (current * 2).min(ACCEPT_BACKOFF_MAX)
    }
}
