//! Hand-off of unclaimed connections to an external HTTP server
//!
//! The pipe handler is meant to be the registry's default handler: every
//! connection no detector claimed is queued here, and the host's HTTP server
//! pulls them from the [`PipeAcceptor`] as if it were a listener.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::connection::Connection;
use super::handler::ConnHandler;

/// Create a connected handler/acceptor pair
pub fn connection_pipe(capacity: usize) -> (PipeHandler, PipeAcceptor) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PipeHandler { tx }, PipeAcceptor { rx })
}

/// Handler side, forwards connections into the pipe
#[derive(Clone)]
pub struct PipeHandler {
    tx: mpsc::Sender<Connection>,
}

#[async_trait]
impl ConnHandler for PipeHandler {
    async fn serve(&self, conn: Connection) {
        let conn_id = conn.id();
        if self.tx.send(conn).await.is_err() {
            tracing::debug!(conn_id = conn_id, "Pipe acceptor gone, closing connection");
        }
    }

    fn name(&self) -> &str {
        "http-pipe"
    }
}

/// Acceptor side, yields forwarded connections
pub struct PipeAcceptor {
    rx: mpsc::Receiver<Connection>,
}

impl PipeAcceptor {
    /// Wait for the next forwarded connection
    ///
    /// Returns `None` once every handler clone is gone.
    pub async fn accept(&mut self) -> Option<Connection> {
        self.rx.recv().await
    }
}
