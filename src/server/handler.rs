//! Connection handler trait

use std::sync::Arc;

use async_trait::async_trait;

use super::connection::Connection;

/// Owner of a classified connection
///
/// The handler is responsible for the connection from here on; dropping it
/// closes the socket. Each call runs in its own task, and a panic inside
/// `serve` is contained to that connection.
#[async_trait]
pub trait ConnHandler: Send + Sync + 'static {
    async fn serve(&self, conn: Connection);

    /// Short name used in logs
    fn name(&self) -> &str {
        "handler"
    }
}

/// Shared handler reference returned by detectors
pub type Handler = Arc<dyn ConnHandler>;
