//! Icecast connection detection
//!
//! Peeks at the request line only:
//!
//! - `SOURCE ...` goes to the source handler
//! - `GET /admin/metadata?...` goes to the metadata handler
//! - `GET /<mount>` for an existing mount goes to the listener handler
//!
//! Everything else, `/admin/listclients` included, is left to the next
//! detector or the default handler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::detect::{Detector, LookaheadReader};
use crate::mount::MountRegistry;
use crate::server::connection::BoxedStream;
use crate::server::handler::Handler;

use super::request::{parse_request_line, parse_target};

/// Path of the metadata update endpoint
pub const METADATA_PATH: &str = "/admin/metadata";

/// Path of the client listing endpoint, served elsewhere
pub const LISTCLIENTS_PATH: &str = "/admin/listclients";

/// Detector for Icecast sources, listeners and metadata updates
pub struct IcecastDetector {
    mounts: Arc<MountRegistry>,
    max_line: usize,
    source: Handler,
    listener: Handler,
    metadata: Handler,
}

impl IcecastDetector {
    pub fn new(
        mounts: Arc<MountRegistry>,
        max_line: usize,
        source: Handler,
        listener: Handler,
        metadata: Handler,
    ) -> Self {
        Self {
            mounts,
            max_line,
            source,
            listener,
            metadata,
        }
    }

    /// Route a request line
    pub fn classify(&self, line: &str) -> Option<Handler> {
        let request = parse_request_line(line).ok()?;

        if request.method == "SOURCE" {
            return Some(Arc::clone(&self.source));
        }
        if request.method != "GET" {
            return None;
        }

        let uri = parse_target(&request.target).ok()?;
        match uri.path() {
            METADATA_PATH => Some(Arc::clone(&self.metadata)),
            LISTCLIENTS_PATH => None,
            path if self.mounts.exists(path) => Some(Arc::clone(&self.listener)),
            _ => None,
        }
    }
}

#[async_trait]
impl Detector for IcecastDetector {
    async fn detect(&self, reader: &mut LookaheadReader<BoxedStream>) -> Option<Handler> {
        let line = peek_line(reader, self.max_line).await?;
        let line = String::from_utf8_lossy(&line);
        self.classify(&line)
    }
}

/// Read up to and including the first `\n`, giving up after `max` bytes
pub async fn peek_line<R>(reader: &mut R, max: usize) -> Option<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(128);
    let mut buf = [0u8; 512];

    while line.len() < max {
        let want = (max - line.len()).min(buf.len());
        let n = reader.read(&mut buf[..want]).await.ok()?;
        if n == 0 {
            return None;
        }

        if let Some(pos) = buf[..n].iter().position(|&b| b == b'\n') {
            line.extend_from_slice(&buf[..=pos]);
            return Some(line);
        }
        line.extend_from_slice(&buf[..n]);
    }

    None
}
