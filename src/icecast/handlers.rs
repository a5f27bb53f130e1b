//! Source, listener and metadata handlers
//!
//! Each handler reads its own request head from the connection (the
//! detector only peeked at it), answers with an `HTTP/1.0` status line and
//! then runs the matching session until the connection ends.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, ProtocolError, Result};
use crate::mount::{MountError, Source, SourceId, StreamProperties};
use crate::server::connection::Connection;
use crate::server::handler::ConnHandler;
use crate::session::{ListenerMode, ListenerSession, SourceEnd, SourceSession};

use super::auth::parse_basic;
use super::request::{mount_path, read_request_head, write_response_head, RequestHead, Status};
use super::service::IcecastService;

/// Acknowledgement body for metadata updates
pub const METADATA_ACK: &str = "<?xml version=\"1.0\"?>\n<iceresponse><message>Metadata update successful</message><return>1</return></iceresponse>\n";

/// Read the request head within the handshake timeout
async fn read_head(
    service: &IcecastService,
    stream: &mut BufReader<Connection>,
) -> Result<RequestHead> {
    let config = service.config();
    tokio::time::timeout(
        config.handshake_timeout,
        read_request_head(stream, config.max_head_size),
    )
    .await
    .map_err(|_| Error::Timeout("request head"))?
}

/// Send a bodiless error response, ignoring write failures
async fn reject<W: AsyncWrite + Unpin>(writer: &mut W, status: Status) {
    let _ = write_response_head(writer, status, &[]).await;
}

/// Status to answer a failed handshake with, if any
fn rejection_status(err: &Error) -> Option<Status> {
    match err {
        Error::Protocol(_) => Some(Status::BadRequest),
        Error::Auth(_) => Some(Status::Unauthorized),
        Error::Mount(MountError::NotFound(_)) | Error::Mount(MountError::Closed(_)) => {
            Some(Status::NotFound)
        }
        Error::Mount(MountError::ContentTypeConflict { .. }) => Some(Status::BadRequest),
        Error::Io(_) | Error::Timeout(_) => None,
    }
}

fn expect_method(head: &RequestHead, method: &str) -> Result<()> {
    if head.method() == method {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedMethod(head.method().to_string()).into())
    }
}

fn peer_ip(conn: &Connection) -> Option<IpAddr> {
    conn.peer_addr().map(|addr| addr.ip())
}

/// Properties announced by `ice-*` request headers
pub fn stream_properties(head: &RequestHead) -> StreamProperties {
    let header = |name: &str| head.header(name).map(str::to_string);
    StreamProperties {
        name: header("ice-name"),
        description: header("ice-description"),
        genre: header("ice-genre"),
        url: header("ice-url"),
        bitrate: header("ice-bitrate"),
        public: header("ice-public"),
    }
}

/// Handles `SOURCE` connections from encoders
pub struct SourceHandler {
    service: Arc<IcecastService>,
}

impl SourceHandler {
    pub fn new(service: Arc<IcecastService>) -> Self {
        Self { service }
    }

    /// Validate the handshake and build the source it describes
    fn accept(&self, head: &RequestHead, peer: Option<IpAddr>) -> Result<(String, Source)> {
        expect_method(head, "SOURCE")?;
        let uri = head.uri()?;
        let mount = uri.path().to_string();

        let user = match head.header("authorization") {
            Some(value) => Some(parse_basic(value)?.user),
            None => None,
        };

        let priority = match uri.query_pairs().find(|(key, _)| key == "priority") {
            Some((_, value)) => value
                .trim()
                .parse::<i32>()
                .map_err(|_| ProtocolError::InvalidUri(head.line.target.clone()))?,
            None => self.service.config().default_source_priority,
        };

        let source = Source::new(SourceId::from_peer(mount.clone(), peer), priority).with_user(user);
        Ok((mount, source))
    }

    async fn run(&self, conn: Connection) -> Result<()> {
        let conn_id = conn.id();
        let peer = peer_ip(&conn);
        let mut stream = BufReader::new(conn);

        let head = read_head(&self.service, &mut stream).await?;
        let (mount_name, source) = match self.accept(&head, peer) {
            Ok(accepted) => accepted,
            Err(e) => {
                if let Some(status) = rejection_status(&e) {
                    reject(&mut stream, status).await;
                }
                return Err(e);
            }
        };

        let content_type = head.header("content-type").unwrap_or_default();
        if content_type.is_empty() {
            tracing::warn!(conn_id = conn_id, mount = %mount_name, "Source sent no content type");
        }

        // Queued before the 200 goes out; cleanup never closes a mount with a
        // queued source
        let source = Arc::new(source);
        let mount = match self.service.mounts().attach_source(
            &mount_name,
            content_type,
            stream_properties(&head),
            &source,
        ) {
            Ok(mount) => mount,
            Err(e) => {
                reject(&mut stream, Status::BadRequest).await;
                return Err(e.into());
            }
        };

        if let Err(e) = write_response_head(&mut stream, Status::Ok, &[]).await {
            mount.remove_source(&source);
            return Err(e.into());
        }

        tracing::info!(
            conn_id = conn_id,
            mount = %mount_name,
            serial = source.serial(),
            priority = source.priority(),
            user = ?source.user(),
            "Source connected"
        );

        let mut session =
            SourceSession::new(&source, &mut stream, self.service.config().source_read_size);
        let result = session.run().await;
        let stats = session.stats().clone();
        mount.remove_source(&source);

        tracing::info!(
            conn_id = conn_id,
            mount = %mount_name,
            serial = source.serial(),
            bytes = stats.bytes_received,
            duration_secs = stats.duration.as_secs(),
            bitrate = stats.bitrate,
            shutdown = matches!(result, Ok(SourceEnd::Shutdown)),
            "Source disconnected"
        );

        result.map(|_| ()).map_err(Error::from)
    }
}

#[async_trait]
impl ConnHandler for SourceHandler {
    async fn serve(&self, conn: Connection) {
        let conn_id = conn.id();
        if let Err(e) = self.run(conn).await {
            tracing::warn!(conn_id = conn_id, error = %e, "Source connection ended");
        }
    }

    fn name(&self) -> &str {
        "icecast-source"
    }
}

/// Handles `GET /<mount>` from listening clients
pub struct ListenerHandler {
    service: Arc<IcecastService>,
}

impl ListenerHandler {
    pub fn new(service: Arc<IcecastService>) -> Self {
        Self { service }
    }

    async fn run(&self, conn: Connection) -> Result<()> {
        let conn_id = conn.id();
        let config = self.service.config();
        let mut stream = BufReader::new(conn);

        let head = read_head(&self.service, &mut stream).await?;
        let attached = expect_method(&head, "GET")
            .and_then(|()| Ok(head.uri()?.path().to_string()))
            .and_then(|path| {
                let mount = self
                    .service
                    .mounts()
                    .get(&path)
                    .ok_or(MountError::NotFound(path))?;
                let feed = mount.attach_listener(config.listener_buffer_chunks)?;
                Ok((mount, feed))
            });

        let (mount, feed) = match attached {
            Ok(attached) => attached,
            Err(e) => {
                if let Some(status) = rejection_status(&e) {
                    reject(&mut stream, status).await;
                }
                return Err(e);
            }
        };

        let wants_metadata = head
            .header("icy-metadata")
            .is_some_and(|value| value.trim() == "1");
        let mode = if wants_metadata {
            ListenerMode::Interleaved {
                interval: config.metadata_interval,
            }
        } else {
            ListenerMode::Plain
        };

        let interval = config.metadata_interval.to_string();
        let mut headers: Vec<(&str, &str)> = Vec::with_capacity(8);
        if !mount.content_type().is_empty() {
            headers.push(("Content-Type", mount.content_type()));
        }
        if wants_metadata {
            headers.push(("icy-metaint", interval.as_str()));
        }
        headers.extend(mount.properties().icy_headers());
        write_response_head(&mut stream, Status::Ok, &headers).await?;

        tracing::info!(
            conn_id = conn_id,
            mount = %mount.name(),
            metadata = wants_metadata,
            listeners = mount.listener_count(),
            "Listener attached"
        );

        let conn = stream.into_inner();
        let mut session = ListenerSession::new(
            feed.ring,
            feed.now_playing,
            conn,
            mode,
            config.listener_write_timeout,
        );
        let result = session.run().await;
        drop(feed.guard);

        let stats = session.stats();
        tracing::info!(
            conn_id = conn_id,
            mount = %mount.name(),
            bytes = stats.bytes_sent,
            duration_secs = stats.duration.as_secs(),
            dropped_chunks = stats.dropped_chunks,
            metadata_blocks = stats.metadata_blocks,
            "Listener detached"
        );

        result.map_err(Error::from)
    }
}

#[async_trait]
impl ConnHandler for ListenerHandler {
    async fn serve(&self, conn: Connection) {
        let conn_id = conn.id();
        if let Err(e) = self.run(conn).await {
            tracing::debug!(conn_id = conn_id, error = %e, "Listener connection ended");
        }
    }

    fn name(&self) -> &str {
        "icecast-listener"
    }
}

/// Handles `GET /admin/metadata` updates
pub struct MetadataHandler {
    service: Arc<IcecastService>,
}

/// A parsed metadata update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub mount: String,
    pub song: String,
}

impl MetadataHandler {
    pub fn new(service: Arc<IcecastService>) -> Self {
        Self { service }
    }

    /// Extract and convert the update carried by `head`
    pub fn parse(&self, head: &RequestHead) -> Result<MetadataUpdate> {
        expect_method(head, "GET")?;
        let uri = head.uri()?;

        let mut mount = None;
        let mut song = None;
        let mut charset = None;
        for (key, value) in uri.query_pairs() {
            match &*key {
                "mount" => mount = Some(value.into_owned()),
                "song" => song = Some(value.into_owned()),
                "charset" => charset = Some(value.into_owned()),
                _ => {}
            }
        }

        let mount = mount
            .filter(|m| !m.is_empty())
            .map(|m| mount_path(&m))
            .ok_or(ProtocolError::MissingParameter("mount"))?;
        let song = song.ok_or(ProtocolError::MissingParameter("song"))?;
        let charset = charset.unwrap_or_else(|| "utf-8".to_string());
        let song = self.service.charset_decoder().decode(&charset, &song)?;

        Ok(MetadataUpdate { mount, song })
    }

    async fn run(&self, conn: Connection) -> Result<()> {
        let conn_id = conn.id();
        let peer = peer_ip(&conn);
        let mut stream = BufReader::new(conn);

        let head = read_head(&self.service, &mut stream).await?;
        let update = match self.parse(&head) {
            Ok(update) => update,
            Err(e) => {
                if let Some(status) = rejection_status(&e) {
                    reject(&mut stream, status).await;
                }
                return Err(e);
            }
        };

        match self.service.mounts().get(&update.mount) {
            Some(mount) => {
                tracing::debug!(
                    conn_id = conn_id,
                    mount = %update.mount,
                    song = %update.song,
                    "Metadata update"
                );
                mount.set_metadata(SourceId::from_peer(update.mount.clone(), peer), update.song);
            }
            None => {
                tracing::debug!(
                    conn_id = conn_id,
                    mount = %update.mount,
                    "Metadata update for unknown mount dropped"
                );
            }
        }

        let length = METADATA_ACK.len().to_string();
        write_response_head(
            &mut stream,
            Status::Ok,
            &[("Content-Type", "text/xml"), ("Content-Length", length.as_str())],
        )
        .await?;
        stream.write_all(METADATA_ACK.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ConnHandler for MetadataHandler {
    async fn serve(&self, conn: Connection) {
        let conn_id = conn.id();
        if let Err(e) = self.run(conn).await {
            tracing::warn!(conn_id = conn_id, error = %e, "Metadata request failed");
        }
    }

    fn name(&self) -> &str {
        "icecast-metadata"
    }
}
