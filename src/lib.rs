//! Icecast/SHOUTcast compatible audio relay
//!
//! Encoders connect with `SOURCE /<mount>` and stream audio; listeners
//! connect with `GET /<mount>` and receive it, optionally with ICY metadata
//! interleaved. Each mount can queue several sources by priority, and the
//! highest one is relayed. When it disconnects the next one takes over
//! without listeners reconnecting.
//!
//! Source and HTTP traffic share one port. Connections no detector claims
//! can be piped to an external HTTP server through [`connection_pipe`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use icy_relay::{DetectorRegistry, IcecastService, MountRegistry, RelayServer, ServerConfig};
//!
//! # async fn run() -> icy_relay::Result<()> {
//! let config = ServerConfig::default();
//! let mounts = Arc::new(MountRegistry::new());
//! let _cleanup = mounts.spawn_cleanup_task();
//!
//! let detectors = Arc::new(DetectorRegistry::new());
//! IcecastService::new(Arc::clone(&mounts), config.clone()).register(&detectors);
//!
//! RelayServer::new(config, detectors).run().await
//! # }
//! ```

pub mod detect;
pub mod error;
pub mod fanout;
pub mod icecast;
pub mod mount;
pub mod server;
pub mod session;
pub mod stats;

pub use detect::{Detector, DetectorRegistry};
pub use error::{Error, Result};
pub use icecast::IcecastService;
pub use mount::{MountRegistry, Mountpoint, RegistryConfig};
pub use server::{connection_pipe, Connection, ConnHandler, RelayServer, ServerConfig};
