//! Icecast protocol service
//!
//! Bundles the mount registry with the source, listener and metadata
//! handlers, and installs a detector routing connections to them.

use std::sync::Arc;

use crate::detect::DetectorRegistry;
use crate::mount::MountRegistry;
use crate::server::config::ServerConfig;
use crate::server::handler::Handler;

use super::charset::{CharsetDecoder, Utf8Decoder};
use super::detector::IcecastDetector;
use super::handlers::{ListenerHandler, MetadataHandler, SourceHandler};

/// Shared state of the Icecast handlers
pub struct IcecastService {
    mounts: Arc<MountRegistry>,
    config: ServerConfig,
    charset: Arc<dyn CharsetDecoder>,
}

impl IcecastService {
    pub fn new(mounts: Arc<MountRegistry>, config: ServerConfig) -> Arc<Self> {
        Self::with_charset_decoder(mounts, config, Arc::new(Utf8Decoder))
    }

    /// Use `charset` to convert metadata updates
    pub fn with_charset_decoder(
        mounts: Arc<MountRegistry>,
        config: ServerConfig,
        charset: Arc<dyn CharsetDecoder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            mounts,
            config,
            charset,
        })
    }

    pub fn mounts(&self) -> &Arc<MountRegistry> {
        &self.mounts
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn charset_decoder(&self) -> &dyn CharsetDecoder {
        self.charset.as_ref()
    }

    pub fn source_handler(self: &Arc<Self>) -> Handler {
        Arc::new(SourceHandler::new(Arc::clone(self)))
    }

    pub fn listener_handler(self: &Arc<Self>) -> Handler {
        Arc::new(ListenerHandler::new(Arc::clone(self)))
    }

    pub fn metadata_handler(self: &Arc<Self>) -> Handler {
        Arc::new(MetadataHandler::new(Arc::clone(self)))
    }

    /// Detector claiming Icecast connections
    pub fn detector(self: &Arc<Self>) -> IcecastDetector {
        IcecastDetector::new(
            Arc::clone(&self.mounts),
            self.config.max_request_line,
            self.source_handler(),
            self.listener_handler(),
            self.metadata_handler(),
        )
    }

    /// Register this service's detector
    pub fn register(self: &Arc<Self>, detectors: &DetectorRegistry) {
        detectors.register(Arc::new(self.detector()));
    }
}
