//! Ordered protocol detectors with a single fallback handler

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::server::connection::BoxedStream;
use crate::server::handler::Handler;

use super::lookahead::LookaheadReader;

/// Protocol sniffer
///
/// Looks at the front of a connection and returns the handler that owns it,
/// or `None` if the bytes are not recognised. Detectors run on every accepted
/// connection and must answer after a bounded amount of input.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, reader: &mut LookaheadReader<BoxedStream>) -> Option<Handler>;
}

/// Registry of detectors, tried in registration order
///
/// Lookups work on a snapshot of the detector list, so a registration never
/// waits for an in-flight detection and no lock is held while a detector
/// awaits the network.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: RwLock<Arc<Vec<Arc<dyn Detector>>>>,
    fallback: RwLock<Option<Handler>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a detector
    pub fn register(&self, detector: Arc<dyn Detector>) {
        let mut detectors = self.detectors.write();
        let mut next = Vec::with_capacity(detectors.len() + 1);
        next.extend(detectors.iter().cloned());
        next.push(detector);
        *detectors = Arc::new(next);
    }

    /// Set the handler used when no detector matches
    pub fn set_default(&self, handler: Handler) {
        *self.fallback.write() = Some(handler);
    }

    /// Remove the fallback handler
    pub fn clear_default(&self) {
        *self.fallback.write() = None;
    }

    /// Number of registered detectors
    pub fn len(&self) -> usize {
        self.detectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the handler for a connection
    ///
    /// Each detector sees the stream from its first byte. The reader is
    /// rewound again before returning so the chosen handler does too.
    pub async fn detect(&self, reader: &mut LookaheadReader<BoxedStream>) -> Option<Handler> {
        let detectors = Arc::clone(&self.detectors.read());

        for detector in detectors.iter() {
            let handler = detector.detect(reader).await;
            reader.reset();

            if handler.is_some() {
                return handler;
            }
        }

        self.fallback.read().clone()
    }
}
