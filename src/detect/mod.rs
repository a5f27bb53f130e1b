//! Protocol detection
//!
//! Every accepted connection starts unclassified. The router wraps it in a
//! [`LookaheadReader`] and asks the [`DetectorRegistry`] which handler owns
//! it; each detector peeks at the same prefix, and the chosen handler later
//! reads that prefix again from the start.

pub mod lookahead;
pub mod registry;

pub use lookahead::{LookaheadReader, PEEK_BUFFER_SIZE, PEEK_READ_SIZE};
pub use registry::{Detector, DetectorRegistry};
