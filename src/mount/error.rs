//! Mount registry error types

use thiserror::Error;

/// Error type for mount operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountError {
    /// A source offered a different content type than the mount carries
    #[error("mount {mount} carries {expected:?}, source offered {got:?}")]
    ContentTypeConflict {
        mount: String,
        expected: String,
        got: String,
    },

    /// No mount with that name
    #[error("mount not found: {0}")]
    NotFound(String),

    /// Mount was destroyed
    #[error("mount closed: {0}")]
    Closed(String),
}
