//! Per-connection streaming loops
//!
//! A [`SourceSession`] pumps an encoder's bytes into its mount. A
//! [`ListenerSession`] drains one listener's ring buffer to the socket,
//! optionally interleaving ICY metadata.

pub mod listener;
pub mod source;

pub use listener::{ListenerMode, ListenerSession};
pub use source::{SourceEnd, SourceSession};
