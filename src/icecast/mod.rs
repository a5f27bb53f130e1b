//! Icecast/SHOUTcast protocol
//!
//! This module provides:
//! - Request head parsing and `HTTP/1.0` style responses
//! - Basic authorization decoding
//! - ICY metadata block encoding
//! - Detection and handling of source, listener and metadata connections

pub mod auth;
pub mod charset;
pub mod detector;
pub mod handlers;
pub mod metadata;
pub mod request;
pub mod service;

pub use auth::{parse_basic, Credentials};
pub use charset::{CharsetDecoder, Utf8Decoder};
pub use detector::{IcecastDetector, LISTCLIENTS_PATH, METADATA_PATH};
pub use handlers::{ListenerHandler, MetadataHandler, MetadataUpdate, SourceHandler, METADATA_ACK};
pub use metadata::{metadata_block, MAX_METADATA_LEN, MAX_TITLE_LEN};
pub use request::{RequestHead, Status};
pub use service::IcecastService;
