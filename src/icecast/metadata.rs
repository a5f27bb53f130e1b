//! ICY metadata blocks
//!
//! In metadata mode a listener receives one block after every `metaint` bytes
//! of audio. A block is a length byte counting 16-byte units, followed by
//! `StreamTitle='...';` and zero padding:
//!
//! ```text
//!  +-----+---------------------------------+---------+
//!  | len | StreamTitle='Artist - Title';   | 0 0 ... |
//!  +-----+---------------------------------+---------+
//!          \______ len * 16 bytes ___________________/
//! ```
//!
//! Padding is always `16 - payload % 16`, so a payload that is already a
//! multiple of 16 gets a full extra unit. Listener software depends on this.

use bytes::{BufMut, Bytes, BytesMut};

/// Size of one length unit
pub const METADATA_UNIT: usize = 16;

/// Largest block body the length byte can describe
pub const MAX_METADATA_LEN: usize = 255 * METADATA_UNIT;

/// Block sent when the title did not change
pub const EMPTY_BLOCK: [u8; 1] = [0];

const TITLE_PREFIX: &[u8] = b"StreamTitle='";
const TITLE_SUFFIX: &[u8] = b"';";

/// Longest title that still fits in a block
pub const MAX_TITLE_LEN: usize = MAX_METADATA_LEN - 1 - TITLE_PREFIX.len() - TITLE_SUFFIX.len();

/// Zero bytes appended to a payload of `len` bytes
pub fn padding_for(len: usize) -> usize {
    METADATA_UNIT - (len % METADATA_UNIT)
}

/// Build the block announcing `title`
///
/// Titles too long for one block are cut at a character boundary.
pub fn metadata_block(title: &str) -> Bytes {
    let title = truncate(title, MAX_TITLE_LEN);
    let payload_len = TITLE_PREFIX.len() + title.len() + TITLE_SUFFIX.len();
    let padding = padding_for(payload_len);
    let units = (payload_len + padding) / METADATA_UNIT;

    let mut block = BytesMut::with_capacity(1 + payload_len + padding);
    block.put_u8(units as u8);
    block.put_slice(TITLE_PREFIX);
    block.put_slice(title.as_bytes());
    block.put_slice(TITLE_SUFFIX);
    block.put_bytes(0, padding);
    block.freeze()
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
