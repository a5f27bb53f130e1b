//! Character set conversion for metadata updates
//!
//! Encoders announce the charset of `song` with a `charset` query parameter.
//! Conversion itself is left to a [`CharsetDecoder`] supplied by the host;
//! the default only accepts UTF-8.

use crate::error::ProtocolError;

/// Converts metadata text to UTF-8
pub trait CharsetDecoder: Send + Sync {
    /// Convert `text`, received in `charset`
    fn decode(&self, charset: &str, text: &str) -> Result<String, ProtocolError>;
}

/// Accepts UTF-8 labels and passes text through
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Decoder;

impl CharsetDecoder for Utf8Decoder {
    fn decode(&self, charset: &str, text: &str) -> Result<String, ProtocolError> {
        if is_utf8_label(charset) {
            Ok(text.to_string())
        } else {
            Err(ProtocolError::UnsupportedCharset(charset.to_string()))
        }
    }
}

/// Whether `label` names UTF-8
pub fn is_utf8_label(label: &str) -> bool {
    let label = label.trim();
    label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_labels() {
        assert!(is_utf8_label("UTF-8"));
        assert!(is_utf8_label("utf8"));
        assert!(is_utf8_label(" Utf-8 "));
        assert!(!is_utf8_label("ISO-8859-1"));
        assert!(!is_utf8_label(""));
    }

    #[test]
    fn test_default_decoder() {
        let decoder = Utf8Decoder;
        assert_eq!(decoder.decode("utf-8", "Björk").unwrap(), "Björk");
        assert_eq!(
            decoder.decode("latin1", "x"),
            Err(ProtocolError::UnsupportedCharset("latin1".into()))
        );
    }
}
