//! Basic credentials on source connections

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::AuthError;

/// User and password from an `Authorization: Basic` header
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parse the value of an `Authorization` header
pub fn parse_basic(value: &str) -> Result<Credentials, AuthError> {
    let (scheme, encoded) = value.split_once(' ').ok_or(AuthError::InvalidHeader)?;
    if scheme != "Basic" {
        return Err(AuthError::InvalidHeader);
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::InvalidHeader)?;
    let decoded = String::from_utf8_lossy(&decoded);

    let (user, password) = decoded.split_once(':').ok_or(AuthError::InvalidHeader)?;
    Ok(Credentials {
        user: user.to_string(),
        password: password.to_string(),
    })
}
