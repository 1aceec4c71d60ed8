//! Session identifier type.
//!
//! Identifiers are opaque tokens of the form `sess-<base64url>` where the
//! encoded payload is 16 bytes drawn from the operating system CSPRNG.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Prefix carried by every session identifier.
pub const SESSION_ID_PREFIX: &str = "sess-";

/// Number of random bytes in a session identifier.
pub const SESSION_ID_BYTES: usize = 16;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier with 128 bits of entropy.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0_u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(format!("{SESSION_ID_PREFIX}{}", URL_SAFE.encode(bytes)))
    }

    /// Check whether `token` has the shape of an identifier this crate issues.
    #[must_use]
    pub fn is_well_formed(token: &str) -> bool {
        token
            .strip_prefix(SESSION_ID_PREFIX)
            .and_then(|payload| URL_SAFE.decode(payload).ok())
            .is_some_and(|bytes| bytes.len() == SESSION_ID_BYTES)
    }

    /// Borrow the textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Error returned when parsing a malformed session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedSessionId;

impl fmt::Display for MalformedSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed session identifier")
    }
}

impl std::error::Error for MalformedSessionId {}

impl FromStr for SessionId {
    type Err = MalformedSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::is_well_formed(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(MalformedSessionId)
        }
    }
}
