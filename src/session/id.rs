//! Session identifiers

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::SessionError;

/// Random bytes behind every identifier
pub const SESSION_ID_BYTES: usize = 32;

/// Length of the rendered identifier (two hex digits per byte)
pub const SESSION_ID_LEN: usize = SESSION_ID_BYTES * 2;

/// Opaque session token: 64 lowercase hex characters from 32 bytes of OS randomness
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Draw a fresh identifier from the operating system's CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);

        let mut hex = String::with_capacity(SESSION_ID_LEN);
        for b in bytes {
            hex.push_str(&format!("{:02x}", b));
        }
        SessionId(hex)
    }

    /// Accept an identifier received from a client or a store
    pub fn parse(s: &str) -> Result<Self, SessionError> {
        let well_formed = s.len() == SESSION_ID_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(SessionError::InvalidSessionId(s.to_string()));
        }
        Ok(SessionId(s.to_string()))
    }

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

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SessionId::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_shape() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 64);
        assert!(SessionId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_no_collisions() {
        let ids: HashSet<SessionId> = (0..10_000).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let upper = "A".repeat(64);
        let short = "a".repeat(63);
        let non_hex = "g".repeat(64);
        for bad in [upper.as_str(), short.as_str(), non_hex.as_str(), ""] {
            assert_eq!(
                SessionId::parse(bad),
                Err(SessionError::InvalidSessionId(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_serde_validates() {
        let id = SessionId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<SessionId>("\"nope\"").is_err());
    }
}
