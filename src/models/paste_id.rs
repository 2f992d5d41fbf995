//! Identifier of a stored paste.

use serde::{Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Number of random bytes in an identifier.
pub const ID_LEN: usize = 8;

/// Number of hex characters of the id used as the shard directory name.
pub const SHARD_LEN: usize = 2;

/// Fixed-width opaque token naming a paste.
///
/// Rendered as a lowercase hex string of `2 * ID_LEN` characters. Ids are
/// drawn at random and are only unique among currently live pastes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PasteId([u8; ID_LEN]);

impl PasteId {
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Hex prefix used to spread pastes over subdirectories.
    pub fn shard(&self) -> String {
        let mut hex = self.to_string();
        hex.truncate(SHARD_LEN);
        hex
    }
}

impl fmt::Display for PasteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PasteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PasteId({})", self)
    }
}

/// Error returned when a string is not a well-formed paste id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid paste id `{0}`")]
pub struct ParseIdError(pub String);

impl FromStr for PasteId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Uppercase hex would alias a lowercase id on disk.
        if s.len() != ID_LEN * 2 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(ParseIdError(s.to_string()));
        }
        let mut bytes = [0u8; ID_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseIdError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PasteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let id = PasteId::from_bytes([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03]);
        assert_eq!(id.to_string(), "deadbeef00010203");
        assert_eq!("deadbeef00010203".parse::<PasteId>().unwrap(), id);
        assert_eq!(id.shard(), "de");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "deadbeef", "deadbeef0001020304", "DEADBEEF00010203", "zzadbeef00010203"] {
            assert!(bad.parse::<PasteId>().is_err(), "accepted {bad:?}");
        }
    }
}
