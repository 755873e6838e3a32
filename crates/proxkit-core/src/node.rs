//! Node identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::KitError;

/// 128-bit identifier of a device/process taking part in discovery.
///
/// Rendered in the usual 8-4-4-4-12 hyphenated hex form. The all-zero id is
/// reserved and never addresses a real node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 16]);

impl NodeId {
    /// The reserved all-zero id.
    pub const NIL: NodeId = NodeId([0u8; 16]);

    /// Generate a fresh random (version 4 layout) id. Never returns `NIL`.
    pub fn random() -> Self {
        let mut bytes: [u8; 16] = rand::random();
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 16]
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = hex::encode(self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &h[0..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..32]
        )
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl FromStr for NodeId {
    type Err = KitError;

    /// Accepts the hyphenated form or 32 bare hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || KitError::MalformedDestination(s.to_string());

        let compact: String = match s.len() {
            32 => s.to_string(),
            36 => {
                let raw = s.as_bytes();
                if [8, 13, 18, 23].iter().any(|&i| raw[i] != b'-') {
                    return Err(malformed());
                }
                s.chars().filter(|c| *c != '-').collect()
            }
            _ => return Err(malformed()),
        };
        if compact.len() != 32 {
            return Err(malformed());
        }

        let mut bytes = [0u8; 16];
        hex::decode_to_slice(&compact, &mut bytes).map_err(|_| malformed())?;
        Ok(Self(bytes))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_distinct_and_not_nil() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_ne!(a, b);
        assert!(!a.is_nil());
        assert!(!b.is_nil());
    }

    #[test]
    fn display_is_hyphenated() {
        let id = NodeId::from_bytes([
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ]);
        assert_eq!(id.to_string(), "12345678-9abc-def0-0123-456789abcdef");
        assert_eq!(id.short(), "12345678");
    }

    #[test]
    fn parses_both_forms() {
        let id = NodeId::random();
        let hyphenated: NodeId = id.to_string().parse().unwrap();
        let bare: NodeId = hex::encode(id.as_bytes()).parse().unwrap();
        assert_eq!(hyphenated, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in [
            "",
            "not-a-node",
            "12345678-9abc-def0-0123-456789abcdeg",
            "123456789-abc-def0-0123-456789abcdef",
            "12345678-9abc-def0-0123-456789abcdef00",
        ] {
            assert!(
                matches!(bad.parse::<NodeId>(), Err(KitError::MalformedDestination(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn serde_uses_string_form() {
        let id = NodeId::random();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
