//! Node keys: the public, string form of a node's content hash.

use crate::hash::ContentHash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Prefix carried by the canonical string form of a node key.
pub const NODE_KEY_PREFIX: &str = "node:";

/// Identifier of an immutable node, derived from the SHA-256 of its encoded bytes.
///
/// The canonical string form is `node:` followed by 64 lowercase hex chars.
/// Parsing also accepts the bare 64-hex form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(ContentHash);

impl NodeKey {
    /// Compute the key for encoded node bytes.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self(ContentHash::compute(bytes))
    }

    /// Wrap an existing hash.
    pub fn from_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Parse either `node:<hex>` or `<hex>`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let hex = s.strip_prefix(NODE_KEY_PREFIX).unwrap_or(s);
        if hex.len() != 64
            || !hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(crate::Error::InvalidKey(format!(
                "expected {NODE_KEY_PREFIX}<64 lowercase hex>, got {s:?}"
            )));
        }
        ContentHash::from_hex(hex)
            .map(Self)
            .map_err(|e| crate::Error::InvalidKey(e.to_string()))
    }

    /// The underlying content hash.
    pub fn hash(&self) -> &ContentHash {
        &self.0
    }

    /// Raw digest bytes, as embedded in encoded parent nodes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Bare lowercase hex form.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Object key under which the node's bytes live in the blob store.
    pub fn object_key(&self) -> String {
        let hex = self.to_hex();
        format!("nodes/{}/{}", &hex[..2], hex)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NODE_KEY_PREFIX}{}", self.0.to_hex())
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({})", &self.0.to_hex()[..16])
    }
}

impl FromStr for NodeKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for NodeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_and_bare_forms_parse_equal() {
        let key = NodeKey::for_bytes(b"payload");
        let prefixed = key.to_string();
        assert!(prefixed.starts_with("node:"));
        assert_eq!(prefixed.len(), 5 + 64);

        assert_eq!(NodeKey::parse(&prefixed).unwrap(), key);
        assert_eq!(NodeKey::parse(&key.to_hex()).unwrap(), key);
    }

    #[test]
    fn test_rejects_uppercase_and_wrong_length() {
        let key = NodeKey::for_bytes(b"payload");
        assert!(NodeKey::parse(&key.to_hex().to_uppercase()).is_err());
        assert!(NodeKey::parse("node:abcd").is_err());
        assert!(NodeKey::parse("").is_err());
        assert!(NodeKey::parse("blob:0000").is_err());
    }

    #[test]
    fn test_object_key_is_sharded() {
        let key = NodeKey::for_bytes(b"payload");
        let hex = key.to_hex();
        assert_eq!(key.object_key(), format!("nodes/{}/{}", &hex[..2], hex));
    }

    #[test]
    fn test_serde_uses_prefixed_string() {
        let key = NodeKey::for_bytes(b"payload");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
        let back: NodeKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
