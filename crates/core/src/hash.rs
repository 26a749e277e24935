//! SHA-256 digests backing node keys and credential hashes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub const LEN: usize = 32;

    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Wrap raw digest bytes read out of an encoded node.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        <[u8; Self::LEN]>::try_from(bytes).map(Self).map_err(|_| {
            crate::Error::InvalidHash(format!(
                "digest must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            ))
        })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse 64 hex digits. Uppercase is accepted; output is always lowercase.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != Self::LEN * 2 || !s.is_ascii() {
            return Err(crate::Error::InvalidHash(format!(
                "expected {} hex digits, got {:?}",
                Self::LEN * 2,
                s
            )));
        }
        let mut out = [0u8; Self::LEN];
        for (slot, i) in out.iter_mut().zip((0..s.len()).step_by(2)) {
            *slot = u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| crate::Error::InvalidHash(format!("{s:?}: {e}")))?;
        }
        Ok(Self(out))
    }

    pub fn to_hex(&self) -> String {
        use fmt::Write;
        self.0.iter().fold(String::with_capacity(64), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hex SHA-256 of a secret. Only this form of a credential is ever stored.
pub fn sha256_hex(data: &[u8]) -> String {
    ContentHash::compute(data).to_hex()
}
