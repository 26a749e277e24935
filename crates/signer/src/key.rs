//! Ed25519 key types for signed requests.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use std::fmt;

/// Client-held signing key.
pub struct SecretKey {
    inner: SigningKey,
}

impl SecretKey {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            inner: SigningKey::generate(&mut rng),
        }
    }

    /// Parse a base64-encoded 32-byte seed.
    pub fn from_base64(s: &str) -> SignerResult<Self> {
        let seed: [u8; 32] = decode_fixed(s, "secret key")?;
        Ok(Self {
            inner: SigningKey::from_bytes(&seed),
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.inner.as_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign raw bytes, returning the 64-byte signature in base64.
    pub fn sign(&self, message: &[u8]) -> String {
        STANDARD.encode(self.inner.sign(message).to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// Public half of a client key, as carried in the `x-cask-pubkey` header.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Parse a base64-encoded 32-byte public key.
    pub fn from_base64(s: &str) -> SignerResult<Self> {
        let bytes: [u8; 32] = decode_fixed(s, "public key")?;
        let inner = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| SignerError::KeyParsing(format!("invalid public key: {e}")))?;
        Ok(Self { inner })
    }

    /// Canonical base64 form, used as the ledger key.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.inner.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.inner.as_bytes()
    }

    /// Verify a base64 signature over `message`.
    pub fn verify(&self, message: &[u8], signature_b64: &str) -> SignerResult<()> {
        let bytes: [u8; 64] = decode_fixed(signature_b64, "signature")
            .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
        let signature = Signature::from_bytes(&bytes);
        self.inner
            .verify(message, &signature)
            .map_err(|_| SignerError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = self.to_base64();
        write!(f, "PublicKey({}...)", &b64[..8])
    }
}

fn decode_fixed<const N: usize>(s: &str, what: &str) -> SignerResult<[u8; N]> {
    let bytes = STANDARD
        .decode(s.trim())
        .map_err(|e| SignerError::KeyParsing(format!("invalid base64 {what}: {e}")))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| SignerError::KeyParsing(format!("{what}: expected {N} bytes, got {len}")))
}
