//! Ed25519 signed requests for Cask.
//!
//! This crate provides:
//! - Client key generation and base64 encodings
//! - The signed-request payload, signing and freshness-checked verification

pub mod error;
pub mod key;
pub mod request;

pub use error::{SignerError, SignerResult};
pub use key::{PublicKey, SecretKey};
pub use request::{SignedHeaders, sign_request, signed_payload, verify_request};
