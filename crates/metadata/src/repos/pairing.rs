//! Pairing handshake and authorized client keys.

use crate::error::MetadataResult;
use crate::models::{AuthorizedKeyRow, PendingPairingRow};
use async_trait::async_trait;

#[async_trait]
pub trait PairingRepo: Send + Sync {
    /// Start (or restart) a pairing for a public key.
    async fn upsert_pending_pairing(&self, pairing: &PendingPairingRow) -> MetadataResult<()>;

    async fn get_pending_pairing(&self, public_key: &str)
    -> MetadataResult<Option<PendingPairingRow>>;

    /// Consume the pending record and store the authorized key in one transaction.
    /// Returns false if the pending record was already gone.
    async fn complete_pairing(&self, key: &AuthorizedKeyRow) -> MetadataResult<bool>;

    async fn get_authorized_key(&self, public_key: &str)
    -> MetadataResult<Option<AuthorizedKeyRow>>;

    async fn list_authorized_keys(&self, user_id: &str) -> MetadataResult<Vec<AuthorizedKeyRow>>;

    /// Remove a key owned by `user_id`. Returns whether it existed.
    async fn delete_authorized_key(&self, user_id: &str, public_key: &str)
    -> MetadataResult<bool>;
}
