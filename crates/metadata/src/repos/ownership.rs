//! Ownership ledger.

use crate::error::MetadataResult;
use crate::models::OwnershipRow;
use async_trait::async_trait;
use std::collections::HashSet;

/// Which node keys each realm may access.
#[async_trait]
pub trait OwnershipRepo: Send + Sync {
    async fn has_ownership(&self, realm: &str, node_key: &str) -> MetadataResult<bool>;

    /// Record ownership. Re-adding an owned key keeps the first record; returns whether a row was written.
    async fn add_ownership(&self, row: &OwnershipRow) -> MetadataResult<bool>;

    async fn get_ownership(&self, realm: &str, node_key: &str)
    -> MetadataResult<Option<OwnershipRow>>;

    /// Subset of `node_keys` owned by `realm`, in one round trip per batch.
    async fn owned_keys(&self, realm: &str, node_keys: &[String])
    -> MetadataResult<HashSet<String>>;
}
