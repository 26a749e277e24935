//! Reference-count and GC bookkeeping.

use crate::error::MetadataResult;
use crate::models::RefCountRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Result of an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefIncrement {
    /// No refcount record existed for this key in the realm before.
    pub is_new_to_realm: bool,
    pub count: u64,
}

/// Result of a decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefDecrement {
    pub count: u64,
    /// This call moved the count from one to zero.
    pub became_pending: bool,
}

/// Per-(realm, key) live-reference counters.
///
/// Zero never deletes anything; it marks the record pending so a later
/// sweep can reclaim it.
#[async_trait]
pub trait RefCountRepo: Send + Sync {
    /// Increment, creating the record at count 1 if absent. Re-activates pending records.
    async fn increment_ref(
        &self,
        realm: &str,
        node_key: &str,
        physical_size: i64,
        logical_size: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<RefIncrement>;

    /// Decrement, never below zero. `NotFound` if the record does not exist.
    async fn decrement_ref(
        &self,
        realm: &str,
        node_key: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<RefDecrement>;

    async fn get_ref(&self, realm: &str, node_key: &str) -> MetadataResult<Option<RefCountRow>>;

    /// Pending records that became collectible before `older_than`, oldest first.
    async fn list_pending(
        &self,
        realm: &str,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<RefCountRow>>;
}
