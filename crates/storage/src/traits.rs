//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Flat object store keyed by slash-separated strings.
///
/// Writes are whole-object and atomic: a reader sees either the previous
/// object or the complete new one.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object atomically, replacing any previous content.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Put an object only if it doesn't exist. Returns whether it was written.
    ///
    /// Concurrent calls for the same key may both write; callers store
    /// content-addressed bytes so the outcome is identical either way.
    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool>;

    /// Backend identifier for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable. Called once at startup.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
