//! Node-keyed blob store over an [`ObjectStore`].

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::Bytes;
use cask_core::NodeKey;
use std::sync::Arc;
use tracing::debug;

/// Global, deduplicated store of canonical node bytes.
///
/// Blobs carry no access control; callers gate reads on realm ownership.
#[derive(Clone)]
pub struct BlobStore {
    objects: Arc<dyn ObjectStore>,
}

impl BlobStore {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    pub async fn has(&self, key: &NodeKey) -> StorageResult<bool> {
        self.objects.exists(&key.object_key()).await
    }

    /// Fetch node bytes, or `None` when the blob is absent.
    pub async fn get(&self, key: &NodeKey) -> StorageResult<Option<Bytes>> {
        match self.objects.get(&key.object_key()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store node bytes. Idempotent; returns whether this call wrote them.
    pub async fn put(&self, key: &NodeKey, bytes: Bytes) -> StorageResult<bool> {
        let written = self
            .objects
            .put_if_not_exists(&key.object_key(), bytes)
            .await?;
        if !written {
            debug!(node = %key, "blob already present");
        }
        Ok(written)
    }

    pub fn backend_name(&self) -> &'static str {
        self.objects.backend_name()
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.objects.health_check().await
    }
}
