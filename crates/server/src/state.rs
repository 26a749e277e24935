//! Application state shared across operations.

use crate::verifier::BearerVerifier;
use cask_core::config::AppConfig;
use cask_metadata::MetadataStore;
use cask_storage::{BlobStore, ObjectStore};
use std::sync::Arc;

/// Everything an operation needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub blobs: BlobStore,
    pub metadata: Arc<dyn MetadataStore>,
    /// Verifier for bearer assertions issued by an external identity provider.
    pub bearer_verifier: Option<Arc<dyn BearerVerifier>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            blobs: BlobStore::new(objects),
            metadata,
            bearer_verifier: None,
        }
    }

    pub fn with_bearer_verifier(mut self, verifier: Arc<dyn BearerVerifier>) -> Self {
        self.bearer_verifier = Some(verifier);
        self
    }
}
