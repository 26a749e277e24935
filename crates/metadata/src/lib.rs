//! Ledgers for the Cask content-addressed store.
//!
//! This crate provides the control-plane data model:
//! - Per-realm node ownership, reference counts and usage totals
//! - Depots and their version history
//! - User sessions, agent tokens and tickets
//! - Pairing handshakes, authorized client keys and user roles

pub mod error;
pub mod models;
pub mod page;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use page::{Cursor, Page};
pub use store::{MetadataStore, PurgeStats, SqliteStore};

use cask_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
