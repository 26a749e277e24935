//! Operations on nodes, depots, tickets, tokens, pairing and usage.
//!
//! Each operation takes the application state, the resolved caller and
//! decoded parameters. Routing is left to the embedding service.

pub mod common;
pub mod depots;
pub mod nodes;
pub mod pairing;
pub mod tickets;
pub mod tokens;
pub mod usage;

pub use common::PageRequest;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::state::AppState;
    use cask_core::config::AppConfig;
    use cask_core::{Capabilities, Identity, Role, UserIdentity};
    use cask_metadata::{MetadataStore, SqliteStore};
    use cask_storage::MemoryBackend;
    use std::sync::Arc;

    pub async fn test_state() -> AppState {
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(":memory:", None).await.unwrap());
        AppState::new(
            AppConfig::for_testing(),
            Arc::new(MemoryBackend::new()),
            metadata,
        )
    }

    /// An authorized user session.
    pub fn user(user_id: &str) -> Identity {
        Identity::User(UserIdentity {
            user_id: user_id.to_string(),
            token_id: None,
            expires_at: None,
            capabilities: Capabilities::NONE,
        })
        .with_role(Role::Authorized)
    }
}
