//! Shared operation helpers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use async_trait::async_trait;
use bytes::Bytes;
use cask_core::{ChildLookup, Node, NodeKey, Realm};
use cask_metadata::models::to_u64;
use cask_metadata::page::page_size;
use cask_metadata::{Cursor, MetadataStore};
use serde::Deserialize;

/// Cursor-paginated listing parameters.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl PageRequest {
    /// Clamped page size and the decoded cursor.
    pub fn resolve(&self) -> ApiResult<(u32, Option<Cursor>)> {
        let cursor = self.cursor.as_deref().map(Cursor::decode).transpose()?;
        Ok((page_size(self.limit), cursor))
    }
}

/// Parse a node key from caller input.
pub fn parse_key(s: &str) -> ApiResult<NodeKey> {
    NodeKey::parse(s).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}

/// Children are visible to an upload when the realm owns them.
pub struct RealmLookup<'a> {
    pub metadata: &'a dyn MetadataStore,
    pub realm: &'a Realm,
}

#[async_trait]
impl ChildLookup for RealmLookup<'_> {
    async fn exists(&self, key: &NodeKey) -> cask_core::Result<bool> {
        self.metadata
            .has_ownership(self.realm.as_str(), &key.to_hex())
            .await
            .map_err(|e| cask_core::Error::Lookup(e.to_string()))
    }

    async fn size(&self, key: &NodeKey) -> cask_core::Result<Option<u64>> {
        let row = self
            .metadata
            .get_ownership(self.realm.as_str(), &key.to_hex())
            .await
            .map_err(|e| cask_core::Error::Lookup(e.to_string()))?;
        row.map(|r| to_u64(r.size))
            .transpose()
            .map_err(|e| cask_core::Error::Lookup(e.to_string()))
    }
}

/// Load and decode a node the realm owns. Unowned nodes are not found even if the blob exists.
pub async fn load_owned_node(
    state: &AppState,
    realm: &Realm,
    key: &NodeKey,
) -> ApiResult<(Bytes, Node)> {
    if !state
        .metadata
        .has_ownership(realm.as_str(), &key.to_hex())
        .await?
    {
        return Err(ApiError::NotFound(format!("node {key}")));
    }
    let bytes = state
        .blobs
        .get(key)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("blob missing for owned node {key}")))?;
    let node = Node::decode(&bytes)
        .map_err(|e| ApiError::Internal(format!("stored node {key} is corrupt: {e}")))?;
    Ok((bytes, node))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_defaults_and_cursor() {
        let (limit, cursor) = PageRequest::default().resolve().unwrap();
        assert_eq!(limit, cask_metadata::page::DEFAULT_PAGE_SIZE);
        assert!(cursor.is_none());

        let req = PageRequest {
            cursor: Some(Cursor::after("depot:abc").encode()),
            limit: Some(100_000),
        };
        let (limit, cursor) = req.resolve().unwrap();
        assert_eq!(limit, cask_metadata::page::MAX_PAGE_SIZE);
        assert_eq!(cursor.unwrap().sort_key(), "depot:abc");

        let bad = PageRequest {
            cursor: Some("!!!".to_string()),
            limit: None,
        };
        assert!(matches!(bad.resolve(), Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn test_parse_key_rejects_garbage() {
        assert!(matches!(parse_key("node:xyz"), Err(ApiError::InvalidRequest(_))));
        let key = NodeKey::for_bytes(b"x");
        assert_eq!(parse_key(&key.to_string()).unwrap(), key);
    }
}
