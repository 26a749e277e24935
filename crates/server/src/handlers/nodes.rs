//! Node upload and read operations.
//!
//! Uploads are bottom-up: a parent whose children the realm does not own
//! yet comes back as [`PutOutcome::MissingChildren`] so the client can send
//! those first. Each pipeline step is idempotent, so a failed upload is
//! retried by sending the same bytes again.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{RealmLookup, load_owned_node};
use crate::handlers::usage::effective_quota;
use crate::metrics::{MISSING_CHILDREN, NODE_BYTES_STORED, NODES_STORED};
use crate::resolver::{authorize_realm, require};
use crate::state::AppState;
use bytes::Bytes;
use cask_core::{
    Capability, Identity, NodeKey, NodeKind, Realm, ValidatedNode, Validation, validate,
};
use cask_metadata::models::{OwnershipRow, to_i64, to_u64};
use serde::Serialize;
use time::OffsetDateTime;

/// Result of a successful upload.
#[derive(Clone, Debug, Serialize)]
pub struct StoredNode {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub size: u64,
    pub physical_size: u64,
    pub logical_size: u64,
    /// The realm had no reference to this node before.
    pub is_new_to_realm: bool,
    pub ref_count: u64,
}

/// Upload outcome. Missing children are not an error.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PutOutcome {
    Stored(StoredNode),
    MissingChildren { missing: Vec<NodeKey> },
}

/// A node as returned to readers.
#[derive(Clone, Debug, Serialize)]
pub struct NodeContent {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub size: u64,
    pub content_type: Option<String>,
    pub children: Vec<NodeKey>,
    #[serde(skip)]
    pub bytes: Bytes,
}

/// Batch existence answer.
#[derive(Clone, Debug, Default, Serialize)]
pub struct NodePresence {
    pub present: Vec<NodeKey>,
    pub missing: Vec<NodeKey>,
}

/// Ownership and bookkeeping of one node in a realm.
#[derive(Clone, Debug, Serialize)]
pub struct NodeMetadata {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub size: u64,
    pub content_type: Option<String>,
    pub created_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub ref_count: u64,
    pub gc_status: Option<String>,
}

/// Validate and store a node in `realm`.
#[tracing::instrument(skip(state, identity, bytes), fields(identity = identity.kind(), size = bytes.len()))]
pub async fn put_node(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    key: &NodeKey,
    bytes: Bytes,
) -> ApiResult<PutOutcome> {
    let realm = authorize_realm(identity, realm)?;
    require(identity, Capability::Write)?;
    identity.check_write_quota(bytes.len() as u64)?;

    let lookup = RealmLookup {
        metadata: state.metadata.as_ref(),
        realm: &realm,
    };
    let validated = match validate(&bytes, key, &lookup).await? {
        Validation::Valid(validated) => validated,
        Validation::MissingChildren(missing) => {
            MISSING_CHILDREN.inc();
            tracing::debug!(node = %key, missing = missing.len(), "upload waits on children");
            return Ok(PutOutcome::MissingChildren { missing });
        }
    };
    if let Some(content_type) = validated.node.content_type() {
        identity.check_content_type(content_type)?;
    }

    let stored = store_validated(state, &realm, &identity.actor_id(), &validated, bytes).await?;
    Ok(PutOutcome::Stored(stored))
}

/// Run the bookkeeping pipeline for a node that already passed validation.
pub(crate) async fn store_validated(
    state: &AppState,
    realm: &Realm,
    created_by: &str,
    validated: &ValidatedNode,
    bytes: Bytes,
) -> ApiResult<StoredNode> {
    let now = OffsetDateTime::now_utc();
    let key_hex = validated.key.to_hex();
    let physical = to_i64(validated.physical_size)?;
    let logical = to_i64(validated.logical_size)?;

    // Quota applies only to bytes the realm is not already charged for.
    let already_referenced = state
        .metadata
        .get_ref(realm.as_str(), &key_hex)
        .await?
        .is_some();
    if !already_referenced {
        check_realm_quota(state, realm, validated.physical_size).await?;
    }

    let written = state.blobs.put(&validated.key, bytes).await?;
    if written {
        NODE_BYTES_STORED.inc_by(validated.physical_size);
    }

    state
        .metadata
        .add_ownership(&OwnershipRow {
            realm: realm.to_string(),
            node_key: key_hex.clone(),
            kind: validated.kind().as_str().to_string(),
            size: to_i64(validated.size)?,
            content_type: validated.node.content_type().map(str::to_string),
            created_by: created_by.to_string(),
            created_at: now,
        })
        .await?;

    let increment = state
        .metadata
        .increment_ref(realm.as_str(), &key_hex, physical, logical, now)
        .await?;

    for child in &validated.children {
        let child_hex = child.to_hex();
        let (child_physical, child_logical) =
            match state.metadata.get_ref(realm.as_str(), &child_hex).await? {
                Some(row) => (row.physical_size, row.logical_size),
                None => (0, 0),
            };
        state
            .metadata
            .increment_ref(realm.as_str(), &child_hex, child_physical, child_logical, now)
            .await?;
    }

    if increment.is_new_to_realm {
        state
            .metadata
            .add_usage(realm.as_str(), physical, logical, 1, now)
            .await?;
    }

    NODES_STORED
        .with_label_values(&[validated.kind().as_str()])
        .inc();
    tracing::info!(
        realm = %realm,
        node = %validated.key,
        kind = %validated.kind(),
        new_to_realm = increment.is_new_to_realm,
        "node stored"
    );

    Ok(StoredNode {
        key: validated.key,
        kind: validated.kind(),
        size: validated.size,
        physical_size: validated.physical_size,
        logical_size: validated.logical_size,
        is_new_to_realm: increment.is_new_to_realm,
        ref_count: increment.count,
    })
}

/// Reject `additional` bytes that would push the realm past its quota.
async fn check_realm_quota(state: &AppState, realm: &Realm, additional: u64) -> ApiResult<()> {
    let usage = state.metadata.get_usage(realm.as_str()).await?;
    let Some(limit) = effective_quota(state, usage.as_ref())? else {
        return Ok(());
    };

    let used = match &usage {
        Some(u) => to_u64(u.physical_bytes)?,
        None => 0,
    };
    let requested = used.saturating_add(additional);
    if requested > limit {
        return Err(ApiError::QuotaExceeded { requested, limit });
    }
    Ok(())
}

/// Read a node the realm owns.
pub async fn get_node(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    key: &NodeKey,
) -> ApiResult<NodeContent> {
    let realm = authorize_realm(identity, realm)?;
    require(identity, Capability::Read)?;
    identity.check_read_scope(key)?;

    let (bytes, node) = load_owned_node(state, &realm, key).await?;
    Ok(NodeContent {
        key: *key,
        kind: node.kind(),
        size: node.declared_size(),
        content_type: node.content_type().map(str::to_string),
        children: node.children(),
        bytes,
    })
}

/// Which of `keys` the realm owns. Keys outside a ticket's read scope count as missing.
pub async fn has_nodes(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    keys: &[NodeKey],
) -> ApiResult<NodePresence> {
    let realm = authorize_realm(identity, realm)?;
    require(identity, Capability::Read)?;

    let hexes: Vec<String> = keys.iter().map(NodeKey::to_hex).collect();
    let owned = state.metadata.owned_keys(realm.as_str(), &hexes).await?;

    let mut presence = NodePresence::default();
    for (key, hex) in keys.iter().zip(&hexes) {
        if owned.contains(hex) && identity.check_read_scope(key).is_ok() {
            presence.present.push(*key);
        } else {
            presence.missing.push(*key);
        }
    }
    Ok(presence)
}

/// Ownership record and refcount of a node.
pub async fn node_metadata(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    key: &NodeKey,
) -> ApiResult<NodeMetadata> {
    let realm = authorize_realm(identity, realm)?;
    require(identity, Capability::Read)?;
    identity.check_read_scope(key)?;

    let key_hex = key.to_hex();
    let ownership = state
        .metadata
        .get_ownership(realm.as_str(), &key_hex)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("node {key}")))?;
    let refcount = state.metadata.get_ref(realm.as_str(), &key_hex).await?;

    Ok(NodeMetadata {
        key: *key,
        kind: NodeKind::parse(&ownership.kind)
            .map_err(|e| ApiError::Internal(e.to_string()))?,
        size: to_u64(ownership.size)?,
        content_type: ownership.content_type,
        created_by: ownership.created_by,
        created_at: ownership.created_at,
        ref_count: refcount
            .as_ref()
            .map(|r| to_u64(r.count))
            .transpose()?
            .unwrap_or(0),
        gc_status: refcount.map(|r| r.gc_status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{test_state, user};
    use cask_core::{DictNode, FileNode, Node};

    fn file(data: &[u8]) -> Node {
        Node::File(FileNode::new("text/plain", data.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let state = test_state().await;
        let alice = user("alice");
        let node = file(b"hello");
        let key = node.key();

        let outcome = put_node(&state, &alice, "@me", &key, Bytes::from(node.encode()))
            .await
            .unwrap();
        let PutOutcome::Stored(stored) = outcome else {
            panic!("expected stored outcome");
        };
        assert!(stored.is_new_to_realm);
        assert_eq!(stored.logical_size, 5);

        let content = get_node(&state, &alice, "usr_alice", &key).await.unwrap();
        assert_eq!(content.kind, NodeKind::File);
        assert_eq!(content.content_type.as_deref(), Some("text/plain"));
        assert_eq!(Node::decode(&content.bytes).unwrap(), node);
    }

    #[tokio::test]
    async fn test_reads_are_realm_scoped() {
        let state = test_state().await;
        let alice = user("alice");
        let bob = user("bob");
        let node = file(b"private");
        let key = node.key();
        put_node(&state, &alice, "@me", &key, Bytes::from(node.encode()))
            .await
            .unwrap();

        // Bob cannot name Alice's realm, and his own realm does not own the node.
        assert!(matches!(
            get_node(&state, &bob, "usr_alice", &key).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            get_node(&state, &bob, "@me", &key).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_quota_counts_only_new_bytes() {
        let state = test_state().await;
        let alice = user("alice");
        let node = file(b"0123456789");
        let key = node.key();
        let encoded = node.encode();

        state
            .metadata
            .set_quota(
                "usr_alice",
                Some(encoded.len() as i64),
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();

        put_node(&state, &alice, "@me", &key, Bytes::from(encoded.clone()))
            .await
            .unwrap();
        // Re-upload costs nothing new.
        put_node(&state, &alice, "@me", &key, Bytes::from(encoded))
            .await
            .unwrap();

        let other = file(b"x");
        let err = put_node(&state, &alice, "@me", &other.key(), Bytes::from(other.encode()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn test_has_nodes_splits_present_and_missing() {
        let state = test_state().await;
        let alice = user("alice");
        let stored = file(b"a");
        put_node(&state, &alice, "@me", &stored.key(), Bytes::from(stored.encode()))
            .await
            .unwrap();
        let absent = NodeKey::for_bytes(b"nothing");

        let presence = has_nodes(&state, &alice, "@me", &[stored.key(), absent])
            .await
            .unwrap();
        assert_eq!(presence.present, vec![stored.key()]);
        assert_eq!(presence.missing, vec![absent]);
    }

    #[tokio::test]
    async fn test_metadata_reports_refcount() {
        let state = test_state().await;
        let alice = user("alice");
        let child = file(b"leaf");
        put_node(&state, &alice, "@me", &child.key(), Bytes::from(child.encode()))
            .await
            .unwrap();

        let mut dict = DictNode::new();
        dict.add("leaf.txt", child.key(), 4).unwrap();
        let dict = Node::Dict(dict);
        put_node(&state, &alice, "@me", &dict.key(), Bytes::from(dict.encode()))
            .await
            .unwrap();

        let meta = node_metadata(&state, &alice, "@me", &child.key())
            .await
            .unwrap();
        // One reference from its own upload, one from the parent.
        assert_eq!(meta.ref_count, 2);
        assert_eq!(meta.created_by, "alice");
        assert_eq!(meta.gc_status.as_deref(), Some("active"));
    }
}
