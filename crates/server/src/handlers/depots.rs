//! Depot operations: named, versioned roots with append-only history.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{PageRequest, load_owned_node};
use crate::handlers::nodes::store_validated;
use crate::metrics::record_depot_commit;
use crate::resolver::{authorize_realm, require, require_principal};
use crate::state::AppState;
use bytes::Bytes;
use cask_core::{
    Capability, DepotId, Identity, MAIN_DEPOT, Node, NodeKey, Realm, Validation, validate,
};
use cask_metadata::Page;
use cask_metadata::models::{DepotHistoryRow, DepotRow, to_i64, to_u64};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

const MAX_NAME_LEN: usize = 128;
const INITIAL_MESSAGE: &str = "Initial version";

#[derive(Clone, Debug, Serialize)]
pub struct Depot {
    pub depot_id: DepotId,
    pub realm: Realm,
    pub name: String,
    pub root: NodeKey,
    pub version: u64,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TryFrom<DepotRow> for Depot {
    type Error = ApiError;

    fn try_from(row: DepotRow) -> ApiResult<Self> {
        Ok(Self {
            depot_id: DepotId::parse(&row.depot_id).map_err(corrupt)?,
            realm: Realm::parse(&row.realm).map_err(corrupt)?,
            name: row.name,
            root: NodeKey::parse(&row.root).map_err(corrupt)?,
            version: to_u64(row.version)?,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryEntry {
    pub version: u64,
    pub root: NodeKey,
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TryFrom<DepotHistoryRow> for HistoryEntry {
    type Error = ApiError;

    fn try_from(row: DepotHistoryRow) -> ApiResult<Self> {
        Ok(Self {
            version: to_u64(row.version)?,
            root: NodeKey::parse(&row.root).map_err(corrupt)?,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

fn corrupt(e: cask_core::Error) -> ApiError {
    ApiError::Internal(format!("corrupt depot record: {e}"))
}

/// Result of moving a depot.
#[derive(Clone, Debug, Serialize)]
pub struct DepotChange {
    pub depot: Depot,
    pub previous_root: NodeKey,
    /// False when the requested root was already current and nothing was written.
    pub changed: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateDepotRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn validate_name(name: &str) -> ApiResult<()> {
    if name.trim().is_empty() || name.len() > MAX_NAME_LEN || name.chars().any(char::is_control) {
        return Err(ApiError::InvalidRequest(format!(
            "depot name must be 1 to {MAX_NAME_LEN} printable characters"
        )));
    }
    Ok(())
}

/// Depots are managed by users and agents; tickets may only read them.
fn authorize_manage(identity: &Identity, realm: &str) -> ApiResult<Realm> {
    let realm = authorize_realm(identity, realm)?;
    require_principal(identity)?;
    require(identity, Capability::Write)?;
    Ok(realm)
}

fn authorize_read(identity: &Identity, realm: &str) -> ApiResult<Realm> {
    let realm = authorize_realm(identity, realm)?;
    require(identity, Capability::Read)?;
    Ok(realm)
}

async fn fetch(state: &AppState, realm: &Realm, depot_id: &DepotId) -> ApiResult<DepotRow> {
    state
        .metadata
        .get_depot(realm.as_str(), depot_id.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("depot {depot_id}")))
}

/// Create a depot rooted at the empty directory.
#[tracing::instrument(skip(state, identity, request), fields(name = %request.name))]
pub async fn create(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    request: CreateDepotRequest,
) -> ApiResult<Depot> {
    let realm = authorize_manage(identity, realm)?;
    create_in(state, identity, &realm, request).await
}

async fn create_in(
    state: &AppState,
    identity: &Identity,
    realm: &Realm,
    request: CreateDepotRequest,
) -> ApiResult<Depot> {
    validate_name(&request.name)?;
    if state
        .metadata
        .get_depot_by_name(realm.as_str(), &request.name)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "depot {} already exists",
            request.name
        )));
    }

    let empty = Node::empty_dict();
    let bytes = empty.encode();
    let key = empty.key();
    let no_children = HashMap::<NodeKey, u64>::new();
    let Validation::Valid(validated) = validate(&bytes, &key, &no_children).await? else {
        return Err(ApiError::Internal("empty directory has children".to_string()));
    };
    // This upload's reference is the depot's reference to its root.
    store_validated(state, realm, &identity.actor_id(), &validated, Bytes::from(bytes)).await?;

    let now = OffsetDateTime::now_utc();
    let row = DepotRow {
        depot_id: DepotId::new().to_string(),
        realm: realm.to_string(),
        name: request.name,
        root: key.to_hex(),
        version: 1,
        description: request.description,
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = state.metadata.create_depot(&row, Some(INITIAL_MESSAGE)).await {
        if let Err(undo) = release_root(state, realm, &key.to_hex(), now).await {
            tracing::warn!(realm = %realm, error = %undo, "failed to undo empty root reference");
        }
        return Err(e.into());
    }

    record_depot_commit("create");
    tracing::info!(realm = %realm, depot_id = %row.depot_id, "depot created");
    row.try_into()
}

/// The realm's protected main depot, created on first use.
pub async fn ensure_main(state: &AppState, identity: &Identity, realm: &str) -> ApiResult<Depot> {
    let realm = authorize_realm(identity, realm)?;
    if let Some(row) = state
        .metadata
        .get_depot_by_name(realm.as_str(), MAIN_DEPOT)
        .await?
    {
        require(identity, Capability::Read)?;
        return row.try_into();
    }

    require_principal(identity)?;
    require(identity, Capability::Write)?;
    let request = CreateDepotRequest {
        name: MAIN_DEPOT.to_string(),
        description: None,
    };
    match create_in(state, identity, &realm, request).await {
        Err(ApiError::Conflict(_)) => state
            .metadata
            .get_depot_by_name(realm.as_str(), MAIN_DEPOT)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("depot {MAIN_DEPOT}")))?
            .try_into(),
        other => other,
    }
}

pub async fn get(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    depot_id: &DepotId,
) -> ApiResult<Depot> {
    let realm = authorize_read(identity, realm)?;
    fetch(state, &realm, depot_id).await?.try_into()
}

pub async fn get_by_name(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    name: &str,
) -> ApiResult<Depot> {
    let realm = authorize_read(identity, realm)?;
    state
        .metadata
        .get_depot_by_name(realm.as_str(), name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("depot {name}")))?
        .try_into()
}

pub async fn list(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    page: &PageRequest,
) -> ApiResult<Page<Depot>> {
    let realm = authorize_read(identity, realm)?;
    let (limit, cursor) = page.resolve()?;
    let rows = state
        .metadata
        .list_depots(
            realm.as_str(),
            cursor.as_ref().map(|c| c.sort_key()),
            limit + 1,
        )
        .await?;
    let depots = rows
        .into_iter()
        .map(Depot::try_from)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Page::from_overfetch(depots, limit, |d| d.depot_id.to_string()))
}

/// Point a depot at a node the realm owns.
#[tracing::instrument(skip(state, identity, message), fields(depot_id = %depot_id, root = %new_root))]
pub async fn update_root(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    depot_id: &DepotId,
    new_root: &NodeKey,
    message: Option<&str>,
) -> ApiResult<DepotChange> {
    let realm = authorize_manage(identity, realm)?;
    fetch(state, &realm, depot_id).await?;
    let change = advance(state, &realm, depot_id, new_root, message, false).await?;
    record_depot_commit("update");
    Ok(change)
}

/// Restore a historical root as a new version.
#[tracing::instrument(skip(state, identity), fields(depot_id = %depot_id))]
pub async fn rollback(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    depot_id: &DepotId,
    target_version: u64,
) -> ApiResult<DepotChange> {
    let realm = authorize_manage(identity, realm)?;
    let current = fetch(state, &realm, depot_id).await?;
    let entry = state
        .metadata
        .get_history_entry(depot_id.as_str(), to_i64(target_version)?)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("version {target_version} of depot {depot_id}"))
        })?;

    if entry.root == current.root {
        let depot = Depot::try_from(current)?;
        return Ok(DepotChange {
            previous_root: depot.root,
            depot,
            changed: false,
        });
    }

    let root = NodeKey::parse(&entry.root).map_err(corrupt)?;
    let message = format!("Rollback to version {target_version}");
    let change = advance(state, &realm, depot_id, &root, Some(&message), true).await?;
    if change.changed {
        record_depot_commit("rollback");
    }
    Ok(change)
}

/// Take a reference on the new root, move the depot, then drop the old root's reference.
async fn advance(
    state: &AppState,
    realm: &Realm,
    depot_id: &DepotId,
    new_root: &NodeKey,
    message: Option<&str>,
    skip_if_current: bool,
) -> ApiResult<DepotChange> {
    let (bytes, node) = load_owned_node(state, realm, new_root).await?;
    let now = OffsetDateTime::now_utc();
    let root_hex = new_root.to_hex();
    let physical = to_i64(bytes.len() as u64)?;
    let logical = to_i64(node.logical_size())?;

    let increment = state
        .metadata
        .increment_ref(realm.as_str(), &root_hex, physical, logical, now)
        .await?;
    if increment.is_new_to_realm {
        state
            .metadata
            .add_usage(realm.as_str(), physical, logical, 1, now)
            .await?;
    }

    let advanced = match state
        .metadata
        .advance_depot(
            realm.as_str(),
            depot_id.as_str(),
            &root_hex,
            message,
            skip_if_current,
            state.config.depots.max_history,
            now,
        )
        .await
    {
        Ok(advanced) => advanced,
        Err(e) => {
            // The move failed; its error wins over a failed undo of the increment.
            if let Err(undo) = release_root(state, realm, &root_hex, now).await {
                tracing::warn!(realm = %realm, node = %root_hex, error = %undo, "failed to undo root reference");
            }
            return Err(e.into());
        }
    };

    if advanced.changed {
        tracing::info!(
            realm = %realm,
            depot_id = %depot_id,
            version = advanced.depot.version,
            "depot advanced"
        );
        release_root(state, realm, &advanced.previous_root, now).await?;
    } else {
        release_root(state, realm, &root_hex, now).await?;
    }

    Ok(DepotChange {
        previous_root: NodeKey::parse(&advanced.previous_root).map_err(corrupt)?,
        depot: advanced.depot.try_into()?,
        changed: advanced.changed,
    })
}

/// Drop one reference on a root.
///
/// Runs after the depot move has committed. An error leaves the new version
/// in place, so the caller sees the failure and the refcount stays high
/// rather than silently drifting.
async fn release_root(
    state: &AppState,
    realm: &Realm,
    root_hex: &str,
    now: OffsetDateTime,
) -> ApiResult<()> {
    let dec = state
        .metadata
        .decrement_ref(realm.as_str(), root_hex, now)
        .await?;
    if dec.became_pending {
        tracing::debug!(realm = %realm, node = root_hex, "root no longer referenced");
    }
    Ok(())
}

/// Delete a depot. The main depot is protected.
#[tracing::instrument(skip(state, identity), fields(depot_id = %depot_id))]
pub async fn delete(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    depot_id: &DepotId,
) -> ApiResult<Depot> {
    let realm = authorize_manage(identity, realm)?;
    let current = fetch(state, &realm, depot_id).await?;
    if current.name == MAIN_DEPOT {
        return Err(ApiError::Forbidden(format!(
            "the {MAIN_DEPOT} depot cannot be deleted"
        )));
    }

    let deleted = state
        .metadata
        .delete_depot(realm.as_str(), depot_id.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("depot {depot_id}")))?;
    release_root(state, &realm, &deleted.root, OffsetDateTime::now_utc()).await?;

    tracing::info!(realm = %realm, depot_id = %depot_id, "depot deleted");
    deleted.try_into()
}

/// History, newest first.
pub async fn list_history(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    depot_id: &DepotId,
    page: &PageRequest,
) -> ApiResult<Page<HistoryEntry>> {
    let realm = authorize_read(identity, realm)?;
    fetch(state, &realm, depot_id).await?;
    let (limit, cursor) = page.resolve()?;
    let before = cursor.as_ref().map(|c| c.as_version()).transpose()?;

    let rows = state
        .metadata
        .list_history(depot_id.as_str(), before, limit + 1)
        .await?;
    let entries = rows
        .into_iter()
        .map(HistoryEntry::try_from)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Page::from_overfetch(entries, limit, |e| e.version.to_string()))
}

pub async fn get_history_entry(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    depot_id: &DepotId,
    version: u64,
) -> ApiResult<HistoryEntry> {
    let realm = authorize_read(identity, realm)?;
    fetch(state, &realm, depot_id).await?;
    state
        .metadata
        .get_history_entry(depot_id.as_str(), to_i64(version)?)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("version {version} of depot {depot_id}")))?
        .try_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::nodes::put_node;
    use crate::handlers::test_support::{test_state, user};
    use cask_core::FileNode;

    fn named(name: &str) -> CreateDepotRequest {
        CreateDepotRequest {
            name: name.to_string(),
            description: None,
        }
    }

    async fn upload(state: &AppState, identity: &Identity, data: &[u8]) -> NodeKey {
        let node = Node::File(FileNode::new("text/plain", data.to_vec()).unwrap());
        let key = node.key();
        put_node(state, identity, "@me", &key, Bytes::from(node.encode()))
            .await
            .unwrap();
        key
    }

    #[tokio::test]
    async fn test_create_starts_at_version_one() {
        let state = test_state().await;
        let alice = user("alice");
        let depot = create(&state, &alice, "@me", named("docs")).await.unwrap();
        assert_eq!(depot.version, 1);
        assert_eq!(depot.root, Node::empty_dict().key());

        let entry = get_history_entry(&state, &alice, "@me", &depot.depot_id, 1)
            .await
            .unwrap();
        assert_eq!(entry.message.as_deref(), Some(INITIAL_MESSAGE));

        let dup = create(&state, &alice, "@me", named("docs")).await.unwrap_err();
        assert!(matches!(dup, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_moves_references() {
        let state = test_state().await;
        let alice = user("alice");
        let depot = create(&state, &alice, "@me", named("docs")).await.unwrap();
        let empty_hex = depot.root.to_hex();
        let key = upload(&state, &alice, b"v2").await;

        let change = update_root(&state, &alice, "@me", &depot.depot_id, &key, Some("edit"))
            .await
            .unwrap();
        assert!(change.changed);
        assert_eq!(change.depot.version, 2);
        assert_eq!(change.previous_root, depot.root);

        let new_ref = state
            .metadata
            .get_ref("usr_alice", &key.to_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new_ref.count, 2);
        let old_ref = state
            .metadata
            .get_ref("usr_alice", &empty_hex)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old_ref.count, 0);
        assert_eq!(old_ref.gc_status, "pending");
    }

    #[tokio::test]
    async fn test_update_to_unowned_root_is_not_found() {
        let state = test_state().await;
        let alice = user("alice");
        let depot = create(&state, &alice, "@me", named("docs")).await.unwrap();
        let missing = NodeKey::for_bytes(b"never uploaded");
        let err = update_root(&state, &alice, "@me", &depot.depot_id, &missing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_main_is_protected_and_lazy() {
        let state = test_state().await;
        let alice = user("alice");
        let main = ensure_main(&state, &alice, "@me").await.unwrap();
        assert_eq!(main.name, MAIN_DEPOT);
        let again = ensure_main(&state, &alice, "@me").await.unwrap();
        assert_eq!(again.depot_id, main.depot_id);

        let err = delete(&state, &alice, "@me", &main.depot_id).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_delete_releases_root_and_history() {
        let state = test_state().await;
        let alice = user("alice");
        let depot = create(&state, &alice, "@me", named("scratch")).await.unwrap();
        delete(&state, &alice, "@me", &depot.depot_id).await.unwrap();

        assert!(matches!(
            get(&state, &alice, "@me", &depot.depot_id).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(
            state
                .metadata
                .get_history_entry(depot.depot_id.as_str(), 1)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_list_paginates() {
        let state = test_state().await;
        let alice = user("alice");
        for name in ["a", "b", "c"] {
            create(&state, &alice, "@me", named(name)).await.unwrap();
        }

        let first = list(
            &state,
            &alice,
            "@me",
            &PageRequest {
                cursor: None,
                limit: Some(2),
            },
        )
        .await
        .unwrap();
        assert_eq!(first.items.len(), 2);
        let second = list(
            &state,
            &alice,
            "@me",
            &PageRequest {
                cursor: first.next_cursor.clone(),
                limit: Some(2),
            },
        )
        .await
        .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next_cursor.is_none());
    }
}
