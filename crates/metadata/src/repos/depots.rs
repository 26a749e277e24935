//! Depot ledger and history.

use crate::error::MetadataResult;
use crate::models::{DepotHistoryRow, DepotRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Result of moving a depot to a new root.
#[derive(Debug, Clone)]
pub struct DepotAdvance {
    pub depot: DepotRow,
    /// Root the depot pointed at before the call.
    pub previous_root: String,
    /// False when the move was skipped because the root was already current.
    pub changed: bool,
}

#[async_trait]
pub trait DepotRepo: Send + Sync {
    /// Insert a depot at version 1 together with its first history entry.
    /// `AlreadyExists` if the name is taken in the realm.
    async fn create_depot(&self, depot: &DepotRow, message: Option<&str>) -> MetadataResult<()>;

    async fn get_depot(&self, realm: &str, depot_id: &str) -> MetadataResult<Option<DepotRow>>;

    async fn get_depot_by_name(&self, realm: &str, name: &str)
    -> MetadataResult<Option<DepotRow>>;

    /// Depots ordered by id, starting after `after`. Fetches up to `limit` rows.
    async fn list_depots(
        &self,
        realm: &str,
        after: Option<&str>,
        limit: u32,
    ) -> MetadataResult<Vec<DepotRow>>;

    /// Atomically set a new root, bump the version and append history.
    ///
    /// With `skip_if_current`, a root equal to the current one leaves the
    /// depot untouched. Entries beyond `max_history` are pruned (0 keeps all).
    /// `NotFound` if the depot does not exist.
    #[allow(clippy::too_many_arguments)]
    async fn advance_depot(
        &self,
        realm: &str,
        depot_id: &str,
        new_root: &str,
        message: Option<&str>,
        skip_if_current: bool,
        max_history: u32,
        now: OffsetDateTime,
    ) -> MetadataResult<DepotAdvance>;

    /// Delete a depot and its history, returning the removed record.
    async fn delete_depot(&self, realm: &str, depot_id: &str) -> MetadataResult<Option<DepotRow>>;

    async fn get_history_entry(
        &self,
        depot_id: &str,
        version: i64,
    ) -> MetadataResult<Option<DepotHistoryRow>>;

    /// History newest first, starting below `before_version`.
    async fn list_history(
        &self,
        depot_id: &str,
        before_version: Option<i64>,
        limit: u32,
    ) -> MetadataResult<Vec<DepotHistoryRow>>;
}
