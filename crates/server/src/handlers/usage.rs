//! Realm usage and quota.

use crate::error::ApiResult;
use crate::resolver::{authorize_realm, require};
use crate::state::AppState;
use cask_core::{Capability, Identity, Realm};
use cask_metadata::models::{UsageRow, to_u64};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RealmUsage {
    pub realm: Realm,
    pub physical_bytes: u64,
    pub logical_bytes: u64,
    pub node_count: u64,
    /// Effective quota: the realm override, else the configured default.
    pub quota_limit: Option<u64>,
}

/// The quota that applies to a realm given its usage row.
pub fn effective_quota(state: &AppState, usage: Option<&UsageRow>) -> ApiResult<Option<u64>> {
    match usage.and_then(|u| u.quota_limit) {
        Some(limit) => Ok(Some(to_u64(limit)?)),
        None => Ok(state.config.quota.default_realm_bytes),
    }
}

pub async fn get(state: &AppState, identity: &Identity, realm: &str) -> ApiResult<RealmUsage> {
    let realm = authorize_realm(identity, realm)?;
    require(identity, Capability::Read)?;

    let row = state.metadata.get_usage(realm.as_str()).await?;
    let quota_limit = effective_quota(state, row.as_ref())?;
    let usage = match row {
        Some(row) => RealmUsage {
            realm,
            physical_bytes: to_u64(row.physical_bytes)?,
            logical_bytes: to_u64(row.logical_bytes)?,
            node_count: to_u64(row.node_count)?,
            quota_limit,
        },
        None => RealmUsage {
            realm,
            physical_bytes: 0,
            logical_bytes: 0,
            node_count: 0,
            quota_limit,
        },
    };
    Ok(usage)
}
