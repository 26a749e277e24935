//! Per-realm usage aggregate.

use crate::error::MetadataResult;
use crate::models::UsageRow;
use async_trait::async_trait;
use time::OffsetDateTime;

#[async_trait]
pub trait UsageRepo: Send + Sync {
    async fn get_usage(&self, realm: &str) -> MetadataResult<Option<UsageRow>>;

    /// Add to the running totals, creating the row if needed.
    async fn add_usage(
        &self,
        realm: &str,
        physical_bytes: i64,
        logical_bytes: i64,
        node_count: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<UsageRow>;

    /// Override (or clear) the realm's quota.
    async fn set_quota(
        &self,
        realm: &str,
        quota_limit: Option<i64>,
        now: OffsetDateTime,
    ) -> MetadataResult<UsageRow>;
}
