//! Stored user roles.

use crate::error::MetadataResult;
use async_trait::async_trait;
use time::OffsetDateTime;

#[async_trait]
pub trait RoleRepo: Send + Sync {
    /// Stored role name, if any.
    async fn get_user_role(&self, user_id: &str) -> MetadataResult<Option<String>>;

    async fn set_user_role(
        &self,
        user_id: &str,
        role: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;
}
