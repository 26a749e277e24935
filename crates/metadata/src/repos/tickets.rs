//! Ticket repository.

use crate::error::MetadataResult;
use crate::models::TicketRow;
use async_trait::async_trait;
use time::OffsetDateTime;

#[async_trait]
pub trait TicketRepo: Send + Sync {
    async fn create_ticket(&self, ticket: &TicketRow) -> MetadataResult<()>;

    async fn get_ticket(&self, ticket_id: &str) -> MetadataResult<Option<TicketRow>>;

    /// Tickets in a realm ordered by id, starting after `after`.
    async fn list_tickets(
        &self,
        realm: &str,
        after: Option<&str>,
        limit: u32,
    ) -> MetadataResult<Vec<TicketRow>>;

    /// Set the commit root if the ticket can commit and has not yet. Returns whether this call set it.
    async fn mark_committed(&self, ticket_id: &str, root: &str) -> MetadataResult<bool>;

    /// Stamp `revoked_at` if not already revoked. Returns whether this call revoked it.
    async fn revoke_ticket(&self, ticket_id: &str, now: OffsetDateTime) -> MetadataResult<bool>;
}
