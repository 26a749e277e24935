//! Ticket issuance, commit and revocation.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::PageRequest;
use crate::metrics::{TICKETS_COMMITTED, TICKETS_ISSUED};
use crate::resolver::{authorize_realm, require, require_principal};
use crate::state::AppState;
use cask_core::ticket::{clamp_expires_in, clamp_quota, expiry_from};
use cask_core::{
    Capability, CommitConfig, Identity, NodeKey, Realm, Ticket, TicketId, TicketLimits,
    TicketRequest,
};
use cask_metadata::Page;
use cask_metadata::models::TicketRow;
use time::OffsetDateTime;

/// Mint a ticket bound to `realm`.
///
/// The lifetime and quota are clamped to the configured ceilings whatever
/// the caller asks for.
#[tracing::instrument(skip(state, identity, request), fields(identity = identity.kind()))]
pub async fn create(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    request: TicketRequest,
) -> ApiResult<Ticket> {
    let realm = authorize_realm(identity, realm)?;
    require(identity, Capability::IssueTicket)?;
    let issuer_id = require_principal(identity)?.to_string();

    let config = &state.config.tickets;
    let expires_in_secs = clamp_expires_in(
        request.expires_in,
        config.default_expires_in_secs,
        config.max_expires_in_secs,
    );
    let commit = request.commit.map(|c| CommitConfig {
        quota: clamp_quota(c.quota, config.max_quota_bytes),
        accept: c.accept,
        root: None,
    });
    if let Some(commit) = &commit
        && let Some(bad) = commit.accept.iter().find(|p| !is_accept_pattern(p))
    {
        return Err(ApiError::InvalidRequest(format!(
            "invalid accept pattern: {bad:?}"
        )));
    }

    let now = OffsetDateTime::now_utc();
    let ticket = Ticket {
        id: TicketId::new(),
        realm,
        issuer_id,
        issuer_fingerprint: identity.fingerprint().map(str::to_string),
        scope: request.scope,
        commit,
        limits: TicketLimits {
            expires_in_secs,
            max_quota_bytes: config.max_quota_bytes,
        },
        created_at: now,
        expires_at: expiry_from(now, expires_in_secs),
        revoked_at: None,
    };
    state
        .metadata
        .create_ticket(&TicketRow::from_ticket(&ticket)?)
        .await?;

    TICKETS_ISSUED.inc();
    tracing::info!(
        realm = %ticket.realm,
        ticket_id = %ticket.id,
        expires_in_secs,
        writable = ticket.can_write(),
        "ticket issued"
    );
    Ok(ticket)
}

/// `type/subtype`, `type/*` or `*/*`.
fn is_accept_pattern(pattern: &str) -> bool {
    let essence = pattern.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && (major != "*" || minor == "*")
                && !essence.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

async fn fetch_in_realm(state: &AppState, realm: &Realm, ticket_id: &TicketId) -> ApiResult<Ticket> {
    let ticket = state
        .metadata
        .get_ticket(ticket_id.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("ticket {ticket_id}")))?
        .into_ticket()?;
    if ticket.realm != *realm {
        return Err(ApiError::NotFound(format!("ticket {ticket_id}")));
    }
    Ok(ticket)
}

/// A ticket in the realm. A ticket caller may only read its own record.
pub async fn get(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    ticket_id: &TicketId,
) -> ApiResult<Ticket> {
    let realm = authorize_realm(identity, realm)?;
    require(identity, Capability::Read)?;
    if let Some(own) = identity.ticket()
        && own.id != *ticket_id
    {
        return Err(ApiError::Forbidden(
            "tickets can only read themselves".to_string(),
        ));
    }
    fetch_in_realm(state, &realm, ticket_id).await
}

pub async fn list(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    page: &PageRequest,
) -> ApiResult<Page<Ticket>> {
    let realm = authorize_realm(identity, realm)?;
    require_principal(identity)?;
    require(identity, Capability::Read)?;

    let (limit, cursor) = page.resolve()?;
    let rows = state
        .metadata
        .list_tickets(
            realm.as_str(),
            cursor.as_ref().map(|c| c.sort_key()),
            limit + 1,
        )
        .await?;
    let tickets = rows
        .into_iter()
        .map(|row| row.into_ticket().map_err(ApiError::from))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Page::from_overfetch(tickets, limit, |t| t.id.to_string()))
}

/// Record the single commit of the calling ticket.
#[tracing::instrument(skip(state, identity), fields(root = %root))]
pub async fn commit(state: &AppState, identity: &Identity, root: &NodeKey) -> ApiResult<Ticket> {
    let ticket = identity
        .ticket()
        .ok_or_else(|| ApiError::Forbidden("only tickets can commit".to_string()))?;
    if ticket.commit.is_none() {
        return Err(ApiError::Forbidden(
            "ticket has no commit capability".to_string(),
        ));
    }
    if ticket.committed_root().is_some() {
        return Err(ApiError::Conflict(format!(
            "ticket {} already committed",
            ticket.id
        )));
    }
    if !state
        .metadata
        .has_ownership(ticket.realm.as_str(), &root.to_hex())
        .await?
    {
        return Err(ApiError::NotFound(format!("node {root}")));
    }

    if !state
        .metadata
        .mark_committed(ticket.id.as_str(), &root.to_hex())
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "ticket {} already committed",
            ticket.id
        )));
    }

    TICKETS_COMMITTED.inc();
    tracing::info!(ticket_id = %ticket.id, root = %root, "ticket committed");
    let mut committed = ticket.clone();
    if let Some(commit) = committed.commit.as_mut() {
        commit.root = Some(*root);
    }
    Ok(committed)
}

/// Revoke a ticket.
///
/// Delegated callers must hold the fingerprint the ticket was issued with;
/// user sessions may revoke any ticket in their realm.
#[tracing::instrument(skip(state, identity), fields(ticket_id = %ticket_id))]
pub async fn revoke(
    state: &AppState,
    identity: &Identity,
    realm: &str,
    ticket_id: &TicketId,
) -> ApiResult<Ticket> {
    let realm = authorize_realm(identity, realm)?;
    require(identity, Capability::IssueTicket)?;
    let mut ticket = fetch_in_realm(state, &realm, ticket_id).await?;

    if let Some(caller) = identity.fingerprint()
        && ticket.issuer_fingerprint.as_deref() != Some(caller)
    {
        return Err(ApiError::Forbidden(
            "only the issuing credential can revoke this ticket".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    if !state.metadata.revoke_ticket(ticket_id.as_str(), now).await? {
        return Err(ApiError::Conflict(format!(
            "ticket {ticket_id} already revoked"
        )));
    }
    ticket.revoked_at = Some(now);
    tracing::info!(realm = %realm, ticket_id = %ticket_id, "ticket revoked");
    Ok(ticket)
}
