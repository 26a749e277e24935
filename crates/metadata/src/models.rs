//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use cask_core::ticket::{CommitConfig, TicketLimits};
use cask_core::{NodeKey, Realm, Ticket, TicketId};
use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Node ledgers
// =============================================================================

/// Realm's claim on a node. Presence gates realm-scoped reads.
#[derive(Debug, Clone, FromRow)]
pub struct OwnershipRow {
    pub realm: String,
    pub node_key: String,
    pub kind: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub created_by: String,
    pub created_at: OffsetDateTime,
}

/// GC status of a refcount record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcStatus {
    Active,
    Pending,
}

impl GcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> MetadataResult<Self> {
        match s {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            other => Err(MetadataError::CorruptRecord(format!(
                "unknown gc status: {other}"
            ))),
        }
    }
}

/// Live-reference counter for a node within a realm.
#[derive(Debug, Clone, FromRow)]
pub struct RefCountRow {
    pub realm: String,
    pub node_key: String,
    pub count: i64,
    pub physical_size: i64,
    pub logical_size: i64,
    pub gc_status: String,
    pub created_at: OffsetDateTime,
    pub pending_since: Option<OffsetDateTime>,
}

impl RefCountRow {
    pub fn status(&self) -> MetadataResult<GcStatus> {
        GcStatus::parse(&self.gc_status)
    }
}

/// Running per-realm totals.
#[derive(Debug, Clone, FromRow)]
pub struct UsageRow {
    pub realm: String,
    pub physical_bytes: i64,
    pub logical_bytes: i64,
    pub node_count: i64,
    /// Per-realm override of the configured default quota.
    pub quota_limit: Option<i64>,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Depots
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct DepotRow {
    pub depot_id: String,
    pub realm: String,
    pub name: String,
    pub root: String,
    pub version: i64,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct DepotHistoryRow {
    pub depot_id: String,
    pub version: i64,
    pub root: String,
    pub message: Option<String>,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Tokens and tickets
// =============================================================================

/// Kind of a stored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    User,
    Agent,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> MetadataResult<Self> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            other => Err(MetadataError::CorruptRecord(format!(
                "unknown token kind: {other}"
            ))),
        }
    }
}

/// User session or agent token. Only the SHA-256 of the secret is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: String,
    pub kind: String,
    pub user_id: String,
    pub token_hash: String,
    pub refresh_token_hash: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub last_used_at: Option<OffsetDateTime>,
}

impl TokenRow {
    pub fn token_kind(&self) -> MetadataResult<TokenKind> {
        TokenKind::parse(&self.kind)
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Ticket record. Scope and accept lists are stored as JSON arrays.
#[derive(Debug, Clone, FromRow)]
pub struct TicketRow {
    pub ticket_id: String,
    pub realm: String,
    pub issuer_id: String,
    pub issuer_fingerprint: Option<String>,
    pub scope_json: Option<String>,
    pub commit_enabled: bool,
    pub commit_quota: Option<i64>,
    pub commit_accept_json: String,
    pub commit_root: Option<String>,
    pub expires_in_secs: i64,
    pub max_quota_bytes: Option<i64>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

impl TicketRow {
    pub fn from_ticket(ticket: &Ticket) -> MetadataResult<Self> {
        let scope_json = ticket
            .scope
            .as_ref()
            .map(|keys| serde_json::to_string(&keys.iter().map(NodeKey::to_hex).collect::<Vec<_>>()))
            .transpose()?;
        let (commit_enabled, commit_quota, accept, commit_root) = match &ticket.commit {
            Some(commit) => (
                true,
                commit.quota.map(to_i64).transpose()?,
                commit.accept.clone(),
                commit.root.map(|k| k.to_hex()),
            ),
            None => (false, None, Vec::new(), None),
        };
        Ok(Self {
            ticket_id: ticket.id.to_string(),
            realm: ticket.realm.to_string(),
            issuer_id: ticket.issuer_id.clone(),
            issuer_fingerprint: ticket.issuer_fingerprint.clone(),
            scope_json,
            commit_enabled,
            commit_quota,
            commit_accept_json: serde_json::to_string(&accept)?,
            commit_root,
            expires_in_secs: to_i64(ticket.limits.expires_in_secs)?,
            max_quota_bytes: ticket.limits.max_quota_bytes.map(to_i64).transpose()?,
            created_at: ticket.created_at,
            expires_at: ticket.expires_at,
            revoked_at: ticket.revoked_at,
        })
    }

    pub fn into_ticket(self) -> MetadataResult<Ticket> {
        let scope = self
            .scope_json
            .map(|json| -> MetadataResult<Vec<NodeKey>> {
                let hexes: Vec<String> = serde_json::from_str(&json)?;
                Ok(hexes
                    .iter()
                    .map(|h| NodeKey::parse(h))
                    .collect::<cask_core::Result<_>>()?)
            })
            .transpose()?;
        let commit = if self.commit_enabled {
            Some(CommitConfig {
                quota: self.commit_quota.map(to_u64).transpose()?,
                accept: serde_json::from_str(&self.commit_accept_json)?,
                root: self.commit_root.as_deref().map(NodeKey::parse).transpose()?,
            })
        } else {
            None
        };
        Ok(Ticket {
            id: TicketId::parse(&self.ticket_id)?,
            realm: Realm::parse(&self.realm)?,
            issuer_id: self.issuer_id,
            issuer_fingerprint: self.issuer_fingerprint,
            scope,
            commit,
            limits: TicketLimits {
                expires_in_secs: to_u64(self.expires_in_secs)?,
                max_quota_bytes: self.max_quota_bytes.map(to_u64).transpose()?,
            },
            created_at: self.created_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
        })
    }
}

// =============================================================================
// Pairing, authorized keys and roles
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct PendingPairingRow {
    pub public_key: String,
    pub client_name: String,
    pub verification_code: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct AuthorizedKeyRow {
    pub public_key: String,
    pub user_id: String,
    pub client_name: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRoleRow {
    pub user_id: String,
    pub role: String,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Integer conversions
// =============================================================================

/// SQLite integers are signed; sizes above `i64::MAX` are rejected rather than wrapped.
pub fn to_i64(value: u64) -> MetadataResult<i64> {
    i64::try_from(value)
        .map_err(|_| MetadataError::CorruptRecord(format!("value out of range: {value}")))
}

pub fn to_u64(value: i64) -> MetadataResult<u64> {
    u64::try_from(value)
        .map_err(|_| MetadataError::CorruptRecord(format!("negative value: {value}")))
}
