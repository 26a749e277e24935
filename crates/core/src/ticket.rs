//! Tickets: short-lived delegated credentials bound to one realm.

use crate::ids::TicketId;
use crate::key::NodeKey;
use crate::realm::Realm;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Write/commit configuration of a ticket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Maximum bytes a single upload may carry.
    #[serde(default)]
    pub quota: Option<u64>,
    /// Accepted content-type patterns (`*/*`, `image/*`, `text/plain`). Empty accepts all.
    #[serde(default)]
    pub accept: Vec<String>,
    /// Root recorded by the single allowed commit.
    #[serde(default)]
    pub root: Option<NodeKey>,
}

/// Server-side caps applied when the ticket was minted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketLimits {
    /// Lifetime granted, after clamping.
    pub expires_in_secs: u64,
    /// Ceiling applied to the commit quota, if one was configured.
    #[serde(default)]
    pub max_quota_bytes: Option<u64>,
}

/// A ticket record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub realm: Realm,
    /// User id of the issuing identity.
    pub issuer_id: String,
    /// Set when the issuer was an agent or other delegated identity.
    pub issuer_fingerprint: Option<String>,
    /// Node keys readable through this ticket; `None` means unrestricted within the realm.
    pub scope: Option<Vec<NodeKey>>,
    pub commit: Option<CommitConfig>,
    pub limits: TicketLimits,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
}

impl Ticket {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Usable as a credential at `now`.
    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    /// Read-scope membership. No transitive reachability is computed.
    pub fn can_read(&self, key: &NodeKey) -> bool {
        match &self.scope {
            Some(scope) => scope.contains(key),
            None => true,
        }
    }

    /// Writable while a commit config exists and nothing has been committed yet.
    pub fn can_write(&self) -> bool {
        self.commit.as_ref().is_some_and(|c| c.root.is_none())
    }

    pub fn committed_root(&self) -> Option<&NodeKey> {
        self.commit.as_ref().and_then(|c| c.root.as_ref())
    }

    pub fn write_quota(&self) -> Option<u64> {
        self.commit.as_ref().and_then(|c| c.quota)
    }

    /// Whether a file of `content_type` may be uploaded through this ticket.
    pub fn accepts_content_type(&self, content_type: &str) -> bool {
        match &self.commit {
            Some(commit) if !commit.accept.is_empty() => commit
                .accept
                .iter()
                .any(|pattern| content_type_matches(pattern, content_type)),
            Some(_) => true,
            None => false,
        }
    }
}

/// Client-supplied parameters for minting a ticket.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TicketRequest {
    #[serde(default)]
    pub scope: Option<Vec<NodeKey>>,
    #[serde(default)]
    pub commit: Option<CommitRequest>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Requested commit configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommitRequest {
    #[serde(default)]
    pub quota: Option<u64>,
    #[serde(default)]
    pub accept: Vec<String>,
}

/// Clamp a requested lifetime to `(0, max]`, falling back to `default` when absent or zero.
pub fn clamp_expires_in(requested: Option<u64>, default: u64, max: u64) -> u64 {
    let wanted = match requested {
        Some(0) | None => default,
        Some(secs) => secs,
    };
    wanted.min(max).max(1)
}

/// Clamp a requested quota to the server ceiling.
pub fn clamp_quota(requested: Option<u64>, ceiling: Option<u64>) -> Option<u64> {
    match (requested, ceiling) {
        (Some(q), Some(max)) => Some(q.min(max)),
        (None, Some(max)) => Some(max),
        (q, None) => q,
    }
}

/// Expiry time for a clamped lifetime.
pub fn expiry_from(now: OffsetDateTime, expires_in_secs: u64) -> OffsetDateTime {
    let secs = i64::try_from(expires_in_secs).unwrap_or(i64::MAX);
    now.saturating_add(Duration::seconds(secs))
}

/// Match a MIME type against an accept pattern. Parameters after `;` are ignored.
pub fn content_type_matches(pattern: &str, content_type: &str) -> bool {
    let essence = |s: &str| {
        s.split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    };
    let pattern = essence(pattern);
    let content_type = essence(content_type);

    if pattern == "*" || pattern == "*/*" {
        return true;
    }
    match pattern.strip_suffix("/*") {
        Some(major) => content_type
            .split_once('/')
            .is_some_and(|(ct_major, _)| ct_major == major),
        None => pattern == content_type,
    }
}
