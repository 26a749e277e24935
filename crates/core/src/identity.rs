//! Resolved caller identities, roles and capabilities.

use crate::error::{Error, Result};
use crate::hash::sha256_hex;
use crate::ids::TokenId;
use crate::key::NodeKey;
use crate::realm::{Realm, SELF_ALIAS};
use crate::ticket::Ticket;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Role assigned to a user; tickets never carry one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unauthorized,
    Authorized,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "unauthorized" => Ok(Self::Unauthorized),
            "authorized" => Ok(Self::Authorized),
            "admin" => Ok(Self::Admin),
            _ => Err(Error::InvalidRole(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Authorized => "authorized",
            Self::Admin => "admin",
        }
    }

    /// Capabilities granted by this role.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::Unauthorized => Capabilities::NONE,
            Self::Authorized => Capabilities {
                read: true,
                write: true,
                issue_ticket: true,
                admin: false,
            },
            Self::Admin => Capabilities::ALL,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an identity may do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub issue_ticket: bool,
    pub admin: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        read: false,
        write: false,
        issue_ticket: false,
        admin: false,
    };

    pub const ALL: Self = Self {
        read: true,
        write: true,
        issue_ticket: true,
        admin: true,
    };
}

/// A single capability, for error messages and checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
    IssueTicket,
    Admin,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::IssueTicket => "issue_ticket",
            Self::Admin => "admin",
        })
    }
}

/// Stable, non-reversible identifier derived from a credential.
pub fn fingerprint(credential: &[u8]) -> String {
    format!("fp_{}", &sha256_hex(credential)[..32])
}

/// A user session or a verified bearer assertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    /// Stored session token, when the caller presented one.
    pub token_id: Option<TokenId>,
    pub expires_at: Option<OffsetDateTime>,
    pub capabilities: Capabilities,
}

/// How an agent authenticated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentCredential {
    Token(TokenId),
    PublicKey(String),
}

/// An automated caller acting for a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentIdentity {
    pub user_id: String,
    pub credential: AgentCredential,
    pub fingerprint: String,
    pub expires_at: Option<OffsetDateTime>,
    pub capabilities: Capabilities,
}

/// A caller presenting a ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketIdentity {
    pub ticket: Ticket,
    pub fingerprint: String,
}

/// The resolved caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    User(UserIdentity),
    Agent(AgentIdentity),
    Ticket(TicketIdentity),
}

impl Identity {
    /// Name of the variant, for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Agent(_) => "agent",
            Self::Ticket(_) => "ticket",
        }
    }

    /// Owning user for user and agent identities.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::User(u) => Some(&u.user_id),
            Self::Agent(a) => Some(&a.user_id),
            Self::Ticket(_) => None,
        }
    }

    /// Id recorded as the creator of things this identity makes.
    pub fn actor_id(&self) -> String {
        match self {
            Self::User(u) => u.user_id.clone(),
            Self::Agent(a) => a.user_id.clone(),
            Self::Ticket(t) => t.ticket.id.to_string(),
        }
    }

    /// Fingerprint of a delegated credential. User sessions have none.
    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            Self::User(_) => None,
            Self::Agent(a) => Some(&a.fingerprint),
            Self::Ticket(t) => Some(&t.fingerprint),
        }
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            Self::Ticket(t) => Some(&t.ticket),
            _ => None,
        }
    }

    pub fn is_ticket(&self) -> bool {
        matches!(self, Self::Ticket(_))
    }

    /// Realm this identity lives in: `usr_{userId}` or the ticket's bound realm.
    pub fn home_realm(&self) -> Result<Realm> {
        match self {
            Self::User(u) => Realm::for_user(&u.user_id),
            Self::Agent(a) => Realm::for_user(&a.user_id),
            Self::Ticket(t) => Ok(t.ticket.realm.clone()),
        }
    }

    /// Resolve a requested realm name, expanding `@me`.
    pub fn resolve_realm(&self, requested: &str) -> Result<Realm> {
        if requested == SELF_ALIAS {
            self.home_realm()
        } else {
            Realm::parse(requested)
        }
    }

    /// Whether this identity may operate on `realm` at all.
    pub fn can_access_realm(&self, realm: &Realm) -> bool {
        self.home_realm().is_ok_and(|home| home == *realm)
    }

    /// Effective capabilities. Tickets derive theirs from the ticket record.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::User(u) => u.capabilities,
            Self::Agent(a) => a.capabilities,
            Self::Ticket(t) => Capabilities {
                read: true,
                write: t.ticket.can_write(),
                issue_ticket: false,
                admin: false,
            },
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        let caps = self.capabilities();
        match capability {
            Capability::Read => caps.read,
            Capability::Write => caps.write,
            Capability::IssueTicket => caps.issue_ticket,
            Capability::Admin => caps.admin,
        }
    }

    /// Fold a role into a user or agent identity. Tickets pass through untouched.
    pub fn with_role(self, role: Role) -> Self {
        match self {
            Self::User(mut u) => {
                u.capabilities = role.capabilities();
                Self::User(u)
            }
            Self::Agent(mut a) => {
                a.capabilities = role.capabilities();
                Self::Agent(a)
            }
            ticket @ Self::Ticket(_) => ticket,
        }
    }

    /// Per-upload byte limit. Only tickets with a commit quota are restricted.
    pub fn check_write_quota(&self, byte_size: u64) -> Result<()> {
        if let Some(limit) = self.ticket().and_then(Ticket::write_quota)
            && byte_size > limit
        {
            return Err(Error::QuotaExceeded {
                requested: byte_size,
                limit,
            });
        }
        Ok(())
    }

    /// Ticket read-scope membership. Non-tickets are unrestricted here.
    pub fn check_read_scope(&self, key: &NodeKey) -> Result<()> {
        match self.ticket() {
            Some(ticket) if !ticket.can_read(key) => Err(Error::OutOfScope(key.to_string())),
            _ => Ok(()),
        }
    }

    /// Ticket accept-type check for file uploads.
    pub fn check_content_type(&self, content_type: &str) -> Result<()> {
        match self.ticket() {
            Some(ticket) if !ticket.accepts_content_type(content_type) => {
                Err(Error::ContentTypeRejected(content_type.to_string()))
            }
            _ => Ok(()),
        }
    }
}
