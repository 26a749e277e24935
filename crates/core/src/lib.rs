//! Core domain types and shared logic for the Cask content-addressed store.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Node keys, the node codec and upload-time validation
//! - Realms and prefixed identifiers
//! - Identities, roles and capabilities
//! - Tickets and their scope, quota and accept-type rules
//! - Shared configuration

pub mod config;
pub mod error;
pub mod hash;
pub mod identity;
pub mod ids;
pub mod key;
pub mod node;
pub mod realm;
pub mod ticket;
pub mod validate;

pub use error::{Error, Result};
pub use hash::{ContentHash, sha256_hex};
pub use identity::{
    AgentCredential, AgentIdentity, Capabilities, Capability, Identity, Role, TicketIdentity,
    UserIdentity, fingerprint,
};
pub use ids::{DepotId, TicketId, TokenId};
pub use key::NodeKey;
pub use node::{DictEntry, DictNode, FileNode, Node, NodeKind, SuccessorNode, check_structure};
pub use realm::{Realm, SELF_ALIAS};
pub use ticket::{CommitConfig, CommitRequest, Ticket, TicketLimits, TicketRequest};
pub use validate::{ChildLookup, ValidatedNode, Validation, validate};

/// Name of the protected depot every realm has.
pub const MAIN_DEPOT: &str = "main";
