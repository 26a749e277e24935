//! Authorization, upload pipeline and depot operations for Cask.
//!
//! This crate provides:
//! - Credential resolution (signed requests, agent tokens, bearer tokens, tickets)
//! - Node upload with child and quota checks, and ownership-gated reads
//! - Depots with versioned history and rollback
//! - Ticket, agent token and pairing lifecycles
//! - An axum middleware that attaches the resolved identity to requests

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod resolver;
pub mod state;
pub mod verifier;

pub use auth::{TraceId, auth_middleware};
pub use error::{ApiError, ApiResult};
pub use resolver::{Credentials, apply_role, authenticate, resolve};
pub use state::AppState;
pub use verifier::{BearerVerifier, StaticVerifier, VerifiedSubject};
