//! Stored user sessions and agent tokens.
//!
//! Secrets are generated here, handed back exactly once, and only their
//! SHA-256 hash is persisted.

use crate::auth::hash_token;
use crate::error::{ApiError, ApiResult};
use crate::resolver::{require, require_principal};
use crate::state::AppState;
use base64::Engine;
use cask_core::ticket::expiry_from;
use cask_core::{Capability, Identity, TokenId};
use cask_metadata::models::{TokenKind, TokenRow};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const MAX_NAME_LEN: usize = 128;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CreateAgentTokenRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Lifetime in seconds. Absent means the token does not expire.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// A freshly minted credential. The secret is never retrievable again.
#[derive(Clone, Debug, Serialize)]
pub struct IssuedToken {
    pub token_id: TokenId,
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// Listing view of a stored token.
#[derive(Clone, Debug, Serialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub kind: &'static str,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_used_at: Option<OffsetDateTime>,
}

impl TryFrom<TokenRow> for TokenInfo {
    type Error = ApiError;

    fn try_from(row: TokenRow) -> ApiResult<Self> {
        Ok(Self {
            kind: row.token_kind()?.as_str(),
            token_id: row.token_id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
        })
    }
}

/// 32 random bytes, URL-safe base64.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Mint an agent token acting for the calling user.
///
/// Only user sessions may mint agent tokens; an agent cannot extend its own
/// reach by minting siblings.
#[tracing::instrument(skip(state, identity, request), fields(name = %request.name))]
pub async fn create_agent_token(
    state: &AppState,
    identity: &Identity,
    request: CreateAgentTokenRequest,
) -> ApiResult<IssuedToken> {
    let Identity::User(user) = identity else {
        return Err(ApiError::Forbidden(
            "agent tokens can only be created from a user session".to_string(),
        ));
    };
    require(identity, Capability::IssueTicket)?;
    let name = request.name.trim();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ApiError::InvalidRequest(format!(
            "token name must be 1..={MAX_NAME_LEN} characters"
        )));
    }

    let now = OffsetDateTime::now_utc();
    let token_id = TokenId::new();
    let secret = generate_secret();
    let expires_at = request.expires_in.map(|secs| expiry_from(now, secs));
    let row = TokenRow {
        token_id: token_id.to_string(),
        kind: TokenKind::Agent.as_str().to_string(),
        user_id: user.user_id.clone(),
        token_hash: hash_token(&secret),
        refresh_token_hash: None,
        name: Some(name.to_string()),
        description: request.description,
        created_at: now,
        expires_at,
        last_used_at: None,
    };
    state.metadata.create_token(&row).await?;

    tracing::info!(user_id = %user.user_id, token_id = %token_id, "agent token created");
    Ok(IssuedToken {
        token_id,
        secret,
        refresh_token: None,
        expires_at,
    })
}

/// Mint a user session for `user_id` once the login layer has authenticated it.
pub async fn create_user_token(
    state: &AppState,
    user_id: &str,
    expires_in: Option<u64>,
    with_refresh: bool,
) -> ApiResult<IssuedToken> {
    if user_id.is_empty() {
        return Err(ApiError::InvalidRequest("user id is required".to_string()));
    }

    let now = OffsetDateTime::now_utc();
    let token_id = TokenId::new();
    let secret = generate_secret();
    let refresh_token = with_refresh.then(generate_secret);
    let expires_at = expires_in.map(|secs| expiry_from(now, secs));
    let row = TokenRow {
        token_id: token_id.to_string(),
        kind: TokenKind::User.as_str().to_string(),
        user_id: user_id.to_string(),
        token_hash: hash_token(&secret),
        refresh_token_hash: refresh_token.as_deref().map(hash_token),
        name: None,
        description: None,
        created_at: now,
        expires_at,
        last_used_at: None,
    };
    state.metadata.create_token(&row).await?;

    tracing::debug!(user_id, token_id = %token_id, "user session created");
    Ok(IssuedToken {
        token_id,
        secret,
        refresh_token,
        expires_at,
    })
}

pub async fn list_agent_tokens(state: &AppState, identity: &Identity) -> ApiResult<Vec<TokenInfo>> {
    let user_id = require_principal(identity)?;
    state
        .metadata
        .list_tokens(user_id, TokenKind::Agent)
        .await?
        .into_iter()
        .map(TokenInfo::try_from)
        .collect()
}

/// Delete one of the caller's agent tokens. Tokens of other users are not found.
#[tracing::instrument(skip(state, identity), fields(token_id = %token_id))]
pub async fn revoke_agent_token(
    state: &AppState,
    identity: &Identity,
    token_id: &TokenId,
) -> ApiResult<()> {
    let user_id = require_principal(identity)?;
    let not_found = || ApiError::NotFound(format!("token {token_id}"));

    let row = state
        .metadata
        .get_token(token_id.as_str())
        .await?
        .ok_or_else(not_found)?;
    if row.user_id != user_id || row.token_kind()? != TokenKind::Agent {
        return Err(not_found());
    }
    if !state.metadata.delete_token(user_id, token_id.as_str()).await? {
        return Err(not_found());
    }

    tracing::info!(user_id, token_id = %token_id, "agent token revoked");
    Ok(())
}
