//! Device-code style pairing of client public keys.
//!
//! A client posts its public key and shows the returned code to its user.
//! The user, signed in elsewhere, completes the pairing with that code and
//! the key becomes an authorized signer for the user.

use crate::error::{ApiError, ApiResult};
use crate::resolver::require_principal;
use crate::state::AppState;
use cask_core::Identity;
use cask_metadata::models::{AuthorizedKeyRow, PendingPairingRow};
use cask_signer::PublicKey;
use rand::Rng;
use serde::Serialize;
use time::OffsetDateTime;

/// Unambiguous characters for human-typed codes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_GROUP_LEN: usize = 4;
const MAX_CLIENT_NAME_LEN: usize = 128;

#[derive(Clone, Debug, Serialize)]
pub struct PairingStarted {
    pub verification_url: String,
    pub verification_code: String,
    pub poll_interval_secs: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairingStatus {
    Authorized {
        #[serde(with = "time::serde::rfc3339")]
        expires_at: OffsetDateTime,
    },
    Pending {
        #[serde(with = "time::serde::rfc3339")]
        expires_at: OffsetDateTime,
    },
    Unknown,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuthorizedKey {
    pub public_key: String,
    pub client_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl From<AuthorizedKeyRow> for AuthorizedKey {
    fn from(row: AuthorizedKeyRow) -> Self {
        Self {
            public_key: row.public_key,
            client_name: row.client_name,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

/// Canonical base64 form of a caller-supplied key.
fn canonical_key(public_key: &str) -> ApiResult<String> {
    PublicKey::from_base64(public_key.trim())
        .map(|k| k.to_base64())
        .map_err(|e| ApiError::InvalidRequest(format!("invalid public key: {e}")))
}

/// `XXXX-XXXX` from [`CODE_ALPHABET`].
fn generate_code() -> String {
    let mut rng = rand::rng();
    let mut code = String::with_capacity(CODE_GROUP_LEN * 2 + 1);
    for i in 0..CODE_GROUP_LEN * 2 {
        if i == CODE_GROUP_LEN {
            code.push('-');
        }
        code.push(char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]));
    }
    code
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Start or restart a pairing for `public_key`. Needs no credentials.
#[tracing::instrument(skip(state, public_key))]
pub async fn init(
    state: &AppState,
    public_key: &str,
    client_name: &str,
) -> ApiResult<PairingStarted> {
    let public_key = canonical_key(public_key)?;
    let client_name = client_name.trim();
    if client_name.is_empty() || client_name.len() > MAX_CLIENT_NAME_LEN {
        return Err(ApiError::InvalidRequest(format!(
            "client name must be 1..={MAX_CLIENT_NAME_LEN} characters"
        )));
    }

    let config = &state.config.pairing;
    let now = OffsetDateTime::now_utc();
    let pending = PendingPairingRow {
        public_key,
        client_name: client_name.to_string(),
        verification_code: generate_code(),
        created_at: now,
        expires_at: now.saturating_add(config.code_ttl()),
    };
    state.metadata.upsert_pending_pairing(&pending).await?;

    tracing::info!(client_name, "pairing started");
    Ok(PairingStarted {
        verification_url: config.verification_url.clone(),
        verification_code: pending.verification_code,
        poll_interval_secs: config.poll_interval_secs,
        expires_at: pending.expires_at,
    })
}

/// Approve a pending pairing on behalf of the calling user.
#[tracing::instrument(skip(state, identity, public_key, code))]
pub async fn complete(
    state: &AppState,
    identity: &Identity,
    public_key: &str,
    code: &str,
) -> ApiResult<AuthorizedKey> {
    let user_id = require_principal(identity)?;
    let public_key = canonical_key(public_key)?;
    let now = OffsetDateTime::now_utc();

    let invalid = || ApiError::InvalidRequest("invalid or expired pairing code".to_string());
    let pending = state
        .metadata
        .get_pending_pairing(&public_key)
        .await?
        .ok_or_else(invalid)?;
    if now >= pending.expires_at || pending.verification_code != normalize_code(code) {
        return Err(invalid());
    }

    if let Some(existing) = state.metadata.get_authorized_key(&public_key).await?
        && existing.user_id != user_id
        && now < existing.expires_at
    {
        return Err(ApiError::Conflict(
            "public key is authorized for another user".to_string(),
        ));
    }

    let key = AuthorizedKeyRow {
        public_key,
        user_id: user_id.to_string(),
        client_name: pending.client_name,
        created_at: now,
        expires_at: now.saturating_add(state.config.pairing.key_ttl()),
    };
    if !state.metadata.complete_pairing(&key).await? {
        return Err(invalid());
    }

    tracing::info!(user_id, client_name = %key.client_name, "pairing completed");
    Ok(key.into())
}

/// Poll the state of a pairing. Needs no credentials.
pub async fn status(state: &AppState, public_key: &str) -> ApiResult<PairingStatus> {
    let public_key = canonical_key(public_key)?;
    let now = OffsetDateTime::now_utc();

    if let Some(key) = state.metadata.get_authorized_key(&public_key).await?
        && now < key.expires_at
    {
        return Ok(PairingStatus::Authorized {
            expires_at: key.expires_at,
        });
    }
    if let Some(pending) = state.metadata.get_pending_pairing(&public_key).await?
        && now < pending.expires_at
    {
        return Ok(PairingStatus::Pending {
            expires_at: pending.expires_at,
        });
    }
    Ok(PairingStatus::Unknown)
}

pub async fn list(state: &AppState, identity: &Identity) -> ApiResult<Vec<AuthorizedKey>> {
    let user_id = require_principal(identity)?;
    let keys = state.metadata.list_authorized_keys(user_id).await?;
    Ok(keys.into_iter().map(AuthorizedKey::from).collect())
}

/// Remove one of the caller's authorized keys.
pub async fn revoke(state: &AppState, identity: &Identity, public_key: &str) -> ApiResult<()> {
    let user_id = require_principal(identity)?;
    let public_key = canonical_key(public_key)?;
    if !state
        .metadata
        .delete_authorized_key(user_id, &public_key)
        .await?
    {
        return Err(ApiError::NotFound("authorized key".to_string()));
    }
    tracing::info!(user_id, "authorized key revoked");
    Ok(())
}
