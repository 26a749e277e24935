//! Turning request credentials into a caller identity.
//!
//! Resolution and role application are separate stages: [`resolve`] proves
//! who the caller is, [`apply_role`] decides what a user or agent may do.
//! Tickets carry their capabilities in the ticket record and skip the second
//! stage.
//!
//! Schemes are tried in a fixed order and the first one the request presents
//! decides the outcome. A presented credential that fails to validate is an
//! error; it never falls through to a weaker scheme.

use crate::auth::hash_token;
use crate::error::{ApiError, ApiResult};
use crate::metrics::record_auth_failure;
use crate::state::AppState;
use cask_core::{
    AgentCredential, AgentIdentity, Capabilities, Capability, Identity, Realm, Role, TicketId,
    TicketIdentity, TokenId, UserIdentity, fingerprint,
};
use cask_metadata::models::{TokenKind, TokenRow};
use cask_signer::{SignedHeaders, verify_request};
use time::OffsetDateTime;

/// Raw credentials of one request.
#[derive(Clone, Debug, Default)]
pub struct Credentials<'a> {
    /// Value of the `Authorization` header.
    pub authorization: Option<&'a str>,
    pub public_key: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub method: &'a str,
    /// Request path as signed by the client.
    pub path: &'a str,
    pub body: &'a [u8],
}

/// Parsed `Authorization` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme<'a> {
    Agent(&'a str),
    Bearer(&'a str),
}

impl<'a> AuthScheme<'a> {
    /// Split a header value into scheme and credential. Scheme names are case-insensitive.
    pub fn parse(value: &'a str) -> Option<Self> {
        let (scheme, credential) = value.trim().split_once(' ')?;
        let credential = credential.trim();
        if credential.is_empty() {
            return None;
        }
        if scheme.eq_ignore_ascii_case("bearer") {
            Some(Self::Bearer(credential))
        } else if scheme.eq_ignore_ascii_case("agent") {
            Some(Self::Agent(credential))
        } else {
            None
        }
    }
}

/// Resolve credentials to an identity. User and agent identities come back
/// without capabilities; pass them through [`apply_role`].
pub async fn resolve(state: &AppState, creds: &Credentials<'_>) -> ApiResult<Identity> {
    let outcome = resolve_inner(state, creds).await;
    if let Err(e) = &outcome {
        let scheme = scheme_name(creds);
        record_auth_failure(scheme);
        tracing::debug!(scheme, error = %e, "credential rejected");
    }
    outcome
}

async fn resolve_inner(state: &AppState, creds: &Credentials<'_>) -> ApiResult<Identity> {
    let now = OffsetDateTime::now_utc();

    if let Some(public_key) = creds.public_key {
        return resolve_signed(state, creds, public_key, now).await;
    }

    let header = creds
        .authorization
        .ok_or_else(|| ApiError::Unauthenticated("no credentials presented".to_string()))?;
    match AuthScheme::parse(header) {
        Some(AuthScheme::Agent(secret)) => resolve_agent_token(state, secret, now).await,
        Some(AuthScheme::Bearer(secret)) if secret.starts_with(TicketId::PREFIX) => {
            resolve_ticket(state, secret, now).await
        }
        Some(AuthScheme::Bearer(secret)) => resolve_bearer(state, secret, now).await,
        None => Err(ApiError::Unauthenticated(
            "unsupported authorization scheme".to_string(),
        )),
    }
}

fn scheme_name(creds: &Credentials<'_>) -> &'static str {
    if creds.public_key.is_some() {
        return "signed";
    }
    match creds.authorization.and_then(AuthScheme::parse) {
        Some(AuthScheme::Agent(_)) => "agent",
        Some(AuthScheme::Bearer(s)) if s.starts_with(TicketId::PREFIX) => "ticket",
        Some(AuthScheme::Bearer(_)) => "bearer",
        None if creds.authorization.is_some() => "unknown",
        None => "none",
    }
}

async fn resolve_signed(
    state: &AppState,
    creds: &Credentials<'_>,
    public_key: &str,
    now: OffsetDateTime,
) -> ApiResult<Identity> {
    let (Some(timestamp), Some(signature)) = (creds.timestamp, creds.signature) else {
        return Err(ApiError::Unauthenticated(
            "signed request requires timestamp and signature headers".to_string(),
        ));
    };
    let headers = SignedHeaders {
        public_key: public_key.to_string(),
        timestamp: timestamp.to_string(),
        signature: signature.to_string(),
    };
    let verified = verify_request(
        &headers,
        creds.method,
        creds.path,
        creds.body,
        now.unix_timestamp(),
        state.config.auth.signature_window_secs,
    )?;

    let encoded = verified.to_base64();
    let key = state
        .metadata
        .get_authorized_key(&encoded)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("public key is not authorized".to_string()))?;
    if now >= key.expires_at {
        return Err(ApiError::Unauthenticated(
            "public key authorization expired".to_string(),
        ));
    }

    Ok(Identity::Agent(AgentIdentity {
        user_id: key.user_id,
        credential: AgentCredential::PublicKey(encoded),
        fingerprint: fingerprint(verified.as_bytes()),
        expires_at: Some(key.expires_at),
        capabilities: Capabilities::NONE,
    }))
}

/// Look up a stored token by its secret, rejecting expired ones.
async fn lookup_token(
    state: &AppState,
    secret: &str,
    now: OffsetDateTime,
) -> ApiResult<Option<TokenRow>> {
    let Some(row) = state.metadata.get_token_by_hash(&hash_token(secret)).await? else {
        return Ok(None);
    };
    if row.is_expired(now) {
        return Err(ApiError::Unauthenticated("token expired".to_string()));
    }

    // Last-use tracking is best effort: awaited so it is not lost on
    // shutdown, but a failed write does not reject a valid credential.
    if let Err(e) = state.metadata.touch_token(&row.token_id, now).await {
        tracing::warn!(token_id = %row.token_id, error = %e, "failed to record token use");
    }
    Ok(Some(row))
}

fn identity_from_token(row: TokenRow, secret: &str) -> ApiResult<Identity> {
    let token_id = TokenId::parse(&row.token_id)?;
    let identity = match row.token_kind()? {
        TokenKind::User => Identity::User(UserIdentity {
            user_id: row.user_id,
            token_id: Some(token_id),
            expires_at: row.expires_at,
            capabilities: Capabilities::NONE,
        }),
        TokenKind::Agent => Identity::Agent(AgentIdentity {
            user_id: row.user_id,
            credential: AgentCredential::Token(token_id),
            fingerprint: fingerprint(secret.as_bytes()),
            expires_at: row.expires_at,
            capabilities: Capabilities::NONE,
        }),
    };
    Ok(identity)
}

async fn resolve_agent_token(
    state: &AppState,
    secret: &str,
    now: OffsetDateTime,
) -> ApiResult<Identity> {
    match lookup_token(state, secret, now).await? {
        Some(row) if row.token_kind()? == TokenKind::Agent => identity_from_token(row, secret),
        _ => Err(ApiError::Unauthenticated("unknown agent token".to_string())),
    }
}

async fn resolve_bearer(state: &AppState, secret: &str, now: OffsetDateTime) -> ApiResult<Identity> {
    if let Some(row) = lookup_token(state, secret, now).await? {
        return identity_from_token(row, secret);
    }

    let verifier = state
        .bearer_verifier
        .as_ref()
        .ok_or_else(|| ApiError::Unauthenticated("unknown bearer token".to_string()))?;
    let subject = verifier
        .verify(secret)
        .await
        .ok_or_else(|| ApiError::Unauthenticated("bearer assertion rejected".to_string()))?;
    // The subject must be usable as a realm owner.
    Realm::for_user(&subject.subject)
        .map_err(|e| ApiError::Unauthenticated(format!("unusable subject: {e}")))?;

    Ok(Identity::User(UserIdentity {
        user_id: subject.subject,
        token_id: None,
        expires_at: subject.expires_at,
        capabilities: Capabilities::NONE,
    }))
}

async fn resolve_ticket(state: &AppState, secret: &str, now: OffsetDateTime) -> ApiResult<Identity> {
    let ticket_id = TicketId::parse(secret)
        .map_err(|_| ApiError::Unauthenticated("malformed ticket".to_string()))?;
    let ticket = state
        .metadata
        .get_ticket(ticket_id.as_str())
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("unknown ticket".to_string()))?
        .into_ticket()?;

    if ticket.is_revoked() {
        return Err(ApiError::Unauthenticated("ticket revoked".to_string()));
    }
    if ticket.is_expired(now) {
        return Err(ApiError::Expired(format!("ticket {} expired", ticket.id)));
    }

    Ok(Identity::Ticket(TicketIdentity {
        fingerprint: fingerprint(ticket.id.as_str().as_bytes()),
        ticket,
    }))
}

/// Fold the stored (or default) role into a user or agent identity.
pub async fn apply_role(state: &AppState, identity: Identity) -> ApiResult<Identity> {
    let Some(user_id) = identity.user_id() else {
        return Ok(identity);
    };
    let role = match state.metadata.get_user_role(user_id).await? {
        Some(name) => Role::parse(&name)?,
        None => state.config.auth.default_role,
    };
    Ok(identity.with_role(role))
}

/// Resolve and apply the role in one step.
pub async fn authenticate(state: &AppState, creds: &Credentials<'_>) -> ApiResult<Identity> {
    let identity = resolve(state, creds).await?;
    apply_role(state, identity).await
}

/// Expand `@me` and check the caller may act in the requested realm.
pub fn authorize_realm(identity: &Identity, requested: &str) -> ApiResult<Realm> {
    let realm = identity.resolve_realm(requested)?;
    if !identity.can_access_realm(&realm) {
        return Err(ApiError::Forbidden(format!("no access to realm {realm}")));
    }
    Ok(realm)
}

/// Require a capability.
pub fn require(identity: &Identity, capability: Capability) -> ApiResult<()> {
    if identity.has(capability) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "missing capability: {capability}"
        )))
    }
}

/// Reject tickets for operations only users and agents may perform.
pub fn require_principal(identity: &Identity) -> ApiResult<&str> {
    identity
        .user_id()
        .ok_or_else(|| ApiError::Forbidden("tickets cannot perform this operation".to_string()))
}
