//! Authentication middleware and request helpers.

use crate::error::{ApiError, ApiResult};
use crate::resolver::{Credentials, authenticate};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use cask_core::{Identity, sha256_hex};
use cask_signer::request::{PUBKEY_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
const MAX_TRACE_ID_LEN: usize = 128;

/// Largest body the middleware buffers for signature verification.
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, keeping at most
    /// `MAX_TRACE_ID_LEN` printable ASCII characters.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.trim().is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash a token secret for storage lookup.
pub fn hash_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn extract_or_generate_trace_id(headers: &HeaderMap) -> TraceId {
    header(headers, "x-trace-id")
        .map(TraceId::from_client)
        .unwrap_or_default()
}

/// Resolve the caller and store its [`Identity`] in the request extensions.
///
/// The body is buffered because signed requests cover its hash; it is put
/// back unchanged for the inner service.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();
    let trace_id = extract_or_generate_trace_id(&parts.headers);
    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %parts.method,
        path = %parts.uri.path()
    );

    let body = axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("failed to read body: {e}")))?;

    let identity = {
        let creds = Credentials {
            authorization: header(&parts.headers, AUTHORIZATION.as_str()),
            public_key: header(&parts.headers, PUBKEY_HEADER),
            timestamp: header(&parts.headers, TIMESTAMP_HEADER),
            signature: header(&parts.headers, SIGNATURE_HEADER),
            method: parts.method.as_str(),
            path: parts.uri.path(),
            body: &body,
        };
        authenticate(&state, &creds).instrument(span.clone()).await?
    };

    parts.extensions.insert(trace_id);
    parts.extensions.insert(identity);
    let req = Request::from_parts(parts, Body::from(body));

    Ok(next.run(req).instrument(span).await)
}

/// Identity placed by [`auth_middleware`].
pub fn require_identity(req: &Request) -> ApiResult<&Identity> {
    req.extensions()
        .get::<Identity>()
        .ok_or_else(|| ApiError::Unauthenticated("authentication required".to_string()))
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}
