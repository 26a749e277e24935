//! Credential resolution through the axum middleware.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Extension, Router};
use bytes::Bytes;
use cask_core::Identity;
use cask_server::handlers::{pairing, tokens};
use cask_server::metrics::AUTH_FAILURES;
use cask_server::auth::{get_trace_id, require_identity};
use cask_server::{ApiResult, AppState, StaticVerifier, TraceId, VerifiedSubject, auth_middleware};
use cask_signer::request::{PUBKEY_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use cask_signer::{SecretKey, SignedHeaders, sign_request};
use common::{TestApp, sign_now};
use std::sync::Arc;
use time::OffsetDateTime;
use tower::ServiceExt;

/// Echo who the middleware resolved and what body reached the handler.
async fn whoami(
    Extension(identity): Extension<Identity>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> String {
    format!(
        "{}:{}:{}:{}",
        identity.kind(),
        identity.user_id().unwrap_or("-"),
        body.len(),
        trace_id
    )
}

/// Same as [`whoami`] but reading the request extensions directly.
async fn raw(req: Request<Body>) -> ApiResult<String> {
    let identity = require_identity(&req)?;
    let trace = get_trace_id(&req).map(TraceId::as_str).unwrap_or("-");
    Ok(format!("{}:{}", identity.kind(), trace))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/whoami", post(whoami))
        .route("/raw", post(raw))
        .layer(axum::middleware::from_fn_with_state(state, auth_middleware))
}

async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, String) {
    let resp = router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn signed(headers: &SignedHeaders, body: &'static [u8]) -> Request<Body> {
    Request::post("/whoami")
        .header(PUBKEY_HEADER, &headers.public_key)
        .header(TIMESTAMP_HEADER, &headers.timestamp)
        .header(SIGNATURE_HEADER, &headers.signature)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_missing_credentials_rejected_as_json() {
    let app = TestApp::new().await;
    let req = Request::post("/whoami").body(Body::empty()).unwrap();
    let (status, body) = send(&app.state, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["code"], "unauthenticated");
}

#[tokio::test]
async fn test_bearer_session_and_trace_id() {
    let app = TestApp::new().await;
    let issued = tokens::create_user_token(&app.state, "alice", None, false)
        .await
        .unwrap();

    let req = Request::post("/whoami")
        .header("authorization", format!("Bearer {}", issued.secret))
        .header("x-trace-id", "trace-123")
        .body(Body::from("hi"))
        .unwrap();
    let (status, body) = send(&app.state, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "user:alice:2:trace-123");
}

#[tokio::test]
async fn test_signed_request_from_paired_key() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let key = app.paired_key(&alice).await;

    let body: &'static [u8] = b"{\"hello\":true}";
    let headers = sign_now(&key, "POST", "/whoami", body);
    let (status, echoed) = send(&app.state, signed(&headers, body)).await;
    assert_eq!(status, StatusCode::OK, "{echoed}");
    assert!(echoed.starts_with(&format!("agent:alice:{}:", body.len())));
}

#[tokio::test]
async fn test_signed_request_tampering_rejected() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let key = app.paired_key(&alice).await;

    let headers = sign_now(&key, "POST", "/whoami", b"original");
    let (status, _) = send(&app.state, signed(&headers, b"modified")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let headers = sign_now(&key, "POST", "/elsewhere", b"original");
    let (status, _) = send(&app.state, signed(&headers, b"original")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_request_outside_window_rejected() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let key = app.paired_key(&alice).await;

    let window = app.state.config.auth.signature_window_secs as i64;
    let stale = OffsetDateTime::now_utc().unix_timestamp() - window - 60;
    let headers = sign_request(&key, stale, "POST", "/whoami", b"");
    let (status, _) = send(&app.state, signed(&headers, b"")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_request_needs_authorized_key() {
    let app = TestApp::new().await;
    let before = AUTH_FAILURES.with_label_values(&["signed"]).get();

    let stranger = SecretKey::generate();
    let headers = sign_now(&stranger, "POST", "/whoami", b"");
    let (status, _) = send(&app.state, signed(&headers, b"")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(AUTH_FAILURES.with_label_values(&["signed"]).get() > before);

    // Missing signature headers fail outright rather than falling back.
    let issued = tokens::create_user_token(&app.state, "alice", None, false)
        .await
        .unwrap();
    let req = Request::post("/whoami")
        .header(PUBKEY_HEADER, stranger.public_key().to_base64())
        .header("authorization", format!("Bearer {}", issued.secret))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.state, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoked_key_stops_signing() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let key = app.paired_key(&alice).await;
    pairing::revoke(&app.state, &alice, &key.public_key().to_base64())
        .await
        .unwrap();

    let headers = sign_now(&key, "POST", "/whoami", b"");
    let (status, _) = send(&app.state, signed(&headers, b"")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bearer_verifier_fallback() {
    let app = TestApp::new().await;
    let verifier = StaticVerifier::new().with(
        "idp-assertion",
        VerifiedSubject {
            subject: "carol".to_string(),
            expires_at: None,
        },
    );
    let state = app.state.clone().with_bearer_verifier(Arc::new(verifier));

    let req = Request::post("/whoami")
        .header("authorization", "Bearer idp-assertion")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("user:carol:0:"));

    let req = Request::post("/whoami")
        .header("authorization", "Bearer forged")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_agent_scheme_rejects_user_sessions_and_expired_tokens() {
    let app = TestApp::new().await;
    let session = tokens::create_user_token(&app.state, "alice", None, false)
        .await
        .unwrap();
    let req = Request::post("/whoami")
        .header("authorization", format!("Agent {}", session.secret))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.state, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let alice = app.user("alice").await;
    let expired = tokens::create_agent_token(
        &app.state,
        &alice,
        tokens::CreateAgentTokenRequest {
            name: "short".to_string(),
            description: None,
            expires_in: Some(1),
        },
    )
    .await
    .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let req = Request::post("/whoami")
        .header("authorization", format!("Agent {}", expired.secret))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.state, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ticket_bearer_resolves_to_ticket() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let (ticket, _) = app.ticket(&alice, Default::default()).await;

    let req = Request::post("/whoami")
        .header("authorization", format!("Bearer {}", ticket.id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.state, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("ticket:-:0:"));
}

#[tokio::test]
async fn test_extensions_visible_to_plain_handlers() {
    let app = TestApp::new().await;
    let issued = tokens::create_user_token(&app.state, "alice", None, false)
        .await
        .unwrap();
    let req = Request::post("/raw")
        .header("authorization", format!("Bearer {}", issued.secret))
        .header("x-trace-id", "t".repeat(200))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.state, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, format!("user:{}", "t".repeat(128)));
}
