//! Application state fixtures and credential helpers.

use cask_core::config::{AppConfig, MetadataConfig, StorageConfig};
use cask_core::{Identity, Role, Ticket, TicketRequest};
use cask_metadata::{MetadataStore, SqliteStore};
use cask_server::handlers::{pairing, tickets, tokens};
use cask_server::{AppState, Credentials, authenticate};
use cask_signer::{SecretKey, SignedHeaders, sign_request};
use cask_storage::{FilesystemBackend, MemoryBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;

/// A fully wired state. Keeps its temp directory alive when on disk.
#[allow(dead_code)]
pub struct TestApp {
    pub state: AppState,
    _temp_dir: Option<TempDir>,
}

#[allow(dead_code)]
impl TestApp {
    /// In-memory SQLite and memory blobs.
    pub async fn new() -> Self {
        Self::with_config(AppConfig::for_testing()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(":memory:", None)
                .await
                .expect("in-memory metadata store"),
        );
        let objects: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
        Self {
            state: AppState::new(config, objects, metadata),
            _temp_dir: None,
        }
    }

    /// SQLite file and filesystem blobs under a temp directory.
    pub async fn on_disk() -> Self {
        let temp_dir = tempfile::tempdir().expect("temp directory");
        let blob_path = temp_dir.path().join("blobs");
        let db_path = temp_dir.path().join("metadata.db");

        let objects: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&blob_path)
                .await
                .expect("filesystem backend"),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("sqlite metadata store"),
        );
        let config = AppConfig {
            storage: StorageConfig::Filesystem { path: blob_path },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
            ..AppConfig::for_testing()
        };
        Self {
            state: AppState::new(config, objects, metadata),
            _temp_dir: Some(temp_dir),
        }
    }

    pub async fn grant(&self, user_id: &str, role: Role) {
        self.state
            .metadata
            .set_user_role(user_id, role.as_str(), OffsetDateTime::now_utc())
            .await
            .expect("set role");
    }

    /// Resolve an `Authorization` header value the way the middleware would.
    pub async fn authenticate_header(&self, header: &str) -> cask_server::ApiResult<Identity> {
        let creds = Credentials {
            authorization: Some(header),
            method: "GET",
            path: "/",
            ..Default::default()
        };
        authenticate(&self.state, &creds).await
    }

    /// An authorized user session backed by a stored token.
    pub async fn user(&self, user_id: &str) -> Identity {
        self.grant(user_id, Role::Authorized).await;
        let issued = tokens::create_user_token(&self.state, user_id, None, false)
            .await
            .expect("user token");
        self.authenticate_header(&format!("Bearer {}", issued.secret))
            .await
            .expect("user session resolves")
    }

    /// An agent token minted by `owner`, resolved through the `Agent` scheme.
    pub async fn agent(&self, owner: &Identity, name: &str) -> Identity {
        let issued = tokens::create_agent_token(
            &self.state,
            owner,
            tokens::CreateAgentTokenRequest {
                name: name.to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("agent token");
        self.authenticate_header(&format!("Agent {}", issued.secret))
            .await
            .expect("agent resolves")
    }

    /// Issue a ticket and resolve it as a caller.
    pub async fn ticket(&self, issuer: &Identity, request: TicketRequest) -> (Ticket, Identity) {
        let ticket = tickets::create(&self.state, issuer, "@me", request)
            .await
            .expect("ticket issued");
        let identity = self
            .authenticate_header(&format!("Bearer {}", ticket.id))
            .await
            .expect("ticket resolves");
        (ticket, identity)
    }

    /// Pair a fresh client key to `owner` and return it.
    pub async fn paired_key(&self, owner: &Identity) -> SecretKey {
        let key = SecretKey::generate();
        let public_key = key.public_key().to_base64();
        let started = pairing::init(&self.state, &public_key, "test client")
            .await
            .expect("pairing init");
        pairing::complete(&self.state, owner, &public_key, &started.verification_code)
            .await
            .expect("pairing complete");
        key
    }
}

/// Sign a request at the current time.
#[allow(dead_code)]
pub fn sign_now(key: &SecretKey, method: &str, path: &str, body: &[u8]) -> SignedHeaders {
    sign_request(
        key,
        OffsetDateTime::now_utc().unix_timestamp(),
        method,
        path,
        body,
    )
}
