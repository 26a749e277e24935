//! Configuration types shared across crates.

use crate::identity::Role;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Blob storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// Process-local memory (tests and throwaway instances).
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("filesystem storage requires a non-empty path".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database. `:memory:` gives a throwaway in-process store.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Advisory query timeout in seconds; slow queries are logged, not cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { path, .. } if path.as_os_str().is_empty() => {
                Err("sqlite metadata requires a non-empty path".to_string())
            }
            MetadataConfig::Sqlite { .. } => Ok(()),
        }
    }
}

/// Authentication configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted clock skew for signed requests, in seconds either side of now.
    #[serde(default = "default_signature_window_secs")]
    pub signature_window_secs: u64,
    /// Role for users with no stored role.
    #[serde(default = "default_role")]
    pub default_role: Role,
    /// Users promoted to admin at startup.
    #[serde(default)]
    pub admin_users: Vec<String>,
}

fn default_signature_window_secs() -> u64 {
    300
}

fn default_role() -> Role {
    Role::Unauthorized
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signature_window_secs: default_signature_window_secs(),
            default_role: default_role(),
            admin_users: Vec::new(),
        }
    }
}

/// Ticket issuance limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketConfig {
    /// Lifetime when the client does not ask for one.
    #[serde(default = "default_ticket_expires_in_secs")]
    pub default_expires_in_secs: u64,
    /// Hard ceiling on any ticket lifetime.
    #[serde(default = "default_ticket_max_expires_in_secs")]
    pub max_expires_in_secs: u64,
    /// Ceiling on a ticket's per-upload byte quota; unset means uncapped.
    #[serde(default)]
    pub max_quota_bytes: Option<u64>,
}

fn default_ticket_expires_in_secs() -> u64 {
    3600
}

fn default_ticket_max_expires_in_secs() -> u64 {
    86400
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            default_expires_in_secs: default_ticket_expires_in_secs(),
            max_expires_in_secs: default_ticket_max_expires_in_secs(),
            max_quota_bytes: None,
        }
    }
}

/// Depot configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DepotConfig {
    /// History entries kept per depot; 0 keeps everything.
    #[serde(default)]
    pub max_history: u32,
}

/// Realm storage quota configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Physical bytes a realm may hold unless overridden per realm; unset means unlimited.
    #[serde(default)]
    pub default_realm_bytes: Option<u64>,
}

/// Device pairing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PairingConfig {
    /// How long a pending pairing code stays valid.
    #[serde(default = "default_code_ttl_secs")]
    pub code_ttl_secs: u64,
    /// Lifetime of an authorized client key.
    #[serde(default = "default_key_ttl_secs")]
    pub key_ttl_secs: u64,
    /// Poll interval suggested to the client.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Page a user visits to approve a pairing.
    #[serde(default = "default_verification_url")]
    pub verification_url: String,
}

fn default_code_ttl_secs() -> u64 {
    600 // 10 minutes
}

fn default_key_ttl_secs() -> u64 {
    30 * 24 * 3600 // 30 days
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_verification_url() -> String {
    "http://127.0.0.1:8080/pair".to_string()
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: default_code_ttl_secs(),
            key_ttl_secs: default_key_ttl_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            verification_url: default_verification_url(),
        }
    }
}

impl PairingConfig {
    pub fn code_ttl(&self) -> Duration {
        seconds(self.code_ttl_secs)
    }

    pub fn key_ttl(&self) -> Duration {
        seconds(self.key_ttl_secs)
    }
}

/// Saturating conversion of configured seconds.
fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Blob storage backend.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store.
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub tickets: TicketConfig,
    #[serde(default)]
    pub depots: DepotConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
}

impl AppConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** Uses memory blobs and in-memory SQLite.
    pub fn for_testing() -> Self {
        Self {
            storage: StorageConfig::Memory,
            metadata: MetadataConfig::Sqlite {
                path: PathBuf::from(":memory:"),
                query_timeout_secs: None,
            },
            ..Self::default()
        }
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()?;
        if self.tickets.max_expires_in_secs == 0 {
            return Err("tickets.max_expires_in_secs must be positive".to_string());
        }
        if self.tickets.default_expires_in_secs > self.tickets.max_expires_in_secs {
            return Err(format!(
                "tickets.default_expires_in_secs ({}) exceeds tickets.max_expires_in_secs ({})",
                self.tickets.default_expires_in_secs, self.tickets.max_expires_in_secs
            ));
        }
        if self.pairing.code_ttl_secs == 0 || self.pairing.key_ttl_secs == 0 {
            return Err("pairing TTLs must be positive".to_string());
        }
        if self.auth.signature_window_secs == 0 {
            return Err("auth.signature_window_secs must be positive".to_string());
        }
        Ok(())
    }
}
