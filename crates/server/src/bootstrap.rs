//! Process startup: configuration, tracing and the shared state.

use crate::state::AppState;
use anyhow::{Context, Result, bail};
use cask_core::Role;
use cask_core::config::AppConfig;
use cask_metadata::MetadataStore;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::Path;
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prefix of configuration environment variables. Nested keys use `__`.
pub const ENV_PREFIX: &str = "CASK_";

/// Load configuration from an optional TOML file overridden by `CASK_*` variables.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if path.exists() {
            tracing::info!(config_path = %path.display(), "loading configuration from file");
            figment = figment.merge(Toml::file(path));
        } else {
            tracing::debug!(config_path = %path.display(), "no configuration file found");
        }
    }

    let config: AppConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")?;
    if let Err(e) = config.validate() {
        bail!("invalid configuration: {e}");
    }
    Ok(config)
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Open the blob and metadata stores, check them, and assemble the state.
pub async fn build_state(config: AppConfig) -> Result<AppState> {
    crate::metrics::register_metrics();

    let objects = cask_storage::from_config(&config.storage)
        .await
        .context("failed to initialize blob storage")?;
    objects
        .health_check()
        .await
        .context("blob storage health check failed")?;
    tracing::info!(backend = objects.backend_name(), "blob storage ready");

    let metadata = cask_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("metadata store ready");

    ensure_admin_roles(metadata.as_ref(), &config.auth.admin_users).await?;
    Ok(AppState::new(config, objects, metadata))
}

/// Promote the configured users to `admin`.
pub async fn ensure_admin_roles(metadata: &dyn MetadataStore, admin_users: &[String]) -> Result<()> {
    let now = OffsetDateTime::now_utc();
    for user_id in admin_users {
        let current = metadata
            .get_user_role(user_id)
            .await
            .with_context(|| format!("failed to read role of {user_id}"))?;
        if current.as_deref() == Some(Role::Admin.as_str()) {
            continue;
        }
        metadata
            .set_user_role(user_id, Role::Admin.as_str(), now)
            .await
            .with_context(|| format!("failed to promote {user_id}"))?;
        tracing::info!(user_id = %user_id, "promoted configured admin");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_metadata::SqliteStore;
    use cask_metadata::repos::RoleRepo;

    #[tokio::test]
    async fn test_admin_roles_are_idempotent() {
        let store = SqliteStore::new(":memory:", None).await.unwrap();
        let admins = vec!["root".to_string()];
        ensure_admin_roles(&store, &admins).await.unwrap();
        ensure_admin_roles(&store, &admins).await.unwrap();
        assert_eq!(
            store.get_user_role("root").await.unwrap().as_deref(),
            Some("admin")
        );
        assert!(store.get_user_role("other").await.unwrap().is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cask.toml");
        std::fs::write(
            &path,
            r#"
[storage]
type = "memory"

[tickets]
max_expires_in_secs = 7200
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.tickets.max_expires_in_secs, 7200);
        assert_eq!(config.tickets.default_expires_in_secs, 3600);
    }
}
