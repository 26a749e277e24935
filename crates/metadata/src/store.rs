//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{
    DepotRepo, OwnershipRepo, PairingRepo, RefCountRepo, RoleRepo, TicketRepo, TokenRepo,
    UsageRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Rows removed by [`MetadataStore::purge_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub tokens: u64,
    pub tickets: u64,
    pub pending_pairings: u64,
    pub authorized_keys: u64,
}

impl PurgeStats {
    pub fn total(&self) -> u64 {
        self.tokens + self.tickets + self.pending_pairings + self.authorized_keys
    }
}

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    OwnershipRepo
    + RefCountRepo
    + UsageRepo
    + DepotRepo
    + TokenRepo
    + TicketRepo
    + PairingRepo
    + RoleRepo
    + Send
    + Sync
{
    /// Apply the schema. Idempotent.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Delete tokens, tickets, pending pairings and authorized keys that expired by `now`.
    async fn purge_expired(&self, now: OffsetDateTime) -> MetadataResult<PurgeStats>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

const MEMORY_PATH: &str = ":memory:";

impl SqliteStore {
    /// Open (creating if needed) and migrate a SQLite store. `:memory:` gives a private in-process database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let in_memory = path.as_os_str() == MEMORY_PATH;

        let base = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };
        let opts = base
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        // One connection serializes writers, which is what makes the
        // conditional updates and short transactions below atomic. An
        // in-memory database lives only as long as that connection.
        let mut pool_opts = SqlitePoolOptions::new().max_connections(1);
        if in_memory {
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_opts.connect_with(opts).await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs = query_timeout_secs.unwrap_or(600),
            "SQLite metadata store ready; query timeout is advisory"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> MetadataResult<PurgeStats> {
        let mut tx = self.pool.begin().await?;
        let tokens = sqlx::query("DELETE FROM tokens WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let tickets = sqlx::query("DELETE FROM tickets WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let pending_pairings = sqlx::query("DELETE FROM pending_pairings WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let authorized_keys = sqlx::query("DELETE FROM authorized_keys WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(PurgeStats {
            tokens,
            tickets,
            pending_pairings,
            authorized_keys,
        })
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::{DepotAdvance, RefDecrement, RefIncrement};
    use std::collections::HashSet;

    #[async_trait]
    impl OwnershipRepo for SqliteStore {
        async fn has_ownership(&self, realm: &str, node_key: &str) -> MetadataResult<bool> {
            let row: Option<(i64,)> =
                sqlx::query_as("SELECT 1 FROM ownership WHERE realm = ? AND node_key = ?")
                    .bind(realm)
                    .bind(node_key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.is_some())
        }

        async fn add_ownership(&self, row: &OwnershipRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO ownership (realm, node_key, kind, size, content_type, created_by, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(realm, node_key) DO NOTHING
                "#,
            )
            .bind(&row.realm)
            .bind(&row.node_key)
            .bind(&row.kind)
            .bind(row.size)
            .bind(&row.content_type)
            .bind(&row.created_by)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_ownership(
            &self,
            realm: &str,
            node_key: &str,
        ) -> MetadataResult<Option<OwnershipRow>> {
            let row = sqlx::query_as::<_, OwnershipRow>(
                "SELECT * FROM ownership WHERE realm = ? AND node_key = ?",
            )
            .bind(realm)
            .bind(node_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn owned_keys(
            &self,
            realm: &str,
            node_keys: &[String],
        ) -> MetadataResult<HashSet<String>> {
            // SQLite has a limit of ~999 parameters per statement.
            const BATCH_SIZE: usize = 900;
            let mut owned = HashSet::with_capacity(node_keys.len());

            for batch in node_keys.chunks(BATCH_SIZE) {
                let placeholders = vec!["?"; batch.len()].join(", ");
                let query = format!(
                    "SELECT node_key FROM ownership WHERE realm = ? AND node_key IN ({placeholders})"
                );
                let mut builder = sqlx::query_scalar::<_, String>(&query).bind(realm);
                for key in batch {
                    builder = builder.bind(key);
                }
                owned.extend(builder.fetch_all(&self.pool).await?);
            }
            Ok(owned)
        }
    }

    #[async_trait]
    impl RefCountRepo for SqliteStore {
        async fn increment_ref(
            &self,
            realm: &str,
            node_key: &str,
            physical_size: i64,
            logical_size: i64,
            now: OffsetDateTime,
        ) -> MetadataResult<RefIncrement> {
            let mut tx = self.pool.begin().await?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO refcounts (realm, node_key, count, physical_size, logical_size, gc_status, created_at, pending_since)
                VALUES (?, ?, 1, ?, ?, 'active', ?, NULL)
                ON CONFLICT(realm, node_key) DO NOTHING
                "#,
            )
            .bind(realm)
            .bind(node_key)
            .bind(physical_size)
            .bind(logical_size)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;

            let count: i64 = if inserted {
                1
            } else {
                sqlx::query_scalar(
                    r#"
                    UPDATE refcounts
                    SET count = count + 1, gc_status = 'active', pending_since = NULL
                    WHERE realm = ? AND node_key = ?
                    RETURNING count
                    "#,
                )
                .bind(realm)
                .bind(node_key)
                .fetch_one(&mut *tx)
                .await?
            };
            tx.commit().await?;

            Ok(RefIncrement {
                is_new_to_realm: inserted,
                count: to_u64(count)?,
            })
        }

        async fn decrement_ref(
            &self,
            realm: &str,
            node_key: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<RefDecrement> {
            // SET expressions all see the pre-update count.
            let count: Option<i64> = sqlx::query_scalar(
                r#"
                UPDATE refcounts
                SET count = count - 1,
                    gc_status = CASE WHEN count - 1 = 0 THEN 'pending' ELSE gc_status END,
                    pending_since = CASE WHEN count - 1 = 0 THEN ? ELSE pending_since END
                WHERE realm = ? AND node_key = ? AND count > 0
                RETURNING count
                "#,
            )
            .bind(now)
            .bind(realm)
            .bind(node_key)
            .fetch_optional(&self.pool)
            .await?;

            match count {
                Some(count) => Ok(RefDecrement {
                    count: to_u64(count)?,
                    became_pending: count == 0,
                }),
                None => match self.get_ref(realm, node_key).await? {
                    // Already at zero: stays there.
                    Some(_) => Ok(RefDecrement {
                        count: 0,
                        became_pending: false,
                    }),
                    None => Err(MetadataError::NotFound(format!(
                        "refcount {node_key} in {realm}"
                    ))),
                },
            }
        }

        async fn get_ref(
            &self,
            realm: &str,
            node_key: &str,
        ) -> MetadataResult<Option<RefCountRow>> {
            let row = sqlx::query_as::<_, RefCountRow>(
                "SELECT * FROM refcounts WHERE realm = ? AND node_key = ?",
            )
            .bind(realm)
            .bind(node_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_pending(
            &self,
            realm: &str,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<RefCountRow>> {
            let rows = sqlx::query_as::<_, RefCountRow>(
                r#"
                SELECT * FROM refcounts
                WHERE realm = ? AND gc_status = 'pending' AND pending_since < ?
                ORDER BY pending_since
                LIMIT ?
                "#,
            )
            .bind(realm)
            .bind(older_than)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl UsageRepo for SqliteStore {
        async fn get_usage(&self, realm: &str) -> MetadataResult<Option<UsageRow>> {
            let row = sqlx::query_as::<_, UsageRow>("SELECT * FROM realm_usage WHERE realm = ?")
                .bind(realm)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn add_usage(
            &self,
            realm: &str,
            physical_bytes: i64,
            logical_bytes: i64,
            node_count: i64,
            now: OffsetDateTime,
        ) -> MetadataResult<UsageRow> {
            let row = sqlx::query_as::<_, UsageRow>(
                r#"
                INSERT INTO realm_usage (realm, physical_bytes, logical_bytes, node_count, quota_limit, updated_at)
                VALUES (?, ?, ?, ?, NULL, ?)
                ON CONFLICT(realm) DO UPDATE SET
                    physical_bytes = physical_bytes + excluded.physical_bytes,
                    logical_bytes = logical_bytes + excluded.logical_bytes,
                    node_count = node_count + excluded.node_count,
                    updated_at = excluded.updated_at
                RETURNING *
                "#,
            )
            .bind(realm)
            .bind(physical_bytes)
            .bind(logical_bytes)
            .bind(node_count)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn set_quota(
            &self,
            realm: &str,
            quota_limit: Option<i64>,
            now: OffsetDateTime,
        ) -> MetadataResult<UsageRow> {
            let row = sqlx::query_as::<_, UsageRow>(
                r#"
                INSERT INTO realm_usage (realm, physical_bytes, logical_bytes, node_count, quota_limit, updated_at)
                VALUES (?, 0, 0, 0, ?, ?)
                ON CONFLICT(realm) DO UPDATE SET
                    quota_limit = excluded.quota_limit,
                    updated_at = excluded.updated_at
                RETURNING *
                "#,
            )
            .bind(realm)
            .bind(quota_limit)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl DepotRepo for SqliteStore {
        async fn create_depot(
            &self,
            depot: &DepotRow,
            message: Option<&str>,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO depots (depot_id, realm, name, root, version, description, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&depot.depot_id)
            .bind(&depot.realm)
            .bind(&depot.name)
            .bind(&depot.root)
            .bind(depot.version)
            .bind(&depot.description)
            .bind(depot.created_at)
            .bind(depot.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(MetadataError::on_unique(format!(
                "depot {} in {}",
                depot.name, depot.realm
            )))?;

            sqlx::query(
                "INSERT INTO depot_history (depot_id, version, root, message, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&depot.depot_id)
            .bind(depot.version)
            .bind(&depot.root)
            .bind(message)
            .bind(depot.created_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn get_depot(&self, realm: &str, depot_id: &str) -> MetadataResult<Option<DepotRow>> {
            let row = sqlx::query_as::<_, DepotRow>(
                "SELECT * FROM depots WHERE realm = ? AND depot_id = ?",
            )
            .bind(realm)
            .bind(depot_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_depot_by_name(
            &self,
            realm: &str,
            name: &str,
        ) -> MetadataResult<Option<DepotRow>> {
            let row =
                sqlx::query_as::<_, DepotRow>("SELECT * FROM depots WHERE realm = ? AND name = ?")
                    .bind(realm)
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn list_depots(
            &self,
            realm: &str,
            after: Option<&str>,
            limit: u32,
        ) -> MetadataResult<Vec<DepotRow>> {
            let rows = sqlx::query_as::<_, DepotRow>(
                "SELECT * FROM depots WHERE realm = ? AND depot_id > ? ORDER BY depot_id LIMIT ?",
            )
            .bind(realm)
            .bind(after.unwrap_or(""))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn advance_depot(
            &self,
            realm: &str,
            depot_id: &str,
            new_root: &str,
            message: Option<&str>,
            skip_if_current: bool,
            max_history: u32,
            now: OffsetDateTime,
        ) -> MetadataResult<DepotAdvance> {
            let mut tx = self.pool.begin().await?;

            let current = sqlx::query_as::<_, DepotRow>(
                "SELECT * FROM depots WHERE realm = ? AND depot_id = ?",
            )
            .bind(realm)
            .bind(depot_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("depot {depot_id}")))?;

            if skip_if_current && current.root == new_root {
                tx.rollback().await?;
                return Ok(DepotAdvance {
                    previous_root: current.root.clone(),
                    depot: current,
                    changed: false,
                });
            }

            let depot = sqlx::query_as::<_, DepotRow>(
                r#"
                UPDATE depots SET root = ?, version = version + 1, updated_at = ?
                WHERE realm = ? AND depot_id = ?
                RETURNING *
                "#,
            )
            .bind(new_root)
            .bind(now)
            .bind(realm)
            .bind(depot_id)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO depot_history (depot_id, version, root, message, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(depot_id)
            .bind(depot.version)
            .bind(new_root)
            .bind(message)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if max_history > 0 {
                sqlx::query("DELETE FROM depot_history WHERE depot_id = ? AND version <= ?")
                    .bind(depot_id)
                    .bind(depot.version - i64::from(max_history))
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(DepotAdvance {
                depot,
                previous_root: current.root,
                changed: true,
            })
        }

        async fn delete_depot(
            &self,
            realm: &str,
            depot_id: &str,
        ) -> MetadataResult<Option<DepotRow>> {
            let mut tx = self.pool.begin().await?;
            let deleted = sqlx::query_as::<_, DepotRow>(
                "DELETE FROM depots WHERE realm = ? AND depot_id = ? RETURNING *",
            )
            .bind(realm)
            .bind(depot_id)
            .fetch_optional(&mut *tx)
            .await?;

            if deleted.is_some() {
                sqlx::query("DELETE FROM depot_history WHERE depot_id = ?")
                    .bind(depot_id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(deleted)
        }

        async fn get_history_entry(
            &self,
            depot_id: &str,
            version: i64,
        ) -> MetadataResult<Option<DepotHistoryRow>> {
            let row = sqlx::query_as::<_, DepotHistoryRow>(
                "SELECT * FROM depot_history WHERE depot_id = ? AND version = ?",
            )
            .bind(depot_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_history(
            &self,
            depot_id: &str,
            before_version: Option<i64>,
            limit: u32,
        ) -> MetadataResult<Vec<DepotHistoryRow>> {
            let rows = sqlx::query_as::<_, DepotHistoryRow>(
                r#"
                SELECT * FROM depot_history
                WHERE depot_id = ? AND version < ?
                ORDER BY version DESC
                LIMIT ?
                "#,
            )
            .bind(depot_id)
            .bind(before_version.unwrap_or(i64::MAX))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, kind, user_id, token_hash, refresh_token_hash,
                    name, description, created_at, expires_at, last_used_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&token.token_id)
            .bind(&token.kind)
            .bind(&token.user_id)
            .bind(&token.token_hash)
            .bind(&token.refresh_token_hash)
            .bind(&token.name)
            .bind(&token.description)
            .bind(token.created_at)
            .bind(token.expires_at)
            .bind(token.last_used_at)
            .execute(&self.pool)
            .await
            .map_err(MetadataError::on_unique(format!("token {}", token.token_id)))?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_token(&self, token_id: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_id = ?")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_id: &str, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_id = ?")
                .bind(used_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn list_tokens(
            &self,
            user_id: &str,
            kind: TokenKind,
        ) -> MetadataResult<Vec<TokenRow>> {
            let rows = sqlx::query_as::<_, TokenRow>(
                "SELECT * FROM tokens WHERE user_id = ? AND kind = ? ORDER BY created_at DESC",
            )
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_token(&self, user_id: &str, token_id: &str) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM tokens WHERE user_id = ? AND token_id = ?")
                .bind(user_id)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl TicketRepo for SqliteStore {
        async fn create_ticket(&self, ticket: &TicketRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tickets (
                    ticket_id, realm, issuer_id, issuer_fingerprint, scope_json,
                    commit_enabled, commit_quota, commit_accept_json, commit_root,
                    expires_in_secs, max_quota_bytes, created_at, expires_at, revoked_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&ticket.ticket_id)
            .bind(&ticket.realm)
            .bind(&ticket.issuer_id)
            .bind(&ticket.issuer_fingerprint)
            .bind(&ticket.scope_json)
            .bind(ticket.commit_enabled)
            .bind(ticket.commit_quota)
            .bind(&ticket.commit_accept_json)
            .bind(&ticket.commit_root)
            .bind(ticket.expires_in_secs)
            .bind(ticket.max_quota_bytes)
            .bind(ticket.created_at)
            .bind(ticket.expires_at)
            .bind(ticket.revoked_at)
            .execute(&self.pool)
            .await
            .map_err(MetadataError::on_unique(format!("ticket {}", ticket.ticket_id)))?;
            Ok(())
        }

        async fn get_ticket(&self, ticket_id: &str) -> MetadataResult<Option<TicketRow>> {
            let row = sqlx::query_as::<_, TicketRow>("SELECT * FROM tickets WHERE ticket_id = ?")
                .bind(ticket_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_tickets(
            &self,
            realm: &str,
            after: Option<&str>,
            limit: u32,
        ) -> MetadataResult<Vec<TicketRow>> {
            let rows = sqlx::query_as::<_, TicketRow>(
                "SELECT * FROM tickets WHERE realm = ? AND ticket_id > ? ORDER BY ticket_id LIMIT ?",
            )
            .bind(realm)
            .bind(after.unwrap_or(""))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn mark_committed(&self, ticket_id: &str, root: &str) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE tickets SET commit_root = ?
                WHERE ticket_id = ? AND commit_enabled = 1 AND commit_root IS NULL
                "#,
            )
            .bind(root)
            .bind(ticket_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn revoke_ticket(&self, ticket_id: &str, now: OffsetDateTime) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE tickets SET revoked_at = ? WHERE ticket_id = ? AND revoked_at IS NULL",
            )
            .bind(now)
            .bind(ticket_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }
    }

    #[async_trait]
    impl PairingRepo for SqliteStore {
        async fn upsert_pending_pairing(&self, pairing: &PendingPairingRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO pending_pairings (public_key, client_name, verification_code, created_at, expires_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(public_key) DO UPDATE SET
                    client_name = excluded.client_name,
                    verification_code = excluded.verification_code,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(&pairing.public_key)
            .bind(&pairing.client_name)
            .bind(&pairing.verification_code)
            .bind(pairing.created_at)
            .bind(pairing.expires_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_pending_pairing(
            &self,
            public_key: &str,
        ) -> MetadataResult<Option<PendingPairingRow>> {
            let row = sqlx::query_as::<_, PendingPairingRow>(
                "SELECT * FROM pending_pairings WHERE public_key = ?",
            )
            .bind(public_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn complete_pairing(&self, key: &AuthorizedKeyRow) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            let consumed = sqlx::query("DELETE FROM pending_pairings WHERE public_key = ?")
                .bind(&key.public_key)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if consumed == 0 {
                tx.rollback().await?;
                return Ok(false);
            }

            sqlx::query(
                r#"
                INSERT INTO authorized_keys (public_key, user_id, client_name, created_at, expires_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(public_key) DO UPDATE SET
                    user_id = excluded.user_id,
                    client_name = excluded.client_name,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(&key.public_key)
            .bind(&key.user_id)
            .bind(&key.client_name)
            .bind(key.created_at)
            .bind(key.expires_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(true)
        }

        async fn get_authorized_key(
            &self,
            public_key: &str,
        ) -> MetadataResult<Option<AuthorizedKeyRow>> {
            let row = sqlx::query_as::<_, AuthorizedKeyRow>(
                "SELECT * FROM authorized_keys WHERE public_key = ?",
            )
            .bind(public_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_authorized_keys(&self, user_id: &str) -> MetadataResult<Vec<AuthorizedKeyRow>> {
            let rows = sqlx::query_as::<_, AuthorizedKeyRow>(
                "SELECT * FROM authorized_keys WHERE user_id = ? ORDER BY created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_authorized_key(
            &self,
            user_id: &str,
            public_key: &str,
        ) -> MetadataResult<bool> {
            let result =
                sqlx::query("DELETE FROM authorized_keys WHERE user_id = ? AND public_key = ?")
                    .bind(user_id)
                    .bind(public_key)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl RoleRepo for SqliteStore {
        async fn get_user_role(&self, user_id: &str) -> MetadataResult<Option<String>> {
            let role: Option<String> =
                sqlx::query_scalar("SELECT role FROM user_roles WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(role)
        }

        async fn set_user_role(
            &self,
            user_id: &str,
            role: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO user_roles (user_id, role, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(user_id) DO UPDATE SET role = excluded.role, updated_at = excluded.updated_at
                "#,
            )
            .bind(user_id)
            .bind(role)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Ownership: which realm may read which node
CREATE TABLE IF NOT EXISTS ownership (
    realm TEXT NOT NULL,
    node_key TEXT NOT NULL,
    kind TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_type TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (realm, node_key)
);

-- Reference counts and GC status
CREATE TABLE IF NOT EXISTS refcounts (
    realm TEXT NOT NULL,
    node_key TEXT NOT NULL,
    count INTEGER NOT NULL CHECK (count >= 0),
    physical_size INTEGER NOT NULL,
    logical_size INTEGER NOT NULL,
    gc_status TEXT NOT NULL DEFAULT 'active' CHECK (gc_status IN ('active', 'pending')),
    created_at TEXT NOT NULL,
    pending_since TEXT,
    PRIMARY KEY (realm, node_key)
);
CREATE INDEX IF NOT EXISTS idx_refcounts_pending ON refcounts(realm, gc_status, pending_since);

-- Per-realm usage totals
CREATE TABLE IF NOT EXISTS realm_usage (
    realm TEXT PRIMARY KEY,
    physical_bytes INTEGER NOT NULL DEFAULT 0,
    logical_bytes INTEGER NOT NULL DEFAULT 0,
    node_count INTEGER NOT NULL DEFAULT 0,
    quota_limit INTEGER,
    updated_at TEXT NOT NULL
);

-- Depots and their append-only history
CREATE TABLE IF NOT EXISTS depots (
    depot_id TEXT PRIMARY KEY,
    realm TEXT NOT NULL,
    name TEXT NOT NULL,
    root TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 1),
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (realm, name)
);
CREATE INDEX IF NOT EXISTS idx_depots_realm ON depots(realm, depot_id);

CREATE TABLE IF NOT EXISTS depot_history (
    depot_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    root TEXT NOT NULL,
    message TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (depot_id, version)
);

-- User sessions and agent tokens
CREATE TABLE IF NOT EXISTS tokens (
    token_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('user', 'agent')),
    user_id TEXT NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    refresh_token_hash TEXT,
    name TEXT,
    description TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    last_used_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id, kind);

-- Tickets
CREATE TABLE IF NOT EXISTS tickets (
    ticket_id TEXT PRIMARY KEY,
    realm TEXT NOT NULL,
    issuer_id TEXT NOT NULL,
    issuer_fingerprint TEXT,
    scope_json TEXT,
    commit_enabled INTEGER NOT NULL DEFAULT 0,
    commit_quota INTEGER,
    commit_accept_json TEXT NOT NULL DEFAULT '[]',
    commit_root TEXT,
    expires_in_secs INTEGER NOT NULL,
    max_quota_bytes INTEGER,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    revoked_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tickets_realm ON tickets(realm, ticket_id);

-- Pairing handshake and authorized client keys
CREATE TABLE IF NOT EXISTS pending_pairings (
    public_key TEXT PRIMARY KEY,
    client_name TEXT NOT NULL,
    verification_code TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS authorized_keys (
    public_key TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    client_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_authorized_keys_user ON authorized_keys(user_id);

-- Stored user roles
CREATE TABLE IF NOT EXISTS user_roles (
    user_id TEXT PRIMARY KEY,
    role TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
