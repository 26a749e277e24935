//! Integration tests for the SQLite metadata store.

use cask_core::{CommitConfig, Realm, Ticket, TicketId, TicketLimits};
use cask_metadata::models::*;
use cask_metadata::{MetadataError, MetadataStore, SqliteStore};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

async fn store() -> Arc<dyn MetadataStore> {
    Arc::new(SqliteStore::new(":memory:", None).await.unwrap())
}

fn hex(seed: &str) -> String {
    cask_core::sha256_hex(seed.as_bytes())
}

fn ticket_row(realm: &str, commit: bool, expires_at: OffsetDateTime) -> TicketRow {
    let now = OffsetDateTime::now_utc();
    let ticket = Ticket {
        id: TicketId::new(),
        realm: Realm::parse(realm).unwrap(),
        issuer_id: "alice".to_string(),
        issuer_fingerprint: None,
        scope: None,
        commit: commit.then(CommitConfig::default),
        limits: TicketLimits {
            expires_in_secs: 60,
            max_quota_bytes: None,
        },
        created_at: now,
        expires_at,
        revoked_at: None,
    };
    TicketRow::from_ticket(&ticket).unwrap()
}

fn token_row(user_id: &str, kind: TokenKind, expires_at: Option<OffsetDateTime>) -> TokenRow {
    let id = cask_core::TokenId::new();
    TokenRow {
        token_hash: hex(id.as_str()),
        token_id: id.to_string(),
        kind: kind.as_str().to_string(),
        user_id: user_id.to_string(),
        refresh_token_hash: None,
        name: None,
        description: None,
        created_at: OffsetDateTime::now_utc(),
        expires_at,
        last_used_at: None,
    }
}

#[tokio::test]
async fn test_refcount_transitions() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let key = hex("node");

    let first = store.increment_ref("usr_a", &key, 10, 4, now).await.unwrap();
    assert!(first.is_new_to_realm);
    let second = store.increment_ref("usr_a", &key, 10, 4, now).await.unwrap();
    assert!(!second.is_new_to_realm);
    assert_eq!(second.count, 2);

    let dec = store.decrement_ref("usr_a", &key, now).await.unwrap();
    assert_eq!((dec.count, dec.became_pending), (1, false));
    let row = store.get_ref("usr_a", &key).await.unwrap().unwrap();
    assert_eq!(row.status().unwrap(), GcStatus::Active);

    let dec = store.decrement_ref("usr_a", &key, now).await.unwrap();
    assert_eq!((dec.count, dec.became_pending), (0, true));
    let row = store.get_ref("usr_a", &key).await.unwrap().unwrap();
    assert_eq!(row.status().unwrap(), GcStatus::Pending);
    assert!(row.pending_since.is_some());

    // Never below zero.
    let dec = store.decrement_ref("usr_a", &key, now).await.unwrap();
    assert_eq!((dec.count, dec.became_pending), (0, false));

    // Re-referencing reactivates without counting as new.
    let again = store.increment_ref("usr_a", &key, 10, 4, now).await.unwrap();
    assert!(!again.is_new_to_realm);
    assert_eq!(again.count, 1);
    let row = store.get_ref("usr_a", &key).await.unwrap().unwrap();
    assert_eq!(row.status().unwrap(), GcStatus::Active);
    assert!(row.pending_since.is_none());
}

#[tokio::test]
async fn test_decrement_unknown_ref_not_found() {
    let store = store().await;
    let err = store
        .decrement_ref("usr_a", &hex("ghost"), OffsetDateTime::now_utc())
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)));
}

#[tokio::test]
async fn test_list_pending_filters_by_age() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let old = hex("old");
    let fresh = hex("fresh");
    for key in [&old, &fresh] {
        store.increment_ref("usr_a", key, 1, 1, now).await.unwrap();
    }
    store
        .decrement_ref("usr_a", &old, now - Duration::hours(2))
        .await
        .unwrap();
    store.decrement_ref("usr_a", &fresh, now).await.unwrap();

    let pending = store
        .list_pending("usr_a", now - Duration::hours(1), 10)
        .await
        .unwrap();
    let keys: Vec<_> = pending.iter().map(|r| r.node_key.as_str()).collect();
    assert_eq!(keys, vec![old.as_str()]);
}

#[tokio::test]
async fn test_ownership_keeps_first_record() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let key = hex("owned");
    let row = |created_by: &str| OwnershipRow {
        realm: "usr_a".to_string(),
        node_key: key.clone(),
        kind: "file".to_string(),
        size: 5,
        content_type: Some("text/plain".to_string()),
        created_by: created_by.to_string(),
        created_at: now,
    };

    assert!(store.add_ownership(&row("first")).await.unwrap());
    assert!(!store.add_ownership(&row("second")).await.unwrap());
    let stored = store.get_ownership("usr_a", &key).await.unwrap().unwrap();
    assert_eq!(stored.created_by, "first");

    assert!(store.has_ownership("usr_a", &key).await.unwrap());
    assert!(!store.has_ownership("usr_b", &key).await.unwrap());

    let owned = store
        .owned_keys("usr_a", &[key.clone(), hex("other")])
        .await
        .unwrap();
    assert_eq!(owned.len(), 1);
    assert!(owned.contains(&key));
}

#[tokio::test]
async fn test_usage_accumulates_and_quota_override() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    store.add_usage("usr_a", 100, 40, 1, now).await.unwrap();
    let row = store.add_usage("usr_a", 50, 10, 1, now).await.unwrap();
    assert_eq!((row.physical_bytes, row.logical_bytes, row.node_count), (150, 50, 2));
    assert!(row.quota_limit.is_none());

    let row = store.set_quota("usr_a", Some(1000), now).await.unwrap();
    assert_eq!(row.quota_limit, Some(1000));
    assert_eq!(row.physical_bytes, 150);

    let row = store.set_quota("usr_new", None, now).await.unwrap();
    assert_eq!(row.node_count, 0);
}

#[tokio::test]
async fn test_depot_advance_and_history() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let depot = DepotRow {
        depot_id: cask_core::DepotId::new().to_string(),
        realm: "usr_a".to_string(),
        name: "main".to_string(),
        root: hex("v1"),
        version: 1,
        description: None,
        created_at: now,
        updated_at: now,
    };
    store.create_depot(&depot, Some("Initial version")).await.unwrap();

    let mut duplicate = depot.clone();
    duplicate.depot_id = cask_core::DepotId::new().to_string();
    assert!(matches!(
        store.create_depot(&duplicate, None).await,
        Err(MetadataError::AlreadyExists(_))
    ));

    let advanced = store
        .advance_depot("usr_a", &depot.depot_id, &hex("v2"), None, false, 0, now)
        .await
        .unwrap();
    assert!(advanced.changed);
    assert_eq!(advanced.previous_root, hex("v1"));
    assert_eq!(advanced.depot.version, 2);

    let skipped = store
        .advance_depot("usr_a", &depot.depot_id, &hex("v2"), None, true, 0, now)
        .await
        .unwrap();
    assert!(!skipped.changed);
    assert_eq!(skipped.depot.version, 2);

    let history = store
        .list_history(&depot.depot_id, None, 10)
        .await
        .unwrap();
    let versions: Vec<i64> = history.iter().map(|h| h.version).collect();
    assert_eq!(versions, vec![2, 1]);
    assert_eq!(history[1].message.as_deref(), Some("Initial version"));

    // Other realms cannot touch it.
    assert!(matches!(
        store
            .advance_depot("usr_b", &depot.depot_id, &hex("v3"), None, false, 0, now)
            .await,
        Err(MetadataError::NotFound(_))
    ));
    assert!(store.delete_depot("usr_b", &depot.depot_id).await.unwrap().is_none());

    let deleted = store.delete_depot("usr_a", &depot.depot_id).await.unwrap();
    assert_eq!(deleted.unwrap().root, hex("v2"));
    assert!(store.list_history(&depot.depot_id, None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_mark_committed_has_one_winner() {
    let store = store().await;
    let row = ticket_row("usr_a", true, OffsetDateTime::now_utc() + Duration::hours(1));
    store.create_ticket(&row).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let id = row.ticket_id.clone();
        handles.push(tokio::spawn(async move {
            store.mark_committed(&id, &hex(&format!("root {i}"))).await
        }));
    }
    let results = futures::future::join_all(handles).await;
    let winners = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(true))))
        .count();
    assert_eq!(winners, 1);

    let ticket = store
        .get_ticket(&row.ticket_id)
        .await
        .unwrap()
        .unwrap()
        .into_ticket()
        .unwrap();
    assert!(ticket.committed_root().is_some());
    assert!(!ticket.can_write());
}

#[tokio::test]
async fn test_read_only_ticket_never_commits() {
    let store = store().await;
    let row = ticket_row("usr_a", false, OffsetDateTime::now_utc() + Duration::hours(1));
    store.create_ticket(&row).await.unwrap();
    assert!(!store.mark_committed(&row.ticket_id, &hex("r")).await.unwrap());
}

#[tokio::test]
async fn test_revoke_ticket_once() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let row = ticket_row("usr_a", false, now + Duration::hours(1));
    store.create_ticket(&row).await.unwrap();

    assert!(store.revoke_ticket(&row.ticket_id, now).await.unwrap());
    assert!(!store.revoke_ticket(&row.ticket_id, now).await.unwrap());
}

#[tokio::test]
async fn test_tokens_by_hash_and_owner() {
    let store = store().await;
    let agent = token_row("alice", TokenKind::Agent, None);
    let session = token_row("alice", TokenKind::User, None);
    store.create_token(&agent).await.unwrap();
    store.create_token(&session).await.unwrap();

    let found = store.get_token_by_hash(&agent.token_hash).await.unwrap().unwrap();
    assert_eq!(found.token_id, agent.token_id);

    let agents = store.list_tokens("alice", TokenKind::Agent).await.unwrap();
    assert_eq!(agents.len(), 1);

    let used_at = OffsetDateTime::now_utc();
    store.touch_token(&agent.token_id, used_at).await.unwrap();
    let touched = store.get_token(&agent.token_id).await.unwrap().unwrap();
    assert!(touched.last_used_at.is_some());

    assert!(!store.delete_token("bob", &agent.token_id).await.unwrap());
    assert!(store.delete_token("alice", &agent.token_id).await.unwrap());
    assert!(store.get_token(&agent.token_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pairing_consumed_once() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let pending = PendingPairingRow {
        public_key: "pk".to_string(),
        client_name: "laptop".to_string(),
        verification_code: "ABCD-EFGH".to_string(),
        created_at: now,
        expires_at: now + Duration::minutes(10),
    };
    store.upsert_pending_pairing(&pending).await.unwrap();

    let key = AuthorizedKeyRow {
        public_key: "pk".to_string(),
        user_id: "alice".to_string(),
        client_name: "laptop".to_string(),
        created_at: now,
        expires_at: now + Duration::days(30),
    };
    assert!(store.complete_pairing(&key).await.unwrap());
    assert!(!store.complete_pairing(&key).await.unwrap());
    assert!(store.get_pending_pairing("pk").await.unwrap().is_none());
    assert_eq!(store.list_authorized_keys("alice").await.unwrap().len(), 1);
    assert!(!store.delete_authorized_key("bob", "pk").await.unwrap());
    assert!(store.delete_authorized_key("alice", "pk").await.unwrap());
}

#[tokio::test]
async fn test_purge_expired_records() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let past = now - Duration::minutes(1);
    let future = now + Duration::hours(1);

    store
        .create_token(&token_row("alice", TokenKind::User, Some(past)))
        .await
        .unwrap();
    store
        .create_token(&token_row("alice", TokenKind::Agent, None))
        .await
        .unwrap();
    store.create_ticket(&ticket_row("usr_alice", false, past)).await.unwrap();
    store.create_ticket(&ticket_row("usr_alice", false, future)).await.unwrap();
    store
        .upsert_pending_pairing(&PendingPairingRow {
            public_key: "stale".to_string(),
            client_name: "old".to_string(),
            verification_code: "AAAA-AAAA".to_string(),
            created_at: past - Duration::minutes(10),
            expires_at: past,
        })
        .await
        .unwrap();

    let stats = store.purge_expired(now).await.unwrap();
    assert_eq!(stats.tokens, 1);
    assert_eq!(stats.tickets, 1);
    assert_eq!(stats.pending_pairings, 1);
    assert_eq!(stats.authorized_keys, 0);
    assert_eq!(stats.total(), 3);

    assert_eq!(store.list_tokens("alice", TokenKind::Agent).await.unwrap().len(), 1);
    assert_eq!(
        store.list_tickets("usr_alice", None, 10).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_roles_round_trip() {
    let store = store().await;
    assert!(store.get_user_role("alice").await.unwrap().is_none());
    store
        .set_user_role("alice", "authorized", OffsetDateTime::now_utc())
        .await
        .unwrap();
    store
        .set_user_role("alice", "admin", OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert_eq!(
        store.get_user_role("alice").await.unwrap().as_deref(),
        Some("admin")
    );
}
