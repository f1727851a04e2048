//! Full-stack sync run: orchestrator over SQLite repositories and a mocked
//! provider API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calbridge_core::ports::{CredentialAccessor, LedgerRepository, LocalEventStore};
use calbridge_core::{BatchProcessor, SyncOrchestrator};
use calbridge_domain::{LocalEvent, Result};
use calbridge_infra::{
    DbManager, GoogleCalendarClient, HttpClient, SqliteChannelRepository, SqliteLedgerRepository,
    SqliteLocalEventStore, SqliteProfileRepository,
};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StaticTokens;

#[async_trait]
impl CredentialAccessor for StaticTokens {
    async fn valid_access_token(&self, _user_id: &str) -> Result<String> {
        Ok("test-access-token".to_string())
    }
}

struct Stack {
    local: Arc<SqliteLocalEventStore>,
    ledger: Arc<SqliteLedgerRepository>,
    orchestrator: SyncOrchestrator,
    _dir: TempDir,
}

fn stack(server: &MockServer) -> Stack {
    let dir = TempDir::new().expect("temp dir");
    let manager = Arc::new(DbManager::new(dir.path().join("sync.db"), 4).expect("manager"));
    manager.run_migrations().expect("migrations run");

    let local = Arc::new(SqliteLocalEventStore::new(Arc::clone(&manager)));
    let ledger = Arc::new(SqliteLedgerRepository::new(Arc::clone(&manager)));
    let profiles = Arc::new(SqliteProfileRepository::new(Arc::clone(&manager)));
    let channels = Arc::new(SqliteChannelRepository::new(Arc::clone(&manager)));

    let http = HttpClient::builder()
        .max_attempts(2)
        .base_backoff(Duration::from_millis(5))
        .build()
        .expect("http client");
    let remote = Arc::new(GoogleCalendarClient::new(http, server.uri(), Arc::new(StaticTokens)));

    let orchestrator = SyncOrchestrator::new(
        local.clone(),
        remote,
        ledger.clone(),
        profiles,
        channels,
        BatchProcessor::new(3, Duration::from_millis(0)),
        Duration::from_secs(5),
    );

    Stack { local, ledger, orchestrator, _dir: dir }
}

fn seed_event() -> LocalEvent {
    LocalEvent {
        id: "l1".into(),
        user_id: "u1".into(),
        title: "Standup".into(),
        start: Utc.timestamp_opt(1_700_000_000, 0).single().expect("timestamp"),
        end: Utc.timestamp_opt(1_700_003_600, 0).single().expect("timestamp"),
        updated_at: Utc.timestamp_opt(1_700_000_000, 0).single().expect("timestamp"),
    }
}

fn listing_body() -> serde_json::Value {
    serde_json::json!({
        "items": [
            {
                "id": "ev1",
                "etag": "\"v1\"",
                "summary": "Remote only",
                "updated": "2023-11-14T20:00:00Z",
                "start": { "dateTime": "2023-11-15T09:00:00Z" },
                "end": { "dateTime": "2023-11-15T10:00:00Z" }
            },
            {
                "id": "g1",
                "etag": "\"v1\"",
                "summary": "Standup",
                "updated": "2023-11-14T20:00:00Z",
                "start": { "dateTime": "2023-11-14T22:13:20Z" },
                "end": { "dateTime": "2023-11-14T23:13:20Z" }
            }
        ],
        "nextSyncToken": "sync-token-1"
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn initial_sync_persists_pairs_and_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_body()))
        .mount(&server)
        .await;

    let stack = stack(&server);
    stack.local.create(&seed_event()).await.expect("seeded");

    let first = stack.orchestrator.initial_sync("u1", "primary").await.expect("first run");

    // The identical "Standup" pair links without copying; "Remote only" pulls
    assert_eq!(first.pushed, 0);
    assert_eq!(first.pulled, 1);
    assert!(first.errors.is_empty());

    let events = stack.local.list("u1").await.expect("list");
    assert_eq!(events.len(), 2);

    let entries = stack.ledger.list_for_calendar("u1", "primary").await.expect("ledger");
    assert_eq!(entries.len(), 2);
    let linked = stack
        .ledger
        .lookup_by_local("u1", "primary", "l1")
        .await
        .expect("lookup")
        .expect("pair linked");
    assert_eq!(linked.remote_event_id, "g1");

    let second = stack.orchestrator.initial_sync("u1", "primary").await.expect("second run");
    assert_eq!(second.pushed, 0);
    assert_eq!(second.pulled, 0);
    assert_eq!(stack.local.list("u1").await.expect("list").len(), 2, "no duplicates");
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_sync_pushes_local_deletion_to_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_body()))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/calendars/primary/events/g1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let stack = stack(&server);
    stack.local.create(&seed_event()).await.expect("seeded");
    stack.orchestrator.initial_sync("u1", "primary").await.expect("initial sync");

    stack.local.delete("u1", "l1").await.expect("user deletes locally");
    let report = stack.orchestrator.manual_sync("u1").await.expect("manual sync");

    assert!(report.errors.is_empty());
    let entries = stack.ledger.list_for_calendar("u1", "primary").await.expect("ledger");
    assert_eq!(entries.len(), 1, "deleted pair removed from ledger");
    assert!(entries.iter().all(|e| e.remote_event_id != "g1"));
}
