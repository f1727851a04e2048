//! Port interfaces for sync collaborators
//!
//! Everything the engine touches outside its own process goes through one of
//! these traits: the two persistent registries (ledger, watch channels), the
//! per-user profile store, and the three external collaborators (local event
//! store, remote calendar provider, credential accessor).

use async_trait::async_trait;
use calbridge_domain::{
    LocalEvent, RemoteEvent, Result, SyncProfile, SyncedEvent, WatchChannel,
};
use chrono::{DateTime, Utc};

/// One page of a remote event listing.
///
/// `next_page` continues the current listing; `next_cursor` arrives on the
/// final page and seeds the next incremental fetch.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<RemoteEvent>,
    pub next_page: Option<String>,
    pub next_cursor: Option<String>,
}

/// Persistent mapping between local and remote event identities.
///
/// Lookups here are the sole mechanism for deciding whether an event pair has
/// been seen before; the reconciler never infers identity from content except
/// during initial sync's first-contact matching.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn lookup_by_local(
        &self,
        user_id: &str,
        calendar_id: &str,
        local_event_id: &str,
    ) -> Result<Option<SyncedEvent>>;

    async fn lookup_by_remote(
        &self,
        user_id: &str,
        calendar_id: &str,
        remote_event_id: &str,
    ) -> Result<Option<SyncedEvent>>;

    /// Insert or replace a ledger entry. All-or-nothing per entry.
    async fn upsert(&self, entry: &SyncedEvent) -> Result<()>;

    async fn remove(&self, user_id: &str, calendar_id: &str, local_event_id: &str) -> Result<()>;

    async fn list_for_calendar(&self, user_id: &str, calendar_id: &str)
        -> Result<Vec<SyncedEvent>>;

    /// Local events with no ledger entry, i.e. changes not yet pushed
    async fn count_unlinked(&self, user_id: &str) -> Result<usize>;
}

/// Persistent registry of provider webhook subscriptions
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn find_active(&self, user_id: &str, calendar_id: &str) -> Result<Option<WatchChannel>>;

    async fn find_by_channel_id(&self, channel_id: &str) -> Result<Option<WatchChannel>>;

    /// Active channels expiring strictly before `deadline`
    async fn list_expiring_before(&self, deadline: DateTime<Utc>) -> Result<Vec<WatchChannel>>;

    /// Persist `channel` as the single active channel for its
    /// (user, calendar) pair, deactivating any previous one in the same
    /// transaction. The swap is what guarantees no zero-channel window.
    async fn swap_active(&self, channel: &WatchChannel) -> Result<()>;

    async fn deactivate(&self, channel_id: &str) -> Result<()>;
}

/// Per-user sync flags and incremental cursor state
#[async_trait]
pub trait SyncProfileRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<SyncProfile>>;

    async fn upsert(&self, profile: &SyncProfile) -> Result<()>;

    /// Store (or clear, with `None`) the provider continuation token
    async fn set_cursor(&self, user_id: &str, cursor: Option<&str>) -> Result<()>;

    async fn touch_last_sync(&self, user_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn list_sync_enabled(&self) -> Result<Vec<SyncProfile>>;
}

/// CRUD over the user's local events (collaborator)
#[async_trait]
pub trait LocalEventStore: Send + Sync {
    async fn list(&self, user_id: &str) -> Result<Vec<LocalEvent>>;

    async fn create(&self, event: &LocalEvent) -> Result<()>;

    async fn update(&self, event: &LocalEvent) -> Result<()>;

    async fn delete(&self, user_id: &str, event_id: &str) -> Result<()>;
}

/// Remote calendar provider operations (collaborator)
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    /// List events. `cursor` requests a delta since the last sync;
    /// `page_token` continues a listing already in progress. A listing with
    /// an expired cursor fails with [`SyncError::CursorExpired`].
    ///
    /// [`SyncError::CursorExpired`]: calbridge_domain::SyncError::CursorExpired
    async fn list(
        &self,
        user_id: &str,
        calendar_id: &str,
        cursor: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventPage>;

    async fn create(
        &self,
        user_id: &str,
        calendar_id: &str,
        event: &LocalEvent,
    ) -> Result<RemoteEvent>;

    async fn update(
        &self,
        user_id: &str,
        calendar_id: &str,
        remote_event_id: &str,
        event: &LocalEvent,
    ) -> Result<RemoteEvent>;

    async fn delete(&self, user_id: &str, calendar_id: &str, remote_event_id: &str) -> Result<()>;

    /// Open a webhook subscription for the calendar
    async fn watch(
        &self,
        user_id: &str,
        calendar_id: &str,
        callback_url: &str,
    ) -> Result<WatchChannel>;

    /// Close a webhook subscription. Stopping an already-expired channel is
    /// not an error on the provider side.
    async fn stop(&self, user_id: &str, channel_id: &str, resource_id: &str) -> Result<()>;
}

/// Yields a valid access token for a user, refreshing as needed
/// (collaborator). Fails with `SyncError::Auth` when credentials are revoked
/// or the account is unlinked.
#[async_trait]
pub trait CredentialAccessor: Send + Sync {
    async fn valid_access_token(&self, user_id: &str) -> Result<String>;
}
