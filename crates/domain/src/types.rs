//! Common data types used throughout the application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event as stored in the local event store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEvent {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Last local modification, compared against the ledger to detect edits
    pub updated_at: DateTime<Utc>,
}

impl LocalEvent {
    /// Content fingerprint used for first-contact matching and change
    /// detection. Seconds precision: sub-second drift between stores must not
    /// look like an edit.
    pub fn fingerprint(&self) -> String {
        event_fingerprint(&self.title, &self.start, &self.end)
    }
}

/// Event as returned by the remote calendar provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub id: String,
    pub calendar_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Provider version marker; preferred over timestamps for change detection
    pub etag: Option<String>,
    /// Provider-supplied update instant, fallback when no etag is available
    pub updated: Option<DateTime<Utc>>,
    /// Provider marked the event cancelled/deleted
    pub cancelled: bool,
}

impl RemoteEvent {
    pub fn fingerprint(&self) -> String {
        event_fingerprint(&self.title, &self.start, &self.end)
    }
}

fn event_fingerprint(title: &str, start: &DateTime<Utc>, end: &DateTime<Utc>) -> String {
    format!("{}|{}|{}", title.trim(), start.timestamp(), end.timestamp())
}

/// Ledger entry linking a local event to its remote counterpart.
///
/// Keyed by (user_id, calendar_id, local_event_id); the remote side is also
/// unique so no remote event is ever referenced by two entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedEvent {
    pub user_id: String,
    pub calendar_id: String,
    pub local_event_id: String,
    pub remote_event_id: String,
    pub last_synced_at: DateTime<Utc>,
    /// Remote version marker captured at last successful sync
    pub remote_version: Option<String>,
    /// Content fingerprint captured at last successful sync
    pub fingerprint: String,
}

/// Webhook subscription registered with the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchChannel {
    /// Channel identifier we assigned when opening the subscription
    pub id: String,
    pub user_id: String,
    pub calendar_id: String,
    /// Provider-assigned resource identifier, required to stop the channel
    pub resource_id: String,
    pub expiration: DateTime<Utc>,
    pub active: bool,
}

/// Per-user synchronization flags and cursor state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProfile {
    pub user_id: String,
    pub sync_enabled: bool,
    pub linked_calendar_id: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Provider continuation token for incremental delta fetches
    pub sync_cursor: Option<String>,
}

/// OAuth material persisted for a linked account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub user_id: String,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Inbound push notification, validated at the webhook boundary before it
/// reaches sync logic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelNotification {
    pub channel_id: String,
    pub resource_id: String,
    /// Provider state hint ("sync", "exists", ...); informational only, the
    /// engine re-fetches by cursor instead of trusting it
    pub resource_state: Option<String>,
}

/// Per-item failure recorded in a report instead of aborting the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItemError {
    /// Identity of the offending item (event or user id)
    pub item: String,
    pub message: String,
}

impl SyncItemError {
    pub fn new(item: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self { item: item.into(), message: message.to_string() }
    }
}

/// How a detected edit conflict was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    LocalWins,
    RemoteWins,
}

/// Audit record for an event modified on both sides since the last sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictOutcome {
    pub local_event_id: String,
    pub remote_event_id: String,
    pub resolution: ConflictResolution,
}

/// Outcome of a sync run; partial failures land in `errors`, never a panic
/// or a whole-run abort
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    #[serde(rename = "pushedToGoogle")]
    pub pushed: usize,
    #[serde(rename = "pulledFromGoogle")]
    pub pulled: usize,
    pub conflicts: Vec<ConflictOutcome>,
    pub errors: Vec<SyncItemError>,
}

impl SyncReport {
    pub fn record_error(&mut self, item: impl Into<String>, message: impl std::fmt::Display) {
        self.errors.push(SyncItemError::new(item, message));
    }
}

/// Aggregate outcome of a multi-user renewal sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<SyncItemError>,
}

/// Point-in-time sync status for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusView {
    pub sync_enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Local events with no ledger entry yet
    pub pending_changes: usize,
    pub errors: Vec<String>,
}
