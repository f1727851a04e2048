//! Sync orchestration
//!
//! Composes the reconciler, the batch processor, and the persistent
//! registries into the three externally exposed operations: initial sync,
//! manual sync, and webhook-triggered incremental sync.
//!
//! Per-user mutual exclusion is enforced here: concurrent diff-and-apply
//! passes over the same ledger rows can duplicate creates or lose updates,
//! so every entry point serializes on a per-user async lock. Distinct users
//! proceed in parallel, bounded by the batch processor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use calbridge_domain::constants::MAX_OPERATION_ATTEMPTS;
use calbridge_domain::{
    ChannelNotification, LocalEvent, RemoteEvent, Result, SyncError, SyncProfile, SyncReport,
    SyncStatusView, SyncedEvent,
};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::batch::BatchProcessor;
use crate::ports::{
    ChannelRepository, LedgerRepository, LocalEventStore, RemoteCalendar, SyncProfileRepository,
};
use crate::reconcile::{reconcile, ReconcilePlan, SyncMode, SyncOperation};

/// What applying one operation did, used to derive the report counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Pushed,
    Pulled,
    Deleted,
    Linked,
}

type UserLocks = Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Drives sync runs end to end: snapshot, reconcile, apply, record.
pub struct SyncOrchestrator {
    local: Arc<dyn LocalEventStore>,
    remote: Arc<dyn RemoteCalendar>,
    ledger: Arc<dyn LedgerRepository>,
    profiles: Arc<dyn SyncProfileRepository>,
    channels: Arc<dyn ChannelRepository>,
    batch: BatchProcessor,
    operation_timeout: Duration,
    user_locks: UserLocks,
    last_errors: Mutex<HashMap<String, Vec<String>>>,
}

impl SyncOrchestrator {
    pub fn new(
        local: Arc<dyn LocalEventStore>,
        remote: Arc<dyn RemoteCalendar>,
        ledger: Arc<dyn LedgerRepository>,
        profiles: Arc<dyn SyncProfileRepository>,
        channels: Arc<dyn ChannelRepository>,
        batch: BatchProcessor,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            local,
            remote,
            ledger,
            profiles,
            channels,
            batch,
            operation_timeout,
            user_locks: Mutex::new(HashMap::new()),
            last_errors: Mutex::new(HashMap::new()),
        }
    }

    /// First contact with a calendar: full listing both sides, one-time
    /// content matching, then link + enable sync on the user's profile.
    ///
    /// Safe to re-run: ledger entries written by the first pass suppress
    /// re-matching, so an immediate second run plans zero creates.
    #[instrument(skip(self))]
    pub async fn initial_sync(&self, user_id: &str, calendar_id: &str) -> Result<SyncReport> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock_owned().await;

        info!(user_id, calendar_id, "starting initial sync");

        let (remote_events, cursor) = self.fetch_remote_full(user_id, calendar_id).await?;
        let local_events = self.local.list(user_id).await?;
        let ledger = self.ledger.list_for_calendar(user_id, calendar_id).await?;

        let plan = reconcile(&local_events, &remote_events, &ledger, SyncMode::Initial);
        let report = self.apply(user_id, calendar_id, plan).await;

        self.profiles
            .upsert(&SyncProfile {
                user_id: user_id.to_string(),
                sync_enabled: true,
                linked_calendar_id: Some(calendar_id.to_string()),
                last_sync_at: Some(Utc::now()),
                sync_cursor: cursor,
            })
            .await?;
        self.remember_errors(user_id, &report).await;

        info!(
            user_id,
            pushed = report.pushed,
            pulled = report.pulled,
            conflicts = report.conflicts.len(),
            errors = report.errors.len(),
            "initial sync completed"
        );

        Ok(report)
    }

    /// User-requested sync of the linked calendar: full snapshots both
    /// sides, diff against the existing ledger, apply.
    #[instrument(skip(self))]
    pub async fn manual_sync(&self, user_id: &str) -> Result<SyncReport> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock_owned().await;

        let profile = self.require_profile(user_id).await?;
        if !profile.sync_enabled {
            debug!(user_id, "sync disabled for user");
            return Ok(SyncReport::default());
        }
        let calendar_id = linked_calendar(&profile)?;

        let report = self.full_pass(user_id, &calendar_id).await?;

        info!(
            user_id,
            pushed = report.pushed,
            pulled = report.pulled,
            errors = report.errors.len(),
            "manual sync completed"
        );

        Ok(report)
    }

    /// Webhook-triggered delta sync.
    ///
    /// Duplicate or out-of-order notifications are harmless: the payload's
    /// content is never trusted, the engine re-fetches from its own stored
    /// cursor and re-diffs against the ledger, so a redundant notification
    /// produces an empty plan.
    #[instrument(skip(self, notification), fields(channel_id = %notification.channel_id))]
    pub async fn incremental_sync(
        &self,
        user_id: &str,
        notification: &ChannelNotification,
    ) -> Result<SyncReport> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock_owned().await;

        // Notifications for unknown or retired channels are stale deliveries
        match self.channels.find_by_channel_id(&notification.channel_id).await? {
            Some(channel) if channel.active && channel.user_id == user_id => {}
            _ => {
                warn!(
                    user_id,
                    channel_id = %notification.channel_id,
                    "notification for unknown or inactive channel, ignoring"
                );
                return Ok(SyncReport::default());
            }
        }

        let profile = self.require_profile(user_id).await?;
        if !profile.sync_enabled {
            debug!(user_id, "sync disabled for user");
            return Ok(SyncReport::default());
        }
        let calendar_id = linked_calendar(&profile)?;

        let Some(cursor) = profile.sync_cursor.clone() else {
            debug!(user_id, "no sync cursor recorded, running full pass");
            return self.full_pass(user_id, &calendar_id).await;
        };

        let (remote_events, next_cursor) =
            match self.fetch_remote_delta(user_id, &calendar_id, &cursor).await {
                Ok(delta) => delta,
                Err(SyncError::CursorExpired(reason)) => {
                    warn!(user_id, reason, "sync cursor expired, clearing and re-listing");
                    self.profiles.set_cursor(user_id, None).await?;
                    return self.full_pass(user_id, &calendar_id).await;
                }
                Err(err) => return Err(err),
            };

        let local_events = self.local.list(user_id).await?;
        let ledger = self.ledger.list_for_calendar(user_id, &calendar_id).await?;

        let plan = reconcile(&local_events, &remote_events, &ledger, SyncMode::Delta);
        let report = self.apply(user_id, &calendar_id, plan).await;

        if let Some(ref token) = next_cursor {
            self.profiles.set_cursor(user_id, Some(token)).await?;
        }
        self.profiles.touch_last_sync(user_id, Utc::now()).await?;
        self.remember_errors(user_id, &report).await;

        info!(
            user_id,
            delta_events = remote_events.len(),
            pushed = report.pushed,
            pulled = report.pulled,
            "incremental sync completed"
        );

        Ok(report)
    }

    /// Point-in-time view of a user's sync state
    pub async fn sync_status(&self, user_id: &str) -> Result<SyncStatusView> {
        let profile = self.profiles.get(user_id).await?;
        let pending_changes = self.ledger.count_unlinked(user_id).await?;
        let errors = self.last_errors.lock().await.get(user_id).cloned().unwrap_or_default();

        Ok(match profile {
            Some(profile) => SyncStatusView {
                sync_enabled: profile.sync_enabled,
                last_sync_at: profile.last_sync_at,
                pending_changes,
                errors,
            },
            None => SyncStatusView {
                sync_enabled: false,
                last_sync_at: None,
                pending_changes,
                errors,
            },
        })
    }

    /// Full-listing diff-and-apply shared by manual sync and the
    /// expired-cursor fallback. Caller holds the user lock.
    async fn full_pass(&self, user_id: &str, calendar_id: &str) -> Result<SyncReport> {
        let (remote_events, cursor) = self.fetch_remote_full(user_id, calendar_id).await?;
        let local_events = self.local.list(user_id).await?;
        let ledger = self.ledger.list_for_calendar(user_id, calendar_id).await?;

        let plan = reconcile(&local_events, &remote_events, &ledger, SyncMode::Full);
        let report = self.apply(user_id, calendar_id, plan).await;

        if let Some(ref token) = cursor {
            self.profiles.set_cursor(user_id, Some(token)).await?;
        }
        self.profiles.touch_last_sync(user_id, Utc::now()).await?;
        self.remember_errors(user_id, &report).await;

        Ok(report)
    }

    /// Complete listing, following pagination to exhaustion. Returns the
    /// events and the continuation cursor issued with the final page.
    async fn fetch_remote_full(
        &self,
        user_id: &str,
        calendar_id: &str,
    ) -> Result<(Vec<RemoteEvent>, Option<String>)> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        let mut cursor: Option<String> = None;

        loop {
            let page =
                self.remote.list(user_id, calendar_id, None, page_token.as_deref()).await?;
            events.extend(page.events);
            cursor = page.next_cursor.or(cursor);
            page_token = page.next_page;
            if page_token.is_none() {
                break;
            }
        }

        Ok((events, cursor))
    }

    /// Delta listing from the stored cursor, also paginated
    async fn fetch_remote_delta(
        &self,
        user_id: &str,
        calendar_id: &str,
        cursor: &str,
    ) -> Result<(Vec<RemoteEvent>, Option<String>)> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        let mut next_cursor: Option<String> = None;

        loop {
            let page = self
                .remote
                .list(user_id, calendar_id, Some(cursor), page_token.as_deref())
                .await?;
            events.extend(page.events);
            next_cursor = page.next_cursor.or(next_cursor);
            page_token = page.next_page;
            if page_token.is_none() {
                break;
            }
        }

        Ok((events, next_cursor))
    }

    /// Apply a reconcile plan through the batch processor.
    ///
    /// Operations execute independently: one failure is recorded against its
    /// item and never aborts the rest. The ledger is only written after the
    /// corresponding side effect succeeded.
    async fn apply(&self, user_id: &str, calendar_id: &str, plan: ReconcilePlan) -> SyncReport {
        let mut report = SyncReport { conflicts: plan.conflicts, ..Default::default() };
        if plan.operations.is_empty() {
            return report;
        }

        let item_ids: Vec<String> =
            plan.operations.iter().map(|op| op.item_id().to_string()).collect();

        let outcomes = self
            .batch
            .process(plan.operations, |op| async move {
                match tokio::time::timeout(
                    self.operation_timeout,
                    self.apply_operation(user_id, calendar_id, op),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Internal(format!(
                        "operation timed out after {}s",
                        self.operation_timeout.as_secs()
                    ))),
                }
            })
            .await;

        for outcome in outcomes {
            match outcome.result {
                Ok(Applied::Pushed) => report.pushed += 1,
                Ok(Applied::Pulled) => report.pulled += 1,
                Ok(Applied::Deleted | Applied::Linked) => {}
                Err(err) => report.record_error(item_ids[outcome.index].clone(), err),
            }
        }

        report
    }

    /// Execute one operation with bounded retries for retryable failures.
    /// Terminal failures (auth, validation, not-found) surface immediately.
    async fn apply_operation(
        &self,
        user_id: &str,
        calendar_id: &str,
        op: SyncOperation,
    ) -> Result<Applied> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute(user_id, calendar_id, &op).await {
                Ok(applied) => return Ok(applied),
                Err(err) if err.is_retryable() && attempt < MAX_OPERATION_ATTEMPTS => {
                    let delay = retry_delay(&err, attempt);
                    warn!(
                        item = op.item_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute(
        &self,
        user_id: &str,
        calendar_id: &str,
        op: &SyncOperation,
    ) -> Result<Applied> {
        match op {
            SyncOperation::CreateRemote(event) => {
                validate_event(&event.title, event.start, event.end)?;
                let created = self.remote.create(user_id, calendar_id, event).await?;
                self.ledger.upsert(&ledger_entry(user_id, calendar_id, event, &created)).await?;
                Ok(Applied::Pushed)
            }
            SyncOperation::UpdateRemote { event, remote_event_id } => {
                validate_event(&event.title, event.start, event.end)?;
                let updated =
                    self.remote.update(user_id, calendar_id, remote_event_id, event).await?;
                self.ledger.upsert(&ledger_entry(user_id, calendar_id, event, &updated)).await?;
                Ok(Applied::Pushed)
            }
            SyncOperation::CreateLocal(remote) => {
                validate_event(&remote.title, remote.start, remote.end)?;
                let event = local_from_remote(user_id, Uuid::now_v7().to_string(), remote);
                self.local.create(&event).await?;
                self.ledger.upsert(&ledger_entry(user_id, calendar_id, &event, remote)).await?;
                Ok(Applied::Pulled)
            }
            SyncOperation::UpdateLocal { event: remote, local_event_id } => {
                validate_event(&remote.title, remote.start, remote.end)?;
                let event = local_from_remote(user_id, local_event_id.clone(), remote);
                self.local.update(&event).await?;
                self.ledger.upsert(&ledger_entry(user_id, calendar_id, &event, remote)).await?;
                Ok(Applied::Pulled)
            }
            SyncOperation::DeleteRemote { local_event_id, remote_event_id } => {
                match self.remote.delete(user_id, calendar_id, remote_event_id).await {
                    Ok(()) => {}
                    // Already gone on the provider side: the deletion we are
                    // propagating has effectively happened
                    Err(SyncError::NotFound(_)) => {
                        debug!(remote_event_id, "remote event already deleted");
                    }
                    Err(err) => return Err(err),
                }
                self.ledger.remove(user_id, calendar_id, local_event_id).await?;
                Ok(Applied::Deleted)
            }
            SyncOperation::DeleteLocal { local_event_id, remote_event_id } => {
                match self.local.delete(user_id, local_event_id).await {
                    Ok(()) => {}
                    Err(SyncError::NotFound(_)) => {
                        debug!(local_event_id, remote_event_id, "local event already deleted");
                    }
                    Err(err) => return Err(err),
                }
                self.ledger.remove(user_id, calendar_id, local_event_id).await?;
                Ok(Applied::Deleted)
            }
            SyncOperation::Link { local, remote } => {
                self.ledger.upsert(&ledger_entry(user_id, calendar_id, local, remote)).await?;
                Ok(Applied::Linked)
            }
        }
    }

    async fn require_profile(&self, user_id: &str) -> Result<SyncProfile> {
        self.profiles
            .get(user_id)
            .await?
            .ok_or_else(|| SyncError::Config(format!("no sync profile for user {user_id}")))
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        Arc::clone(locks.entry(user_id.to_string()).or_default())
    }

    async fn remember_errors(&self, user_id: &str, report: &SyncReport) {
        let mut last = self.last_errors.lock().await;
        last.insert(
            user_id.to_string(),
            report.errors.iter().map(|e| format!("{}: {}", e.item, e.message)).collect(),
        );
    }
}

fn linked_calendar(profile: &SyncProfile) -> Result<String> {
    profile.linked_calendar_id.clone().ok_or_else(|| {
        SyncError::Config(format!("user {} has no linked calendar", profile.user_id))
    })
}

fn validate_event(
    title: &str,
    start: chrono::DateTime<Utc>,
    end: chrono::DateTime<Utc>,
) -> Result<()> {
    if title.trim().is_empty() {
        return Err(SyncError::Validation("event title is empty".into()));
    }
    if end < start {
        return Err(SyncError::Validation(format!(
            "event ends before it starts ({start} > {end})"
        )));
    }
    Ok(())
}

fn local_from_remote(user_id: &str, local_event_id: String, remote: &RemoteEvent) -> LocalEvent {
    LocalEvent {
        id: local_event_id,
        user_id: user_id.to_string(),
        title: remote.title.clone(),
        start: remote.start,
        end: remote.end,
        updated_at: Utc::now(),
    }
}

fn ledger_entry(
    user_id: &str,
    calendar_id: &str,
    local: &LocalEvent,
    remote: &RemoteEvent,
) -> SyncedEvent {
    SyncedEvent {
        user_id: user_id.to_string(),
        calendar_id: calendar_id.to_string(),
        local_event_id: local.id.clone(),
        remote_event_id: remote.id.clone(),
        last_synced_at: Utc::now(),
        remote_version: remote.etag.clone(),
        fingerprint: local.fingerprint(),
    }
}

fn retry_delay(err: &SyncError, attempt: u32) -> Duration {
    match err {
        SyncError::RateLimited { retry_after_secs: Some(secs) } => {
            Duration::from_secs((*secs).min(60))
        }
        _ => Duration::from_millis(200u64.saturating_mul(1 << attempt.min(6))),
    }
}
