//! In-memory port implementations shared by the integration tests.
//!
//! Each mock records the calls it receives and supports targeted failure
//! injection so partial-failure behavior can be exercised deterministically.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use calbridge_core::ports::{
    ChannelRepository, EventPage, LedgerRepository, LocalEventStore, RemoteCalendar,
    SyncProfileRepository,
};
use calbridge_domain::{
    LocalEvent, RemoteEvent, Result, SyncError, SyncProfile, SyncedEvent, WatchChannel,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

pub fn instant(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

pub const T0: i64 = 1_700_000_000;

pub fn local_event(id: &str, user: &str, title: &str, start: i64, updated: i64) -> LocalEvent {
    LocalEvent {
        id: id.into(),
        user_id: user.into(),
        title: title.into(),
        start: instant(start),
        end: instant(start + 3_600),
        updated_at: instant(updated),
    }
}

pub fn remote_event(id: &str, calendar: &str, title: &str, start: i64, etag: &str) -> RemoteEvent {
    RemoteEvent {
        id: id.into(),
        calendar_id: calendar.into(),
        title: title.into(),
        start: instant(start),
        end: instant(start + 3_600),
        etag: Some(etag.into()),
        updated: None,
        cancelled: false,
    }
}

/// Shared call log for asserting cross-mock ordering
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn log(log: &CallLog, entry: impl Into<String>) {
    log.lock().expect("call log lock").push(entry.into());
}

// ============================================================================
// Local event store
// ============================================================================

#[derive(Default)]
pub struct InMemoryLocalStore {
    pub events: Mutex<HashMap<String, LocalEvent>>,
    /// Event ids whose create/update/delete fails with a validation error
    pub fail_ids: Mutex<Vec<String>>,
}

impl InMemoryLocalStore {
    pub fn with_events(events: Vec<LocalEvent>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut map = store.events.lock().expect("events lock");
            for event in events {
                map.insert(event.id.clone(), event);
            }
        }
        Arc::new(store)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.events.lock().expect("events lock").contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<LocalEvent> {
        self.events.lock().expect("events lock").get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.events.lock().expect("events lock").remove(id);
    }

    pub fn insert(&self, event: LocalEvent) {
        self.events.lock().expect("events lock").insert(event.id.clone(), event);
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("events lock").len()
    }

    fn check_failure(&self, id: &str) -> Result<()> {
        if self.fail_ids.lock().expect("fail lock").iter().any(|f| f == id) {
            return Err(SyncError::Validation(format!("injected failure for {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalEventStore for InMemoryLocalStore {
    async fn list(&self, user_id: &str) -> Result<Vec<LocalEvent>> {
        let mut events: Vec<LocalEvent> = self
            .events
            .lock()
            .expect("events lock")
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(events)
    }

    async fn create(&self, event: &LocalEvent) -> Result<()> {
        self.check_failure(&event.id)?;
        self.events.lock().expect("events lock").insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn update(&self, event: &LocalEvent) -> Result<()> {
        self.check_failure(&event.id)?;
        let mut events = self.events.lock().expect("events lock");
        if !events.contains_key(&event.id) {
            return Err(SyncError::NotFound(format!("local event {}", event.id)));
        }
        events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn delete(&self, _user_id: &str, event_id: &str) -> Result<()> {
        self.check_failure(event_id)?;
        match self.events.lock().expect("events lock").remove(event_id) {
            Some(_) => Ok(()),
            None => Err(SyncError::NotFound(format!("local event {event_id}"))),
        }
    }
}

// ============================================================================
// Remote calendar
// ============================================================================

#[derive(Default)]
pub struct InMemoryRemoteCalendar {
    pub events: Mutex<HashMap<String, RemoteEvent>>,
    /// Events returned for cursor-based (delta) listings
    pub delta_events: Mutex<Vec<RemoteEvent>>,
    /// Titles whose create on the provider fails with a validation error
    pub fail_titles: Mutex<Vec<String>>,
    /// User ids whose watch call fails
    pub fail_watch_users: Mutex<Vec<String>>,
    /// When set, stop always fails (renewals must tolerate this)
    pub fail_stop: Mutex<bool>,
    /// Artificial latency per list call, for serialization tests
    pub list_delay: Mutex<Duration>,
    pub call_log: CallLog,
    id_counter: AtomicUsize,
    cursor_counter: AtomicUsize,
    pub concurrent_watch: Arc<AtomicUsize>,
    pub peak_concurrent_watch: Arc<AtomicUsize>,
    pub concurrent_list: Arc<AtomicUsize>,
    pub peak_concurrent_list: Arc<AtomicUsize>,
}

impl InMemoryRemoteCalendar {
    /// Share a call log with other mocks so cross-collaborator ordering can
    /// be asserted
    pub fn with_shared_log(call_log: CallLog) -> Arc<Self> {
        let mut remote = Self::default();
        remote.call_log = call_log;
        Arc::new(remote)
    }

    pub fn with_events(events: Vec<RemoteEvent>) -> Arc<Self> {
        let remote = Self::default();
        {
            let mut map = remote.events.lock().expect("events lock");
            for event in events {
                map.insert(event.id.clone(), event);
            }
        }
        Arc::new(remote)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.events.lock().expect("events lock").contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<RemoteEvent> {
        self.events.lock().expect("events lock").get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.events.lock().expect("events lock").remove(id);
    }

    pub fn insert(&self, event: RemoteEvent) {
        self.events.lock().expect("events lock").insert(event.id.clone(), event);
    }

    pub fn set_delta(&self, events: Vec<RemoteEvent>) {
        *self.delta_events.lock().expect("delta lock") = events;
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("events lock").len()
    }

    fn next_id(&self) -> String {
        format!("g-{}", self.id_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn next_cursor(&self) -> String {
        format!("cursor-{}", self.cursor_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl RemoteCalendar for InMemoryRemoteCalendar {
    async fn list(
        &self,
        _user_id: &str,
        calendar_id: &str,
        cursor: Option<&str>,
        _page_token: Option<&str>,
    ) -> Result<EventPage> {
        log(&self.call_log, format!("list cursor={}", cursor.unwrap_or("none")));

        let current = self.concurrent_list.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrent_list.fetch_max(current, Ordering::SeqCst);
        let delay = *self.list_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.concurrent_list.fetch_sub(1, Ordering::SeqCst);

        if let Some(cursor) = cursor {
            if cursor == "expired" {
                return Err(SyncError::CursorExpired("410 Gone".into()));
            }
            return Ok(EventPage {
                events: self.delta_events.lock().expect("delta lock").clone(),
                next_page: None,
                next_cursor: Some(self.next_cursor()),
            });
        }

        let mut events: Vec<RemoteEvent> = self
            .events
            .lock()
            .expect("events lock")
            .values()
            .filter(|e| e.calendar_id == calendar_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(EventPage { events, next_page: None, next_cursor: Some(self.next_cursor()) })
    }

    async fn create(
        &self,
        _user_id: &str,
        calendar_id: &str,
        event: &LocalEvent,
    ) -> Result<RemoteEvent> {
        if self.fail_titles.lock().expect("fail lock").iter().any(|t| t == &event.title) {
            return Err(SyncError::Validation(format!("provider rejected '{}'", event.title)));
        }

        let created = RemoteEvent {
            id: self.next_id(),
            calendar_id: calendar_id.into(),
            title: event.title.clone(),
            start: event.start,
            end: event.end,
            etag: Some("v1".into()),
            updated: Some(Utc::now()),
            cancelled: false,
        };
        self.insert(created.clone());
        log(&self.call_log, format!("create {}", created.id));
        Ok(created)
    }

    async fn update(
        &self,
        _user_id: &str,
        _calendar_id: &str,
        remote_event_id: &str,
        event: &LocalEvent,
    ) -> Result<RemoteEvent> {
        let mut events = self.events.lock().expect("events lock");
        let existing = events
            .get(remote_event_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("remote event {remote_event_id}")))?;

        let bumped = format!(
            "v{}",
            existing.etag.as_deref().and_then(|e| e[1..].parse::<u64>().ok()).unwrap_or(0) + 1
        );
        let updated = RemoteEvent {
            title: event.title.clone(),
            start: event.start,
            end: event.end,
            etag: Some(bumped),
            updated: Some(Utc::now()),
            ..existing
        };
        events.insert(remote_event_id.to_string(), updated.clone());
        log(&self.call_log, format!("update {remote_event_id}"));
        Ok(updated)
    }

    async fn delete(&self, _user_id: &str, _calendar_id: &str, remote_event_id: &str) -> Result<()> {
        log(&self.call_log, format!("delete {remote_event_id}"));
        match self.events.lock().expect("events lock").remove(remote_event_id) {
            Some(_) => Ok(()),
            None => Err(SyncError::NotFound(format!("remote event {remote_event_id}"))),
        }
    }

    async fn watch(
        &self,
        user_id: &str,
        calendar_id: &str,
        _callback_url: &str,
    ) -> Result<WatchChannel> {
        let current = self.concurrent_watch.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrent_watch.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.concurrent_watch.fetch_sub(1, Ordering::SeqCst);

        if self.fail_watch_users.lock().expect("fail lock").iter().any(|u| u == user_id) {
            return Err(SyncError::Network(format!("watch failed for {user_id}")));
        }

        let id = self.next_id();
        log(&self.call_log, format!("watch {id}"));
        Ok(WatchChannel {
            id: id.clone(),
            user_id: user_id.into(),
            calendar_id: calendar_id.into(),
            resource_id: format!("res-{id}"),
            expiration: Utc::now() + ChronoDuration::hours(24),
            active: true,
        })
    }

    async fn stop(&self, _user_id: &str, channel_id: &str, _resource_id: &str) -> Result<()> {
        log(&self.call_log, format!("stop {channel_id}"));
        if *self.fail_stop.lock().expect("fail lock") {
            return Err(SyncError::Network("stop failed".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Sync ledger
// ============================================================================

#[derive(Default)]
pub struct InMemoryLedger {
    pub entries: Mutex<HashMap<(String, String, String), SyncedEvent>>,
    local: Option<Arc<InMemoryLocalStore>>,
}

impl InMemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ledger that can answer `count_unlinked` against the given store
    pub fn with_local_store(local: Arc<InMemoryLocalStore>) -> Arc<Self> {
        Arc::new(Self { entries: Mutex::new(HashMap::new()), local: Some(local) })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("entries lock").len()
    }

    pub fn entry_for_local(&self, local_event_id: &str) -> Option<SyncedEvent> {
        self.entries
            .lock()
            .expect("entries lock")
            .values()
            .find(|e| e.local_event_id == local_event_id)
            .cloned()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedger {
    async fn lookup_by_local(
        &self,
        user_id: &str,
        calendar_id: &str,
        local_event_id: &str,
    ) -> Result<Option<SyncedEvent>> {
        let key = (user_id.to_string(), calendar_id.to_string(), local_event_id.to_string());
        Ok(self.entries.lock().expect("entries lock").get(&key).cloned())
    }

    async fn lookup_by_remote(
        &self,
        user_id: &str,
        calendar_id: &str,
        remote_event_id: &str,
    ) -> Result<Option<SyncedEvent>> {
        Ok(self
            .entries
            .lock()
            .expect("entries lock")
            .values()
            .find(|e| {
                e.user_id == user_id
                    && e.calendar_id == calendar_id
                    && e.remote_event_id == remote_event_id
            })
            .cloned())
    }

    async fn upsert(&self, entry: &SyncedEvent) -> Result<()> {
        let key =
            (entry.user_id.clone(), entry.calendar_id.clone(), entry.local_event_id.clone());
        self.entries.lock().expect("entries lock").insert(key, entry.clone());
        Ok(())
    }

    async fn remove(&self, user_id: &str, calendar_id: &str, local_event_id: &str) -> Result<()> {
        let key = (user_id.to_string(), calendar_id.to_string(), local_event_id.to_string());
        self.entries.lock().expect("entries lock").remove(&key);
        Ok(())
    }

    async fn list_for_calendar(
        &self,
        user_id: &str,
        calendar_id: &str,
    ) -> Result<Vec<SyncedEvent>> {
        let mut entries: Vec<SyncedEvent> = self
            .entries
            .lock()
            .expect("entries lock")
            .values()
            .filter(|e| e.user_id == user_id && e.calendar_id == calendar_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.local_event_id.cmp(&b.local_event_id));
        Ok(entries)
    }

    async fn count_unlinked(&self, user_id: &str) -> Result<usize> {
        let Some(ref local) = self.local else { return Ok(0) };
        let linked: Vec<String> = self
            .entries
            .lock()
            .expect("entries lock")
            .values()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.local_event_id.clone())
            .collect();
        let events = local.events.lock().expect("events lock");
        Ok(events
            .values()
            .filter(|e| e.user_id == user_id && !linked.contains(&e.id))
            .count())
    }
}

// ============================================================================
// Sync profiles
// ============================================================================

#[derive(Default)]
pub struct InMemoryProfiles {
    pub profiles: Mutex<HashMap<String, SyncProfile>>,
}

impl InMemoryProfiles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_profile(profile: SyncProfile) -> Arc<Self> {
        let repo = Self::default();
        repo.profiles.lock().expect("profiles lock").insert(profile.user_id.clone(), profile);
        Arc::new(repo)
    }

    pub fn get_sync(&self, user_id: &str) -> Option<SyncProfile> {
        self.profiles.lock().expect("profiles lock").get(user_id).cloned()
    }
}

#[async_trait]
impl SyncProfileRepository for InMemoryProfiles {
    async fn get(&self, user_id: &str) -> Result<Option<SyncProfile>> {
        Ok(self.profiles.lock().expect("profiles lock").get(user_id).cloned())
    }

    async fn upsert(&self, profile: &SyncProfile) -> Result<()> {
        self.profiles
            .lock()
            .expect("profiles lock")
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn set_cursor(&self, user_id: &str, cursor: Option<&str>) -> Result<()> {
        let mut profiles = self.profiles.lock().expect("profiles lock");
        if let Some(profile) = profiles.get_mut(user_id) {
            profile.sync_cursor = cursor.map(String::from);
        }
        Ok(())
    }

    async fn touch_last_sync(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut profiles = self.profiles.lock().expect("profiles lock");
        if let Some(profile) = profiles.get_mut(user_id) {
            profile.last_sync_at = Some(at);
        }
        Ok(())
    }

    async fn list_sync_enabled(&self) -> Result<Vec<SyncProfile>> {
        Ok(self
            .profiles
            .lock()
            .expect("profiles lock")
            .values()
            .filter(|p| p.sync_enabled)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Watch channels
// ============================================================================

#[derive(Default)]
pub struct InMemoryChannels {
    pub channels: Mutex<Vec<WatchChannel>>,
    pub call_log: CallLog,
}

impl InMemoryChannels {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_shared_log(call_log: CallLog) -> Arc<Self> {
        let mut repo = Self::default();
        repo.call_log = call_log;
        Arc::new(repo)
    }

    pub fn with_channels(channels: Vec<WatchChannel>) -> Arc<Self> {
        let repo = Self::default();
        *repo.channels.lock().expect("channels lock") = channels;
        Arc::new(repo)
    }

    pub fn active_count(&self, user_id: &str, calendar_id: &str) -> usize {
        self.channels
            .lock()
            .expect("channels lock")
            .iter()
            .filter(|c| c.user_id == user_id && c.calendar_id == calendar_id && c.active)
            .count()
    }
}

#[async_trait]
impl ChannelRepository for InMemoryChannels {
    async fn find_active(&self, user_id: &str, calendar_id: &str) -> Result<Option<WatchChannel>> {
        Ok(self
            .channels
            .lock()
            .expect("channels lock")
            .iter()
            .find(|c| c.user_id == user_id && c.calendar_id == calendar_id && c.active)
            .cloned())
    }

    async fn find_by_channel_id(&self, channel_id: &str) -> Result<Option<WatchChannel>> {
        Ok(self
            .channels
            .lock()
            .expect("channels lock")
            .iter()
            .find(|c| c.id == channel_id)
            .cloned())
    }

    async fn list_expiring_before(&self, deadline: DateTime<Utc>) -> Result<Vec<WatchChannel>> {
        Ok(self
            .channels
            .lock()
            .expect("channels lock")
            .iter()
            .filter(|c| c.active && c.expiration < deadline)
            .cloned()
            .collect())
    }

    async fn swap_active(&self, channel: &WatchChannel) -> Result<()> {
        let mut channels = self.channels.lock().expect("channels lock");
        for existing in channels.iter_mut() {
            if existing.user_id == channel.user_id
                && existing.calendar_id == channel.calendar_id
                && existing.id != channel.id
            {
                existing.active = false;
            }
        }
        channels.push(WatchChannel { active: true, ..channel.clone() });
        log(&self.call_log, format!("swap {}", channel.id));
        Ok(())
    }

    async fn deactivate(&self, channel_id: &str) -> Result<()> {
        let mut channels = self.channels.lock().expect("channels lock");
        for existing in channels.iter_mut() {
            if existing.id == channel_id {
                existing.active = false;
            }
        }
        Ok(())
    }
}
