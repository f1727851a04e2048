//! Typed wire structs for the Google Calendar API
//!
//! Everything crossing the provider boundary is validated here before it
//! becomes a domain `RemoteEvent`, so sync logic never handles unvalidated
//! shapes.

use calbridge_domain::{RemoteEvent, Result, SyncError, WatchChannel};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct GoogleEventsResponse {
    #[serde(default)]
    pub items: Vec<GoogleEvent>,
    #[serde(rename = "nextSyncToken")]
    pub next_sync_token: Option<String>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GoogleEvent {
    pub id: String,
    pub status: Option<String>,
    pub etag: Option<String>,
    pub summary: Option<String>,
    pub updated: Option<String>,
    pub start: Option<EventDateTime>,
    pub end: Option<EventDateTime>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl EventDateTime {
    pub fn timed(instant: DateTime<Utc>) -> Self {
        Self { date_time: Some(instant.to_rfc3339()), date: None }
    }
}

/// Payload for event insert/patch calls
#[derive(Debug, Serialize)]
pub struct GoogleEventWrite {
    pub summary: String,
    pub start: EventDateTime,
    pub end: EventDateTime,
}

#[derive(Debug, Serialize)]
pub struct WatchRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct WatchResponse {
    pub id: String,
    #[serde(rename = "resourceId")]
    pub resource_id: String,
    /// Epoch milliseconds, as a string, per the channels API
    pub expiration: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StopRequest {
    pub id: String,
    #[serde(rename = "resourceId")]
    pub resource_id: String,
}

impl GoogleEvent {
    /// Validate and convert a wire event into the domain representation.
    ///
    /// Cancelled events arrive stripped down to id + status in delta feeds;
    /// they only carry the deletion signal, so missing times are tolerated
    /// there and nowhere else.
    pub fn into_remote_event(self, calendar_id: &str) -> Result<RemoteEvent> {
        let cancelled = self.status.as_deref() == Some("cancelled");
        let title = self
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Untitled Event".to_string());

        let (start, end) = match (self.start, self.end) {
            (Some(start), Some(end)) => {
                (parse_event_time(&start, "start")?, parse_event_time(&end, "end")?)
            }
            _ if cancelled => {
                let placeholder = Utc
                    .timestamp_opt(0, 0)
                    .single()
                    .ok_or_else(|| SyncError::Internal("epoch out of range".into()))?;
                (placeholder, placeholder)
            }
            _ => {
                return Err(SyncError::Validation(format!(
                    "event {} is missing start or end",
                    self.id
                )))
            }
        };

        let updated = self
            .updated
            .as_deref()
            .map(|value| parse_timestamp(value, "updated"))
            .transpose()?;

        Ok(RemoteEvent {
            id: self.id,
            calendar_id: calendar_id.to_string(),
            title,
            start,
            end,
            etag: self.etag,
            updated,
            cancelled,
        })
    }
}

impl WatchResponse {
    /// Convert the channel-open response into a domain watch channel.
    ///
    /// `fallback_ttl` covers providers that omit the expiration field.
    pub fn into_watch_channel(
        self,
        user_id: &str,
        calendar_id: &str,
        fallback_ttl: ChronoDuration,
    ) -> Result<WatchChannel> {
        let expiration = match self.expiration.as_deref() {
            Some(millis) => {
                let millis: i64 = millis.trim().parse().map_err(|_| {
                    SyncError::Validation(format!("invalid channel expiration '{millis}'"))
                })?;
                Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
                    SyncError::Validation(format!("channel expiration {millis} out of range"))
                })?
            }
            None => Utc::now() + fallback_ttl,
        };

        Ok(WatchChannel {
            id: self.id,
            user_id: user_id.to_string(),
            calendar_id: calendar_id.to_string(),
            resource_id: self.resource_id,
            expiration,
            active: true,
        })
    }
}

/// Parse a timed or all-day boundary. All-day dates resolve to midnight UTC.
fn parse_event_time(value: &EventDateTime, field: &str) -> Result<DateTime<Utc>> {
    if let Some(ref date_time) = value.date_time {
        return parse_timestamp(date_time, field);
    }
    if let Some(ref date) = value.date {
        let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
            SyncError::Validation(format!("invalid all-day {field} date '{date}': {e}"))
        })?;
        let midnight = parsed.and_hms_opt(0, 0, 0).ok_or_else(|| {
            SyncError::Validation(format!("invalid all-day {field} date '{date}'"))
        })?;
        return Ok(midnight.and_utc());
    }
    Err(SyncError::Validation(format!("{field} has neither dateTime nor date")))
}

/// RFC 3339 with tolerance for a missing timezone suffix (treated as UTC)
fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    let has_explicit_timezone = trimmed.ends_with('Z')
        || trimmed
            .rfind('T')
            .is_some_and(|idx| trimmed[idx + 1..].chars().any(|c| matches!(c, '+' | '-')));

    let candidate = if has_explicit_timezone { trimmed.to_string() } else { format!("{trimmed}Z") };

    DateTime::parse_from_rfc3339(&candidate)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Validation(format!("invalid {field} timestamp '{value}': {e}")))
}
