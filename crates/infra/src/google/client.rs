//! Google Calendar API client
//!
//! Implements the `RemoteCalendar` port over the events and channels APIs.
//! Access tokens come from the injected credential accessor on every call;
//! transport retries live in `HttpClient`, status mapping lives here.

use std::sync::Arc;

use async_trait::async_trait;
use calbridge_core::ports::{CredentialAccessor, EventPage, RemoteCalendar};
use calbridge_domain::constants::CHANNEL_TTL_HOURS;
use calbridge_domain::{LocalEvent, RemoteEvent, Result, SyncError, WatchChannel};
use chrono::Duration as ChronoDuration;
use reqwest::{Method, Response, StatusCode};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::wire::{
    EventDateTime, GoogleEvent, GoogleEventWrite, GoogleEventsResponse, StopRequest, WatchRequest,
    WatchResponse,
};
use crate::errors::conversions::sync_error_for_status;
use crate::http::HttpClient;

type QueryParam = (&'static str, String);

/// Google Calendar provider client
#[derive(Clone)]
pub struct GoogleCalendarClient {
    http: HttpClient,
    base_url: String,
    credentials: Arc<dyn CredentialAccessor>,
}

impl GoogleCalendarClient {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialAccessor>,
    ) -> Self {
        Self { http, base_url: base_url.into().trim_end_matches('/').to_string(), credentials }
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.base_url, calendar_id)
    }

    /// Turn a non-success provider response into the domain taxonomy,
    /// preserving the response body as detail.
    async fn provider_error(response: Response) -> SyncError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        sync_error_for_status(status, Some(body.trim()))
    }

    async fn parse_event_response(
        response: Response,
        calendar_id: &str,
    ) -> Result<RemoteEvent> {
        let event: GoogleEvent = response
            .json()
            .await
            .map_err(|e| SyncError::Validation(format!("failed to parse event response: {e}")))?;
        event.into_remote_event(calendar_id)
    }
}

#[async_trait]
impl RemoteCalendar for GoogleCalendarClient {
    #[instrument(skip(self), fields(calendar_id))]
    async fn list(
        &self,
        user_id: &str,
        calendar_id: &str,
        cursor: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventPage> {
        let token = self.credentials.valid_access_token(user_id).await?;

        let mut params: Vec<QueryParam> = match cursor {
            Some(cursor) => vec![("syncToken", cursor.to_string())],
            None => vec![
                ("singleEvents", "true".to_string()),
                ("showDeleted", "true".to_string()),
                ("maxResults", "250".to_string()),
            ],
        };
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token.to_string()));
        }

        let request = self
            .http
            .request(Method::GET, self.events_url(calendar_id))
            .bearer_auth(&token)
            .query(&params);
        let response = self.http.send(request).await?;

        if !response.status().is_success() {
            return Err(Self::provider_error(response).await);
        }

        let listing: GoogleEventsResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Validation(format!("failed to parse listing: {e}")))?;

        let events = listing
            .items
            .into_iter()
            .map(|item| item.into_remote_event(calendar_id))
            .collect::<Result<Vec<RemoteEvent>>>()?;

        debug!(
            count = events.len(),
            has_next_page = listing.next_page_token.is_some(),
            "listed calendar events"
        );

        Ok(EventPage {
            events,
            next_page: listing.next_page_token,
            next_cursor: listing.next_sync_token,
        })
    }

    #[instrument(skip(self, event), fields(event_id = %event.id))]
    async fn create(
        &self,
        user_id: &str,
        calendar_id: &str,
        event: &LocalEvent,
    ) -> Result<RemoteEvent> {
        let token = self.credentials.valid_access_token(user_id).await?;

        let request = self
            .http
            .request(Method::POST, self.events_url(calendar_id))
            .bearer_auth(&token)
            .json(&write_payload(event));
        let response = self.http.send(request).await?;

        if !response.status().is_success() {
            return Err(Self::provider_error(response).await);
        }

        Self::parse_event_response(response, calendar_id).await
    }

    #[instrument(skip(self, event), fields(event_id = %event.id))]
    async fn update(
        &self,
        user_id: &str,
        calendar_id: &str,
        remote_event_id: &str,
        event: &LocalEvent,
    ) -> Result<RemoteEvent> {
        let token = self.credentials.valid_access_token(user_id).await?;

        let url = format!("{}/{}", self.events_url(calendar_id), remote_event_id);
        let request =
            self.http.request(Method::PATCH, url).bearer_auth(&token).json(&write_payload(event));
        let response = self.http.send(request).await?;

        if !response.status().is_success() {
            return Err(Self::provider_error(response).await);
        }

        Self::parse_event_response(response, calendar_id).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, user_id: &str, calendar_id: &str, remote_event_id: &str) -> Result<()> {
        let token = self.credentials.valid_access_token(user_id).await?;

        let url = format!("{}/{}", self.events_url(calendar_id), remote_event_id);
        let request = self.http.request(Method::DELETE, url).bearer_auth(&token);
        let response = self.http.send(request).await?;

        // 410 on a delete means the event was already removed, which is a
        // not-found for our purposes, not an expired cursor
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(SyncError::NotFound(format!(
                "remote event {remote_event_id} already gone"
            ))),
            _ => Err(Self::provider_error(response).await),
        }
    }

    #[instrument(skip(self))]
    async fn watch(
        &self,
        user_id: &str,
        calendar_id: &str,
        callback_url: &str,
    ) -> Result<WatchChannel> {
        let token = self.credentials.valid_access_token(user_id).await?;

        let body = WatchRequest {
            id: Uuid::now_v7().to_string(),
            kind: "web_hook".to_string(),
            address: callback_url.to_string(),
        };
        let url = format!("{}/watch", self.events_url(calendar_id));
        let request = self.http.request(Method::POST, url).bearer_auth(&token).json(&body);
        let response = self.http.send(request).await?;

        if !response.status().is_success() {
            return Err(Self::provider_error(response).await);
        }

        let watch: WatchResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Validation(format!("failed to parse watch response: {e}")))?;

        watch.into_watch_channel(user_id, calendar_id, ChronoDuration::hours(CHANNEL_TTL_HOURS))
    }

    #[instrument(skip(self))]
    async fn stop(&self, user_id: &str, channel_id: &str, resource_id: &str) -> Result<()> {
        let token = self.credentials.valid_access_token(user_id).await?;

        let body =
            StopRequest { id: channel_id.to_string(), resource_id: resource_id.to_string() };
        let url = format!("{}/channels/stop", self.base_url);
        let request = self.http.request(Method::POST, url).bearer_auth(&token).json(&body);
        let response = self.http.send(request).await?;

        // Stopping a channel the provider already expired is not a failure
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(channel_id, "channel already gone on provider side");
                Ok(())
            }
            _ => Err(Self::provider_error(response).await),
        }
    }
}

fn write_payload(event: &LocalEvent) -> GoogleEventWrite {
    GoogleEventWrite {
        summary: event.title.clone(),
        start: EventDateTime::timed(event.start),
        end: EventDateTime::timed(event.end),
    }
}
