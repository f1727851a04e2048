//! Stored-credential accessor
//!
//! Implements the `CredentialAccessor` port over the credentials table:
//! hands out the cached access token while it is fresh, refreshes against
//! the OAuth token endpoint when it is not. A provider `invalid_grant`
//! means the user revoked access; that surfaces as an auth error and is
//! never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calbridge_core::ports::CredentialAccessor;
use calbridge_domain::{ProviderConfig, Result, StoredCredential, SyncError};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::database::SqliteCredentialRepository;
use crate::http::HttpClient;

/// Refresh this far before the recorded expiry so a token never dies
/// mid-request
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    expires_in: i64,
}

/// Credential accessor backed by the stored refresh tokens
pub struct StoredCredentialAccessor {
    store: Arc<SqliteCredentialRepository>,
    http: HttpClient,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl StoredCredentialAccessor {
    pub fn new(
        store: Arc<SqliteCredentialRepository>,
        http: HttpClient,
        provider: &ProviderConfig,
    ) -> Self {
        Self {
            store,
            http,
            token_url: provider.token_url.clone(),
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.clone(),
        }
    }

    async fn refresh(&self, credential: &StoredCredential) -> Result<StoredCredential> {
        let request = self.http.request(Method::POST, &self.token_url).form(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", credential.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ]);

        let response = self.http.send(request).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("invalid_grant") {
                warn!(user_id = %credential.user_id, "refresh token revoked by provider");
                return Err(SyncError::Auth(format!(
                    "credentials revoked for user {}; re-authorization required",
                    credential.user_id
                )));
            }
            return Err(SyncError::Auth(format!("token refresh failed ({status}): {body}")));
        }

        let refreshed: TokenRefreshResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("failed to parse token response: {e}")))?;

        let updated = StoredCredential {
            user_id: credential.user_id.clone(),
            refresh_token: credential.refresh_token.clone(),
            access_token: Some(refreshed.access_token),
            expires_at: Some(Utc::now() + ChronoDuration::seconds(refreshed.expires_in)),
        };
        self.store.upsert(&updated).await?;

        debug!(user_id = %credential.user_id, "access token refreshed");
        Ok(updated)
    }
}

#[async_trait]
impl CredentialAccessor for StoredCredentialAccessor {
    #[instrument(skip(self))]
    async fn valid_access_token(&self, user_id: &str) -> Result<String> {
        let credential = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| SyncError::Auth(format!("no linked account for user {user_id}")))?;

        let skew = ChronoDuration::from_std(EXPIRY_SKEW)
            .map_err(|e| SyncError::Internal(format!("invalid expiry skew: {e}")))?;

        if let (Some(token), Some(expires_at)) =
            (credential.access_token.as_ref(), credential.expires_at)
        {
            if expires_at > Utc::now() + skew {
                return Ok(token.clone());
            }
        }

        let refreshed = self.refresh(&credential).await?;
        refreshed
            .access_token
            .ok_or_else(|| SyncError::Internal("refresh produced no access token".into()))
    }
}
