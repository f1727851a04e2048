//! Configuration structures

use serde::{Deserialize, Serialize};

use crate::constants;

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    pub provider: ProviderConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    4
}

/// Sync engine tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Concurrent operations per batch when applying a sync plan or sweeping
    pub batch_size: usize,
    /// Pause between batches, milliseconds
    pub batch_delay_ms: u64,
    /// Renewal sweep lookahead window, hours
    pub renewal_lookahead_hours: i64,
    /// Cron expression driving the renewal sweep
    pub renewal_cron: String,
    /// Timeout for a single provider operation, seconds
    pub operation_timeout_secs: u64,
    /// Public URL the provider pushes webhook notifications to
    pub callback_url: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: constants::RENEWAL_BATCH_SIZE,
            batch_delay_ms: constants::RENEWAL_BATCH_DELAY_MS,
            renewal_lookahead_hours: constants::RENEWAL_LOOKAHEAD_HOURS,
            renewal_cron: "0 0 * * * *".into(), // hourly
            operation_timeout_secs: 30,
            callback_url: String::new(),
        }
    }
}

/// Remote calendar provider endpoints and OAuth client material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

fn default_api_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".into()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}
