//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `CALBRIDGE_DB_PATH`: Database file path (required)
//! - `CALBRIDGE_PROVIDER_CLIENT_ID`: OAuth client id (required)
//! - `CALBRIDGE_PROVIDER_CLIENT_SECRET`: OAuth client secret (required)
//! - `CALBRIDGE_CALLBACK_URL`: Webhook callback URL (required)
//! - `CALBRIDGE_DB_POOL_SIZE`: Connection pool size
//! - `CALBRIDGE_PROVIDER_API_BASE`: Calendar API base URL
//! - `CALBRIDGE_PROVIDER_TOKEN_URL`: OAuth token endpoint
//! - `CALBRIDGE_RENEWAL_CRON`: Renewal sweep cron expression
//! - `CALBRIDGE_BATCH_SIZE`: Batch processor size
//! - `CALBRIDGE_BATCH_DELAY_MS`: Inter-batch delay in milliseconds

use std::path::PathBuf;

use calbridge_domain::{
    Config, DatabaseConfig, ProviderConfig, Result, SyncError, SyncSettings,
};

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `SyncError::Config` if configuration cannot be loaded from either
/// source, the file format is invalid, or required fields are missing.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `SyncError::Config` if required variables are missing or have
/// invalid values.
pub fn load_from_env() -> Result<Config> {
    let db_path = env_var("CALBRIDGE_DB_PATH")?;
    let pool_size = match std::env::var("CALBRIDGE_DB_POOL_SIZE") {
        Ok(value) => value
            .parse::<u32>()
            .map_err(|e| SyncError::Config(format!("invalid pool size: {e}")))?,
        Err(_) => 4,
    };

    let client_id = env_var("CALBRIDGE_PROVIDER_CLIENT_ID")?;
    let client_secret = env_var("CALBRIDGE_PROVIDER_CLIENT_SECRET")?;
    let callback_url = env_var("CALBRIDGE_CALLBACK_URL")?;

    let mut sync = SyncSettings { callback_url, ..SyncSettings::default() };
    if let Ok(value) = std::env::var("CALBRIDGE_RENEWAL_CRON") {
        sync.renewal_cron = value;
    }
    if let Ok(value) = std::env::var("CALBRIDGE_BATCH_SIZE") {
        sync.batch_size = value
            .parse()
            .map_err(|e| SyncError::Config(format!("invalid batch size: {e}")))?;
    }
    if let Ok(value) = std::env::var("CALBRIDGE_BATCH_DELAY_MS") {
        sync.batch_delay_ms = value
            .parse()
            .map_err(|e| SyncError::Config(format!("invalid batch delay: {e}")))?;
    }

    let mut provider = ProviderConfig {
        api_base_url: String::new(),
        token_url: String::new(),
        client_id,
        client_secret,
    };
    provider.api_base_url = std::env::var("CALBRIDGE_PROVIDER_API_BASE")
        .unwrap_or_else(|_| "https://www.googleapis.com/calendar/v3".into());
    provider.token_url = std::env::var("CALBRIDGE_PROVIDER_TOKEN_URL")
        .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".into());

    Ok(Config { database: DatabaseConfig { path: db_path, pool_size }, sync, provider })
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `SyncError::Config` if the file is missing, unreadable, or
/// structurally invalid.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(SyncError::Config(format!("config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            SyncError::Config("no config file found in any of the standard locations".to_string())
        })?,
    };

    let contents = std::fs::read_to_string(&config_path).map_err(|e| {
        SyncError::Config(format!("failed to read {}: {e}", config_path.display()))
    })?;

    let config = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("invalid JSON config: {e}")))?,
        _ => toml::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("invalid TOML config: {e}")))?,
    };

    tracing::info!(path = %config_path.display(), "configuration loaded from file");
    Ok(config)
}

/// Probe standard locations for a config file
fn probe_config_paths() -> Option<PathBuf> {
    let candidates = [
        "config.toml",
        "config.json",
        "calbridge.toml",
        "calbridge.json",
        "../config.toml",
        "../calbridge.toml",
    ];

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| SyncError::Config(format!("missing environment variable {name}")))
}
