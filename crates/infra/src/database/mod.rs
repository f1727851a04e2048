//! SQLite persistence layer
//!
//! The `DbManager` owns the connection pool and schema; each repository
//! implements one core port over it. Repository methods hop onto the
//! blocking pool for SQL work and map storage errors into the domain
//! taxonomy at the boundary.

pub mod channel_repository;
pub mod credential_repository;
pub mod event_repository;
pub mod ledger_repository;
pub mod manager;
pub mod profile_repository;

pub use channel_repository::SqliteChannelRepository;
pub use credential_repository::SqliteCredentialRepository;
pub use event_repository::SqliteLocalEventStore;
pub use ledger_repository::SqliteLedgerRepository;
pub use manager::DbManager;
pub use profile_repository::SqliteProfileRepository;

use calbridge_domain::{Result, SyncError};
use chrono::{DateTime, TimeZone, Utc};

/// Decode an epoch-seconds column into an instant
pub(crate) fn datetime_from_epoch(secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp {secs} out of range").into(),
        )
    })
}

/// Map a blocking-pool join failure into the domain error
pub(crate) fn map_join_error(err: tokio::task::JoinError) -> SyncError {
    if err.is_cancelled() {
        SyncError::Internal("blocking task cancelled".into())
    } else {
        SyncError::Internal(format!("blocking task failed: {err}"))
    }
}

/// Shorthand used by the repositories to run SQL on the blocking pool
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(map_join_error)?
}
