//! Sync ledger repository implementation
//!
//! Persists the mapping between local and remote event identities plus the
//! metadata needed for change detection (last sync instant, remote version
//! marker, content fingerprint). Every write is a single statement, so each
//! entry is updated all-or-nothing; a crash mid-run leaves other entries
//! stale, which the next diff pass heals.

use std::sync::Arc;

use async_trait::async_trait;
use calbridge_core::ports::LedgerRepository;
use calbridge_domain::{Result, SyncError, SyncedEvent};
use rusqlite::{params, Connection, Row};

use super::manager::DbManager;
use super::{datetime_from_epoch, run_blocking};
use crate::errors::InfraError;

/// SQLite-backed sync ledger
pub struct SqliteLedgerRepository {
    db: Arc<DbManager>,
}

impl SqliteLedgerRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LedgerRepository for SqliteLedgerRepository {
    async fn lookup_by_local(
        &self,
        user_id: &str,
        calendar_id: &str,
        local_event_id: &str,
    ) -> Result<Option<SyncedEvent>> {
        let db = Arc::clone(&self.db);
        let (user_id, calendar_id, local_event_id) =
            (user_id.to_string(), calendar_id.to_string(), local_event_id.to_string());

        run_blocking(move || {
            let conn = db.get_connection()?;
            query_by_local(&conn, &user_id, &calendar_id, &local_event_id)
        })
        .await
    }

    async fn lookup_by_remote(
        &self,
        user_id: &str,
        calendar_id: &str,
        remote_event_id: &str,
    ) -> Result<Option<SyncedEvent>> {
        let db = Arc::clone(&self.db);
        let (user_id, calendar_id, remote_event_id) =
            (user_id.to_string(), calendar_id.to_string(), remote_event_id.to_string());

        run_blocking(move || {
            let conn = db.get_connection()?;
            query_by_remote(&conn, &user_id, &calendar_id, &remote_event_id)
        })
        .await
    }

    async fn upsert(&self, entry: &SyncedEvent) -> Result<()> {
        let db = Arc::clone(&self.db);
        let entry = entry.clone();

        run_blocking(move || {
            let conn = db.get_connection()?;
            insert_entry(&conn, &entry)
        })
        .await
    }

    async fn remove(&self, user_id: &str, calendar_id: &str, local_event_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let (user_id, calendar_id, local_event_id) =
            (user_id.to_string(), calendar_id.to_string(), local_event_id.to_string());

        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "DELETE FROM sync_ledger
                 WHERE user_id = ?1 AND calendar_id = ?2 AND local_event_id = ?3",
                params![user_id, calendar_id, local_event_id],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn list_for_calendar(
        &self,
        user_id: &str,
        calendar_id: &str,
    ) -> Result<Vec<SyncedEvent>> {
        let db = Arc::clone(&self.db);
        let (user_id, calendar_id) = (user_id.to_string(), calendar_id.to_string());

        run_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT user_id, calendar_id, local_event_id, remote_event_id,
                            last_synced_at, remote_version, fingerprint
                     FROM sync_ledger
                     WHERE user_id = ?1 AND calendar_id = ?2
                     ORDER BY local_event_id ASC",
                )
                .map_err(map_sql_error)?;

            let rows = stmt
                .query_map(params![user_id, calendar_id], map_entry_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
    }

    async fn count_unlinked(&self, user_id: &str) -> Result<usize> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();

        run_blocking(move || {
            let conn = db.get_connection()?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*)
                     FROM local_events e
                     WHERE e.user_id = ?1
                       AND NOT EXISTS (
                           SELECT 1 FROM sync_ledger s
                           WHERE s.user_id = e.user_id AND s.local_event_id = e.id
                       )",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(count as usize)
        })
        .await
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn insert_entry(conn: &Connection, entry: &SyncedEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_ledger (user_id, calendar_id, local_event_id, remote_event_id,
                                  last_synced_at, remote_version, fingerprint)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (user_id, calendar_id, local_event_id) DO UPDATE SET
             remote_event_id = excluded.remote_event_id,
             last_synced_at = excluded.last_synced_at,
             remote_version = excluded.remote_version,
             fingerprint = excluded.fingerprint",
        params![
            entry.user_id,
            entry.calendar_id,
            entry.local_event_id,
            entry.remote_event_id,
            entry.last_synced_at.timestamp(),
            entry.remote_version,
            entry.fingerprint,
        ],
    )
    .map_err(map_sql_error)?;
    Ok(())
}

fn query_by_local(
    conn: &Connection,
    user_id: &str,
    calendar_id: &str,
    local_event_id: &str,
) -> Result<Option<SyncedEvent>> {
    let sql = "SELECT user_id, calendar_id, local_event_id, remote_event_id,
                      last_synced_at, remote_version, fingerprint
               FROM sync_ledger
               WHERE user_id = ?1 AND calendar_id = ?2 AND local_event_id = ?3";

    match conn.query_row(sql, params![user_id, calendar_id, local_event_id], map_entry_row) {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(map_sql_error(err)),
    }
}

fn query_by_remote(
    conn: &Connection,
    user_id: &str,
    calendar_id: &str,
    remote_event_id: &str,
) -> Result<Option<SyncedEvent>> {
    let sql = "SELECT user_id, calendar_id, local_event_id, remote_event_id,
                      last_synced_at, remote_version, fingerprint
               FROM sync_ledger
               WHERE user_id = ?1 AND calendar_id = ?2 AND remote_event_id = ?3";

    match conn.query_row(sql, params![user_id, calendar_id, remote_event_id], map_entry_row) {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(map_sql_error(err)),
    }
}

fn map_entry_row(row: &Row<'_>) -> rusqlite::Result<SyncedEvent> {
    Ok(SyncedEvent {
        user_id: row.get(0)?,
        calendar_id: row.get(1)?,
        local_event_id: row.get(2)?,
        remote_event_id: row.get(3)?,
        last_synced_at: datetime_from_epoch(row.get(4)?)?,
        remote_version: row.get(5)?,
        fingerprint: row.get(6)?,
    })
}

fn map_sql_error(err: rusqlite::Error) -> SyncError {
    SyncError::from(InfraError::from(err))
}

// ============================================================================
// Tests
// ============================================================================
