//! Per-user sync profile repository implementation

use std::sync::Arc;

use async_trait::async_trait;
use calbridge_core::ports::SyncProfileRepository;
use calbridge_domain::{Result, SyncError, SyncProfile};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::manager::DbManager;
use super::{datetime_from_epoch, run_blocking};
use crate::errors::InfraError;

/// SQLite-backed sync profile store
pub struct SqliteProfileRepository {
    db: Arc<DbManager>,
}

impl SqliteProfileRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncProfileRepository for SqliteProfileRepository {
    async fn get(&self, user_id: &str) -> Result<Option<SyncProfile>> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();

        run_blocking(move || {
            let conn = db.get_connection()?;
            let sql = "SELECT user_id, sync_enabled, linked_calendar_id, last_sync_at, sync_cursor
                       FROM sync_profiles
                       WHERE user_id = ?1";

            match conn.query_row(sql, params![user_id], map_profile_row) {
                Ok(profile) => Ok(Some(profile)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(err) => Err(map_sql_error(err)),
            }
        })
        .await
    }

    async fn upsert(&self, profile: &SyncProfile) -> Result<()> {
        let db = Arc::clone(&self.db);
        let profile = profile.clone();

        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO sync_profiles
                     (user_id, sync_enabled, linked_calendar_id, last_sync_at, sync_cursor,
                      updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (user_id) DO UPDATE SET
                     sync_enabled = excluded.sync_enabled,
                     linked_calendar_id = excluded.linked_calendar_id,
                     last_sync_at = excluded.last_sync_at,
                     sync_cursor = excluded.sync_cursor,
                     updated_at = excluded.updated_at",
                params![
                    profile.user_id,
                    profile.sync_enabled,
                    profile.linked_calendar_id,
                    profile.last_sync_at.map(|t| t.timestamp()),
                    profile.sync_cursor,
                    Utc::now().timestamp(),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn set_cursor(&self, user_id: &str, cursor: Option<&str>) -> Result<()> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        let cursor = cursor.map(String::from);

        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE sync_profiles SET sync_cursor = ?1, updated_at = ?2 WHERE user_id = ?3",
                params![cursor, Utc::now().timestamp(), user_id],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn touch_last_sync(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();

        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE sync_profiles SET last_sync_at = ?1, updated_at = ?2 WHERE user_id = ?3",
                params![at.timestamp(), Utc::now().timestamp(), user_id],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn list_sync_enabled(&self) -> Result<Vec<SyncProfile>> {
        let db = Arc::clone(&self.db);

        run_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT user_id, sync_enabled, linked_calendar_id, last_sync_at, sync_cursor
                     FROM sync_profiles
                     WHERE sync_enabled = 1
                     ORDER BY user_id ASC",
                )
                .map_err(map_sql_error)?;

            let rows = stmt
                .query_map(params![], map_profile_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
    }
}

fn map_profile_row(row: &Row<'_>) -> rusqlite::Result<SyncProfile> {
    let last_sync_at: Option<i64> = row.get(3)?;
    Ok(SyncProfile {
        user_id: row.get(0)?,
        sync_enabled: row.get(1)?,
        linked_calendar_id: row.get(2)?,
        last_sync_at: last_sync_at.map(datetime_from_epoch).transpose()?,
        sync_cursor: row.get(4)?,
    })
}

fn map_sql_error(err: rusqlite::Error) -> SyncError {
    SyncError::from(InfraError::from(err))
}
