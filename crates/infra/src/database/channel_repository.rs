//! Watch channel registry implementation
//!
//! The swap is the invariant-bearing operation: deactivating the previous
//! channel and activating its replacement happen in one transaction, so a
//! (user, calendar) pair is never observed with zero active channels during
//! renewal.

use std::sync::Arc;

use async_trait::async_trait;
use calbridge_core::ports::ChannelRepository;
use calbridge_domain::{Result, SyncError, WatchChannel};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::manager::DbManager;
use super::{datetime_from_epoch, run_blocking};
use crate::errors::InfraError;

/// SQLite-backed watch channel registry
pub struct SqliteChannelRepository {
    db: Arc<DbManager>,
}

impl SqliteChannelRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChannelRepository for SqliteChannelRepository {
    async fn find_active(&self, user_id: &str, calendar_id: &str) -> Result<Option<WatchChannel>> {
        let db = Arc::clone(&self.db);
        let (user_id, calendar_id) = (user_id.to_string(), calendar_id.to_string());

        run_blocking(move || {
            let conn = db.get_connection()?;
            let sql = "SELECT id, user_id, calendar_id, resource_id, expiration, active
                       FROM watch_channels
                       WHERE user_id = ?1 AND calendar_id = ?2 AND active = 1";

            match conn.query_row(sql, params![user_id, calendar_id], map_channel_row) {
                Ok(channel) => Ok(Some(channel)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(err) => Err(map_sql_error(err)),
            }
        })
        .await
    }

    async fn find_by_channel_id(&self, channel_id: &str) -> Result<Option<WatchChannel>> {
        let db = Arc::clone(&self.db);
        let channel_id = channel_id.to_string();

        run_blocking(move || {
            let conn = db.get_connection()?;
            let sql = "SELECT id, user_id, calendar_id, resource_id, expiration, active
                       FROM watch_channels
                       WHERE id = ?1";

            match conn.query_row(sql, params![channel_id], map_channel_row) {
                Ok(channel) => Ok(Some(channel)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(err) => Err(map_sql_error(err)),
            }
        })
        .await
    }

    async fn list_expiring_before(&self, deadline: DateTime<Utc>) -> Result<Vec<WatchChannel>> {
        let db = Arc::clone(&self.db);

        run_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, calendar_id, resource_id, expiration, active
                     FROM watch_channels
                     WHERE active = 1 AND expiration < ?1
                     ORDER BY expiration ASC",
                )
                .map_err(map_sql_error)?;

            let rows = stmt
                .query_map(params![deadline.timestamp()], map_channel_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
    }

    async fn swap_active(&self, channel: &WatchChannel) -> Result<()> {
        let db = Arc::clone(&self.db);
        let channel = channel.clone();

        run_blocking(move || {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;

            tx.execute(
                "UPDATE watch_channels SET active = 0
                 WHERE user_id = ?1 AND calendar_id = ?2 AND active = 1",
                params![channel.user_id, channel.calendar_id],
            )
            .map_err(map_sql_error)?;

            tx.execute(
                "INSERT INTO watch_channels
                     (id, user_id, calendar_id, resource_id, expiration, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
                params![
                    channel.id,
                    channel.user_id,
                    channel.calendar_id,
                    channel.resource_id,
                    channel.expiration.timestamp(),
                    Utc::now().timestamp(),
                ],
            )
            .map_err(map_sql_error)?;

            tx.commit().map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn deactivate(&self, channel_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let channel_id = channel_id.to_string();

        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE watch_channels SET active = 0 WHERE id = ?1",
                params![channel_id],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }
}

fn map_channel_row(row: &Row<'_>) -> rusqlite::Result<WatchChannel> {
    Ok(WatchChannel {
        id: row.get(0)?,
        user_id: row.get(1)?,
        calendar_id: row.get(2)?,
        resource_id: row.get(3)?,
        expiration: datetime_from_epoch(row.get(4)?)?,
        active: row.get(5)?,
    })
}

fn map_sql_error(err: rusqlite::Error) -> SyncError {
    SyncError::from(InfraError::from(err))
}
