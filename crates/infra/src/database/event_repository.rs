//! Local event store implementation

use std::sync::Arc;

use async_trait::async_trait;
use calbridge_core::ports::LocalEventStore;
use calbridge_domain::{LocalEvent, Result, SyncError};
use rusqlite::{params, Row};

use super::manager::DbManager;
use super::{datetime_from_epoch, run_blocking};
use crate::errors::InfraError;

/// SQLite-backed local event store
pub struct SqliteLocalEventStore {
    db: Arc<DbManager>,
}

impl SqliteLocalEventStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LocalEventStore for SqliteLocalEventStore {
    async fn list(&self, user_id: &str) -> Result<Vec<LocalEvent>> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();

        run_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, title, start_ts, end_ts, updated_at
                     FROM local_events
                     WHERE user_id = ?1
                     ORDER BY start_ts ASC, id ASC",
                )
                .map_err(map_sql_error)?;

            let rows = stmt
                .query_map(params![user_id], map_event_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
    }

    async fn create(&self, event: &LocalEvent) -> Result<()> {
        let db = Arc::clone(&self.db);
        let event = event.clone();

        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO local_events (id, user_id, title, start_ts, end_ts, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id,
                    event.user_id,
                    event.title,
                    event.start.timestamp(),
                    event.end.timestamp(),
                    event.updated_at.timestamp(),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn update(&self, event: &LocalEvent) -> Result<()> {
        let db = Arc::clone(&self.db);
        let event = event.clone();

        run_blocking(move || {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    "UPDATE local_events
                     SET title = ?1, start_ts = ?2, end_ts = ?3, updated_at = ?4
                     WHERE id = ?5 AND user_id = ?6",
                    params![
                        event.title,
                        event.start.timestamp(),
                        event.end.timestamp(),
                        event.updated_at.timestamp(),
                        event.id,
                        event.user_id,
                    ],
                )
                .map_err(map_sql_error)?;

            if changed == 0 {
                return Err(SyncError::NotFound(format!("local event {}", event.id)));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, user_id: &str, event_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let (user_id, event_id) = (user_id.to_string(), event_id.to_string());

        run_blocking(move || {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    "DELETE FROM local_events WHERE id = ?1 AND user_id = ?2",
                    params![event_id, user_id],
                )
                .map_err(map_sql_error)?;

            if changed == 0 {
                return Err(SyncError::NotFound(format!("local event {event_id}")));
            }
            Ok(())
        })
        .await
    }
}

fn map_event_row(row: &Row<'_>) -> rusqlite::Result<LocalEvent> {
    Ok(LocalEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        start: datetime_from_epoch(row.get(3)?)?,
        end: datetime_from_epoch(row.get(4)?)?,
        updated_at: datetime_from_epoch(row.get(5)?)?,
    })
}

fn map_sql_error(err: rusqlite::Error) -> SyncError {
    SyncError::from(InfraError::from(err))
}
