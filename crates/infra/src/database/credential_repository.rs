//! Stored OAuth credential repository
//!
//! Backing store for the credential accessor. Not a core port: credential
//! storage is an infrastructure detail behind `CredentialAccessor`.

use std::sync::Arc;

use calbridge_domain::{Result, StoredCredential, SyncError};
use chrono::Utc;
use rusqlite::{params, Row};

use super::manager::DbManager;
use super::{datetime_from_epoch, run_blocking};
use crate::errors::InfraError;

/// SQLite-backed credential store
pub struct SqliteCredentialRepository {
    db: Arc<DbManager>,
}

impl SqliteCredentialRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<StoredCredential>> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();

        run_blocking(move || {
            let conn = db.get_connection()?;
            let sql = "SELECT user_id, refresh_token, access_token, expires_at
                       FROM credentials
                       WHERE user_id = ?1";

            match conn.query_row(sql, params![user_id], map_credential_row) {
                Ok(credential) => Ok(Some(credential)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(err) => Err(map_sql_error(err)),
            }
        })
        .await
    }

    pub async fn upsert(&self, credential: &StoredCredential) -> Result<()> {
        let db = Arc::clone(&self.db);
        let credential = credential.clone();

        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO credentials
                     (user_id, refresh_token, access_token, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (user_id) DO UPDATE SET
                     refresh_token = excluded.refresh_token,
                     access_token = excluded.access_token,
                     expires_at = excluded.expires_at,
                     updated_at = excluded.updated_at",
                params![
                    credential.user_id,
                    credential.refresh_token,
                    credential.access_token,
                    credential.expires_at.map(|t| t.timestamp()),
                    Utc::now().timestamp(),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    /// Drop a user's credentials, e.g. after the provider reports them
    /// revoked.
    pub async fn remove(&self, user_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();

        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute("DELETE FROM credentials WHERE user_id = ?1", params![user_id])
                .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }
}

fn map_credential_row(row: &Row<'_>) -> rusqlite::Result<StoredCredential> {
    let expires_at: Option<i64> = row.get(3)?;
    Ok(StoredCredential {
        user_id: row.get(0)?,
        refresh_token: row.get(1)?,
        access_token: row.get(2)?,
        expires_at: expires_at.map(datetime_from_epoch).transpose()?,
    })
}

fn map_sql_error(err: rusqlite::Error) -> SyncError {
    SyncError::from(InfraError::from(err))
}
