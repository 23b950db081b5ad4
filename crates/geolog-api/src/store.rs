//! Server-side persistence for accounts and location logs.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geolog_core::models::{LocationRecord, SampleId, SyncLocationInput};
use geolog_core::util::from_unix_millis;
use libsql::{params, Builder, Connection, Row, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;

const CURRENT_VERSION: i32 = 1;

const LOCATION_COLUMNS: &str = "id, user_id, lat, lng, altitude, timestamp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub id: String,
    pub email: String,
    pub password_hash: String,
}

struct Inner {
    _db: libsql::Database,
    conn: Mutex<Connection>,
}

/// libSQL store shared by all request handlers.
#[derive(Clone)]
pub struct LocationStore {
    inner: Arc<Inner>,
}

impl LocationStore {
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path).build().await?;
        Self::from_database(db).await
    }

    pub async fn open_in_memory() -> Result<Self, AppError> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: libsql::Database) -> Result<Self, AppError> {
        let conn = db.connect()?;
        conn.query("PRAGMA journal_mode = WAL;", ()).await.ok();
        conn.query("PRAGMA busy_timeout = 5000;", ()).await.ok();
        migrate(&conn).await?;
        Ok(Self {
            inner: Arc::new(Inner {
                _db: db,
                conn: Mutex::new(conn),
            }),
        })
    }

    /// Insert a new account. Fails with 409 when the email is taken.
    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<StoredUser, AppError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.inner.conn.lock().await;
        let inserted = conn
            .execute(
                "INSERT INTO users (id, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(email) DO NOTHING",
                params![
                    id.clone(),
                    email,
                    password_hash,
                    Utc::now().timestamp_millis()
                ],
            )
            .await?;
        if inserted == 0 {
            return Err(AppError::conflict("User with this email already exists"));
        }

        Ok(StoredUser {
            id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
        })
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>, AppError> {
        let conn = self.inner.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, email, password_hash FROM users WHERE email = ?1",
                params![email],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(StoredUser {
                id: row.get(0)?,
                email: row.get(1)?,
                password_hash: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    /// Store entries for `user_id`, keeping the first copy of each id.
    ///
    /// Returns the stored record for every distinct id in input order, so a
    /// resent entry is echoed exactly as it was first accepted.
    pub async fn upsert_locations(
        &self,
        user_id: &str,
        entries: &[SyncLocationInput],
    ) -> Result<Vec<LocationRecord>, AppError> {
        let conn = self.inner.conn.lock().await;
        let tx = conn.transaction().await?;
        let now = Utc::now().timestamp_millis();
        let select = format!(
            "SELECT {LOCATION_COLUMNS} FROM location_logs WHERE user_id = ?1 AND id = ?2"
        );

        let mut seen = HashSet::new();
        let mut stored = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.id) {
                continue;
            }
            tx.execute(
                "INSERT INTO location_logs (id, user_id, lat, lng, altitude, timestamp, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id, id) DO NOTHING",
                params![
                    entry.id.to_string(),
                    user_id,
                    entry.lat,
                    entry.lng,
                    entry.altitude.map_or(Value::Null, Value::Real),
                    entry.timestamp.timestamp_millis(),
                    now
                ],
            )
            .await?;

            let mut rows = tx.query(&select, params![user_id, entry.id.to_string()]).await?;
            let row = rows
                .next()
                .await?
                .ok_or_else(|| AppError::internal("location row vanished after insert"))?;
            stored.push(parse_location(&row)?);
        }

        tx.commit().await?;
        Ok(stored)
    }

    /// Locations of one user, newest first.
    pub async fn list_locations(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LocationRecord>, AppError> {
        let since = since.map_or(i64::MIN, |value| value.timestamp_millis());
        let sql = format!(
            "SELECT {LOCATION_COLUMNS} FROM location_logs
             WHERE user_id = ?1 AND timestamp >= ?2
             ORDER BY timestamp DESC, id DESC"
        );
        let conn = self.inner.conn.lock().await;
        let mut rows = conn.query(&sql, params![user_id, since]).await?;

        let mut locations = Vec::new();
        while let Some(row) = rows.next().await? {
            locations.push(parse_location(&row)?);
        }
        Ok(locations)
    }
}

fn parse_location(row: &Row) -> Result<LocationRecord, AppError> {
    let id: String = row.get(0)?;
    let id = id
        .parse::<SampleId>()
        .map_err(|error| AppError::internal(format!("stored location id `{id}` is invalid: {error}")))?;
    let altitude = match row.get_value(4)? {
        Value::Real(value) => Some(value),
        #[allow(clippy::cast_precision_loss)]
        Value::Integer(value) => Some(value as f64),
        _ => None,
    };

    Ok(LocationRecord {
        id,
        user_id: row.get(1)?,
        lat: row.get(2)?,
        lng: row.get(3)?,
        altitude,
        timestamp: from_unix_millis(row.get(5)?),
    })
}

async fn migrate(conn: &Connection) -> Result<(), AppError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        (),
    )
    .await?;
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    let version: i32 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => 0,
    };
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS users (
             id TEXT PRIMARY KEY,
             email TEXT NOT NULL UNIQUE,
             password_hash TEXT NOT NULL,
             created_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS location_logs (
             user_id TEXT NOT NULL REFERENCES users(id),
             id TEXT NOT NULL,
             lat REAL NOT NULL,
             lng REAL NOT NULL,
             altitude REAL,
             timestamp INTEGER NOT NULL,
             created_at INTEGER NOT NULL,
             PRIMARY KEY (user_id, id)
         );
         CREATE INDEX IF NOT EXISTS idx_location_logs_user_time
             ON location_logs(user_id, timestamp DESC);
         INSERT INTO schema_version (version) VALUES (1);
         COMMIT;",
    )
    .await?;

    tracing::info!("Migrated server database to version {CURRENT_VERSION}");
    Ok(())
}
