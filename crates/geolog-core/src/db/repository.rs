//! Sample repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT and counters

use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row, Value};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{LocationSample, SampleId};
use crate::util::from_unix_millis;

const SAMPLE_COLUMNS: &str = "id, owner_id, lat, lng, altitude, captured_at, synced";

/// A queued sample together with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub sample: LocationSample,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Totals per queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub dead_lettered: usize,
    pub synced: usize,
}

/// libSQL-backed storage for location samples.
pub struct LibSqlSampleRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSampleRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a sample unless one with the same id already exists.
    ///
    /// Returns `true` when a row was written.
    pub async fn insert_if_absent(&self, sample: &LocationSample) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let rows = self
            .conn
            .execute(
                "INSERT INTO location_samples
                    (id, owner_id, lat, lng, altitude, captured_at, synced, enqueued_at, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, CASE WHEN ?7 = 1 THEN ?8 END)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    sample.id.to_string(),
                    sample.owner_id.clone(),
                    sample.lat,
                    sample.lng,
                    sample.altitude.map_or(Value::Null, Value::Real),
                    sample.captured_at.timestamp_millis(),
                    i64::from(sample.synced),
                    now
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    /// Fetch one sample by id, regardless of its sync state.
    pub async fn get(&self, id: &SampleId) -> Result<Option<LocationSample>> {
        let sql = format!("SELECT {SAMPLE_COLUMNS} FROM location_samples WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_sample(&row)?)),
            None => Ok(None),
        }
    }

    /// An owner's unsynced samples still eligible for delivery, oldest capture first.
    pub async fn list_unsynced(
        &self,
        owner_id: &str,
        max_attempts: u32,
    ) -> Result<Vec<LocationSample>> {
        let sql = format!(
            "SELECT {SAMPLE_COLUMNS} FROM location_samples
             WHERE owner_id = ?1 AND synced = 0 AND attempts < ?2
             ORDER BY captured_at ASC, id ASC"
        );
        let mut rows = self
            .conn
            .query(&sql, params![owner_id.to_string(), i64::from(max_attempts)])
            .await?;

        let mut samples = Vec::new();
        while let Some(row) = rows.next().await? {
            samples.push(Self::parse_sample(&row)?);
        }
        Ok(samples)
    }

    /// An owner's unsynced samples that exhausted their delivery attempts.
    pub async fn list_dead_letters(
        &self,
        owner_id: &str,
        max_attempts: u32,
    ) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {SAMPLE_COLUMNS}, attempts, last_error FROM location_samples
             WHERE owner_id = ?1 AND synced = 0 AND attempts >= ?2
             ORDER BY captured_at ASC, id ASC"
        );
        let mut rows = self
            .conn
            .query(&sql, params![owner_id.to_string(), i64::from(max_attempts)])
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let sample = Self::parse_sample(&row)?;
            let attempts = u32::try_from(row.get::<i64>(7)?).unwrap_or(u32::MAX);
            let last_error = match row.get_value(8)? {
                Value::Text(text) => Some(text),
                _ => None,
            };
            entries.push(QueueEntry {
                sample,
                attempts,
                last_error,
            });
        }
        Ok(entries)
    }

    /// Most recent samples for an owner, newest first, optionally bounded in time.
    pub async fn list_recent(
        &self,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LocationSample>> {
        let since_ms = since.map_or(i64::MIN, |since| since.timestamp_millis());
        let sql = format!(
            "SELECT {SAMPLE_COLUMNS} FROM location_samples
             WHERE owner_id = ?1 AND captured_at >= ?2
             ORDER BY captured_at DESC
             LIMIT ?3"
        );
        let mut rows = self
            .conn
            .query(&sql, params![owner_id.to_string(), since_ms, limit as i64])
            .await?;

        let mut samples = Vec::new();
        while let Some(row) = rows.next().await? {
            samples.push(Self::parse_sample(&row)?);
        }
        Ok(samples)
    }

    /// Flip `synced` for the given ids in one transaction.
    ///
    /// Unknown or already-synced ids are skipped. Returns the number of rows changed.
    pub async fn mark_synced<'i>(
        &self,
        ids: impl IntoIterator<Item = &'i SampleId>,
    ) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let tx = self.conn.transaction().await?;

        let mut changed = 0u64;
        for id in ids {
            changed += tx
                .execute(
                    "UPDATE location_samples SET synced = 1, synced_at = ?1
                     WHERE id = ?2 AND synced = 0",
                    params![now, id.to_string()],
                )
                .await?;
        }

        tx.commit().await?;
        Ok(usize::try_from(changed).unwrap_or(usize::MAX))
    }

    /// Count one more failed delivery attempt for each id.
    pub async fn record_failed_attempt<'i>(
        &self,
        ids: impl IntoIterator<Item = &'i SampleId>,
        error: &str,
    ) -> Result<usize> {
        let tx = self.conn.transaction().await?;

        let mut changed = 0u64;
        for id in ids {
            changed += tx
                .execute(
                    "UPDATE location_samples SET attempts = attempts + 1, last_error = ?1
                     WHERE id = ?2 AND synced = 0",
                    params![error.to_string(), id.to_string()],
                )
                .await?;
        }

        tx.commit().await?;
        Ok(usize::try_from(changed).unwrap_or(usize::MAX))
    }

    /// Give an owner's dead-lettered samples a fresh set of attempts.
    pub async fn reset_dead_letters(&self, owner_id: &str, max_attempts: u32) -> Result<usize> {
        let rows = self
            .conn
            .execute(
                "UPDATE location_samples SET attempts = 0, last_error = NULL
                 WHERE owner_id = ?1 AND synced = 0 AND attempts >= ?2",
                params![owner_id.to_string(), i64::from(max_attempts)],
            )
            .await?;
        Ok(usize::try_from(rows).unwrap_or(usize::MAX))
    }

    /// Delete synced samples acknowledged before the cutoff.
    pub async fn delete_synced_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM location_samples WHERE synced = 1 AND synced_at < ?1",
                params![cutoff.timestamp_millis()],
            )
            .await?;
        Ok(usize::try_from(rows).unwrap_or(usize::MAX))
    }

    /// An owner's totals per queue state.
    pub async fn counts(&self, owner_id: &str, max_attempts: u32) -> Result<QueueCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                    COALESCE(SUM(CASE WHEN synced = 0 AND attempts < ?2 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN synced = 0 AND attempts >= ?2 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN synced = 1 THEN 1 ELSE 0 END), 0)
                 FROM location_samples
                 WHERE owner_id = ?1",
                params![owner_id.to_string(), i64::from(max_attempts)],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(QueueCounts::default());
        };
        let count = |index: i32| -> Result<usize> {
            Ok(usize::try_from(row.get::<i64>(index)?).unwrap_or(0))
        };
        Ok(QueueCounts {
            pending: count(0)?,
            dead_lettered: count(1)?,
            synced: count(2)?,
        })
    }

    /// Parse a sample from a database row selected with `SAMPLE_COLUMNS`
    fn parse_sample(row: &Row) -> Result<LocationSample> {
        let id: String = row.get(0)?;
        let id = id
            .parse()
            .map_err(|_| Error::Database(format!("Invalid sample id in queue: {id}")))?;

        Ok(LocationSample {
            id,
            owner_id: row.get(1)?,
            lat: row.get(2)?,
            lng: row.get(3)?,
            altitude: real_or_null(row.get_value(4)?),
            captured_at: from_unix_millis(row.get::<i64>(5)?),
            synced: row.get::<i64>(6)? != 0,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn real_or_null(value: Value) -> Option<f64> {
    match value {
        Value::Real(value) => Some(value),
        Value::Integer(value) => Some(value as f64),
        _ => None,
    }
}
