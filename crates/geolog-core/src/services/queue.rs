//! Durable queue of samples awaiting server acknowledgment.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::db::{Database, LibSqlSampleRepository, QueueCounts, QueueEntry};
use crate::models::{LocationSample, SampleId};
use crate::Result;

/// Default number of failed delivery attempts before a sample is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Thread-safe handle to the local sample queue.
///
/// The queue is the only owner of persisted samples. Reads used by the sync
/// pipeline degrade to empty results on storage failure so reconciliation
/// turns into "nothing to sync" instead of an error; writes of new samples
/// fail loudly.
#[derive(Clone)]
pub struct SampleQueue {
    db: Arc<Mutex<Database>>,
    max_attempts: u32,
}

impl SampleQueue {
    /// Open the queue database at the given filesystem path.
    ///
    /// A file that is not a valid database is moved aside and a fresh queue is
    /// created in its place.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Queue database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_file(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self::from_database(db))
    }

    /// Open an in-memory queue (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory().await?))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the dead-letter threshold.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_file(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = Utc::now().timestamp_millis();
            let file_name = db_path
                .file_name()
                .map_or_else(|| "queue.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted queue database from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }
        Ok(())
    }

    /// Persist a sample for later delivery.
    ///
    /// Re-enqueueing an id that is already stored is a no-op. Storage failures
    /// are returned to the caller, which has no further fallback.
    pub async fn enqueue(&self, sample: &LocationSample) -> Result<()> {
        sample.validate()?;

        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        let inserted = repo.insert_if_absent(sample).await.map_err(|error| {
            tracing::error!(sample = %sample.id, "Failed to enqueue sample: {}", error);
            error
        })?;

        if inserted {
            tracing::debug!(sample = %sample.id, "Enqueued sample");
        } else {
            tracing::debug!(sample = %sample.id, "Sample already queued; ignoring duplicate");
        }
        Ok(())
    }

    /// Keep a local copy of a sample the server already accepted.
    ///
    /// The copy is stored as synced, so it feeds local history but never a batch.
    pub async fn remember_delivered(&self, sample: &LocationSample) -> Result<()> {
        let delivered = LocationSample {
            synced: true,
            ..sample.clone()
        };

        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        if !repo.insert_if_absent(&delivered).await? {
            repo.mark_synced([&delivered.id]).await?;
        }
        Ok(())
    }

    /// An owner's samples not yet acknowledged by the server, oldest capture first.
    ///
    /// Returns an empty list when storage cannot be read.
    pub async fn list_unsynced(&self, owner_id: &str) -> Vec<LocationSample> {
        match self.try_list_unsynced(owner_id).await {
            Ok(samples) => samples,
            Err(error) => {
                tracing::warn!("Failed to read unsynced samples: {}", error);
                Vec::new()
            }
        }
    }

    /// Like [`Self::list_unsynced`], but surfaces storage errors.
    pub async fn try_list_unsynced(&self, owner_id: &str) -> Result<Vec<LocationSample>> {
        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        repo.list_unsynced(owner_id, self.max_attempts).await
    }

    /// Mark acknowledged samples as synced.
    ///
    /// Unknown ids are ignored. Storage failures are logged and treated as a
    /// no-op; the samples stay unsynced and are retried later.
    pub async fn mark_synced(&self, ids: &HashSet<SampleId>) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        match repo.mark_synced(ids).await {
            Ok(changed) => changed,
            Err(error) => {
                tracing::warn!(count = ids.len(), "Failed to mark samples synced: {}", error);
                0
            }
        }
    }

    /// Count a failed delivery attempt for each id.
    pub async fn record_failed_attempt(&self, ids: &[SampleId], error: &str) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        match repo.record_failed_attempt(ids, error).await {
            Ok(changed) => changed,
            Err(storage_error) => {
                tracing::warn!("Failed to record delivery attempt: {}", storage_error);
                0
            }
        }
    }

    /// An owner's samples that exhausted their delivery attempts.
    pub async fn list_dead_letters(&self, owner_id: &str) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        repo.list_dead_letters(owner_id, self.max_attempts).await
    }

    /// Return an owner's dead-lettered samples to the delivery queue.
    pub async fn requeue_dead_letters(&self, owner_id: &str) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        let count = repo.reset_dead_letters(owner_id, self.max_attempts).await?;
        tracing::info!(count, "Requeued dead-lettered samples");
        Ok(count)
    }

    /// Delete synced samples acknowledged before the cutoff.
    pub async fn prune_synced(&self, before: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        let count = repo.delete_synced_before(before).await?;
        tracing::info!(count, "Pruned synced samples");
        Ok(count)
    }

    /// An owner's totals per queue state.
    pub async fn counts(&self, owner_id: &str) -> Result<QueueCounts> {
        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        repo.counts(owner_id, self.max_attempts).await
    }

    /// Fetch one sample by id.
    pub async fn get(&self, id: &SampleId) -> Result<Option<LocationSample>> {
        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        repo.get(id).await
    }

    /// Locally known samples of an owner, newest first.
    pub async fn list_recent(
        &self,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LocationSample>> {
        let db = self.db.lock().await;
        let repo = LibSqlSampleRepository::new(db.connection());
        repo.list_recent(owner_id, since, limit).await
    }
}
