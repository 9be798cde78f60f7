//! Shared local store handle used by the sync engines and the UI facade.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::db::{
    ConflictRepository, Database, SessionRepository, SqliteConflictRepository,
    SqliteSessionRepository, SqliteTable, SqliteTallyRepository, SyncEntity, TallyRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    AdminSession, Candidate, CandidateTally, Election, Partylist, RecordId, Student, SyncConflict,
};
use crate::sync::merge::MergeCounts;

/// Thread-safe handle to the local database.
///
/// The lock is only held for synchronous `SQLite` work, never across a
/// network call.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh store is
    /// created in its place.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable ({error}); starting fresh",
                    db_path.display()
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };

        tracing::info!("Opened local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem location, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("ballot.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        // WAL and shared-memory sidecars belong to the old file
        let sidecars = [format!("{base_name}-wal"), format!("{base_name}-shm")];
        for sidecar in sidecars {
            let path = parent.join(sidecar);
            if path.exists() {
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale database sidecar {}", path.display());
            }
        }

        Ok(())
    }

    /// Run synchronous work against the connection.
    pub async fn with_conn<T>(&self, work: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.db.lock().await;
        work(db.connection())
    }

    /// Insert a new local row (dirty)
    pub async fn insert<E: SyncEntity>(&self, entity: &E) -> Result<E> {
        self.with_conn(|conn| SqliteTable::<E>::new(conn).insert(entity))
            .await
    }

    /// Fetch a visible row
    pub async fn get<E: SyncEntity>(&self, id: &RecordId) -> Result<Option<E>> {
        self.with_conn(|conn| SqliteTable::<E>::new(conn).get(id))
            .await
    }

    /// List visible rows
    pub async fn list<E: SyncEntity>(&self) -> Result<Vec<E>> {
        self.with_conn(|conn| SqliteTable::<E>::new(conn).list())
            .await
    }

    /// List visible rows by foreign key
    pub async fn list_by<E: SyncEntity>(&self, column: &str, parent_id: &RecordId) -> Result<Vec<E>> {
        self.with_conn(|conn| SqliteTable::<E>::new(conn).list_by(column, parent_id))
            .await
    }

    /// Patch a live row (dirty)
    pub async fn update<E: SyncEntity>(&self, id: &RecordId, patch: &Map<String, Value>) -> Result<E> {
        self.with_conn(|conn| SqliteTable::<E>::new(conn).update(id, patch))
            .await
    }

    /// Tombstone a live row (dirty)
    pub async fn soft_delete<E: SyncEntity>(&self, id: &RecordId) -> Result<()> {
        self.with_conn(|conn| SqliteTable::<E>::new(conn).soft_delete(id))
            .await
    }

    /// Rows awaiting push
    pub async fn select_dirty<E: SyncEntity>(&self) -> Result<Vec<E>> {
        self.with_conn(|conn| SqliteTable::<E>::new(conn).select_dirty())
            .await
    }

    /// Mark pushed rows clean (version-guarded)
    pub async fn mark_clean<E: SyncEntity>(&self, rows: &[E]) -> Result<usize> {
        self.with_conn(|conn| SqliteTable::<E>::new(conn).mark_clean(rows))
            .await
    }

    /// `Some(true)` when the row exists and is dirty
    pub async fn dirty_flag<E: SyncEntity>(&self, id: &RecordId) -> Result<Option<bool>> {
        self.with_conn(|conn| SqliteTable::<E>::new(conn).dirty_flag(id))
            .await
    }

    /// Merge a pulled snapshot in one transaction.
    ///
    /// Rows the store refuses (a unique key clash, say) are skipped and
    /// logged so they cannot block the rest of the snapshot.
    pub async fn apply_remote<E: SyncEntity>(&self, rows: &[E]) -> Result<MergeCounts> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut counts = MergeCounts::default();
            {
                let table = SqliteTable::<E>::new(&tx);
                for row in rows {
                    match table.apply_remote(row) {
                        Ok(outcome) => counts.record(outcome),
                        Err(Error::Constraint(message)) => {
                            counts.skipped += 1;
                            tracing::warn!(
                                "Skipped remote {} row {}: {message}",
                                E::KIND,
                                row.envelope().id
                            );
                        }
                        Err(error) => return Err(error),
                    }
                }
            }
            tx.commit()?;
            Ok(counts)
        })
        .await
    }

    /// Number of rows with local changes not yet pushed, across all entities
    pub async fn pending_changes(&self) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(SqliteTable::<Election>::new(conn).count_dirty()?
                + SqliteTable::<Partylist>::new(conn).count_dirty()?
                + SqliteTable::<Candidate>::new(conn).count_dirty()?
                + SqliteTable::<Student>::new(conn).count_dirty()?)
        })
        .await
    }

    /// Replace tallies for the given elections atomically
    pub async fn replace_tallies(
        &self,
        election_ids: &BTreeSet<RecordId>,
        tallies: &[CandidateTally],
    ) -> Result<usize> {
        self.with_conn(|conn| {
            SqliteTallyRepository::new(conn).replace_for_elections(election_ids, tallies)
        })
        .await
    }

    /// Tallies for the given elections, or every tally when `election_ids` is empty
    pub async fn tallies(&self, election_ids: &[RecordId]) -> Result<Vec<CandidateTally>> {
        self.with_conn(|conn| {
            let repo = SqliteTallyRepository::new(conn);
            if election_ids.is_empty() {
                return repo.list_all();
            }
            let mut tallies = Vec::new();
            for election_id in election_ids {
                tallies.extend(repo.list_for_election(election_id)?);
            }
            Ok(tallies)
        })
        .await
    }

    /// Elections that currently have tallies stored
    pub async fn tally_election_ids(&self) -> Result<BTreeSet<RecordId>> {
        self.with_conn(|conn| SqliteTallyRepository::new(conn).election_ids())
            .await
    }

    /// Recently dropped remote writes, newest first
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.with_conn(|conn| SqliteConflictRepository::new(conn).list(limit))
            .await
    }

    /// Load the persisted admin session
    pub async fn load_session(&self) -> Result<Option<AdminSession>> {
        self.with_conn(|conn| SqliteSessionRepository::new(conn).load_session())
            .await
    }

    /// Persist the admin session
    pub async fn save_session(&self, session: &AdminSession) -> Result<()> {
        self.with_conn(|conn| SqliteSessionRepository::new(conn).save_session(session))
            .await
    }

    /// Forget the admin session
    pub async fn clear_session(&self) -> Result<()> {
        self.with_conn(|conn| SqliteSessionRepository::new(conn).clear_session())
            .await
    }

    /// Completion time of the last successful sync pass
    pub async fn last_synced_at(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| SqliteSessionRepository::new(conn).last_synced_at())
            .await
    }

    /// Record a successful sync pass
    pub async fn set_last_synced_at(&self, at: i64) -> Result<()> {
        self.with_conn(|conn| SqliteSessionRepository::new(conn).set_last_synced_at(at))
            .await
    }
}
