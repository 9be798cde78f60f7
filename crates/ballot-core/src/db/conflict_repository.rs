//! Conflict log repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{EntityKind, RecordId, SyncConflict};
use crate::util::now_millis;
use rusqlite::{params, Connection};

const LWW_STRATEGY: &str = "lww";

/// Trait for the local conflict log
pub trait ConflictRepository {
    /// Record a remote write dropped in favour of a newer local row.
    ///
    /// The same dropped write is only logged once, however often it is
    /// pulled again.
    fn record(
        &self,
        entity: EntityKind,
        record_id: &RecordId,
        local_updated_at: i64,
        incoming_updated_at: i64,
    ) -> Result<()>;

    /// List recent conflicts, newest first
    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncConflict> {
        let entity: String = row.get(1)?;
        let entity = entity.parse().map_err(|error: crate::error::Error| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(error))
        })?;
        Ok(SyncConflict {
            id: row.get(0)?,
            entity,
            record_id: row.get(2)?,
            local_updated_at: row.get(3)?,
            incoming_updated_at: row.get(4)?,
            resolved_at: row.get(5)?,
            strategy: row.get(6)?,
        })
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn record(
        &self,
        entity: EntityKind,
        record_id: &RecordId,
        local_updated_at: i64,
        incoming_updated_at: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sync_conflicts
                (entity, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entity.as_str(),
                record_id,
                local_updated_at,
                incoming_updated_at,
                now_millis(),
                LWW_STRATEGY
            ],
        )?;
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?1",
        )?;
        let conflicts = stmt
            .query_map(params![limit as i64], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_record_and_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());

        repo.record(EntityKind::Elections, &"e1".into(), 20, 10)
            .unwrap();
        repo.record(EntityKind::Candidates, &"c1".into(), 40, 30)
            .unwrap();

        let conflicts = repo.list(10).unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].entity, EntityKind::Candidates);
        assert_eq!(conflicts[0].record_id, "c1");
        assert_eq!(conflicts[0].strategy, "lww");
        assert_eq!(conflicts[1].local_updated_at, 20);

        assert_eq!(repo.list(1).unwrap().len(), 1);
    }

    #[test]
    fn test_same_dropped_write_is_logged_once() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());

        for local_updated_at in [20, 20, 25] {
            repo.record(EntityKind::Elections, &"e1".into(), local_updated_at, 10)
                .unwrap();
        }
        repo.record(EntityKind::Elections, &"e1".into(), 25, 15)
            .unwrap();

        let conflicts = repo.list(10).unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].incoming_updated_at, 15);
        assert_eq!(conflicts[1].local_updated_at, 20);
    }
}
