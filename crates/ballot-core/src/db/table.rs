//! Generic local storage for syncable entities.
//!
//! Every synced table shares the lifecycle envelope (`id`, `created_at`,
//! `updated_at`, `deleted_at`) plus a local-only `synced` flag (0 = dirty,
//! 1 = clean). [`SqliteTable`] implements the store operations once; the
//! per-entity glue lives in `entities.rs`.

use std::marker::PhantomData;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use super::conflict_repository::{ConflictRepository, SqliteConflictRepository};
use crate::error::{Error, Result};
use crate::models::{EntityKind, Envelope, RecordId};
use crate::sync::merge::{self, MergeDecision, MergeOutcome};
use crate::util::{next_timestamp, now_millis};

const ENVELOPE_COLUMNS: [&str; 5] = ["id", "created_at", "updated_at", "deleted_at", "synced"];

/// Fields a patch may never touch
const IMMUTABLE_FIELDS: [&str; 5] = ["id", "created_at", "updated_at", "deleted_at", "synced"];

/// A foreign key from an entity to its parent table.
#[derive(Debug, Clone, Copy)]
pub struct ParentLink {
    pub column: &'static str,
    pub parent: EntityKind,
    /// Required parents hide the child while absent or deleted
    pub required: bool,
}

/// What happens to rows pointing at a deleted parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnParentDelete {
    /// Children are deleted with the parent (soft or hard, matching the parent)
    Cascade,
    /// The child's reference is cleared
    SetNull,
    /// Derived rows are physically removed
    Purge,
}

/// A table whose rows reference this entity.
#[derive(Debug, Clone, Copy)]
pub struct ChildLink {
    pub table: &'static str,
    pub column: &'static str,
    pub action: OnParentDelete,
}

/// Glue between an entity model and its local table.
pub trait SyncEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;
    /// Entity columns after the envelope, in `to_columns` order
    const COLUMNS: &'static [&'static str];
    const ORDER_BY: &'static str = "t.created_at ASC";
    const PARENTS: &'static [ParentLink] = &[];
    const CHILDREN: &'static [ChildLink] = &[];

    fn envelope(&self) -> &Envelope;
    fn envelope_mut(&mut self) -> &mut Envelope;
    fn to_columns(&self) -> Vec<Value>;
    fn from_row(envelope: Envelope, row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Store-level invariants checked on local writes
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Run `f` inside a savepoint so multi-statement writes are atomic.
///
/// Savepoints nest, so this is safe inside an enclosing transaction.
pub(crate) fn with_savepoint<T>(conn: &Connection, f: impl FnOnce() -> Result<T>) -> Result<T> {
    conn.execute_batch("SAVEPOINT ballot_write")?;
    match f() {
        Ok(value) => {
            conn.execute_batch("RELEASE ballot_write")?;
            Ok(value)
        }
        Err(error) => {
            conn.execute_batch("ROLLBACK TO ballot_write; RELEASE ballot_write")
                .ok();
            Err(error)
        }
    }
}

/// `SQLite` storage for one syncable entity
pub struct SqliteTable<'a, E> {
    conn: &'a Connection,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, E: SyncEntity> SqliteTable<'a, E> {
    /// Create a table handle on the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            _entity: PhantomData,
        }
    }

    const fn table() -> &'static str {
        E::KIND.table()
    }

    fn all_columns() -> impl Iterator<Item = &'static str> {
        ENVELOPE_COLUMNS.into_iter().chain(E::COLUMNS.iter().copied())
    }

    fn select_sql(filter: &str) -> String {
        let columns = Self::all_columns()
            .map(|column| format!("t.{column} AS {column}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {columns} FROM {} t WHERE {filter}", Self::table())
    }

    /// Live rows whose required parents are live too
    fn visible_filter() -> String {
        let mut clauses = vec!["t.deleted_at IS NULL".to_string()];
        for link in E::PARENTS.iter().filter(|link| link.required) {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM {parent} p WHERE p.id = t.{column} AND p.deleted_at IS NULL)",
                parent = link.parent.table(),
                column = link.column,
            ));
        }
        clauses.join(" AND ")
    }

    fn parse_row(row: &Row<'_>) -> rusqlite::Result<(E, bool)> {
        let envelope = Envelope {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        };
        let synced = row.get::<_, i64>("synced")? != 0;
        Ok((E::from_row(envelope, row)?, synced))
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<E>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::parse_row)?
            .map(|row| row.map(|(entity, _)| entity))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn find_row(&self, id: &RecordId) -> Result<Option<(E, bool)>> {
        let row = self
            .conn
            .query_row(&Self::select_sql("t.id = ?1"), [id], Self::parse_row)
            .optional()?;
        Ok(row)
    }

    fn find_live(&self, id: &RecordId) -> Result<E> {
        match self.find_row(id)? {
            Some((entity, _)) if !entity.envelope().is_deleted() => Ok(entity),
            _ => Err(Error::NotFound(format!("{} {id}", E::KIND))),
        }
    }

    fn write(&self, entity: &E, synced: bool, upsert: bool) -> Result<()> {
        let columns = Self::all_columns().collect::<Vec<_>>();
        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            Self::table(),
            columns.join(", "),
        );
        let sql = if upsert {
            let assignments = columns
                .iter()
                .skip(1)
                .map(|column| format!("{column} = excluded.{column}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{insert} ON CONFLICT(id) DO UPDATE SET {assignments}")
        } else {
            insert
        };

        let envelope = entity.envelope();
        let mut values = vec![
            Value::Text(envelope.id.to_string()),
            Value::Integer(envelope.created_at),
            Value::Integer(envelope.updated_at),
            envelope.deleted_at.map_or(Value::Null, Value::Integer),
            Value::Integer(i64::from(synced)),
        ];
        values.extend(entity.to_columns());

        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn check_parents(&self, entity: &E) -> Result<()> {
        if E::PARENTS.is_empty() {
            return Ok(());
        }
        let values = entity.to_columns();
        for link in E::PARENTS {
            let value = E::COLUMNS
                .iter()
                .position(|column| *column == link.column)
                .and_then(|index| values.get(index));
            match value {
                Some(Value::Text(parent_id)) => {
                    let exists: bool = self.conn.query_row(
                        &format!(
                            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1 AND deleted_at IS NULL)",
                            link.parent.table()
                        ),
                        [parent_id],
                        |row| row.get(0),
                    )?;
                    if !exists {
                        return Err(Error::Constraint(format!(
                            "{}.{} references missing {} row {parent_id}",
                            Self::table(),
                            link.column,
                            link.parent.table()
                        )));
                    }
                }
                _ if link.required => {
                    return Err(Error::Constraint(format!(
                        "{}.{} is required",
                        Self::table(),
                        link.column
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_child_rule(&self, link: &ChildLink, parent_id: &RecordId, stamp: Option<i64>) -> Result<()> {
        let (table, column) = (link.table, link.column);
        match (link.action, stamp) {
            (OnParentDelete::Cascade, Some(now)) => {
                self.conn.execute(
                    &format!(
                        "UPDATE {table} SET deleted_at = ?1, updated_at = MAX(updated_at + 1, ?1), synced = 0
                         WHERE {column} = ?2 AND deleted_at IS NULL"
                    ),
                    params![now, parent_id],
                )?;
            }
            (OnParentDelete::SetNull, Some(now)) => {
                self.conn.execute(
                    &format!(
                        "UPDATE {table} SET {column} = NULL, updated_at = MAX(updated_at + 1, ?1), synced = 0
                         WHERE {column} = ?2"
                    ),
                    params![now, parent_id],
                )?;
            }
            (OnParentDelete::SetNull, None) => {
                self.conn.execute(
                    &format!("UPDATE {table} SET {column} = NULL WHERE {column} = ?1"),
                    [parent_id],
                )?;
            }
            (OnParentDelete::Cascade | OnParentDelete::Purge, _) => {
                self.conn.execute(
                    &format!("DELETE FROM {table} WHERE {column} = ?1"),
                    [parent_id],
                )?;
            }
        }
        Ok(())
    }

    fn save_edit(&self, current: &E, mut next: E) -> Result<E> {
        *next.envelope_mut() = current.envelope().clone();
        next.validate()?;
        self.check_parents(&next)?;
        next.envelope_mut().updated_at = next_timestamp(current.envelope().updated_at);
        self.write(&next, false, true)?;
        Ok(next)
    }

    /// Insert a new local row, marked dirty.
    ///
    /// Fails with [`Error::Constraint`] on a duplicate id or a missing parent.
    pub fn insert(&self, entity: &E) -> Result<E> {
        let mut row = entity.clone();
        if row.envelope().id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("Record id cannot be empty".into()));
        }
        if row.envelope().is_deleted() {
            return Err(Error::InvalidInput(format!(
                "Cannot insert deleted {} row",
                E::KIND
            )));
        }
        row.validate()?;

        let now = now_millis();
        let envelope = row.envelope_mut();
        if envelope.created_at == 0 {
            envelope.created_at = now;
        }
        if envelope.updated_at == 0 {
            envelope.updated_at = envelope.created_at;
        }

        self.check_parents(&row)?;
        self.write(&row, false, false)?;
        tracing::debug!("Inserted {} {}", E::KIND, row.envelope().id);
        Ok(row)
    }

    /// Get a visible row by id
    pub fn get(&self, id: &RecordId) -> Result<Option<E>> {
        let sql = Self::select_sql(&format!("t.id = ?1 AND {}", Self::visible_filter()));
        let row = self
            .conn
            .query_row(&sql, [id], Self::parse_row)
            .optional()?;
        Ok(row.map(|(entity, _)| entity))
    }

    /// Get a row by id including tombstones and orphans
    pub fn find(&self, id: &RecordId) -> Result<Option<E>> {
        Ok(self.find_row(id)?.map(|(entity, _)| entity))
    }

    /// List visible rows in display order
    pub fn list(&self) -> Result<Vec<E>> {
        let sql = format!(
            "{} ORDER BY {}",
            Self::select_sql(&Self::visible_filter()),
            E::ORDER_BY
        );
        self.query(&sql, [])
    }

    /// List visible rows whose foreign key `column` equals `parent_id`
    pub fn list_by(&self, column: &str, parent_id: &RecordId) -> Result<Vec<E>> {
        let Some(link) = E::PARENTS.iter().find(|link| link.column == column) else {
            return Err(Error::InvalidInput(format!(
                "{} has no foreign key '{column}'",
                E::KIND
            )));
        };
        let sql = format!(
            "{} ORDER BY {}",
            Self::select_sql(&format!(
                "t.{} = ?1 AND {}",
                link.column,
                Self::visible_filter()
            )),
            E::ORDER_BY
        );
        self.query(&sql, [parent_id])
    }

    /// Merge a JSON object of field changes into a live row and mark it dirty.
    pub fn update(&self, id: &RecordId, patch: &Map<String, JsonValue>) -> Result<E> {
        if let Some(key) = patch
            .keys()
            .find(|key| IMMUTABLE_FIELDS.contains(&key.as_str()))
        {
            return Err(Error::InvalidInput(format!("Field '{key}' cannot be changed")));
        }

        let current = self.find_live(id)?;
        let mut merged = serde_json::to_value(&current)?;
        let JsonValue::Object(fields) = &mut merged else {
            return Err(Error::Database(format!("{} did not serialize to an object", E::KIND)));
        };
        for (key, value) in patch {
            if !fields.contains_key(key) {
                return Err(Error::InvalidInput(format!(
                    "Unknown {} field '{key}'",
                    E::KIND
                )));
            }
            fields.insert(key.clone(), value.clone());
        }

        let next: E = serde_json::from_value(merged)
            .map_err(|error| Error::InvalidInput(format!("Invalid {} patch: {error}", E::KIND)))?;
        self.save_edit(&current, next)
    }

    /// Tombstone a live row, mark it dirty and apply child rules.
    pub fn soft_delete(&self, id: &RecordId) -> Result<()> {
        let current = self.find_live(id)?;
        let now = next_timestamp(current.envelope().updated_at);
        with_savepoint(self.conn, || {
            self.conn.execute(
                &format!(
                    "UPDATE {} SET deleted_at = ?1, updated_at = ?1, synced = 0 WHERE id = ?2",
                    Self::table()
                ),
                params![now, id],
            )?;
            for link in E::CHILDREN {
                self.apply_child_rule(link, id, Some(now))?;
            }
            Ok(())
        })?;
        tracing::debug!("Soft-deleted {} {id}", E::KIND);
        Ok(())
    }

    /// Physically remove a row and apply child rules without marking
    /// anything dirty. Used when a remote tombstone arrives.
    ///
    /// Returns whether the row existed locally.
    pub fn hard_delete(&self, id: &RecordId) -> Result<bool> {
        with_savepoint(self.conn, || {
            let removed = self.conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", Self::table()),
                [id],
            )?;
            for link in E::CHILDREN {
                self.apply_child_rule(link, id, None)?;
            }
            Ok(removed > 0)
        })
    }

    /// Rows with local changes not yet confirmed by the remote, tombstones included
    pub fn select_dirty(&self) -> Result<Vec<E>> {
        let sql = format!("{} ORDER BY t.updated_at ASC", Self::select_sql("t.synced = 0"));
        self.query(&sql, [])
    }

    pub fn count_dirty(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE synced = 0", Self::table()),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// `Some(true)` when the row exists and is dirty
    pub fn dirty_flag(&self, id: &RecordId) -> Result<Option<bool>> {
        Ok(self.find_row(id)?.map(|(_, synced)| !synced))
    }

    /// Mark pushed rows clean.
    ///
    /// A row is only cleaned if its `updated_at` still matches the pushed
    /// version, so edits made while the push was in flight stay dirty.
    pub fn mark_clean(&self, rows: &[E]) -> Result<usize> {
        with_savepoint(self.conn, || {
            let mut stmt = self.conn.prepare_cached(&format!(
                "UPDATE {} SET synced = 1 WHERE id = ?1 AND updated_at = ?2",
                Self::table()
            ))?;
            let mut cleaned = 0;
            for row in rows {
                let envelope = row.envelope();
                cleaned += stmt.execute(params![envelope.id, envelope.updated_at])?;
            }
            Ok(cleaned)
        })
    }

    /// Merge one pulled row using last-writer-wins. Never marks rows dirty.
    pub fn apply_remote(&self, remote: &E) -> Result<MergeOutcome> {
        let id = &remote.envelope().id;
        if id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "Remote {} row without id",
                E::KIND
            )));
        }

        let local = self.find(id)?;
        match merge::decide(local.as_ref().map(|row| row.envelope()), remote.envelope()) {
            MergeDecision::Remove => {
                if self.hard_delete(id)? {
                    Ok(MergeOutcome::Removed)
                } else {
                    Ok(MergeOutcome::AlreadyAbsent)
                }
            }
            MergeDecision::Insert => {
                self.write(remote, true, true)?;
                Ok(MergeOutcome::Inserted)
            }
            MergeDecision::Replace => {
                self.write(remote, true, true)?;
                Ok(MergeOutcome::Updated)
            }
            MergeDecision::KeepLocal { conflict } => {
                if let (true, Some(local)) = (conflict, &local) {
                    let local_updated_at = local.envelope().updated_at;
                    let incoming_updated_at = remote.envelope().updated_at;
                    SqliteConflictRepository::new(self.conn).record(
                        E::KIND,
                        id,
                        local_updated_at,
                        incoming_updated_at,
                    )?;
                    tracing::debug!(
                        "Kept local {} {id} ({local_updated_at}) over older remote ({incoming_updated_at})",
                        E::KIND
                    );
                }
                Ok(MergeOutcome::KeptLocal)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Candidate, Election, Partylist, Student};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn remote_election(id: &str, title: &str, updated_at: i64) -> Election {
        let mut election = Election::new(title);
        election.envelope = Envelope {
            id: id.into(),
            created_at: 1,
            updated_at,
            deleted_at: None,
        };
        election
    }

    fn insert_tally(conn: &Connection, election_id: &str, candidate_id: &str) {
        conn.execute(
            "INSERT INTO candidate_tallies (election_id, candidate_id, vote_count, refreshed_at)
             VALUES (?1, ?2, 3, 0)",
            [election_id, candidate_id],
        )
        .unwrap();
    }

    fn tally_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM candidate_tallies", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn insert_marks_row_dirty_and_rejects_duplicates() {
        let db = setup();
        let elections = SqliteTable::<Election>::new(db.connection());

        let election = elections.insert(&Election::new("President")).unwrap();
        assert_eq!(elections.dirty_flag(election.id()).unwrap(), Some(true));
        assert_eq!(elections.get(election.id()).unwrap(), Some(election.clone()));

        let err = elections.insert(&election).unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
    }

    #[test]
    fn insert_validates_fields() {
        let db = setup();
        let elections = SqliteTable::<Election>::new(db.connection());

        let mut election = Election::new("  ");
        assert!(matches!(
            elections.insert(&election).unwrap_err(),
            Error::InvalidInput(_)
        ));

        election.title = "Mayor".into();
        election.max_votes_allowed = 0;
        assert!(matches!(
            elections.insert(&election).unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn candidate_requires_live_election() {
        let db = setup();
        let candidates = SqliteTable::<Candidate>::new(db.connection());

        let err = candidates
            .insert(&Candidate::new("missing".into(), "Ada"))
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
    }

    #[test]
    fn update_advances_timestamp_and_marks_dirty() {
        let db = setup();
        let elections = SqliteTable::<Election>::new(db.connection());
        let election = elections.insert(&Election::new("President")).unwrap();
        elections.mark_clean(&[election.clone()]).unwrap();

        let patch = json!({"title": "Student President", "max_votes_allowed": 2});
        let updated = elections
            .update(election.id(), patch.as_object().unwrap())
            .unwrap();

        assert_eq!(updated.title, "Student President");
        assert_eq!(updated.max_votes_allowed, 2);
        assert!(updated.envelope.updated_at > election.envelope.updated_at);
        assert_eq!(updated.envelope.created_at, election.envelope.created_at);
        assert_eq!(elections.dirty_flag(election.id()).unwrap(), Some(true));
    }

    #[test]
    fn update_rejects_envelope_and_unknown_fields() {
        let db = setup();
        let elections = SqliteTable::<Election>::new(db.connection());
        let election = elections.insert(&Election::new("President")).unwrap();

        for patch in [json!({"id": "other"}), json!({"updated_at": 5}), json!({"colour": "red"})] {
            let err = elections
                .update(election.id(), patch.as_object().unwrap())
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{patch}");
        }

        let err = elections
            .update(&"missing".into(), json!({"title": "x"}).as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn mark_clean_skips_rows_edited_after_push() {
        let db = setup();
        let elections = SqliteTable::<Election>::new(db.connection());
        let pushed = elections.insert(&Election::new("President")).unwrap();

        // Local edit lands while the push is in flight.
        elections
            .update(pushed.id(), json!({"title": "Edited"}).as_object().unwrap())
            .unwrap();

        assert_eq!(elections.mark_clean(&[pushed.clone()]).unwrap(), 0);
        assert_eq!(elections.dirty_flag(pushed.id()).unwrap(), Some(true));
    }

    #[test]
    fn soft_delete_cascades_to_candidates_and_purges_tallies() {
        let db = setup();
        let conn = db.connection();
        let elections = SqliteTable::<Election>::new(conn);
        let candidates = SqliteTable::<Candidate>::new(conn);

        let election = elections.insert(&Election::new("President")).unwrap();
        let candidate = candidates
            .insert(&Candidate::new(election.id().clone(), "Ada"))
            .unwrap();
        candidates.mark_clean(&[candidate.clone()]).unwrap();
        insert_tally(conn, election.id().as_str(), candidate.id().as_str());

        elections.soft_delete(election.id()).unwrap();

        assert_eq!(elections.get(election.id()).unwrap(), None);
        let tombstone = elections.find(election.id()).unwrap().unwrap();
        assert!(tombstone.envelope.is_deleted());

        let child = candidates.find(candidate.id()).unwrap().unwrap();
        assert!(child.envelope.is_deleted());
        assert!(child.envelope.updated_at > candidate.envelope.updated_at);
        assert_eq!(candidates.dirty_flag(candidate.id()).unwrap(), Some(true));
        assert_eq!(tally_count(conn), 0);
    }

    #[test]
    fn deleting_partylist_detaches_candidates() {
        let db = setup();
        let conn = db.connection();
        let elections = SqliteTable::<Election>::new(conn);
        let partylists = SqliteTable::<Partylist>::new(conn);
        let candidates = SqliteTable::<Candidate>::new(conn);

        let election = elections.insert(&Election::new("President")).unwrap();
        let party = partylists.insert(&Partylist::new("Blue")).unwrap();
        let mut candidate = Candidate::new(election.id().clone(), "Ada");
        candidate.partylist_id = Some(party.id().clone());
        let candidate = candidates.insert(&candidate).unwrap();
        candidates.mark_clean(&[candidate.clone()]).unwrap();

        partylists.soft_delete(party.id()).unwrap();

        let detached = candidates.get(candidate.id()).unwrap().unwrap();
        assert_eq!(detached.partylist_id, None);
        assert_eq!(candidates.dirty_flag(candidate.id()).unwrap(), Some(true));
    }

    #[test]
    fn orphaned_candidates_are_stored_but_hidden() {
        let db = setup();
        let conn = db.connection();
        let elections = SqliteTable::<Election>::new(conn);
        let candidates = SqliteTable::<Candidate>::new(conn);

        let mut orphan = Candidate::new("e-late".into(), "Grace");
        orphan.envelope.updated_at = 10;
        assert_eq!(
            candidates.apply_remote(&orphan).unwrap(),
            MergeOutcome::Inserted
        );
        assert_eq!(candidates.get(orphan.id()).unwrap(), None);
        assert!(candidates.list().unwrap().is_empty());

        elections
            .apply_remote(&remote_election("e-late", "Late", 10))
            .unwrap();
        assert_eq!(candidates.list().unwrap().len(), 1);
        assert_eq!(
            candidates
                .list_by("election_id", &"e-late".into())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn list_by_rejects_unknown_columns() {
        let db = setup();
        let candidates = SqliteTable::<Candidate>::new(db.connection());
        let err = candidates.list_by("name", &"x".into()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn apply_remote_uses_last_writer_wins() {
        let db = setup();
        let conn = db.connection();
        let elections = SqliteTable::<Election>::new(conn);

        assert_eq!(
            elections
                .apply_remote(&remote_election("e1", "First", 100))
                .unwrap(),
            MergeOutcome::Inserted
        );
        assert_eq!(elections.dirty_flag(&"e1".into()).unwrap(), Some(false));

        assert_eq!(
            elections
                .apply_remote(&remote_election("e1", "Newer", 200))
                .unwrap(),
            MergeOutcome::Updated
        );
        assert_eq!(
            elections
                .apply_remote(&remote_election("e1", "Stale", 150))
                .unwrap(),
            MergeOutcome::KeptLocal
        );
        assert_eq!(
            elections
                .apply_remote(&remote_election("e1", "Echo", 200))
                .unwrap(),
            MergeOutcome::KeptLocal
        );

        let stored = elections.get(&"e1".into()).unwrap().unwrap();
        assert_eq!(stored.title, "Newer");

        let conflicts = SqliteConflictRepository::new(conn).list(10).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].local_updated_at, 200);
        assert_eq!(conflicts[0].incoming_updated_at, 150);
    }

    #[test]
    fn remote_does_not_overwrite_newer_local_edit() {
        let db = setup();
        let elections = SqliteTable::<Election>::new(db.connection());
        elections
            .apply_remote(&remote_election("e1", "Server", 100))
            .unwrap();
        let local = elections
            .update(&"e1".into(), json!({"title": "Local"}).as_object().unwrap())
            .unwrap();

        elections
            .apply_remote(&remote_election("e1", "Server again", 100))
            .unwrap();

        let stored = elections.get(&"e1".into()).unwrap().unwrap();
        assert_eq!(stored.title, "Local");
        assert_eq!(stored.envelope.updated_at, local.envelope.updated_at);
        assert_eq!(elections.dirty_flag(&"e1".into()).unwrap(), Some(true));
    }

    #[test]
    fn remote_tombstone_hard_deletes_with_children() {
        let db = setup();
        let conn = db.connection();
        let elections = SqliteTable::<Election>::new(conn);
        let candidates = SqliteTable::<Candidate>::new(conn);

        elections
            .apply_remote(&remote_election("e1", "President", 100))
            .unwrap();
        let candidate = candidates
            .insert(&Candidate::new("e1".into(), "Ada"))
            .unwrap();
        insert_tally(conn, "e1", candidate.id().as_str());

        let mut tombstone = remote_election("e1", "President", 50);
        tombstone.envelope.deleted_at = Some(50);
        assert_eq!(
            elections.apply_remote(&tombstone).unwrap(),
            MergeOutcome::Removed
        );

        assert_eq!(elections.find(&"e1".into()).unwrap(), None);
        assert_eq!(candidates.find(candidate.id()).unwrap(), None);
        assert_eq!(tally_count(conn), 0);
        assert_eq!(
            elections.apply_remote(&tombstone).unwrap(),
            MergeOutcome::AlreadyAbsent
        );
    }

    #[test]
    fn select_dirty_includes_tombstones() {
        let db = setup();
        let elections = SqliteTable::<Election>::new(db.connection());
        let kept = elections.insert(&Election::new("Kept")).unwrap();
        let removed = elections.insert(&Election::new("Removed")).unwrap();
        elections.soft_delete(removed.id()).unwrap();

        let dirty = elections.select_dirty().unwrap();
        assert_eq!(dirty.len(), 2);
        assert_eq!(elections.count_dirty().unwrap(), 2);
        assert!(dirty.iter().any(|row| row.id() == kept.id()));
        assert!(dirty
            .iter()
            .any(|row| row.id() == removed.id() && row.envelope.is_deleted()));

        assert_eq!(elections.mark_clean(&dirty).unwrap(), 2);
        assert_eq!(elections.count_dirty().unwrap(), 0);
    }

    #[test]
    fn student_numbers_are_unique_among_live_rows() {
        let db = setup();
        let students = SqliteTable::<Student>::new(db.connection());
        let first = students.insert(&Student::new("2024-001", "Ada")).unwrap();

        let err = students
            .insert(&Student::new("2024-001", "Grace"))
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));

        students.soft_delete(first.id()).unwrap();
        students.insert(&Student::new("2024-001", "Grace")).unwrap();
    }

    #[test]
    fn savepoint_rolls_back_on_error() {
        let db = setup();
        let conn = db.connection();

        let result: Result<()> = with_savepoint(conn, || {
            conn.execute("INSERT INTO sync_meta (key, value) VALUES ('k', 'v')", [])?;
            Err(Error::Database("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sync_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
