//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }
    if version < 3 {
        apply(conn, 3, MIGRATION_V3)?;
    }
    if version < 4 {
        apply(conn, 4, MIGRATION_V4)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Apply one migration atomically and record its version
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: syncable entity tables
const MIGRATION_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    // Foreign keys between synced tables are enforced by the store, not by
    // SQLite: pulled children may arrive before their parents.
    "CREATE TABLE IF NOT EXISTS elections (
        id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER,
        synced INTEGER NOT NULL DEFAULT 0,
        title TEXT NOT NULL,
        description TEXT,
        max_votes_allowed INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'active',
        end_date INTEGER,
        position_order INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_elections_synced ON elections(synced)",
    "CREATE INDEX IF NOT EXISTS idx_elections_order ON elections(position_order)",
    "CREATE TABLE IF NOT EXISTS partylists (
        id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER,
        synced INTEGER NOT NULL DEFAULT 0,
        name TEXT NOT NULL,
        acronym TEXT,
        color TEXT,
        logo TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_partylists_synced ON partylists(synced)",
    "CREATE TABLE IF NOT EXISTS candidates (
        id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER,
        synced INTEGER NOT NULL DEFAULT 0,
        election_id TEXT NOT NULL,
        partylist_id TEXT,
        name TEXT NOT NULL,
        description TEXT,
        profile_image TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_candidates_election ON candidates(election_id)",
    "CREATE INDEX IF NOT EXISTS idx_candidates_partylist ON candidates(partylist_id)",
    "CREATE INDEX IF NOT EXISTS idx_candidates_synced ON candidates(synced)",
    "CREATE TABLE IF NOT EXISTS students (
        id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER,
        synced INTEGER NOT NULL DEFAULT 0,
        student_number TEXT NOT NULL,
        full_name TEXT NOT NULL,
        email TEXT,
        registered INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_students_number_live
        ON students(student_number) WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_students_synced ON students(synced)",
];

/// Version 2: tally projection and local-only state
const MIGRATION_V2: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS candidate_tallies (
        election_id TEXT NOT NULL,
        candidate_id TEXT NOT NULL,
        vote_count INTEGER NOT NULL DEFAULT 0,
        percentage REAL,
        candidate_name TEXT NOT NULL DEFAULT '',
        partylist_name TEXT,
        partylist_acronym TEXT,
        partylist_color TEXT,
        refreshed_at INTEGER NOT NULL,
        PRIMARY KEY (election_id, candidate_id)
    )",
    "CREATE TABLE IF NOT EXISTS admin_session (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        payload TEXT NOT NULL,
        saved_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sync_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Version 3: LWW conflict log
const MIGRATION_V3: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity TEXT NOT NULL,
        record_id TEXT NOT NULL,
        local_updated_at INTEGER NOT NULL,
        incoming_updated_at INTEGER NOT NULL,
        resolved_at INTEGER NOT NULL,
        strategy TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(entity, record_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
];

/// Version 4: one conflict entry per dropped remote write
const MIGRATION_V4: &[&str] = &[
    "DELETE FROM sync_conflicts WHERE id NOT IN (
        SELECT MIN(id) FROM sync_conflicts
        GROUP BY entity, record_id, incoming_updated_at
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_conflicts_incoming
        ON sync_conflicts(entity, record_id, incoming_updated_at)",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_create_every_table() {
        let conn = setup();
        run(&conn).unwrap();

        for table in [
            "elections",
            "partylists",
            "candidates",
            "students",
            "candidate_tallies",
            "admin_session",
            "sync_meta",
            "sync_conflicts",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn test_v4_collapses_duplicate_conflicts() {
        let conn = setup();
        for (version, statements) in [(1, MIGRATION_V1), (2, MIGRATION_V2), (3, MIGRATION_V3)] {
            apply(&conn, version, statements).unwrap();
        }
        for resolved_at in [1, 2, 3] {
            conn.execute(
                "INSERT INTO sync_conflicts
                    (entity, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy)
                 VALUES ('elections', 'e1', 200, 100, ?1, 'lww')",
                [resolved_at],
            )
            .unwrap();
        }

        run(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sync_conflicts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(get_version(&conn).unwrap(), 4);
    }
}
