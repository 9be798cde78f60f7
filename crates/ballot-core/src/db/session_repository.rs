//! Local-only client state: the admin session and sync bookkeeping

use crate::error::Result;
use crate::models::AdminSession;
use crate::util::now_millis;
use rusqlite::{params, Connection, OptionalExtension};

const LAST_SYNCED_AT: &str = "last_synced_at";

/// Trait for local client state that never syncs
pub trait SessionRepository {
    /// Load the persisted admin session, if any
    fn load_session(&self) -> Result<Option<AdminSession>>;

    /// Persist the admin session, replacing any previous one
    fn save_session(&self, session: &AdminSession) -> Result<()>;

    /// Forget the admin session
    fn clear_session(&self) -> Result<()>;

    /// When the last successful full sync finished (unix ms)
    fn last_synced_at(&self) -> Result<Option<i64>>;

    /// Record a successful full sync
    fn set_last_synced_at(&self, at: i64) -> Result<()>;
}

/// `SQLite` implementation of `SessionRepository`
pub struct SqliteSessionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSessionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM sync_meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
            [key, value],
        )?;
        Ok(())
    }
}

impl SessionRepository for SqliteSessionRepository<'_> {
    fn load_session(&self) -> Result<Option<AdminSession>> {
        let payload: Option<String> = self
            .conn
            .query_row("SELECT payload FROM admin_session WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match payload {
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(session) => Ok(Some(session)),
                Err(error) => {
                    tracing::warn!("Discarding unreadable admin session: {error}");
                    self.clear_session()?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn save_session(&self, session: &AdminSession) -> Result<()> {
        let payload = serde_json::to_string(session)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO admin_session (id, payload, saved_at) VALUES (1, ?1, ?2)",
            params![payload, now_millis()],
        )?;
        Ok(())
    }

    fn clear_session(&self) -> Result<()> {
        self.conn.execute("DELETE FROM admin_session", [])?;
        Ok(())
    }

    fn last_synced_at(&self) -> Result<Option<i64>> {
        Ok(self
            .get_meta(LAST_SYNCED_AT)?
            .and_then(|value| value.parse().ok()))
    }

    fn set_last_synced_at(&self, at: i64) -> Result<()> {
        self.set_meta(LAST_SYNCED_AT, &at.to_string())
    }
}
