//! Record identity and the lifecycle envelope shared by every syncable row.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::timestamp;
use crate::error::Error;

/// A unique identifier for a syncable row.
///
/// New ids are UUID v7 strings generated on the client, so rows created
/// offline never collide with rows created elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new unique id using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("Record id cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl ToSql for RecordId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl FromSql for RecordId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value).map(Self)
    }
}

/// Lifecycle columns carried by every syncable entity.
///
/// Timestamps are Unix milliseconds. The local dirty flag is not part of the
/// envelope: it never leaves the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Stable identifier shared by the local and remote copy
    pub id: RecordId,
    /// Creation timestamp, never mutated
    #[serde(default, with = "timestamp")]
    pub created_at: i64,
    /// Last mutation timestamp, drives last-writer-wins
    #[serde(default, with = "timestamp")]
    pub updated_at: i64,
    /// Tombstone timestamp, `None` while the row is live
    #[serde(default, with = "timestamp::option")]
    pub deleted_at: Option<i64>,
}

impl Envelope {
    /// Envelope for a brand new row created now
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(RecordId::new())
    }

    /// Envelope for a new row with a caller-chosen id
    #[must_use]
    pub fn with_id(id: impl Into<RecordId>) -> Self {
        let now = crate::util::now_millis();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether this row is a tombstone
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_are_unique() {
        assert_ne!(RecordId::new(), RecordId::new());
    }

    #[test]
    fn record_id_parse_rejects_blank() {
        assert!("  ".parse::<RecordId>().is_err());
        assert_eq!("e1".parse::<RecordId>().unwrap().as_str(), "e1");
    }

    #[test]
    fn envelope_starts_live_with_equal_timestamps() {
        let envelope = Envelope::with_id("e1");
        assert!(!envelope.is_deleted());
        assert_eq!(envelope.created_at, envelope.updated_at);
    }

    #[test]
    fn envelope_deserializes_date_only_tombstone() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"id":"p1","deleted_at":"2024-01-01"}"#).unwrap();
        assert_eq!(envelope.deleted_at, Some(1_704_067_200_000));
        assert_eq!(envelope.updated_at, 0);
    }
}
