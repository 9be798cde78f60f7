//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::kind::EntityKind;

/// A remote write dropped by last-writer-wins because the local row was newer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Entity the row belongs to
    pub entity: EntityKind,
    /// Row involved in the conflict
    pub record_id: String,
    /// Local row's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Incoming row's timestamp that was rejected
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
