//! Shared sync state types.

use serde::Serialize;

/// Coarse sync state for status indicators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

/// Observable orchestrator status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    /// Completion time of the last successful pass (unix ms)
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub const fn state(&self) -> SyncState {
        if self.syncing {
            SyncState::Syncing
        } else if !self.online {
            SyncState::Offline
        } else if self.last_error.is_some() {
            SyncState::Error
        } else {
            SyncState::Synced
        }
    }
}
