//! Last-writer-wins merge policy for pulled rows.

use crate::models::Envelope;

/// What to do with one remote row given the local copy (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Remote tombstone: physically remove the local row
    Remove,
    /// No local copy: store the remote row as clean
    Insert,
    /// Remote is strictly newer: overwrite the local row as clean
    Replace,
    /// Local is newer or equal: keep it. `conflict` is set when the remote
    /// write is strictly older and is being dropped.
    KeepLocal { conflict: bool },
}

/// Result of applying one remote row to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Removed,
    /// Tombstone for a row this client never had
    AlreadyAbsent,
    Inserted,
    Updated,
    KeptLocal,
}

/// Decide how a remote row merges into the local store.
///
/// Tombstones win unconditionally. Otherwise the strictly newer `updated_at`
/// wins and ties keep the local copy: pull always runs after push, so an
/// equal timestamp is the echo of our own write.
pub fn decide(local: Option<&Envelope>, remote: &Envelope) -> MergeDecision {
    if remote.deleted_at.is_some() {
        return MergeDecision::Remove;
    }
    match local {
        None => MergeDecision::Insert,
        Some(local) if remote.updated_at > local.updated_at => MergeDecision::Replace,
        Some(local) => MergeDecision::KeepLocal {
            conflict: remote.updated_at < local.updated_at,
        },
    }
}

/// Per-pull tally of merge outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub kept_local: usize,
    /// Rows the local store refused (e.g. a unique key clash)
    pub skipped: usize,
}

impl MergeCounts {
    pub fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Removed => self.removed += 1,
            MergeOutcome::AlreadyAbsent | MergeOutcome::KeptLocal => self.kept_local += 1,
        }
    }

    /// Whether the pull changed anything locally
    pub const fn changed(&self) -> bool {
        self.inserted + self.updated + self.removed > 0
    }
}
