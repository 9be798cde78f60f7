//! UI-facing facade over the local store.
//!
//! Reads come straight from `SQLite`. Writes land locally first and then
//! schedule a debounced sync; they never wait on the network.

use serde_json::{Map, Value};
use tokio::sync::watch;

use super::LocalStore;
use crate::db::SyncEntity;
use crate::error::Result;
use crate::models::{Candidate, CandidateTally, RecordId, SyncConflict};
use crate::state::SyncStatus;
use crate::sync::SyncTrigger;

#[derive(Clone)]
pub struct BallotStore {
    store: LocalStore,
    trigger: SyncTrigger,
    status: Option<watch::Receiver<SyncStatus>>,
}

impl BallotStore {
    /// Facade without a sync scheduler (local-only mode)
    pub fn local_only(store: LocalStore) -> Self {
        Self::new(store, SyncTrigger::disconnected(), None)
    }

    pub const fn new(
        store: LocalStore,
        trigger: SyncTrigger,
        status: Option<watch::Receiver<SyncStatus>>,
    ) -> Self {
        Self {
            store,
            trigger,
            status,
        }
    }

    pub const fn local_store(&self) -> &LocalStore {
        &self.store
    }

    pub async fn list<E: SyncEntity>(&self) -> Result<Vec<E>> {
        self.store.list::<E>().await
    }

    pub async fn get<E: SyncEntity>(&self, id: &RecordId) -> Result<Option<E>> {
        self.store.get::<E>(id).await
    }

    /// Insert a new row and schedule a sync
    pub async fn add<E: SyncEntity>(&self, entity: &E) -> Result<E> {
        let stored = self.store.insert(entity).await?;
        tracing::debug!("Added {} {}", E::KIND, stored.envelope().id);
        self.trigger.schedule();
        Ok(stored)
    }

    /// Apply a field patch and schedule a sync
    pub async fn update<E: SyncEntity>(&self, id: &RecordId, patch: &Map<String, Value>) -> Result<E> {
        let stored = self.store.update::<E>(id, patch).await?;
        tracing::debug!("Updated {} {id}", E::KIND);
        self.trigger.schedule();
        Ok(stored)
    }

    /// Tombstone a row and schedule a sync
    pub async fn delete<E: SyncEntity>(&self, id: &RecordId) -> Result<()> {
        self.store.soft_delete::<E>(id).await?;
        tracing::debug!("Deleted {} {id}", E::KIND);
        self.trigger.schedule();
        Ok(())
    }

    pub async fn candidates_for_election(&self, election_id: &RecordId) -> Result<Vec<Candidate>> {
        self.store
            .list_by::<Candidate>("election_id", election_id)
            .await
    }

    /// Tallies for the given elections; all tallies when `election_ids` is empty
    pub async fn list_for_elections(&self, election_ids: &[RecordId]) -> Result<Vec<CandidateTally>> {
        self.store.tallies(election_ids).await
    }

    pub async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.store.list_conflicts(limit).await
    }

    /// Rows changed locally and not yet accepted by the server
    pub async fn pending_changes(&self) -> Result<usize> {
        self.store.pending_changes().await
    }

    /// Live orchestrator status, or the persisted sync time when local-only
    pub async fn get_sync_status(&self) -> Result<SyncStatus> {
        if let Some(status) = &self.status {
            return Ok(status.borrow().clone());
        }
        Ok(SyncStatus {
            last_synced_at: self.store.last_synced_at().await?,
            ..SyncStatus::default()
        })
    }
}
