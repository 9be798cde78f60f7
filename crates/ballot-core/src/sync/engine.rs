//! Per-entity sync engines.
//!
//! Each engine pushes dirty rows then pulls the remote collection and merges
//! it with last-writer-wins. Tallies are pull-only.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::merge::MergeCounts;
use crate::config::DEFAULT_PUSH_CHUNK_SIZE;
use crate::db::SyncEntity;
use crate::error::{Error, Result};
use crate::models::{elections_in, recompute_percentages, CandidateTally, EntityKind, RecordId};
use crate::remote::{Filter, RemoteGateway};
use crate::services::LocalStore;

/// Outcome of a push phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Rows the remote accepted
    pub pushed: usize,
}

/// Outcome of a pull phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Rows returned by the remote
    pub fetched: usize,
    pub merged: MergeCounts,
}

/// Outcome of one entity's full sync. Each phase fails independently.
#[derive(Debug)]
pub struct EntityReport {
    pub kind: EntityKind,
    pub push: Result<PushReport>,
    pub pull: Result<PullReport>,
}

impl EntityReport {
    pub const fn is_ok(&self) -> bool {
        self.push.is_ok() && self.pull.is_ok()
    }

    /// The push error if any, else the pull error
    pub fn error(&self) -> Option<&Error> {
        self.push.as_ref().err().or_else(|| self.pull.as_ref().err())
    }
}

/// One entity's sync operations.
#[async_trait]
pub trait EntitySync: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Upload dirty rows and mark the accepted ones clean
    async fn sync_to_server(&self) -> Result<PushReport>;

    /// Download the remote collection and merge it locally
    async fn sync_from_server(&self) -> Result<PullReport>;

    /// Push then pull. A failed push does not prevent the pull.
    async fn full_sync(&self) -> EntityReport {
        let push = self.sync_to_server().await;
        if let Err(error) = &push {
            tracing::warn!("{} push failed: {error}", self.kind());
        }
        let pull = self.sync_from_server().await;
        if let Err(error) = &pull {
            tracing::warn!("{} pull failed: {error}", self.kind());
        }
        EntityReport {
            kind: self.kind(),
            push,
            pull,
        }
    }
}

/// Generic engine for a syncable table.
pub struct SyncEngine<E> {
    store: LocalStore,
    gateway: Arc<dyn RemoteGateway>,
    chunk_size: usize,
    filter: Filter,
    _entity: PhantomData<fn() -> E>,
}

impl<E: SyncEntity> SyncEngine<E> {
    pub fn new(store: LocalStore, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            store,
            gateway,
            chunk_size: DEFAULT_PUSH_CHUNK_SIZE,
            filter: Filter::None,
            _entity: PhantomData,
        }
    }

    /// Rows per upsert request (at least 1)
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pull only rows matching `filter`
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    fn table() -> &'static str {
        E::KIND.remote_table()
    }

    /// Retry a rejected chunk one row at a time so a bad row cannot block
    /// the rest. Returns how many rows went through.
    async fn push_rows_individually(
        &self,
        chunk: &[E],
        rows: Vec<Value>,
        rejected: &mut Vec<String>,
    ) -> Result<usize> {
        let mut pushed = 0;
        for (entity, row) in chunk.iter().zip(rows) {
            match self.gateway.upsert(Self::table(), &[row]).await {
                Ok(()) => {
                    self.store.mark_clean(std::slice::from_ref(entity)).await?;
                    pushed += 1;
                }
                Err(error) if error.is_connectivity() => return Err(error),
                Err(error) => {
                    tracing::warn!("{} row {} rejected: {error}", E::KIND, entity.envelope().id);
                    rejected.push(entity.envelope().id.to_string());
                }
            }
        }
        Ok(pushed)
    }
}

#[async_trait]
impl<E: SyncEntity> EntitySync for SyncEngine<E> {
    fn kind(&self) -> EntityKind {
        E::KIND
    }

    async fn sync_to_server(&self) -> Result<PushReport> {
        let dirty = self.store.select_dirty::<E>().await?;
        if dirty.is_empty() {
            return Ok(PushReport::default());
        }

        let mut report = PushReport::default();
        let mut rejected = Vec::new();
        for chunk in dirty.chunks(self.chunk_size) {
            let rows = chunk
                .iter()
                .map(serde_json::to_value)
                .collect::<serde_json::Result<Vec<_>>>()?;

            match self.gateway.upsert(Self::table(), &rows).await {
                Ok(()) => {
                    self.store.mark_clean(chunk).await?;
                    report.pushed += chunk.len();
                }
                Err(error) if error.is_connectivity() => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        "{} batch of {} rejected ({error}); retrying row by row",
                        E::KIND,
                        chunk.len()
                    );
                    report.pushed += self
                        .push_rows_individually(chunk, rows, &mut rejected)
                        .await?;
                }
            }
        }

        tracing::info!("Pushed {} {} row(s)", report.pushed, E::KIND);
        if rejected.is_empty() {
            Ok(report)
        } else {
            Err(Error::RemoteRejected {
                table: Self::table().to_string(),
                message: format!("{} row(s) rejected: {}", rejected.len(), rejected.join(", ")),
            })
        }
    }

    async fn sync_from_server(&self) -> Result<PullReport> {
        let rows = self.gateway.select_all(Self::table(), &self.filter).await?;
        let fetched = rows.len();

        let mut malformed = 0;
        let mut entities = Vec::with_capacity(fetched);
        for row in rows {
            match serde_json::from_value::<E>(row) {
                Ok(entity) => entities.push(entity),
                Err(error) => {
                    malformed += 1;
                    tracing::warn!("Skipping malformed {} row: {error}", E::KIND);
                }
            }
        }

        let mut merged = self.store.apply_remote(&entities).await?;
        merged.skipped += malformed;
        if merged.changed() {
            tracing::info!(
                "Pulled {}: {} inserted, {} updated, {} removed",
                E::KIND,
                merged.inserted,
                merged.updated,
                merged.removed
            );
        }
        Ok(PullReport { fetched, merged })
    }
}

/// Pull-only engine for the server-computed tally projection.
pub struct TallySync {
    store: LocalStore,
    gateway: Arc<dyn RemoteGateway>,
}

impl TallySync {
    pub fn new(store: LocalStore, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self { store, gateway }
    }

    async fn fetch(&self, filter: &Filter) -> Result<Vec<CandidateTally>> {
        let rows = self
            .gateway
            .select_all(EntityKind::Tallies.remote_table(), filter)
            .await?;
        let mut tallies = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<CandidateTally>(row) {
                Ok(tally) => tallies.push(tally),
                Err(error) => tracing::warn!("Skipping malformed tally row: {error}"),
            }
        }
        recompute_percentages(&mut tallies);
        Ok(tallies)
    }

    async fn replace(&self, scope: &BTreeSet<RecordId>, tallies: &[CandidateTally]) -> Result<PullReport> {
        let written = self.store.replace_tallies(scope, tallies).await?;
        tracing::debug!(
            "Replaced tallies for {} election(s) with {written} row(s)",
            scope.len()
        );
        Ok(PullReport {
            fetched: tallies.len(),
            merged: MergeCounts {
                inserted: written,
                ..MergeCounts::default()
            },
        })
    }

    /// Refresh only the tallies of the given elections
    pub async fn sync_elections(&self, election_ids: &BTreeSet<RecordId>) -> Result<PullReport> {
        if election_ids.is_empty() {
            return Ok(PullReport::default());
        }
        let filter = Filter::is_in("election_id", election_ids.iter().map(RecordId::as_str));
        let tallies = self.fetch(&filter).await?;
        self.replace(election_ids, &tallies).await
    }
}

#[async_trait]
impl EntitySync for TallySync {
    fn kind(&self) -> EntityKind {
        EntityKind::Tallies
    }

    async fn sync_to_server(&self) -> Result<PushReport> {
        Ok(PushReport::default())
    }

    async fn sync_from_server(&self) -> Result<PullReport> {
        let tallies = self.fetch(&Filter::None).await?;
        // Elections that dropped out of the snapshot must be emptied too
        let mut scope = elections_in(&tallies);
        scope.extend(self.store.tally_election_ids().await?);
        self.replace(&scope, &tallies).await
    }
}
