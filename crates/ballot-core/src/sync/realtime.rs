//! Push-notification driven resyncs.
//!
//! The websocket transport lives outside this crate; it forwards decoded
//! change events into the channel consumed here.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::engine::TallySync;
use super::orchestrator::SyncOrchestrator;
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordId};

const VOTES_TABLE: &str = "votes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    #[serde(alias = "INSERT")]
    Insert,
    #[serde(alias = "UPDATE")]
    Update,
    #[serde(alias = "DELETE")]
    Delete,
}

/// One row change announced by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub table: String,
    #[serde(alias = "type", alias = "eventType")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Value,
}

impl RealtimeEvent {
    pub fn new(table: impl Into<String>, kind: ChangeKind, record: Value) -> Self {
        Self {
            table: table.into(),
            kind,
            record,
        }
    }

    fn election_id(&self) -> Option<RecordId> {
        self.record
            .get("election_id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(RecordId::from)
    }
}

/// Turns change events into immediate, narrowly scoped syncs.
pub struct RealtimeListener {
    orchestrator: Arc<SyncOrchestrator>,
    tallies: Arc<TallySync>,
}

impl RealtimeListener {
    pub const fn new(orchestrator: Arc<SyncOrchestrator>, tallies: Arc<TallySync>) -> Self {
        Self {
            orchestrator,
            tallies,
        }
    }

    /// React to one event. Unknown tables are ignored.
    pub async fn handle(&self, event: &RealtimeEvent) -> Result<()> {
        if event.table == VOTES_TABLE {
            return self.handle_vote(event).await;
        }

        let Some(kind) = EntityKind::from_remote_table(&event.table) else {
            tracing::debug!("Ignoring change on untracked table {}", event.table);
            return Ok(());
        };
        tracing::debug!("Realtime {:?} on {}", event.kind, event.table);
        self.orchestrator.trigger_kinds(&[kind]).await?;
        Ok(())
    }

    async fn handle_vote(&self, event: &RealtimeEvent) -> Result<()> {
        let Some(election_id) = event.election_id() else {
            self.orchestrator
                .trigger_kinds(&EntityKind::VOTE_AFFECTED)
                .await?;
            return Ok(());
        };

        tracing::debug!("Vote recorded for election {election_id}; refreshing tallies");
        self.orchestrator
            .trigger_kinds(&[EntityKind::Elections, EntityKind::Candidates])
            .await?;
        let scope = BTreeSet::from([election_id]);
        self.orchestrator
            .run_exclusive(self.tallies.sync_elections(&scope))
            .await?;
        Ok(())
    }

    /// Consume events until the sender side closes
    pub fn spawn(self: Arc<Self>, mut events: mpsc::Receiver<RealtimeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match self.handle(&event).await {
                    Ok(()) => {}
                    Err(Error::Offline) => {
                        tracing::debug!("Dropped realtime event on {} while offline", event.table);
                    }
                    Err(error) => tracing::warn!("Realtime resync failed: {error}"),
                }
            }
            tracing::debug!("Realtime listener stopped");
        })
    }
}
