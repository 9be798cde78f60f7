//! Bidirectional sync between the local store and the remote backend.

mod connectivity;
mod engine;
pub mod merge;
mod orchestrator;
mod realtime;

use std::sync::Arc;

pub use connectivity::{on_online, Connectivity, HttpProbe, ManualConnectivity};
pub use engine::{EntityReport, EntitySync, PullReport, PushReport, SyncEngine, TallySync};
pub use merge::MergeCounts;
#[cfg(test)]
pub(crate) use orchestrator::TriggerMessage;
pub use orchestrator::{SyncOrchestrator, SyncSummary, SyncTrigger};
pub use realtime::{ChangeKind, RealtimeEvent, RealtimeListener};

use crate::models::{Candidate, Election, Partylist, Student};
use crate::remote::RemoteGateway;
use crate::services::LocalStore;

/// One engine per entity kind, in [`EntityKind::ALL`](crate::models::EntityKind::ALL)
/// order, plus a handle on the tally engine for targeted refreshes.
pub fn default_engines(
    store: &LocalStore,
    gateway: &Arc<dyn RemoteGateway>,
    chunk_size: usize,
) -> (Vec<Arc<dyn EntitySync>>, Arc<TallySync>) {
    let tallies = Arc::new(TallySync::new(store.clone(), Arc::clone(gateway)));
    let engines: Vec<Arc<dyn EntitySync>> = vec![
        Arc::new(SyncEngine::<Election>::new(store.clone(), Arc::clone(gateway)).with_chunk_size(chunk_size)),
        Arc::new(SyncEngine::<Partylist>::new(store.clone(), Arc::clone(gateway)).with_chunk_size(chunk_size)),
        Arc::new(SyncEngine::<Candidate>::new(store.clone(), Arc::clone(gateway)).with_chunk_size(chunk_size)),
        Arc::new(SyncEngine::<Student>::new(store.clone(), Arc::clone(gateway)).with_chunk_size(chunk_size)),
        Arc::clone(&tallies) as Arc<dyn EntitySync>,
    ];
    (engines, tallies)
}
