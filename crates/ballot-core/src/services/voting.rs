//! Ballot submission.
//!
//! Votes never touch the local database. A ballot goes to the server in one
//! atomic RPC and the result comes back through the tally projection.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use super::LocalStore;
use crate::error::{Error, Result};
use crate::models::{Ballot, Candidate, Election, EntityKind, Vote};
use crate::remote::RemoteGateway;
use crate::sync::{Connectivity, SyncTrigger};
use crate::util::now_millis;

const CAST_VOTE_RPC: &str = "cast_vote";

pub struct VoteService {
    store: LocalStore,
    gateway: Arc<dyn RemoteGateway>,
    connectivity: Arc<dyn Connectivity>,
    trigger: SyncTrigger,
}

impl VoteService {
    pub fn new(
        store: LocalStore,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: Arc<dyn Connectivity>,
        trigger: SyncTrigger,
    ) -> Self {
        Self {
            store,
            gateway,
            connectivity,
            trigger,
        }
    }

    /// Submit a ballot and request an immediate tally refresh.
    ///
    /// The ballot is checked against the locally known election and its
    /// candidates first; eligibility and double voting are the server's call.
    pub async fn cast_vote(&self, ballot: Ballot) -> Result<Vec<Vote>> {
        if !self.connectivity.is_online() {
            return Err(Error::Offline);
        }

        let election = self
            .store
            .get::<Election>(&ballot.election_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("election {}", ballot.election_id)))?;
        if !election.is_open_at(now_millis()) {
            return Err(Error::InvalidInput(format!(
                "Election '{}' is closed",
                election.title
            )));
        }
        ballot.validate(election.max_votes_allowed)?;

        let running: HashSet<_> = self
            .store
            .list_by::<Candidate>("election_id", &ballot.election_id)
            .await?
            .into_iter()
            .map(|candidate| candidate.envelope.id)
            .collect();
        if let Some(unknown) = ballot.candidate_ids.iter().find(|id| !running.contains(*id)) {
            return Err(Error::InvalidInput(format!(
                "Candidate {unknown} is not running in '{}'",
                election.title
            )));
        }

        let election_id = ballot.election_id.clone();
        let votes = ballot.into_votes();
        self.gateway
            .call(CAST_VOTE_RPC, &json!({ "votes": votes }))
            .await?;
        tracing::info!("Cast {} vote(s) in election {election_id}", votes.len());

        self.trigger.sync_now(&EntityKind::VOTE_AFFECTED);
        Ok(votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElectionStatus, RecordId};
    use crate::remote::MemoryGateway;
    use crate::sync::{ManualConnectivity, TriggerMessage};
    use tokio::sync::mpsc;

    struct Harness {
        service: VoteService,
        gateway: Arc<MemoryGateway>,
        connectivity: Arc<ManualConnectivity>,
        triggers: mpsc::UnboundedReceiver<TriggerMessage>,
        election: Election,
        candidates: Vec<Candidate>,
    }

    async fn harness(max_votes: u32) -> Harness {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut election = Election::new("Council");
        election.max_votes_allowed = max_votes;
        let election = store.insert(&election).await.unwrap();
        let mut candidates = Vec::new();
        for name in ["Ada", "Grace", "Linus"] {
            candidates.push(
                store
                    .insert(&Candidate::new(election.id().clone(), name))
                    .await
                    .unwrap(),
            );
        }

        let gateway = Arc::new(MemoryGateway::new());
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let (trigger, triggers) = SyncTrigger::channel();
        let service = VoteService::new(
            store,
            Arc::clone(&gateway) as Arc<dyn RemoteGateway>,
            Arc::clone(&connectivity) as Arc<dyn Connectivity>,
            trigger,
        );
        Harness {
            service,
            gateway,
            connectivity,
            triggers,
            election,
            candidates,
        }
    }

    fn ballot(h: &Harness, picks: &[usize]) -> Ballot {
        Ballot {
            student_id: "s1".into(),
            election_id: h.election.id().clone(),
            candidate_ids: picks
                .iter()
                .map(|index| h.candidates[*index].envelope.id.clone())
                .collect(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cast_vote_calls_rpc_and_requests_refresh() {
        let mut h = harness(2).await;
        let votes = h.service.cast_vote(ballot(&h, &[0, 2])).await.unwrap();
        assert_eq!(votes.len(), 2);

        let calls = h.gateway.rpc_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "cast_vote");
        assert_eq!(calls[0].1["votes"].as_array().unwrap().len(), 2);
        assert_eq!(calls[0].1["votes"][0]["student_id"], "s1");

        assert_eq!(
            h.triggers.try_recv().unwrap(),
            TriggerMessage::Now(EntityKind::VOTE_AFFECTED.to_vec())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cast_vote_requires_connectivity() {
        let h = harness(1).await;
        h.connectivity.set_online(false);
        let error = h.service.cast_vote(ballot(&h, &[0])).await.unwrap_err();
        assert!(matches!(error, Error::Offline));
        assert!(h.gateway.rpc_calls().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cast_vote_enforces_allowance() {
        let h = harness(1).await;
        let error = h.service.cast_vote(ballot(&h, &[0, 1])).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert!(h.gateway.rpc_calls().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cast_vote_rejects_foreign_candidate() {
        let h = harness(1).await;
        let mut foreign = ballot(&h, &[]);
        foreign.candidate_ids = vec![RecordId::from("elsewhere")];
        let error = h.service.cast_vote(foreign).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cast_vote_rejects_closed_election() {
        let h = harness(1).await;
        let patch = json!({"status": ElectionStatus::Closed});
        h.service
            .store
            .update::<Election>(h.election.id(), patch.as_object().unwrap())
            .await
            .unwrap();
        let error = h.service.cast_vote(ballot(&h, &[0])).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cast_vote_surfaces_unreachable_server() {
        let h = harness(1).await;
        h.gateway.set_online(false);
        let error = h.service.cast_vote(ballot(&h, &[1])).await.unwrap_err();
        assert!(error.is_connectivity());
    }
}
