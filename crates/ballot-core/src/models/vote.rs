//! Vote and ballot models
//!
//! Votes are append-only and never stored locally: a ballot is submitted to
//! the server in one atomic call, and the client learns the outcome through
//! the tally projection.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::record::RecordId;
use super::timestamp;
use crate::error::{Error, Result};

/// One vote for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: RecordId,
    pub election_id: RecordId,
    pub candidate_id: RecordId,
    pub student_id: RecordId,
    #[serde(with = "timestamp")]
    pub created_at: i64,
}

/// A student's picks for one election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub student_id: RecordId,
    pub election_id: RecordId,
    pub candidate_ids: Vec<RecordId>,
}

impl Ballot {
    /// Check the ballot shape against the election's vote allowance.
    pub fn validate(&self, max_votes_allowed: u32) -> Result<()> {
        if self.candidate_ids.is_empty() {
            return Err(Error::InvalidInput(
                "Ballot must select at least one candidate".into(),
            ));
        }
        let unique: HashSet<&RecordId> = self.candidate_ids.iter().collect();
        if unique.len() != self.candidate_ids.len() {
            return Err(Error::InvalidInput(
                "Ballot selects the same candidate twice".into(),
            ));
        }
        if self.candidate_ids.len() > max_votes_allowed as usize {
            return Err(Error::InvalidInput(format!(
                "Ballot selects {} candidates but only {max_votes_allowed} allowed",
                self.candidate_ids.len()
            )));
        }
        Ok(())
    }

    /// Expand the ballot into one vote row per selected candidate.
    #[must_use]
    pub fn into_votes(self) -> Vec<Vote> {
        let now = crate::util::now_millis();
        self.candidate_ids
            .into_iter()
            .map(|candidate_id| Vote {
                id: RecordId::new(),
                election_id: self.election_id.clone(),
                candidate_id,
                student_id: self.student_id.clone(),
                created_at: now,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(candidates: &[&str]) -> Ballot {
        Ballot {
            student_id: "s1".into(),
            election_id: "e1".into(),
            candidate_ids: candidates.iter().map(|id| RecordId::from(*id)).collect(),
        }
    }

    #[test]
    fn validate_enforces_allowance_and_uniqueness() {
        assert!(ballot(&["c1"]).validate(1).is_ok());
        assert!(ballot(&[]).validate(1).is_err());
        assert!(ballot(&["c1", "c1"]).validate(2).is_err());
        assert!(ballot(&["c1", "c2"]).validate(1).is_err());
    }

    #[test]
    fn into_votes_creates_one_row_per_candidate() {
        let votes = ballot(&["c1", "c2"]).into_votes();
        assert_eq!(votes.len(), 2);
        assert!(votes.iter().all(|vote| vote.election_id.as_str() == "e1"));
        assert_ne!(votes[0].id, votes[1].id);
    }
}
