//! Candidate tally projection

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::record::RecordId;

/// Server-computed vote count for one candidate, denormalized for offline
/// rendering without joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub election_id: RecordId,
    pub candidate_id: RecordId,
    #[serde(default)]
    pub vote_count: i64,
    /// Share of the election's votes, 0-100
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub candidate_name: String,
    #[serde(default)]
    pub partylist_name: Option<String>,
    #[serde(default)]
    pub partylist_acronym: Option<String>,
    #[serde(default)]
    pub partylist_color: Option<String>,
}

/// Election ids referenced by a tally snapshot.
pub fn elections_in(tallies: &[CandidateTally]) -> BTreeSet<RecordId> {
    tallies
        .iter()
        .map(|tally| tally.election_id.clone())
        .collect()
}

/// Fill in percentages for elections where the server left any blank.
///
/// Percentages are recomputed for every row of such an election so they
/// stay consistent with each other. Elections with no votes get 0.
#[allow(clippy::cast_precision_loss)]
pub fn recompute_percentages(tallies: &mut [CandidateTally]) {
    let mut totals: HashMap<RecordId, (i64, bool)> = HashMap::new();
    for tally in tallies.iter() {
        let entry = totals.entry(tally.election_id.clone()).or_default();
        entry.0 += tally.vote_count.max(0);
        entry.1 |= tally.percentage.is_none();
    }

    for tally in tallies.iter_mut() {
        let Some(&(total, incomplete)) = totals.get(&tally.election_id) else {
            continue;
        };
        if !incomplete {
            continue;
        }
        let percentage = if total == 0 {
            0.0
        } else {
            (tally.vote_count.max(0) as f64 / total as f64) * 100.0
        };
        tally.percentage = Some((percentage * 100.0).round() / 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(election: &str, candidate: &str, votes: i64, percentage: Option<f64>) -> CandidateTally {
        CandidateTally {
            election_id: election.into(),
            candidate_id: candidate.into(),
            vote_count: votes,
            percentage,
            candidate_name: candidate.to_uppercase(),
            partylist_name: None,
            partylist_acronym: None,
            partylist_color: None,
        }
    }

    #[test]
    fn recompute_fills_incomplete_elections() {
        let mut tallies = vec![
            tally("e1", "c1", 1, None),
            tally("e1", "c2", 2, Some(99.0)),
            tally("e2", "c3", 5, Some(100.0)),
        ];
        recompute_percentages(&mut tallies);

        assert_eq!(tallies[0].percentage, Some(33.33));
        assert_eq!(tallies[1].percentage, Some(66.67));
        assert_eq!(tallies[2].percentage, Some(100.0));
    }

    #[test]
    fn recompute_handles_zero_votes() {
        let mut tallies = vec![tally("e1", "c1", 0, None), tally("e1", "c2", 0, None)];
        recompute_percentages(&mut tallies);
        assert!(tallies.iter().all(|t| t.percentage == Some(0.0)));
    }
}
