use ballot_core::{BallotStore, CandidateTally};

use crate::commands::common::{normalize_record_id, truncate};
use crate::error::CliError;

pub async fn run_tallies(
    elections: &[String],
    as_json: bool,
    store: &BallotStore,
) -> Result<(), CliError> {
    let election_ids = elections
        .iter()
        .map(|id| normalize_record_id(id))
        .collect::<Result<Vec<_>, _>>()?;
    let tallies = store.list_for_elections(&election_ids).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&tallies)?);
        return Ok(());
    }

    if tallies.is_empty() {
        println!("No tallies yet. Run `ballot sync` to fetch them.");
        return Ok(());
    }
    for line in format_tally_lines(&tallies) {
        println!("{line}");
    }
    Ok(())
}

/// Tallies grouped under an election header line.
pub fn format_tally_lines(tallies: &[CandidateTally]) -> Vec<String> {
    let mut lines = Vec::with_capacity(tallies.len());
    let mut current_election = None;
    for tally in tallies {
        if current_election != Some(&tally.election_id) {
            lines.push(format!("election {}", tally.election_id));
            current_election = Some(&tally.election_id);
        }
        lines.push(format!(
            "  {:<30}  {:>6}  {:>6.2}%  {}",
            truncate(&tally.candidate_name, 30),
            tally.vote_count,
            tally.percentage.unwrap_or(0.0),
            tally.partylist_acronym.as_deref().unwrap_or("")
        ));
    }
    lines
}
