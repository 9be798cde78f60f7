//! Tally projection repository
//!
//! Tallies are a read-only projection of the server's vote counts. They are
//! never edited locally: a pull replaces every row of the elections it covers.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::models::{CandidateTally, RecordId};
use crate::util::now_millis;
use rusqlite::{params, Connection};

use super::table::with_savepoint;

const SELECT_TALLIES: &str = "SELECT election_id, candidate_id, vote_count, percentage, candidate_name,
        partylist_name, partylist_acronym, partylist_color
     FROM candidate_tallies";

/// Trait for tally storage operations
pub trait TallyRepository {
    /// Replace the tallies of `election_ids` with `tallies` atomically.
    ///
    /// Elections in the scope but absent from `tallies` end up empty. Rows
    /// for elections outside the scope are ignored.
    fn replace_for_elections(
        &self,
        election_ids: &BTreeSet<RecordId>,
        tallies: &[CandidateTally],
    ) -> Result<usize>;

    /// Tallies for one election, highest vote count first
    fn list_for_election(&self, election_id: &RecordId) -> Result<Vec<CandidateTally>>;

    /// Every stored tally
    fn list_all(&self) -> Result<Vec<CandidateTally>>;

    /// Elections that currently have tallies stored
    fn election_ids(&self) -> Result<BTreeSet<RecordId>>;
}

/// `SQLite` implementation of `TallyRepository`
pub struct SqliteTallyRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTallyRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_tally(row: &rusqlite::Row<'_>) -> rusqlite::Result<CandidateTally> {
        Ok(CandidateTally {
            election_id: row.get(0)?,
            candidate_id: row.get(1)?,
            vote_count: row.get(2)?,
            percentage: row.get(3)?,
            candidate_name: row.get(4)?,
            partylist_name: row.get(5)?,
            partylist_acronym: row.get(6)?,
            partylist_color: row.get(7)?,
        })
    }
}

impl TallyRepository for SqliteTallyRepository<'_> {
    fn replace_for_elections(
        &self,
        election_ids: &BTreeSet<RecordId>,
        tallies: &[CandidateTally],
    ) -> Result<usize> {
        let refreshed_at = now_millis();
        with_savepoint(self.conn, || {
            let mut delete = self
                .conn
                .prepare_cached("DELETE FROM candidate_tallies WHERE election_id = ?1")?;
            for election_id in election_ids {
                delete.execute([election_id])?;
            }

            let mut insert = self.conn.prepare_cached(
                "INSERT OR REPLACE INTO candidate_tallies
                    (election_id, candidate_id, vote_count, percentage, candidate_name,
                     partylist_name, partylist_acronym, partylist_color, refreshed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            let mut written = 0;
            for tally in tallies {
                if !election_ids.contains(&tally.election_id) {
                    tracing::debug!(
                        "Ignoring tally for election {} outside the refresh",
                        tally.election_id
                    );
                    continue;
                }
                written += insert.execute(params![
                    tally.election_id,
                    tally.candidate_id,
                    tally.vote_count,
                    tally.percentage,
                    tally.candidate_name,
                    tally.partylist_name,
                    tally.partylist_acronym,
                    tally.partylist_color,
                    refreshed_at,
                ])?;
            }
            Ok(written)
        })
    }

    fn list_for_election(&self, election_id: &RecordId) -> Result<Vec<CandidateTally>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_TALLIES} WHERE election_id = ?1
             ORDER BY vote_count DESC, candidate_name COLLATE NOCASE ASC"
        ))?;
        let tallies = stmt
            .query_map([election_id], Self::parse_tally)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tallies)
    }

    fn list_all(&self) -> Result<Vec<CandidateTally>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_TALLIES} ORDER BY election_id, vote_count DESC, candidate_name COLLATE NOCASE ASC"
        ))?;
        let tallies = stmt
            .query_map([], Self::parse_tally)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tallies)
    }

    fn election_ids(&self) -> Result<BTreeSet<RecordId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT election_id FROM candidate_tallies")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<RecordId>>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn tally(election: &str, candidate: &str, votes: i64) -> CandidateTally {
        CandidateTally {
            election_id: election.into(),
            candidate_id: candidate.into(),
            vote_count: votes,
            percentage: Some(50.0),
            candidate_name: candidate.to_uppercase(),
            partylist_name: Some("Blue".to_string()),
            partylist_acronym: None,
            partylist_color: Some("#0000ff".to_string()),
        }
    }

    fn scope(ids: &[&str]) -> BTreeSet<RecordId> {
        ids.iter().map(|id| RecordId::from(*id)).collect()
    }

    #[test]
    fn test_replace_matches_snapshot_exactly() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteTallyRepository::new(db.connection());

        repo.replace_for_elections(
            &scope(&["e1", "e2"]),
            &[tally("e1", "c1", 1), tally("e1", "c2", 1), tally("e2", "c3", 4)],
        )
        .unwrap();

        // Next snapshot: c2 disappeared from e1, e2 has no votes left.
        let snapshot = vec![tally("e1", "c1", 2)];
        repo.replace_for_elections(&scope(&["e1", "e2"]), &snapshot)
            .unwrap();

        assert_eq!(repo.list_all().unwrap(), snapshot);
        assert_eq!(repo.election_ids().unwrap(), scope(&["e1"]));
    }

    #[test]
    fn test_replace_leaves_other_elections_alone() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteTallyRepository::new(db.connection());

        repo.replace_for_elections(
            &scope(&["e1", "e2"]),
            &[tally("e1", "c1", 1), tally("e2", "c3", 4)],
        )
        .unwrap();
        repo.replace_for_elections(&scope(&["e1"]), &[tally("e1", "c1", 7)])
            .unwrap();

        assert_eq!(repo.list_for_election(&"e2".into()).unwrap().len(), 1);
        assert_eq!(
            repo.list_for_election(&"e1".into()).unwrap()[0].vote_count,
            7
        );
    }

    #[test]
    fn test_replace_ignores_rows_outside_scope() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteTallyRepository::new(db.connection());
        repo.replace_for_elections(&scope(&["eC"]), &[tally("eC", "c9", 1)])
            .unwrap();

        let written = repo
            .replace_for_elections(
                &scope(&["eA"]),
                &[tally("eA", "c1", 3), tally("eC", "c9", 999), tally("eC", "cX", 5)],
            )
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(repo.list_for_election(&"eC".into()).unwrap(), vec![tally("eC", "c9", 1)]);
        assert_eq!(repo.list_for_election(&"eA".into()).unwrap().len(), 1);
    }

    #[test]
    fn test_list_orders_by_votes() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteTallyRepository::new(db.connection());
        repo.replace_for_elections(
            &scope(&["e1"]),
            &[tally("e1", "low", 1), tally("e1", "high", 9)],
        )
        .unwrap();

        let tallies = repo.list_for_election(&"e1".into()).unwrap();
        assert_eq!(tallies[0].candidate_id.as_str(), "high");
        assert_eq!(tallies[1].candidate_id.as_str(), "low");
    }
}
