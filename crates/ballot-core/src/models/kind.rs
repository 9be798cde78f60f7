//! Entity kinds that take part in sync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The entity types with their own sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Elections,
    Candidates,
    Partylists,
    Students,
    Tallies,
}

impl EntityKind {
    /// Every kind, parents before children.
    pub const ALL: [Self; 5] = [
        Self::Elections,
        Self::Partylists,
        Self::Candidates,
        Self::Students,
        Self::Tallies,
    ];

    /// Kinds refreshed when a vote lands on the server.
    pub const VOTE_AFFECTED: [Self; 3] = [Self::Elections, Self::Candidates, Self::Tallies];

    /// Local table name
    pub const fn table(self) -> &'static str {
        match self {
            Self::Elections => "elections",
            Self::Candidates => "candidates",
            Self::Partylists => "partylists",
            Self::Students => "students",
            Self::Tallies => "candidate_tallies",
        }
    }

    /// Remote collection name
    pub const fn remote_table(self) -> &'static str {
        // Remote and local names currently coincide.
        self.table()
    }

    /// Columns that give a stable order over the remote collection
    pub const fn remote_key(self) -> &'static [&'static str] {
        match self {
            Self::Tallies => &["election_id", "candidate_id"],
            _ => &["id"],
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Elections => "elections",
            Self::Candidates => "candidates",
            Self::Partylists => "partylists",
            Self::Students => "students",
            Self::Tallies => "tallies",
        }
    }

    /// Look up the kind whose remote collection is `table`.
    pub fn from_remote_table(table: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.remote_table() == table)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "election" | "elections" => Ok(Self::Elections),
            "candidate" | "candidates" => Ok(Self::Candidates),
            "partylist" | "partylists" => Ok(Self::Partylists),
            "student" | "students" => Ok(Self::Students),
            "tally" | "tallies" | "candidate_tallies" => Ok(Self::Tallies),
            other => Err(Error::InvalidInput(format!("Unknown entity '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_singular_and_plural_names() {
        assert_eq!("Election".parse::<EntityKind>().unwrap(), EntityKind::Elections);
        assert_eq!("partylists".parse::<EntityKind>().unwrap(), EntityKind::Partylists);
        assert!("ballots".parse::<EntityKind>().is_err());
    }

    #[test]
    fn resolves_remote_tables() {
        assert_eq!(
            EntityKind::from_remote_table("candidate_tallies"),
            Some(EntityKind::Tallies)
        );
        assert_eq!(EntityKind::from_remote_table("votes"), None);
    }
}
