//! Election model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::{Envelope, RecordId};
use super::timestamp;
use crate::error::Error;

/// Whether an election still accepts votes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionStatus {
    #[default]
    Active,
    Closed,
}

impl ElectionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ElectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElectionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(Error::InvalidInput(format!(
                "Unknown election status '{other}'"
            ))),
        }
    }
}

const fn default_max_votes() -> u32 {
    1
}

/// An election (a position being voted on)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// How many candidates one student may pick
    #[serde(default = "default_max_votes")]
    pub max_votes_allowed: u32,
    #[serde(default)]
    pub status: ElectionStatus,
    /// Closing date/time (Unix ms)
    #[serde(default, with = "timestamp::option")]
    pub end_date: Option<i64>,
    /// Sort weight for ballots and dashboards
    #[serde(default)]
    pub position_order: i64,
}

impl Election {
    /// Create a new active election
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(),
            title: title.into(),
            description: None,
            max_votes_allowed: default_max_votes(),
            status: ElectionStatus::Active,
            end_date: None,
            position_order: 0,
        }
    }

    pub const fn id(&self) -> &RecordId {
        &self.envelope.id
    }

    /// Whether the election is still open at `now` (Unix ms)
    pub fn is_open_at(&self, now: i64) -> bool {
        self.status == ElectionStatus::Active && self.end_date.map_or(true, |end| now < end)
    }
}
