//! Candidate model

use serde::{Deserialize, Serialize};

use super::record::{Envelope, RecordId};

/// A candidate running in exactly one election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub election_id: RecordId,
    /// Nulled when the partylist is deleted
    #[serde(default)]
    pub partylist_id: Option<RecordId>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Storage key or URL of the profile picture
    #[serde(default)]
    pub profile_image: Option<String>,
}

impl Candidate {
    /// Create a new candidate for an election
    #[must_use]
    pub fn new(election_id: RecordId, name: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(),
            election_id,
            partylist_id: None,
            name: name.into(),
            description: None,
            profile_image: None,
        }
    }

    pub const fn id(&self) -> &RecordId {
        &self.envelope.id
    }
}
