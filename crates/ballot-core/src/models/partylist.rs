//! Partylist model

use serde::{Deserialize, Serialize};

use super::record::{Envelope, RecordId};

/// A party or slate candidates may run under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partylist {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub name: String,
    #[serde(default)]
    pub acronym: Option<String>,
    /// Display color, e.g. `#1d4ed8`
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

impl Partylist {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(),
            name: name.into(),
            acronym: None,
            color: None,
            logo: None,
        }
    }

    pub const fn id(&self) -> &RecordId {
        &self.envelope.id
    }
}
