//! Student (voter roster) model

use serde::{Deserialize, Serialize};

use super::record::{Envelope, RecordId};

/// A student on the voter roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    #[serde(flatten)]
    pub envelope: Envelope,
    /// School-issued number, unique among live students
    pub student_number: String,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Whether the student has completed voter registration
    #[serde(default)]
    pub registered: bool,
}

impl Student {
    #[must_use]
    pub fn new(student_number: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(),
            student_number: student_number.into(),
            full_name: full_name.into(),
            email: None,
            registered: false,
        }
    }

    pub const fn id(&self) -> &RecordId {
        &self.envelope.id
    }
}
