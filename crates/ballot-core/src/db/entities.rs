//! Table bindings for the syncable entities

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::Row;

use super::table::{ChildLink, OnParentDelete, ParentLink, SyncEntity};
use crate::error::{Error, Result};
use crate::models::{Candidate, Election, ElectionStatus, EntityKind, Envelope, Partylist, Student};

fn text(value: Option<&String>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.clone()))
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} cannot be empty")));
    }
    Ok(())
}

impl ToSql for ElectionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ElectionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

impl SyncEntity for Election {
    const KIND: EntityKind = EntityKind::Elections;
    const COLUMNS: &'static [&'static str] = &[
        "title",
        "description",
        "max_votes_allowed",
        "status",
        "end_date",
        "position_order",
    ];
    const ORDER_BY: &'static str = "t.position_order ASC, t.created_at ASC";
    const CHILDREN: &'static [ChildLink] = &[
        ChildLink {
            table: "candidates",
            column: "election_id",
            action: OnParentDelete::Cascade,
        },
        ChildLink {
            table: "candidate_tallies",
            column: "election_id",
            action: OnParentDelete::Purge,
        },
    ];

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn to_columns(&self) -> Vec<Value> {
        vec![
            Value::Text(self.title.clone()),
            text(self.description.as_ref()),
            Value::Integer(i64::from(self.max_votes_allowed)),
            Value::Text(self.status.as_str().to_string()),
            self.end_date.map_or(Value::Null, Value::Integer),
            Value::Integer(self.position_order),
        ]
    }

    fn from_row(envelope: Envelope, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            envelope,
            title: row.get("title")?,
            description: row.get("description")?,
            max_votes_allowed: row.get("max_votes_allowed")?,
            status: row.get("status")?,
            end_date: row.get("end_date")?,
            position_order: row.get("position_order")?,
        })
    }

    fn validate(&self) -> Result<()> {
        require("Election title", &self.title)?;
        if self.max_votes_allowed == 0 {
            return Err(Error::InvalidInput(
                "Election must allow at least one vote".into(),
            ));
        }
        Ok(())
    }
}

impl SyncEntity for Partylist {
    const KIND: EntityKind = EntityKind::Partylists;
    const COLUMNS: &'static [&'static str] = &["name", "acronym", "color", "logo"];
    const ORDER_BY: &'static str = "t.name COLLATE NOCASE ASC";
    const CHILDREN: &'static [ChildLink] = &[ChildLink {
        table: "candidates",
        column: "partylist_id",
        action: OnParentDelete::SetNull,
    }];

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn to_columns(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            text(self.acronym.as_ref()),
            text(self.color.as_ref()),
            text(self.logo.as_ref()),
        ]
    }

    fn from_row(envelope: Envelope, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            envelope,
            name: row.get("name")?,
            acronym: row.get("acronym")?,
            color: row.get("color")?,
            logo: row.get("logo")?,
        })
    }

    fn validate(&self) -> Result<()> {
        require("Partylist name", &self.name)
    }
}

impl SyncEntity for Candidate {
    const KIND: EntityKind = EntityKind::Candidates;
    const COLUMNS: &'static [&'static str] = &[
        "election_id",
        "partylist_id",
        "name",
        "description",
        "profile_image",
    ];
    const ORDER_BY: &'static str = "t.name COLLATE NOCASE ASC";
    const PARENTS: &'static [ParentLink] = &[
        ParentLink {
            column: "election_id",
            parent: EntityKind::Elections,
            required: true,
        },
        ParentLink {
            column: "partylist_id",
            parent: EntityKind::Partylists,
            required: false,
        },
    ];
    const CHILDREN: &'static [ChildLink] = &[ChildLink {
        table: "candidate_tallies",
        column: "candidate_id",
        action: OnParentDelete::Purge,
    }];

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn to_columns(&self) -> Vec<Value> {
        vec![
            Value::Text(self.election_id.to_string()),
            self.partylist_id
                .as_ref()
                .map_or(Value::Null, |id| Value::Text(id.to_string())),
            Value::Text(self.name.clone()),
            text(self.description.as_ref()),
            text(self.profile_image.as_ref()),
        ]
    }

    fn from_row(envelope: Envelope, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            envelope,
            election_id: row.get("election_id")?,
            partylist_id: row.get("partylist_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            profile_image: row.get("profile_image")?,
        })
    }

    fn validate(&self) -> Result<()> {
        require("Candidate name", &self.name)
    }
}

impl SyncEntity for Student {
    const KIND: EntityKind = EntityKind::Students;
    const COLUMNS: &'static [&'static str] =
        &["student_number", "full_name", "email", "registered"];
    const ORDER_BY: &'static str = "t.student_number ASC";

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn to_columns(&self) -> Vec<Value> {
        vec![
            Value::Text(self.student_number.clone()),
            Value::Text(self.full_name.clone()),
            text(self.email.as_ref()),
            Value::Integer(i64::from(self.registered)),
        ]
    }

    fn from_row(envelope: Envelope, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            envelope,
            student_number: row.get("student_number")?,
            full_name: row.get("full_name")?,
            email: row.get("email")?,
            registered: row.get("registered")?,
        })
    }

    fn validate(&self) -> Result<()> {
        require("Student number", &self.student_number)?;
        require("Student name", &self.full_name)
    }
}
