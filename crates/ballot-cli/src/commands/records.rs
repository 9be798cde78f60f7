use ballot_core::db::SyncEntity;
use ballot_core::{BallotStore, Candidate, Election, Partylist, Student};

use crate::cli::EntityArg;
use crate::commands::common::{
    format_sync_timestamp, new_record_payload, normalize_record_id, parse_json_object, truncate,
};
use crate::error::CliError;

/// One-line rendering for list output.
pub trait RecordLine {
    fn line(&self) -> String;
}

impl RecordLine for Election {
    fn line(&self) -> String {
        let ends = self
            .end_date
            .map_or_else(|| "-".to_string(), format_sync_timestamp);
        format!(
            "{:<36}  {:<30}  {:<6}  max={}  ends={ends}",
            self.envelope.id,
            truncate(&self.title, 30),
            self.status,
            self.max_votes_allowed
        )
    }
}

impl RecordLine for Candidate {
    fn line(&self) -> String {
        let partylist = self
            .partylist_id
            .as_ref()
            .map_or("-", |id| id.as_str());
        format!(
            "{:<36}  {:<30}  election={}  partylist={partylist}",
            self.envelope.id,
            truncate(&self.name, 30),
            self.election_id
        )
    }
}

impl RecordLine for Partylist {
    fn line(&self) -> String {
        format!(
            "{:<36}  {:<30}  {}",
            self.envelope.id,
            truncate(&self.name, 30),
            self.acronym.as_deref().unwrap_or("")
        )
    }
}

impl RecordLine for Student {
    fn line(&self) -> String {
        format!(
            "{:<36}  {:<12}  {:<30}  {}",
            self.envelope.id,
            self.student_number,
            truncate(&self.full_name, 30),
            if self.registered { "registered" } else { "unregistered" }
        )
    }
}

macro_rules! for_entity {
    ($entity:expr, $run:ident($($arg:expr),*)) => {
        match $entity {
            EntityArg::Elections => $run::<Election>($($arg),*).await,
            EntityArg::Candidates => $run::<Candidate>($($arg),*).await,
            EntityArg::Partylists => $run::<Partylist>($($arg),*).await,
            EntityArg::Students => $run::<Student>($($arg),*).await,
        }
    };
}

pub async fn run_list(entity: EntityArg, as_json: bool, store: &BallotStore) -> Result<(), CliError> {
    for_entity!(entity, list_records(store, as_json))
}

pub async fn run_get(
    entity: EntityArg,
    id: &str,
    as_json: bool,
    store: &BallotStore,
) -> Result<(), CliError> {
    for_entity!(entity, get_record(store, id, as_json))
}

pub async fn run_add(entity: EntityArg, payload: &str, store: &BallotStore) -> Result<(), CliError> {
    for_entity!(entity, add_record(store, payload))
}

pub async fn run_update(
    entity: EntityArg,
    id: &str,
    payload: &str,
    store: &BallotStore,
) -> Result<(), CliError> {
    for_entity!(entity, update_record(store, id, payload))
}

pub async fn run_delete(entity: EntityArg, id: &str, store: &BallotStore) -> Result<(), CliError> {
    for_entity!(entity, delete_record(store, id))
}

async fn list_records<E: SyncEntity + RecordLine>(
    store: &BallotStore,
    as_json: bool,
) -> Result<(), CliError> {
    let records = store.list::<E>().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {} yet.", E::KIND);
    }
    for record in &records {
        println!("{}", record.line());
    }
    Ok(())
}

async fn get_record<E: SyncEntity + RecordLine>(
    store: &BallotStore,
    id: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let id = normalize_record_id(id)?;
    let record = store
        .get::<E>(&id)
        .await?
        .ok_or_else(|| CliError::NotFound {
            entity: E::KIND.to_string(),
            id: id.to_string(),
        })?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{}", record.line());
    }
    Ok(())
}

async fn add_record<E: SyncEntity>(store: &BallotStore, payload: &str) -> Result<(), CliError> {
    let payload = new_record_payload(parse_json_object(payload)?);
    let record: E = serde_json::from_value(payload)
        .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    let stored = store.add(&record).await?;
    println!("{}", stored.envelope().id);
    Ok(())
}

async fn update_record<E: SyncEntity>(
    store: &BallotStore,
    id: &str,
    payload: &str,
) -> Result<(), CliError> {
    let id = normalize_record_id(id)?;
    let patch = parse_json_object(payload)?;
    let stored = store.update::<E>(&id, &patch).await?;
    println!("{}", stored.envelope().id);
    Ok(())
}

async fn delete_record<E: SyncEntity>(store: &BallotStore, id: &str) -> Result<(), CliError> {
    let id = normalize_record_id(id)?;
    store.delete::<E>(&id).await?;
    println!("{id}");
    Ok(())
}
