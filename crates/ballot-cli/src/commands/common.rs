use std::path::{Path, PathBuf};
use std::sync::Arc;

use ballot_core::remote::{PostgrestGateway, RemoteGateway};
use ballot_core::sync::{default_engines, Connectivity, HttpProbe, SyncOrchestrator, TallySync};
use ballot_core::{ClientConfig, LocalStore, RecordId, SyncConflict};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub entity: String,
    pub record_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

/// Everything needed to talk to the remote backend.
pub struct SyncContext {
    pub store: LocalStore,
    pub probe: Arc<HttpProbe>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub tallies: Arc<TallySync>,
}

impl SyncContext {
    /// Wire gateway, probe and engines over `store`.
    pub async fn connect(config: &ClientConfig, store: LocalStore) -> Result<Self, CliError> {
        if !config.has_remote() {
            return Err(CliError::SyncNotConfigured);
        }
        let gateway = Arc::new(PostgrestGateway::from_config(config)?);
        if let Some(session) = store.load_session().await? {
            gateway.set_session(Some(&session)).await;
        }

        let probe = Arc::new(HttpProbe::new(
            gateway.rest_url(),
            config.supabase_key.clone(),
            config.probe_interval,
            config.request_timeout,
        )?);

        let remote = Arc::clone(&gateway) as Arc<dyn RemoteGateway>;
        let (engines, tallies) = default_engines(&store, &remote, config.push_chunk_size);
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            engines,
            Arc::clone(&probe) as Arc<dyn Connectivity>,
        )
        .await?;

        tracing::debug!("Sync enabled against {}", gateway.rest_url());
        Ok(Self {
            store,
            probe,
            orchestrator,
            tallies,
        })
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, config: &ClientConfig) -> PathBuf {
    cli_db_path
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ballot")
        .join("ballot.db")
}

pub async fn open_store(path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(LocalStore::open_path(path.to_path_buf()).await?)
}

pub fn normalize_record_id(id: &str) -> Result<RecordId, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(RecordId::from(trimmed))
    }
}

pub fn parse_json_object(raw: &str) -> Result<Map<String, Value>, CliError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(CliError::InvalidPayload("expected a JSON object".into())),
        Err(error) => Err(CliError::InvalidPayload(error.to_string())),
    }
}

/// Fill in a fresh id so a partial object describes a new record.
pub fn new_record_payload(mut fields: Map<String, Value>) -> Value {
    let has_id = fields
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    if !has_id {
        fields.insert("id".into(), Value::String(RecordId::new().to_string()));
    }
    Value::Object(fields)
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        entity: conflict.entity.to_string(),
        record_id: conflict.record_id.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {:<10}  id={}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.entity,
                conflict.record_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_last_synced(last_synced_at: Option<i64>) -> String {
    last_synced_at.map_or_else(
        || "never".to_string(),
        |at| {
            let now_ms = Utc::now().timestamp_millis();
            format!(
                "{} ({})",
                format_sync_timestamp(at),
                format_relative_time(at, now_ms)
            )
        },
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}
