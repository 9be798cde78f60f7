use ballot_core::sync::{EntityReport, SyncSummary};
use ballot_core::{BallotStore, ClientConfig, LocalStore, SyncState, SyncStatus};
use serde::Serialize;

use crate::commands::common::{
    format_last_synced, format_sync_conflict_lines, sync_conflict_to_item, SyncConflictItem,
    SyncContext,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct EntityReportItem {
    pub entity: String,
    pub pushed: Option<usize>,
    pub fetched: Option<usize>,
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub kept_local: usize,
    pub skipped: usize,
    pub push_error: Option<String>,
    pub pull_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub state: SyncState,
    #[serde(flatten)]
    pub status: SyncStatus,
    pub remote_configured: bool,
    pub pending_changes: usize,
}

pub fn entity_report_to_item(report: &EntityReport) -> EntityReportItem {
    let merged = report
        .pull
        .as_ref()
        .map(|pull| pull.merged)
        .unwrap_or_default();
    EntityReportItem {
        entity: report.kind.to_string(),
        pushed: report.push.as_ref().ok().map(|push| push.pushed),
        fetched: report.pull.as_ref().ok().map(|pull| pull.fetched),
        inserted: merged.inserted,
        updated: merged.updated,
        removed: merged.removed,
        kept_local: merged.kept_local,
        skipped: merged.skipped,
        push_error: report.push.as_ref().err().map(ToString::to_string),
        pull_error: report.pull.as_ref().err().map(ToString::to_string),
    }
}

pub fn format_report_lines(summary: &SyncSummary) -> Vec<String> {
    summary
        .reports
        .iter()
        .map(|report| {
            let item = entity_report_to_item(report);
            let push = item.push_error.as_ref().map_or_else(
                || format!("pushed={}", item.pushed.unwrap_or_default()),
                |error| format!("push failed: {error}"),
            );
            let pull = item.pull_error.as_ref().map_or_else(
                || {
                    format!(
                        "fetched={} inserted={} updated={} removed={} kept_local={}",
                        item.fetched.unwrap_or_default(),
                        item.inserted,
                        item.updated,
                        item.removed,
                        item.kept_local
                    )
                },
                |error| format!("pull failed: {error}"),
            );
            format!("{:<10}  {push}  {pull}", item.entity)
        })
        .collect()
}

pub async fn run_sync(config: &ClientConfig, store: LocalStore, as_json: bool) -> Result<(), CliError> {
    let context = SyncContext::connect(config, store).await?;
    context.probe.probe_once().await;
    let summary = context.orchestrator.trigger_sync().await?;

    if as_json {
        let items = summary
            .reports
            .iter()
            .map(entity_report_to_item)
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_report_lines(&summary) {
            println!("{line}");
        }
    }

    match summary.first_error() {
        Some(error) => Err(CliError::SyncFailed(error.to_string())),
        None => {
            if !as_json {
                println!("Sync completed");
            }
            Ok(())
        }
    }
}

pub async fn run_status(
    config: &ClientConfig,
    store: &BallotStore,
    as_json: bool,
) -> Result<(), CliError> {
    let mut status = store.get_sync_status().await?;
    if config.has_remote() {
        let context = SyncContext::connect(config, store.local_store().clone()).await?;
        status.online = context.probe.probe_once().await;
    }
    let item = StatusItem {
        state: status.state(),
        status,
        remote_configured: config.has_remote(),
        pending_changes: store.pending_changes().await?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    let state = serde_json::to_value(item.state)?;
    println!("state:           {}", state.as_str().unwrap_or_default());
    println!(
        "remote:          {}",
        if item.remote_configured { "configured" } else { "local-only" }
    );
    println!("online:          {}", item.status.online);
    println!("pending changes: {}", item.pending_changes);
    println!("last synced:     {}", format_last_synced(item.status.last_synced_at));
    Ok(())
}

pub async fn run_conflicts(limit: usize, as_json: bool, store: &BallotStore) -> Result<(), CliError> {
    let conflicts = store.conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
