use std::io::IsTerminal;
use std::sync::Arc;

use ballot_core::sync::{RealtimeEvent, RealtimeListener};
use ballot_core::{ClientConfig, EntityKind, LocalStore, SyncStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::commands::common::{format_last_synced, SyncContext};
use crate::error::CliError;

const REALTIME_BUFFER: usize = 64;

/// Run the sync loop until Ctrl-C.
///
/// Change events may be piped in on stdin, one JSON object per line
/// (`{"table": "votes", "type": "INSERT", "record": {...}}`).
pub async fn run_watch(config: &ClientConfig, store: LocalStore) -> Result<(), CliError> {
    let context = SyncContext::connect(config, store).await?;
    let mut handles = vec![Arc::clone(&context.probe).spawn()];

    let (trigger, scheduler) = context.orchestrator.spawn_scheduler(config.sync_debounce);
    handles.push(scheduler);
    handles.push(spawn_status_printer(context.orchestrator.subscribe()));

    let listener = Arc::new(RealtimeListener::new(
        Arc::clone(&context.orchestrator),
        Arc::clone(&context.tallies),
    ));
    let (events, receiver) = mpsc::channel(REALTIME_BUFFER);
    handles.push(listener.spawn(receiver));
    if !std::io::stdin().is_terminal() {
        handles.push(spawn_stdin_events(events));
    }

    trigger.sync_now(&EntityKind::ALL);
    println!(
        "Watching for changes ({} pending). Press Ctrl-C to stop.",
        context.store.pending_changes().await?
    );

    tokio::signal::ctrl_c().await?;
    for handle in handles {
        handle.abort();
    }
    println!("Stopped.");
    Ok(())
}

fn spawn_status_printer(mut status: watch::Receiver<SyncStatus>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous = status.borrow_and_update().clone();
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if let Some(line) = format_status_change(&previous, &current) {
                println!("{line}");
            }
            previous = current;
        }
    })
}

/// Line to print when status moves, `None` when nothing user-visible changed
pub fn format_status_change(previous: &SyncStatus, current: &SyncStatus) -> Option<String> {
    if previous.online != current.online {
        return Some(if current.online { "online" } else { "offline" }.to_string());
    }
    if previous.syncing && !current.syncing {
        return Some(current.last_error.as_ref().map_or_else(
            || format!("synced, last sync {}", format_last_synced(current.last_synced_at)),
            |error| format!("sync failed: {error}"),
        ));
    }
    None
}

fn spawn_stdin_events(events: mpsc::Sender<RealtimeEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RealtimeEvent>(&line) {
                        Ok(event) => {
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => tracing::warn!("Ignoring malformed change event: {error}"),
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!("Stopped reading change events: {error}");
                    break;
                }
            }
        }
    })
}
