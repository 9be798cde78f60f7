//! Full-sync orchestration: coalescing, debounce and status.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use super::connectivity::Connectivity;
use super::engine::{EntityReport, EntitySync};
use crate::error::{Error, Result};
use crate::models::EntityKind;
use crate::services::LocalStore;
use crate::state::SyncStatus;
use crate::util::now_millis;

/// Result of one trigger.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Per-entity reports, ordered by kind
    pub reports: Vec<EntityReport>,
    /// The trigger arrived during a pass and was folded into a follow-up
    pub coalesced: bool,
}

impl SyncSummary {
    pub fn is_ok(&self) -> bool {
        self.reports.iter().all(EntityReport::is_ok)
    }

    pub fn first_error(&self) -> Option<&Error> {
        self.reports.iter().find_map(EntityReport::error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TriggerMessage {
    /// Restart the debounce window
    Schedule,
    /// Sync these kinds now, bypassing the debounce
    Now(Vec<EntityKind>),
}

/// Cheap handle for requesting syncs from UI code.
///
/// Sends never block and never fail; when no scheduler is running the
/// request is dropped and the rows stay dirty until the next sync.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    sender: mpsc::UnboundedSender<TriggerMessage>,
}

impl SyncTrigger {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<TriggerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// A trigger with no scheduler behind it (local-only mode)
    #[must_use]
    pub fn disconnected() -> Self {
        Self::channel().0
    }

    /// Request a debounced full sync
    pub fn schedule(&self) {
        self.send(TriggerMessage::Schedule);
    }

    /// Request an immediate sync of `kinds`
    pub fn sync_now(&self, kinds: &[EntityKind]) {
        self.send(TriggerMessage::Now(kinds.to_vec()));
    }

    fn send(&self, message: TriggerMessage) {
        if self.sender.send(message).is_err() {
            tracing::debug!("No sync scheduler running; change stays pending");
        }
    }
}

/// Runs entity engines and publishes sync status.
pub struct SyncOrchestrator {
    engines: Vec<Arc<dyn EntitySync>>,
    store: LocalStore,
    connectivity: Arc<dyn Connectivity>,
    status: watch::Sender<SyncStatus>,
    pass_lock: Mutex<()>,
    rerun: AtomicBool,
}

impl SyncOrchestrator {
    /// Create an orchestrator, restoring `last_synced_at` from the store.
    pub async fn new(
        store: LocalStore,
        engines: Vec<Arc<dyn EntitySync>>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Arc<Self>> {
        let status = SyncStatus {
            online: connectivity.is_online(),
            syncing: false,
            last_synced_at: store.last_synced_at().await?,
            last_error: None,
        };
        let (status, _) = watch::channel(status);
        Ok(Arc::new(Self {
            engines,
            store,
            connectivity,
            status,
            pass_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
        }))
    }

    /// Snapshot of the current status
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Observe status transitions
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Sync every entity
    pub async fn trigger_sync(&self) -> Result<SyncSummary> {
        self.trigger_kinds(&EntityKind::ALL).await
    }

    /// Sync the given entities.
    ///
    /// Returns [`Error::Offline`] without touching the network when offline.
    /// A trigger arriving during a pass is coalesced into one follow-up pass
    /// run by the caller already holding the pass.
    pub async fn trigger_kinds(&self, kinds: &[EntityKind]) -> Result<SyncSummary> {
        if !self.connectivity.is_online() {
            self.status.send_modify(|status| status.online = false);
            return Err(Error::Offline);
        }

        let Some(mut guard) = self.acquire_pass(kinds) else {
            tracing::debug!("Sync already running; queued a follow-up pass");
            return Ok(SyncSummary {
                reports: Vec::new(),
                coalesced: true,
            });
        };

        let mut summary = self.run_pass(kinds).await;
        loop {
            drop(guard);
            if !self.rerun.swap(false, Ordering::SeqCst) || !self.connectivity.is_online() {
                break;
            }
            match self.acquire_pass(&EntityKind::ALL) {
                Some(next) => guard = next,
                None => break,
            }
            tracing::debug!("Running coalesced follow-up sync");
            summary = self.run_pass(&EntityKind::ALL).await;
        }
        Ok(summary)
    }

    /// Run `work` between passes so it cannot interleave with a pull.
    ///
    /// Triggers coalesced while `work` holds the pass get their follow-up
    /// pass afterwards.
    pub async fn run_exclusive<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        if !self.connectivity.is_online() {
            self.status.send_modify(|status| status.online = false);
            return Err(Error::Offline);
        }

        let guard = self.pass_lock.lock().await;
        let result = work.await;
        drop(guard);

        if self.rerun.load(Ordering::SeqCst) {
            self.run_logged(&EntityKind::ALL).await;
        }
        result
    }

    fn acquire_pass(&self, kinds: &[EntityKind]) -> Option<MutexGuard<'_, ()>> {
        let guard = match self.pass_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.rerun.store(true, Ordering::SeqCst);
                // The running pass may have finished between the two checks
                self.pass_lock.try_lock().ok()?
            }
        };
        // A full pass starting now covers any queued follow-up
        if EntityKind::ALL.iter().all(|kind| kinds.contains(kind)) {
            self.rerun.store(false, Ordering::SeqCst);
        }
        Some(guard)
    }

    async fn run_pass(&self, kinds: &[EntityKind]) -> SyncSummary {
        self.status.send_modify(|status| {
            status.online = true;
            status.syncing = true;
        });

        let mut tasks = JoinSet::new();
        for engine in self.engines.iter().filter(|engine| kinds.contains(&engine.kind())) {
            let engine = Arc::clone(engine);
            tasks.spawn(async move { engine.full_sync().await });
        }

        let mut reports = Vec::with_capacity(tasks.len());
        let mut task_failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(error) => {
                    tracing::error!("Sync task failed: {error}");
                    task_failure.get_or_insert_with(|| error.to_string());
                }
            }
        }
        reports.sort_by_key(|report| report.kind);

        let summary = SyncSummary {
            reports,
            coalesced: false,
        };
        let last_error = summary
            .first_error()
            .map(ToString::to_string)
            .or(task_failure);

        let finished_at = now_millis();
        if last_error.is_none() {
            if let Err(error) = self.store.set_last_synced_at(finished_at).await {
                tracing::warn!("Failed to persist last sync time: {error}");
            }
            tracing::info!("Sync pass finished for {} entities", summary.reports.len());
        } else {
            tracing::warn!(
                "Sync pass finished with errors: {}",
                last_error.as_deref().unwrap_or_default()
            );
        }

        let online = self.connectivity.is_online();
        self.status.send_modify(|status| {
            status.syncing = false;
            status.online = online;
            if last_error.is_none() {
                status.last_synced_at = Some(finished_at);
            }
            status.last_error = last_error;
        });
        summary
    }

    async fn run_logged(&self, kinds: &[EntityKind]) {
        match self.trigger_kinds(kinds).await {
            Ok(summary) if summary.coalesced => {}
            Ok(summary) => {
                if let Some(error) = summary.first_error() {
                    tracing::warn!("Background sync finished with errors: {error}");
                }
            }
            Err(Error::Offline) => tracing::debug!("Skipped background sync while offline"),
            Err(error) => tracing::warn!("Background sync failed: {error}"),
        }
    }

    /// Start the debounce scheduler.
    ///
    /// Each [`SyncTrigger::schedule`] restarts a `debounce` timer and one full
    /// sync runs when it elapses. Regaining connectivity syncs immediately.
    pub fn spawn_scheduler(self: &Arc<Self>, debounce: Duration) -> (SyncTrigger, JoinHandle<()>) {
        let (trigger, receiver) = SyncTrigger::channel();
        let mut online = self.connectivity.subscribe();
        let was_online = *online.borrow_and_update();
        let handle = tokio::spawn(
            Arc::clone(self).schedule_loop(receiver, online, was_online, debounce),
        );
        (trigger, handle)
    }

    async fn schedule_loop(
        self: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<TriggerMessage>,
        mut online: watch::Receiver<bool>,
        mut was_online: bool,
        debounce: Duration,
    ) {
        let mut watching = true;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Some(TriggerMessage::Schedule) => deadline = Some(Instant::now() + debounce),
                    Some(TriggerMessage::Now(kinds)) => self.run_logged(&kinds).await,
                    None => break,
                },
                () = wait_until(deadline) => {
                    deadline = None;
                    self.run_logged(&EntityKind::ALL).await;
                }
                changed = online.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let now_online = *online.borrow_and_update();
                    self.status.send_modify(|status| status.online = now_online);
                    if now_online && !was_online {
                        tracing::info!("Connectivity restored; syncing now");
                        deadline = None;
                        self.run_logged(&EntityKind::ALL).await;
                    }
                    was_online = now_online;
                }
            }
        }
        tracing::debug!("Sync scheduler stopped");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::connectivity::ManualConnectivity;
    use crate::sync::engine::{PullReport, PushReport};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingEngine {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingEngine {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EntitySync for CountingEngine {
        fn kind(&self) -> EntityKind {
            EntityKind::Elections
        }

        async fn sync_to_server(&self) -> Result<PushReport> {
            Ok(PushReport::default())
        }

        async fn sync_from_server(&self) -> Result<PullReport> {
            if self.fail {
                return Err(Error::Unreachable("timeout".into()));
            }
            Ok(PullReport::default())
        }

        async fn full_sync(&self) -> EntityReport {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            EntityReport {
                kind: self.kind(),
                push: self.sync_to_server().await,
                pull: self.sync_from_server().await,
            }
        }
    }

    async fn orchestrator(
        engine: &Arc<CountingEngine>,
        connectivity: &Arc<ManualConnectivity>,
    ) -> Arc<SyncOrchestrator> {
        let store = LocalStore::open_in_memory().await.unwrap();
        SyncOrchestrator::new(
            store,
            vec![Arc::clone(engine) as Arc<dyn EntitySync>],
            Arc::clone(connectivity) as Arc<dyn Connectivity>,
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_within_debounce_run_one_sync() {
        let engine = Arc::new(CountingEngine::default());
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let orchestrator = orchestrator(&engine, &connectivity).await;
        let (trigger, handle) = orchestrator.spawn_scheduler(Duration::from_secs(3));

        trigger.schedule();
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.schedule();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.calls(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.calls(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(engine.calls(), 1);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_syncs_without_waiting_for_debounce() {
        let engine = Arc::new(CountingEngine::default());
        let connectivity = Arc::new(ManualConnectivity::new(false));
        let orchestrator = orchestrator(&engine, &connectivity).await;
        let (_trigger, handle) = orchestrator.spawn_scheduler(Duration::from_secs(3));

        connectivity.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(engine.calls(), 1);
        assert!(orchestrator.status().online);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn sync_now_bypasses_debounce() {
        let engine = Arc::new(CountingEngine::default());
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let orchestrator = orchestrator(&engine, &connectivity).await;
        let (trigger, handle) = orchestrator.spawn_scheduler(Duration::from_secs(3));

        trigger.sync_now(&[EntityKind::Elections]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.calls(), 1);
        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_trigger_makes_no_calls() {
        let engine = Arc::new(CountingEngine::default());
        let connectivity = Arc::new(ManualConnectivity::new(false));
        let orchestrator = orchestrator(&engine, &connectivity).await;

        let error = orchestrator.trigger_sync().await.unwrap_err();
        assert!(matches!(error, Error::Offline));
        assert_eq!(engine.calls(), 0);
        assert!(!orchestrator.status().online);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_pass_records_status_and_persists_time() {
        let engine = Arc::new(CountingEngine::default());
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let store = LocalStore::open_in_memory().await.unwrap();
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            vec![Arc::clone(&engine) as Arc<dyn EntitySync>],
            Arc::clone(&connectivity) as Arc<dyn Connectivity>,
        )
        .await
        .unwrap();

        let summary = orchestrator.trigger_sync().await.unwrap();
        assert!(summary.is_ok());
        assert_eq!(summary.reports.len(), 1);

        let status = orchestrator.status();
        assert!(!status.syncing);
        assert_eq!(status.last_error, None);
        assert!(status.last_synced_at.is_some());
        assert_eq!(store.last_synced_at().await.unwrap(), status.last_synced_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_pass_records_error() {
        let engine = Arc::new(CountingEngine {
            fail: true,
            ..Default::default()
        });
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let orchestrator = orchestrator(&engine, &connectivity).await;

        let summary = orchestrator.trigger_sync().await.unwrap();
        assert!(!summary.is_ok());
        let status = orchestrator.status();
        assert!(status.last_error.unwrap().contains("timeout"));
        assert_eq!(status.last_synced_at, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_triggers_coalesce_into_one_follow_up() {
        let engine = Arc::new(CountingEngine {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let orchestrator = orchestrator(&engine, &connectivity).await;

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.trigger_sync().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        for _ in 0..3 {
            let summary = orchestrator.trigger_sync().await.unwrap();
            assert!(summary.coalesced);
        }

        first.await.unwrap().unwrap();
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exclusive_work_waits_for_the_running_pass() {
        let engine = Arc::new(CountingEngine {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let orchestrator = orchestrator(&engine, &connectivity).await;

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.trigger_sync().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let saw_syncing = orchestrator
            .run_exclusive(async { Ok(orchestrator.status().syncing) })
            .await
            .unwrap();
        assert!(!saw_syncing);
        assert_eq!(engine.calls(), 1);
        first.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trigger_during_exclusive_work_runs_afterwards() {
        let engine = Arc::new(CountingEngine::default());
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let orchestrator = orchestrator(&engine, &connectivity).await;

        let coalesced = orchestrator
            .run_exclusive(async { orchestrator.trigger_sync().await.map(|summary| summary.coalesced) })
            .await
            .unwrap();

        assert!(coalesced);
        assert_eq!(engine.calls(), 1);

        connectivity.set_online(false);
        let error = orchestrator.run_exclusive(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(error, Error::Offline));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_pass_absorbs_a_queued_follow_up() {
        let engine = Arc::new(CountingEngine::default());
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let orchestrator = orchestrator(&engine, &connectivity).await;

        // Queued by a trigger that lost the race for the previous pass
        orchestrator.rerun.store(true, Ordering::SeqCst);
        orchestrator.trigger_sync().await.unwrap();
        assert_eq!(engine.calls(), 1);
        assert!(!orchestrator.rerun.load(Ordering::SeqCst));

        // A narrower pass still leaves the full follow-up to run
        orchestrator.rerun.store(true, Ordering::SeqCst);
        orchestrator
            .trigger_kinds(&[EntityKind::Elections])
            .await
            .unwrap();
        assert_eq!(engine.calls(), 3);
    }
}
