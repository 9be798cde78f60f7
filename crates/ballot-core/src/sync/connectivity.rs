//! Network reachability.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Source of online/offline state.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every change
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Run `callback` on every offline to online transition.
pub fn on_online<F>(connectivity: &dyn Connectivity, mut callback: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    let mut receiver = connectivity.subscribe();
    let mut was_online = *receiver.borrow_and_update();
    tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            let online = *receiver.borrow_and_update();
            if online && !was_online {
                callback();
            }
            was_online = online;
        }
    })
}

/// Connectivity set explicitly by the host platform or by tests.
#[derive(Debug)]
pub struct ManualConnectivity {
    state: watch::Sender<bool>,
}

impl ManualConnectivity {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// Update the state; subscribers are only woken on an actual change
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
    }
}

impl Connectivity for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Periodic `HEAD` probe against the remote REST endpoint.
///
/// Any HTTP response counts as reachable; connect failures and timeouts
/// count as offline.
pub struct HttpProbe {
    url: String,
    api_key: Option<String>,
    interval: Duration,
    client: reqwest::Client,
    state: ManualConnectivity,
}

impl HttpProbe {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("Failed to build HTTP client: {error}")))?;
        Ok(Self {
            url: url.into(),
            api_key,
            interval,
            client,
            // Optimistic until the first probe says otherwise
            state: ManualConnectivity::new(true),
        })
    }

    /// Probe once and publish the result
    pub async fn probe_once(&self) -> bool {
        let mut request = self.client.head(&self.url);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }
        let online = match request.send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Connectivity probe failed: {error}");
                false
            }
        };
        self.state.set_online(online);
        online
    }

    /// Probe forever at the configured interval
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                self.probe_once().await;
                tokio::time::sleep(self.interval).await;
            }
        })
    }
}

impl Connectivity for HttpProbe {
    fn is_online(&self) -> bool {
        self.state.is_online()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
