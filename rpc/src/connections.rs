//! Per-folder endpoint table.
//!
//! Holds each folder's current port and the one event poller attached to it.
//! A port change always closes the old poller before a new one is spawned,
//! so a folder never has two polling loops.

use std::collections::HashMap;
use std::time::Duration;

use tipsd_types::FolderKey;
use tokio::sync::broadcast;

use crate::client::DEFAULT_TIMEOUT;
use crate::poller::{DEFAULT_POLL_INTERVAL, EventPoller, FolderEvent};
use crate::RpcClient;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub struct Connections {
    settings: ConnectionSettings,
    endpoints: HashMap<FolderKey, u16>,
    pollers: HashMap<FolderKey, EventPoller>,
    events: broadcast::Sender<FolderEvent>,
}

impl Connections {
    #[must_use]
    pub fn new(settings: ConnectionSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            endpoints: HashMap::new(),
            pollers: HashMap::new(),
            events,
        }
    }

    /// Apply a folder's endpoint change. Must run inside a tokio runtime.
    pub fn port_changed(&mut self, folder: &FolderKey, port: Option<u16>) {
        if self.endpoints.get(folder).copied() == port {
            return;
        }

        if let Some(poller) = self.pollers.remove(folder) {
            poller.close();
        }

        match port {
            Some(port) => {
                tracing::info!(%folder, port, "Helper endpoint available");
                self.endpoints.insert(folder.clone(), port);
                let poller = EventPoller::spawn(
                    folder.clone(),
                    self.client_for(port),
                    self.settings.poll_interval,
                    self.events.clone(),
                );
                self.pollers.insert(folder.clone(), poller);
            }
            None => {
                tracing::info!(%folder, "Helper endpoint gone");
                self.endpoints.remove(folder);
            }
        }
    }

    /// Client for the folder's current endpoint; `None` means not ready yet.
    #[must_use]
    pub fn client(&self, folder: &FolderKey) -> Option<RpcClient> {
        self.endpoints
            .get(folder)
            .map(|&port| self.client_for(port))
    }

    #[must_use]
    pub fn port(&self, folder: &FolderKey) -> Option<u16> {
        self.endpoints.get(folder).copied()
    }

    #[must_use]
    pub fn is_polling(&self, folder: &FolderKey) -> bool {
        self.pollers.contains_key(folder)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FolderEvent> {
        self.events.subscribe()
    }

    /// Close every poller. Endpoints are kept.
    pub fn close_all(&mut self) {
        for (_, poller) in self.pollers.drain() {
            poller.close();
        }
    }

    fn client_for(&self, port: u16) -> RpcClient {
        RpcClient::with_host(&self.settings.host, port).with_timeout(self.settings.timeout)
    }
}
