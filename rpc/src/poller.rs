//! Event polling loop for one endpoint.
//!
//! The next poll is scheduled only after the previous one has finished, so a
//! slow helper never sees overlapping `poll_events` calls. Closing stops the
//! loop; a poll already in flight finishes but its events are dropped.

use std::time::Duration;

use tipsd_types::{FolderKey, HelperEvent};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::RpcClient;

/// Interval between the end of one poll and the start of the next.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// An event together with the folder whose helper produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderEvent {
    pub folder: FolderKey,
    pub event: HelperEvent,
}

pub struct EventPoller {
    folder: FolderKey,
    closed: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EventPoller {
    #[must_use]
    pub fn spawn(
        folder: FolderKey,
        client: RpcClient,
        interval: Duration,
        events: broadcast::Sender<FolderEvent>,
    ) -> Self {
        tracing::info!(%folder, url = client.url(), "Polling helper for events");
        let (closed, closed_rx) = watch::channel(false);
        let task = tokio::spawn(run(folder.clone(), client, interval, events, closed_rx));
        Self {
            folder,
            closed,
            task,
        }
    }

    #[must_use]
    pub fn folder(&self) -> &FolderKey {
        &self.folder
    }

    /// Stop future polls. Idempotent.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::debug!(folder = %self.folder, "Event poller closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// True once the polling task has returned after [`EventPoller::close`].
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for EventPoller {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(
    folder: FolderKey,
    client: RpcClient,
    interval: Duration,
    events: broadcast::Sender<FolderEvent>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = closed.changed() => break,
        }

        let result = client.poll_events().await;
        if *closed.borrow() {
            break;
        }

        match result {
            Ok(batch) => {
                for event in batch {
                    tracing::debug!(%folder, kind = event.kind(), "Received helper event");
                    let _ = events.send(FolderEvent {
                        folder: folder.clone(),
                        event,
                    });
                }
            }
            Err(e) => tracing::warn!(%folder, "Error polling for events: {e}"),
        }
    }
}
