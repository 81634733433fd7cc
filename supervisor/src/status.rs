//! Aggregate helper availability across folders.
//!
//! Starts in a `starting` state so a presentation layer can say "starting"
//! instead of "unavailable" while the first helper boots. After the grace
//! period the aggregator settles and emits [`StatusNotice::MayHaveChanged`]
//! on a slow interval, because provider availability can change without any
//! port event.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tipsd_types::FolderKey;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::context::LaunchContext;

const NOTICE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTiming {
    pub startup_grace: Duration,
    pub poll_interval: Duration,
}

impl Default for StatusTiming {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusNotice {
    /// The aggregate availability flipped, or the startup grace ended.
    Changed,
    /// Slow-poll tick; re-check whatever is displayed.
    MayHaveChanged,
}

#[derive(Debug, Default)]
struct StatusState {
    ports: BTreeMap<FolderKey, u16>,
    starting: bool,
}

fn lock(state: &Mutex<StatusState>) -> MutexGuard<'_, StatusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct StatusAggregator<C: LaunchContext> {
    context: Arc<C>,
    state: Arc<Mutex<StatusState>>,
    notices: broadcast::Sender<StatusNotice>,
    timer: JoinHandle<()>,
}

impl<C: LaunchContext> StatusAggregator<C> {
    /// Must be called inside a tokio runtime; the grace timer starts immediately.
    #[must_use]
    pub fn new(context: Arc<C>, timing: StatusTiming) -> Self {
        let state = Arc::new(Mutex::new(StatusState {
            ports: BTreeMap::new(),
            starting: true,
        }));
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let timer = tokio::spawn(run_timer(Arc::clone(&state), notices.clone(), timing));
        Self {
            context,
            state,
            notices,
            timer,
        }
    }

    /// Record a folder's endpoint change.
    pub fn port_changed(&self, folder: &FolderKey, port: Option<u16>) {
        let flipped = {
            let mut state = lock(&self.state);
            let before = !state.ports.is_empty();
            match port {
                Some(port) => state.ports.insert(folder.clone(), port),
                None => state.ports.remove(folder),
            };
            before != !state.ports.is_empty()
        };
        if flipped {
            tracing::debug!(available = self.is_service_available(), "Service availability changed");
            let _ = self.notices.send(StatusNotice::Changed);
        }
    }

    /// In the startup grace period with no endpoint yet.
    #[must_use]
    pub fn is_starting(&self) -> bool {
        let state = lock(&self.state);
        state.starting && state.ports.is_empty()
    }

    /// At least one folder has a published endpoint.
    #[must_use]
    pub fn is_service_available(&self) -> bool {
        !lock(&self.state).ports.is_empty()
    }

    #[must_use]
    pub fn available_folders(&self) -> Vec<(FolderKey, u16)> {
        lock(&self.state)
            .ports
            .iter()
            .map(|(folder, port)| (folder.clone(), *port))
            .collect()
    }

    #[must_use]
    pub fn is_runtime_locatable(&self, folder: &FolderKey) -> bool {
        self.context.locate_runtime(folder).is_some()
    }

    pub async fn is_capability_provider_available(&self) -> bool {
        self.context.credential().await.is_some()
            || self.context.alternative_provider_available().await
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusNotice> {
        self.notices.subscribe()
    }

    /// Stop the grace timer and slow poll.
    pub fn dispose(&self) {
        self.timer.abort();
    }
}

impl<C: LaunchContext> Drop for StatusAggregator<C> {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

async fn run_timer(
    state: Arc<Mutex<StatusState>>,
    notices: broadcast::Sender<StatusNotice>,
    timing: StatusTiming,
) {
    tokio::time::sleep(timing.startup_grace).await;
    lock(&state).starting = false;
    let _ = notices.send(StatusNotice::Changed);

    if timing.poll_interval.is_zero() {
        return;
    }
    let mut ticker =
        tokio::time::interval_at(Instant::now() + timing.poll_interval, timing.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let _ = notices.send(StatusNotice::MayHaveChanged);
    }
}
