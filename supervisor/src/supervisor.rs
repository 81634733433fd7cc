//! Process supervisor: one helper per folder, restarted with backoff.
//!
//! # State-as-Location
//!
//! A folder is running iff its handle is in `handles`, and waiting to restart
//! iff a timer is in `restarts`. Removing the handle is the death transition:
//! late transitions from a removed handle carry an id that no longer matches
//! and are dropped.
//!
//! The owner drives everything through [`Supervisor::step`], or through
//! [`Supervisor::next_event`] and [`Supervisor::handle`] when it needs to wait
//! on other sources in the same `select!`. All mutation goes through
//! `&mut self`, so `start` and `stop` for a folder can never interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tipsd_types::{ErrorAction, FolderKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::context::LaunchContext;
use crate::launcher;
use crate::process::{HandleEvent, HandleId, ProcessHandle, Transition};

const HANDLE_CHANNEL_CAPACITY: usize = 256;

/// Something the supervisor has to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Transition(HandleEvent),
    /// A restart timer fired. Ignored if the timer was cancelled meanwhile.
    RestartDue { folder: FolderKey, timer: u64 },
}

struct RestartTimer {
    id: u64,
    task: JoinHandle<()>,
}

pub struct Supervisor<C: LaunchContext> {
    context: Arc<C>,
    policy: BackoffPolicy,
    handles: HashMap<FolderKey, ProcessHandle>,
    retry: HashMap<FolderKey, Backoff>,
    restarts: HashMap<FolderKey, RestartTimer>,
    next_id: u64,
    handle_tx: mpsc::Sender<HandleEvent>,
    handle_rx: mpsc::Receiver<HandleEvent>,
    restart_tx: mpsc::UnboundedSender<(FolderKey, u64)>,
    restart_rx: mpsc::UnboundedReceiver<(FolderKey, u64)>,
}

impl<C: LaunchContext> Supervisor<C> {
    #[must_use]
    pub fn new(context: Arc<C>, policy: BackoffPolicy) -> Self {
        let (handle_tx, handle_rx) = mpsc::channel(HANDLE_CHANNEL_CAPACITY);
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        Self {
            context,
            policy,
            handles: HashMap::new(),
            retry: HashMap::new(),
            restarts: HashMap::new(),
            next_id: 1,
            handle_tx,
            handle_rx,
            restart_tx,
            restart_rx,
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Launch a helper for `folder` unless one is already running.
    ///
    /// A pending restart timer is cancelled and the launch happens now.
    pub async fn start(&mut self, folder: FolderKey) {
        if self.handles.contains_key(&folder) {
            tracing::debug!(%folder, "Helper already running");
            return;
        }
        if let Some(timer) = self.restarts.remove(&folder) {
            timer.task.abort();
        }
        self.launch(folder).await;
    }

    /// Kill the folder's helper, cancel its restart, and forget its backoff.
    pub fn stop(&mut self, folder: &FolderKey) {
        if let Some(timer) = self.restarts.remove(folder) {
            timer.task.abort();
        }
        self.retry.remove(folder);

        match self.handles.remove(folder) {
            Some(mut handle) => {
                tracing::info!(%folder, pid = ?handle.pid(), "Stopping helper process");
                handle.kill();
                self.context.on_port_changed(folder, None);
            }
            None => tracing::info!("No helper process for {folder}"),
        }
    }

    /// Stop every folder. Used at shutdown.
    pub fn dispose(&mut self) {
        let mut folders: Vec<FolderKey> = self
            .handles
            .keys()
            .chain(self.restarts.keys())
            .cloned()
            .collect();
        folders.sort();
        folders.dedup();
        for folder in &folders {
            self.stop(folder);
        }
    }

    /// Wait for the next transition or restart deadline. Cancel-safe.
    pub async fn next_event(&mut self) -> SupervisorEvent {
        tokio::select! {
            Some(event) = self.handle_rx.recv() => SupervisorEvent::Transition(event),
            Some((folder, timer)) = self.restart_rx.recv() => {
                SupervisorEvent::RestartDue { folder, timer }
            }
        }
    }

    /// Apply an event obtained from [`Supervisor::next_event`].
    pub async fn handle(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Transition(event) => self.apply(event),
            SupervisorEvent::RestartDue { folder, timer } => {
                if self.restarts.get(&folder).is_some_and(|t| t.id == timer) {
                    self.restarts.remove(&folder);
                    tracing::info!(%folder, "Restarting helper process");
                    self.start(folder).await;
                } else {
                    tracing::debug!(%folder, "Ignoring cancelled restart");
                }
            }
        }
    }

    /// Wait for one event and apply it.
    pub async fn step(&mut self) -> SupervisorEvent {
        let event = self.next_event().await;
        self.handle(event.clone()).await;
        event
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Published endpoint for `folder`.
    #[must_use]
    pub fn port(&self, folder: &FolderKey) -> Option<u16> {
        self.handles.get(folder).and_then(ProcessHandle::port)
    }

    #[must_use]
    pub fn is_running(&self, folder: &FolderKey) -> bool {
        self.handles.contains_key(folder)
    }

    #[must_use]
    pub fn restart_pending(&self, folder: &FolderKey) -> bool {
        self.restarts.contains_key(folder)
    }

    /// Delay the folder's next failure would be retried after.
    #[must_use]
    pub fn next_retry_delay(&self, folder: &FolderKey) -> Option<Duration> {
        self.retry.get(folder).map(Backoff::current)
    }

    pub fn folders(&self) -> impl Iterator<Item = &FolderKey> {
        self.handles.keys()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn allocate_id(&mut self) -> HandleId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn launch(&mut self, folder: FolderKey) {
        let id = self.allocate_id();
        let result =
            launcher::launch(self.context.as_ref(), &folder, id, self.handle_tx.clone()).await;

        match result {
            Ok(handle) => {
                tracing::info!(%folder, pid = ?handle.pid(), "Helper process spawned");
                self.handles.insert(folder, handle);
            }
            Err(error) => {
                tracing::warn!(%folder, code = error.code(), "Helper launch failed: {error}");
                match self.context.on_launch_error(&error) {
                    ErrorAction::Restart => self.schedule_restart(folder),
                    ErrorAction::NoRestart => {
                        tracing::info!(%folder, "Not restarting helper process");
                    }
                }
            }
        }
    }

    fn apply(&mut self, event: HandleEvent) {
        let HandleEvent {
            folder,
            handle: id,
            transition,
        } = event;

        let Some(handle) = self
            .handles
            .get_mut(&folder)
            .filter(|handle| handle.id() == id)
        else {
            tracing::debug!(%folder, handle = id, ?transition, "Ignoring stale transition");
            return;
        };
        handle.observe(&transition);
        // A helper that served for a full backoff cap counts as recovered.
        let stable = handle
            .ready_for()
            .is_some_and(|served| served >= self.policy.max);

        match transition {
            Transition::Ready(port) => {
                self.context.on_port_changed(&folder, Some(port));
            }
            Transition::Failed(reason) => {
                tracing::warn!(%folder, %reason, "Helper process failed");
                if let Some(mut handle) = self.handles.remove(&folder) {
                    handle.kill();
                }
                self.context.on_port_changed(&folder, None);
                self.restart_after_failure(folder, stable);
            }
            Transition::Exited(code) => {
                tracing::warn!(%folder, ?code, "Helper process exited");
                self.handles.remove(&folder);
                self.context.on_port_changed(&folder, None);
                self.restart_after_failure(folder, stable);
            }
            Transition::Killed => {
                tracing::info!(%folder, "Helper process killed");
                self.handles.remove(&folder);
                self.context.on_port_changed(&folder, None);
            }
        }
    }

    fn restart_after_failure(&mut self, folder: FolderKey, stable: bool) {
        if stable && let Some(backoff) = self.retry.get_mut(&folder) {
            tracing::debug!(%folder, "Helper was stable; backoff reset");
            backoff.reset();
        }
        self.schedule_restart(folder);
    }

    fn schedule_restart(&mut self, folder: FolderKey) {
        let policy = &self.policy;
        let delay = self
            .retry
            .entry(folder.clone())
            .or_insert_with(|| Backoff::new(policy.clone()))
            .next_delay();
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(%folder, delay_ms, "Scheduling helper restart");

        let id = self.allocate_id();
        let tx = self.restart_tx.clone();
        let due = folder.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send((due, id));
        });
        if let Some(previous) = self.restarts.insert(folder, RestartTimer { id, task }) {
            previous.task.abort();
        }
    }
}

impl<C: LaunchContext> Drop for Supervisor<C> {
    fn drop(&mut self) {
        for timer in self.restarts.values() {
            timer.task.abort();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{BANNER_SCRIPT, FakeContext};
    use tokio::time::{Instant, timeout};

    const WAIT: Duration = Duration::from_secs(10);

    fn folder() -> FolderKey {
        FolderKey::from("/work/app")
    }

    fn supervisor(context: FakeContext) -> (Supervisor<FakeContext>, Arc<FakeContext>) {
        let context = Arc::new(context);
        (
            Supervisor::new(Arc::clone(&context), BackoffPolicy::default()),
            context,
        )
    }

    async fn next_transition(supervisor: &mut Supervisor<FakeContext>) -> Transition {
        loop {
            match timeout(WAIT, supervisor.step()).await.expect("no event") {
                SupervisorEvent::Transition(event) => return event.transition,
                SupervisorEvent::RestartDue { .. } => {}
            }
        }
    }

    async fn next_restart(supervisor: &mut Supervisor<FakeContext>) -> FolderKey {
        match supervisor.step().await {
            SupervisorEvent::RestartDue { folder, .. } => folder,
            other => panic!("expected restart, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn launch_error_retries_with_growing_delay() {
        let (mut supervisor, context) = supervisor(FakeContext::new().without_runtime());
        let started = Instant::now();

        supervisor.start(folder()).await;
        assert_eq!(context.launch_errors().len(), 1);
        assert!(supervisor.restart_pending(&folder()));
        assert_eq!(
            supervisor.next_retry_delay(&folder()),
            Some(Duration::from_millis(22_500))
        );

        assert_eq!(next_restart(&mut supervisor).await, folder());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16));
        assert_eq!(context.launch_errors().len(), 2);
        assert_eq!(
            supervisor.next_retry_delay(&folder()),
            Some(Duration::from_millis(33_750))
        );

        assert_eq!(next_restart(&mut supervisor).await, folder());
        assert!(started.elapsed() >= Duration::from_millis(37_500));
        assert_eq!(context.launch_errors().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_restart_directive_gives_up() {
        let (mut supervisor, context) =
            supervisor(FakeContext::new().without_credential().refusing_restart());
        supervisor.start(folder()).await;
        assert_eq!(context.launch_errors().len(), 1);
        assert!(!supervisor.restart_pending(&folder()));
        assert!(!supervisor.is_running(&folder()));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_restart() {
        let (mut supervisor, context) = supervisor(FakeContext::new().without_runtime());
        supervisor.start(folder()).await;
        assert!(supervisor.restart_pending(&folder()));

        supervisor.stop(&folder());
        assert!(!supervisor.restart_pending(&folder()));
        assert_eq!(supervisor.next_retry_delay(&folder()), None);

        assert!(timeout(Duration::from_secs(600), supervisor.step()).await.is_err());
        assert_eq!(context.launch_errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_preempts_pending_restart() {
        let (mut supervisor, context) = supervisor(FakeContext::new().without_runtime());
        supervisor.start(folder()).await;
        supervisor.start(folder()).await;
        assert_eq!(context.launch_errors().len(), 2);
        assert_eq!(
            supervisor.next_retry_delay(&folder()),
            Some(Duration::from_millis(33_750))
        );

        // Only the latest timer fires.
        assert_eq!(next_restart(&mut supervisor).await, folder());
        assert_eq!(context.launch_errors().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_per_folder() {
        let (mut supervisor, _context) = supervisor(FakeContext::new().without_runtime());
        let other = FolderKey::from("/work/other");
        supervisor.start(folder()).await;
        supervisor.start(folder()).await;
        supervisor.start(other.clone()).await;
        assert_eq!(
            supervisor.next_retry_delay(&other),
            Some(Duration::from_millis(22_500))
        );
    }

    #[tokio::test]
    async fn ready_publishes_port_and_stop_clears_it() {
        let (mut supervisor, context) = supervisor(FakeContext::new().with_script(BANNER_SCRIPT));
        supervisor.start(folder()).await;
        assert!(supervisor.is_running(&folder()));

        assert_eq!(next_transition(&mut supervisor).await, Transition::Ready(4100));
        assert_eq!(supervisor.port(&folder()), Some(4100));

        supervisor.start(folder()).await;
        assert_eq!(context.spawn_count(), 1);

        supervisor.stop(&folder());
        assert!(!supervisor.is_running(&folder()));
        assert_eq!(
            context.port_changes(),
            vec![(folder(), Some(4100)), (folder(), None)]
        );

        // The killed handle was already removed; its exit changes nothing.
        assert_eq!(next_transition(&mut supervisor).await, Transition::Killed);
        assert_eq!(context.port_changes().len(), 2);
        assert!(!supervisor.restart_pending(&folder()));
    }

    #[tokio::test]
    async fn unexpected_exit_schedules_restart() {
        let (mut supervisor, context) = supervisor(FakeContext::new().with_script("exit 1"));
        supervisor.start(folder()).await;

        assert_eq!(next_transition(&mut supervisor).await, Transition::Exited(Some(1)));
        assert!(!supervisor.is_running(&folder()));
        assert!(supervisor.restart_pending(&folder()));
        assert_eq!(context.port_changes(), vec![(folder(), None)]);

        supervisor.dispose();
        assert!(!supervisor.restart_pending(&folder()));
    }

    fn fast_policy(max: Duration) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(50),
            multiplier: 2.0,
            max,
        }
    }

    #[tokio::test]
    async fn crash_after_ready_keeps_growing_backoff() {
        let context = Arc::new(
            FakeContext::new().with_script("echo 'OpenTips running on 127.0.0.1:4100'; exit 1"),
        );
        let mut supervisor =
            Supervisor::new(Arc::clone(&context), fast_policy(Duration::from_secs(1)));
        supervisor.start(folder()).await;

        for expected_ms in [100, 200, 400] {
            assert_eq!(next_transition(&mut supervisor).await, Transition::Ready(4100));
            // Readiness alone does not forgive earlier failures.
            assert_ne!(
                supervisor.next_retry_delay(&folder()),
                Some(Duration::from_millis(50))
            );
            assert_eq!(next_transition(&mut supervisor).await, Transition::Exited(Some(1)));
            assert_eq!(
                supervisor.next_retry_delay(&folder()),
                Some(Duration::from_millis(expected_ms))
            );
        }
        assert_eq!(context.spawn_count(), 3);
        supervisor.dispose();
    }

    #[tokio::test]
    async fn stable_helper_resets_backoff_on_exit() {
        let context = Arc::new(FakeContext::new().with_script(
            "echo 'OpenTips running on 127.0.0.1:4100'; sleep 0.4; exit 1",
        ));
        let mut supervisor =
            Supervisor::new(Arc::clone(&context), fast_policy(Duration::from_millis(200)));
        supervisor.start(folder()).await;

        for _ in 0..2 {
            assert_eq!(next_transition(&mut supervisor).await, Transition::Ready(4100));
            assert_eq!(next_transition(&mut supervisor).await, Transition::Exited(Some(1)));
            assert_eq!(
                supervisor.next_retry_delay(&folder()),
                Some(Duration::from_millis(100))
            );
        }
        supervisor.dispose();
    }

    #[tokio::test]
    async fn invalid_banner_fails_and_restarts() {
        let (mut supervisor, context) = supervisor(
            FakeContext::new().with_script("echo 'OpenTips running on 127.0.0.1:0'; exec sleep 30"),
        );
        supervisor.start(folder()).await;
        assert!(matches!(
            next_transition(&mut supervisor).await,
            Transition::Failed(_)
        ));
        assert!(!supervisor.is_running(&folder()));
        assert!(supervisor.restart_pending(&folder()));
        assert_eq!(context.port_changes(), vec![(folder(), None)]);
        supervisor.dispose();
    }

    #[tokio::test]
    async fn stop_without_handle_is_a_noop() {
        let (mut supervisor, context) = supervisor(FakeContext::new());
        supervisor.stop(&folder());
        assert!(context.port_changes().is_empty());
    }
}
