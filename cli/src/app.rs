//! The host event loop.
//!
//! ```text
//! Supervisor ──HostSignal──► App ──port_changed──► Connections ──FolderEvent──► App
//!                             │                         (pollers)
//!                             ├──port_changed──► StatusAggregator ──StatusNotice──► App
//!                             │
//! FolderWatcher ──path──► App ──notify──► ChangeNotifier ──due──► App ──changed──► helper
//! ```
//!
//! Everything runs on one task. Slow work (tip listing, `changed` calls,
//! completions) is spawned; tip listings report back over a channel.

use std::collections::HashSet;
use std::future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tipsd_config::TipsdConfig;
use tipsd_rpc::{
    ChangeBatch, ChangeNotifier, Connections, FolderEvent, RpcError, answer_completion,
};
use tipsd_supervisor::{StatusAggregator, StatusNotice, Supervisor, SupervisorEvent};
use tipsd_types::{CompleteRequest, FolderKey, HelperEvent, LaunchError, Tip};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::context::{HostContext, HostSignal};
use crate::folders::{diff_folders, merge, resolve_lenient};
use crate::reload::ReloadSignal;
use crate::watcher::{FolderWatcher, owning_folder};

type TipsResult = (FolderKey, Result<Vec<Tip>, RpcError>);

enum Wake {
    Supervisor(SupervisorEvent),
    Signal(HostSignal),
    Tips(TipsResult),
    Helper(Result<FolderEvent, RecvError>),
    Status(Result<StatusNotice, RecvError>),
    FileChanged(PathBuf),
    ChangesDue(FolderKey),
    Reload,
    Shutdown,
}

pub struct App {
    /// Folders from the command line; a reload never removes them.
    pinned: Vec<FolderKey>,
    folders: Vec<FolderKey>,
    context: Arc<HostContext>,
    /// `None` when talking to an externally run helper.
    supervisor: Option<Supervisor<HostContext>>,
    external_port: Option<u16>,
    connections: Connections,
    status: StatusAggregator<HostContext>,
    signals: mpsc::UnboundedReceiver<HostSignal>,
    watcher: Option<FolderWatcher>,
    file_changes: Option<mpsc::UnboundedReceiver<PathBuf>>,
    notifier: ChangeNotifier,
    tips_limit: usize,
    tips_tx: mpsc::UnboundedSender<TipsResult>,
    tips_rx: mpsc::UnboundedReceiver<TipsResult>,
    tips_retrieved: HashSet<FolderKey>,
}

impl App {
    /// Must be called inside the tokio runtime.
    pub fn new(config: TipsdConfig, pinned: Vec<FolderKey>, folders: Vec<FolderKey>) -> Self {
        let external_port = config.rpc_port();
        let policy = config.backoff_policy();
        let timing = config.status_timing();
        let connections = Connections::new(config.connection_settings());
        let tips_limit = config.tips_limit();
        let notifier = ChangeNotifier::new(config.change_delay());

        let (watcher, file_changes) = if config.watch_enabled() {
            match FolderWatcher::new() {
                Ok((watcher, rx)) => (Some(watcher), Some(rx)),
                Err(e) => {
                    tracing::warn!("File watching unavailable: {e}");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let (signal_tx, signals) = mpsc::unbounded_channel();
        let context = Arc::new(HostContext::new(config, signal_tx));
        let supervisor = external_port
            .is_none()
            .then(|| Supervisor::new(Arc::clone(&context), policy));
        let status = StatusAggregator::new(Arc::clone(&context), timing);
        let (tips_tx, tips_rx) = mpsc::unbounded_channel();

        Self {
            pinned,
            folders,
            context,
            supervisor,
            external_port,
            connections,
            status,
            signals,
            watcher,
            file_changes,
            notifier,
            tips_limit,
            tips_tx,
            tips_rx,
            tips_retrieved: HashSet::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut helper_events = self.connections.subscribe();
        let mut notices = self.status.subscribe();
        let mut reload = ReloadSignal::new();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        if let Some(port) = self.external_port {
            tracing::info!(port, "Using externally run helper");
        }
        for folder in self.folders.clone() {
            self.add_folder(folder).await;
        }

        loop {
            let wake = tokio::select! {
                result = &mut shutdown => {
                    if let Err(e) = result {
                        tracing::warn!("Failed to listen for Ctrl-C: {e}");
                    }
                    Wake::Shutdown
                }
                event = next_supervisor_event(self.supervisor.as_mut()) => Wake::Supervisor(event),
                Some(signal) = self.signals.recv() => Wake::Signal(signal),
                Some(tips) = self.tips_rx.recv() => Wake::Tips(tips),
                event = helper_events.recv() => Wake::Helper(event),
                notice = notices.recv() => Wake::Status(notice),
                Some(path) = next_file_change(self.file_changes.as_mut()) => Wake::FileChanged(path),
                folder = self.notifier.next_due() => Wake::ChangesDue(folder),
                () = reload.recv() => Wake::Reload,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Supervisor(event) => {
                    if let Some(supervisor) = self.supervisor.as_mut() {
                        supervisor.handle(event).await;
                    }
                }
                Wake::Signal(signal) => self.on_signal(signal),
                Wake::Tips((folder, result)) => self.on_tips(folder, result),
                Wake::Helper(Ok(event)) => self.on_helper_event(event),
                Wake::Helper(Err(RecvError::Lagged(missed))) => {
                    tracing::warn!(missed, "Helper events dropped; consumer too slow");
                }
                Wake::Helper(Err(RecvError::Closed)) | Wake::Status(Err(RecvError::Closed)) => {
                    break;
                }
                Wake::Status(Ok(notice)) => self.on_status(notice).await,
                Wake::Status(Err(RecvError::Lagged(_))) => {}
                Wake::FileChanged(path) => self.on_file_changed(path),
                Wake::ChangesDue(folder) => self.on_changes_due(folder),
                Wake::Reload => self.reload().await,
            }
        }

        self.shutdown();
        Ok(())
    }

    // ========================================================================
    // Folder set
    // ========================================================================

    async fn add_folder(&mut self, folder: FolderKey) {
        tracing::info!(%folder, "Workspace folder added");
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.watch(&folder);
        }
        if !self.folders.contains(&folder) {
            self.folders.push(folder.clone());
        }

        if let Some(port) = self.external_port {
            self.on_port_changed(folder, Some(port));
        } else if let Some(supervisor) = self.supervisor.as_mut() {
            supervisor.start(folder).await;
        }
    }

    fn remove_folder(&mut self, folder: &FolderKey) {
        tracing::info!(%folder, "Workspace folder removed");
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.unwatch(folder);
        }
        self.folders.retain(|f| f != folder);
        self.notifier.forget(folder);
        self.tips_retrieved.remove(folder);

        match self.supervisor.as_mut() {
            // Stopping publishes the cleared port back through the context.
            Some(supervisor) => supervisor.stop(folder),
            None => self.on_port_changed(folder.clone(), None),
        }
    }

    /// Re-read the config and move to the new folder set. Removed folders
    /// are stopped before added ones start.
    async fn reload(&mut self) {
        tracing::info!("Reloading configuration");
        let config = match TipsdConfig::load() {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(path = %e.path().display(), "{e}; keeping current folders");
                return;
            }
        };
        let desired = match merge(&self.pinned, resolve_lenient(&config.folders())) {
            Ok(desired) => desired,
            Err(e) => {
                tracing::warn!("{e:#}; keeping current folders");
                return;
            }
        };

        let diff = diff_folders(&self.folders, &desired);
        if diff.is_empty() {
            tracing::info!("Workspace folders unchanged");
            return;
        }
        for folder in &diff.removed {
            self.remove_folder(folder);
        }
        for folder in diff.added {
            self.add_folder(folder).await;
        }
    }

    fn shutdown(&mut self) {
        tracing::info!("Shutting down");
        if let Some(supervisor) = self.supervisor.as_mut() {
            supervisor.dispose();
        }
        self.connections.close_all();
        self.status.dispose();
    }

    // ========================================================================
    // Supervisor callbacks
    // ========================================================================

    fn on_signal(&mut self, signal: HostSignal) {
        match signal {
            HostSignal::PortChanged(folder, port) => self.on_port_changed(folder, port),
            HostSignal::LaunchFailed(LaunchError::NoRuntimeEnvironment { folder }) => {
                tracing::info!(
                    %folder,
                    "Helper runtime not installed; set service_directory or install OpenTips"
                );
            }
            HostSignal::LaunchFailed(LaunchError::NoCapabilityProvider) => {
                tracing::info!("No language model available; set ANTHROPIC_API_KEY");
            }
            HostSignal::LaunchFailed(LaunchError::SpawnFailure(_)) => {}
        }
    }

    fn on_port_changed(&mut self, folder: FolderKey, port: Option<u16>) {
        self.connections.port_changed(&folder, port);
        self.status.port_changed(&folder, port);

        if port.is_some() && !self.tips_retrieved.contains(&folder) {
            self.retrieve_initial_tips(folder);
        }
    }

    fn retrieve_initial_tips(&self, folder: FolderKey) {
        let Some(client) = self.connections.client(&folder) else {
            return;
        };
        let limit = self.tips_limit;
        let tx = self.tips_tx.clone();
        tokio::spawn(async move {
            let result = client.list_tips(Some(limit)).await;
            let _ = tx.send((folder, result));
        });
    }

    fn on_tips(&mut self, folder: FolderKey, result: Result<Vec<Tip>, RpcError>) {
        if !self.folders.contains(&folder) {
            return;
        }
        match result {
            Ok(tips) if tips.is_empty() => {
                tracing::debug!(%folder, "No tips yet");
            }
            Ok(tips) => {
                tracing::info!(%folder, count = tips.len(), "Retrieved initial tips");
                for tip in &tips {
                    log_tip(&folder, tip);
                }
                self.tips_retrieved.insert(folder);
            }
            Err(e) => tracing::warn!(%folder, "Failed to list tips: {e}"),
        }
    }

    async fn on_status(&self, notice: StatusNotice) {
        if self.status.is_starting() {
            tracing::info!("Helpers starting");
            return;
        }

        let available = self.status.available_folders().len();
        if available > 0 {
            if notice == StatusNotice::Changed {
                tracing::info!(available, total = self.folders.len(), "Helpers available");
            }
            return;
        }

        let provider = self.status.is_capability_provider_available().await;
        let runtime = self
            .folders
            .first()
            .is_some_and(|folder| self.status.is_runtime_locatable(folder));
        match notice {
            StatusNotice::Changed => tracing::warn!(provider, runtime, "Helpers unavailable"),
            StatusNotice::MayHaveChanged => {
                tracing::debug!(provider, runtime, "Helpers still unavailable");
            }
        }
    }

    // ========================================================================
    // Helper traffic
    // ========================================================================

    fn on_helper_event(&self, event: FolderEvent) {
        log_helper_event(&event);
        if let HelperEvent::Complete(request) = event.event {
            self.answer(event.folder, request);
        }
    }

    fn answer(&self, folder: FolderKey, request: CompleteRequest) {
        let target = completion_target(&self.folders, &folder, &request);
        let Some(client) = self.connections.client(&target) else {
            tracing::warn!(
                folder = %target,
                request_id = %request.request_id,
                "No helper endpoint to answer completion"
            );
            return;
        };
        let provider = Arc::clone(&self.context);
        tokio::spawn(async move {
            match answer_completion(provider.as_ref(), &client, &request).await {
                Ok(sent) => {
                    tracing::debug!(request_id = %request.request_id, sent, "Completion handled");
                }
                Err(e) => tracing::warn!(
                    request_id = %request.request_id,
                    "Failed to send completion response: {e}"
                ),
            }
        });
    }

    fn on_file_changed(&mut self, path: PathBuf) {
        let Some(folder) = owning_folder(&self.folders, &path).cloned() else {
            tracing::debug!(path = %path.display(), "Change outside workspace folders");
            return;
        };
        self.notifier
            .notify(folder, path.to_string_lossy().into_owned());
    }

    fn on_changes_due(&mut self, folder: FolderKey) {
        let client = self.connections.client(&folder);
        let Some(ChangeBatch { folder, file_names }) =
            self.notifier.release(folder, client.is_some())
        else {
            return;
        };
        let Some(client) = client else {
            return;
        };
        tracing::info!(%folder, count = file_names.len(), "Sending file change notification");
        tokio::spawn(async move {
            if let Err(e) = client.changed(&file_names).await {
                tracing::warn!(%folder, "Failed to notify helper of changes: {e}");
            }
        });
    }
}

/// Helper that asked for the completion: the folder named in the request
/// when it is supervised, otherwise the folder whose poller delivered it.
fn completion_target(
    folders: &[FolderKey],
    polled: &FolderKey,
    request: &CompleteRequest,
) -> FolderKey {
    let named = FolderKey::from(request.directory.as_str());
    if folders.contains(&named) {
        named
    } else {
        polled.clone()
    }
}

async fn next_supervisor_event(supervisor: Option<&mut Supervisor<HostContext>>) -> SupervisorEvent {
    match supervisor {
        Some(supervisor) => supervisor.next_event().await,
        None => future::pending().await,
    }
}

async fn next_file_change(rx: Option<&mut mpsc::UnboundedReceiver<PathBuf>>) -> Option<PathBuf> {
    match rx {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

fn log_tip(folder: &FolderKey, tip: &Tip) {
    tracing::info!(
        %folder,
        file = %tip.file,
        line = tip.line,
        priority = %tip.priority,
        "{}",
        tip.label
    );
}

fn log_helper_event(event: &FolderEvent) {
    let folder = &event.folder;
    match &event.event {
        HelperEvent::Tips(list) => {
            if let Some(error) = &list.error {
                tracing::warn!(%folder, "Helper reported an error while suggesting tips: {error}");
            }
            tracing::info!(%folder, count = list.tips.len(), "New tips");
            for tip in &list.tips {
                log_tip(folder, tip);
            }
        }
        HelperEvent::TipDeleted(deleted) => {
            tracing::info!(%folder, tip_id = %deleted.tip_id, reason = %deleted.reason, "Tip deleted");
        }
        HelperEvent::Complete(request) => {
            tracing::info!(%folder, request_id = %request.request_id, "Helper requested a completion");
        }
        HelperEvent::Other { kind, .. } => {
            tracing::debug!(%folder, %kind, "Unhandled helper event");
        }
    }
}
