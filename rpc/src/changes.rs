//! Debounced `changed` notifications.
//!
//! File changes are collected per folder. Each new change pushes the
//! folder's deadline back by the full delay; when the deadline passes the
//! collected names go out as one batch. A folder whose helper has no
//! endpoint yet keeps its files and waits another delay.

use std::collections::{BTreeSet, HashMap};
use std::future;
use std::time::Duration;

use tipsd_types::FolderKey;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Quiet period after the last change before the helper is told.
pub const DEFAULT_CHANGE_DELAY: Duration = Duration::from_secs(5);

/// Changed files of one folder, ready for [`crate::RpcClient::changed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub folder: FolderKey,
    pub file_names: Vec<String>,
}

struct Deadline {
    id: u64,
    task: JoinHandle<()>,
}

pub struct ChangeNotifier {
    delay: Duration,
    files: HashMap<FolderKey, BTreeSet<String>>,
    deadlines: HashMap<FolderKey, Deadline>,
    next_id: u64,
    due_tx: mpsc::UnboundedSender<(FolderKey, u64)>,
    due_rx: mpsc::UnboundedReceiver<(FolderKey, u64)>,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        Self {
            delay,
            files: HashMap::new(),
            deadlines: HashMap::new(),
            next_id: 1,
            due_tx,
            due_rx,
        }
    }

    /// Record a changed file and restart the folder's quiet period.
    pub fn notify(&mut self, folder: FolderKey, file_name: String) {
        self.files
            .entry(folder.clone())
            .or_default()
            .insert(file_name);
        self.schedule(folder);
    }

    /// Folders with changes not yet handed out.
    pub fn pending(&self) -> impl Iterator<Item = &FolderKey> {
        self.files.keys()
    }

    /// Wait until some folder's quiet period is over. Cancel-safe.
    pub async fn next_due(&mut self) -> FolderKey {
        while let Some((folder, id)) = self.due_rx.recv().await {
            if self.deadlines.get(&folder).is_some_and(|d| d.id == id) {
                self.deadlines.remove(&folder);
                return folder;
            }
        }
        future::pending().await
    }

    /// Hand out the folder's batch, or wait another delay if its helper
    /// cannot be reached yet.
    pub fn release(&mut self, folder: FolderKey, reachable: bool) -> Option<ChangeBatch> {
        if !self.files.contains_key(&folder) {
            return None;
        }
        if !reachable {
            tracing::debug!(%folder, "No helper endpoint; holding file changes");
            self.schedule(folder);
            return None;
        }

        let file_names: Vec<String> = self.files.remove(&folder)?.into_iter().collect();
        tracing::debug!(%folder, count = file_names.len(), "Releasing file changes");
        Some(ChangeBatch { folder, file_names })
    }

    /// Drop everything collected for a folder that is no longer watched.
    pub fn forget(&mut self, folder: &FolderKey) {
        self.files.remove(folder);
        if let Some(deadline) = self.deadlines.remove(folder) {
            deadline.task.abort();
        }
    }

    fn schedule(&mut self, folder: FolderKey) {
        let id = self.next_id;
        self.next_id += 1;

        let delay = self.delay;
        let tx = self.due_tx.clone();
        let due = folder.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send((due, id));
        });
        if let Some(previous) = self.deadlines.insert(folder, Deadline { id, task }) {
            previous.task.abort();
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_DELAY)
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        for deadline in self.deadlines.values() {
            deadline.task.abort();
        }
    }
}
