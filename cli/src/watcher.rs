//! Recursive change watching for the supervised folders.
//!
//! Only content modifications are reported; creations, deletions and
//! metadata updates are left to the helper's own scanning.

use std::path::{Component, Path, PathBuf};

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tipsd_types::FolderKey;
use tokio::sync::mpsc;

/// Directories whose churn never concerns the helper.
pub const IGNORED_DIRS: &[&str] = &[".git", "__pycache__", ".venv", "venv", "node_modules"];

pub struct FolderWatcher {
    watcher: RecommendedWatcher,
}

impl FolderWatcher {
    /// Start the backend. Changed paths arrive on the returned receiver.
    pub fn new() -> notify::Result<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if !is_content_change(event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if !is_ignored(&path) {
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(err) => tracing::warn!(%err, "File watcher error"),
            }
        })?;
        Ok((Self { watcher }, rx))
    }

    pub fn watch(&mut self, folder: &FolderKey) {
        match self.watcher.watch(folder.as_path(), RecursiveMode::Recursive) {
            Ok(()) => tracing::debug!(%folder, "Watching folder for changes"),
            Err(err) => tracing::warn!(%folder, %err, "Failed to watch folder"),
        }
    }

    pub fn unwatch(&mut self, folder: &FolderKey) {
        if let Err(err) = self.watcher.unwatch(folder.as_path()) {
            tracing::debug!(%folder, %err, "Failed to unwatch folder");
        }
    }
}

fn is_content_change(kind: EventKind) -> bool {
    matches!(kind, EventKind::Modify(modify) if !matches!(modify, ModifyKind::Metadata(_)))
}

fn is_ignored(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => name
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name)),
        _ => false,
    })
}

/// The innermost supervised folder containing `path`.
pub fn owning_folder<'a, I>(folders: I, path: &Path) -> Option<&'a FolderKey>
where
    I: IntoIterator<Item = &'a FolderKey>,
{
    folders
        .into_iter()
        .filter(|folder| path.starts_with(folder.as_path()))
        .max_by_key(|folder| folder.as_path().components().count())
}
