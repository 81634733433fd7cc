//! Workspace folder resolution.
//!
//! Folders named on the command line are fixed for the life of the process.
//! Folders listed in the config file are re-read on reload, and the running
//! set is moved to the union of both.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tipsd_types::FolderKey;

/// Canonicalize command-line folders. Any unusable folder is an error.
pub fn resolve_args<I>(args: I) -> Result<Vec<FolderKey>>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut folders: Vec<FolderKey> = Vec::new();
    for path in args {
        let key = canonical_dir(&path)?;
        if !folders.contains(&key) {
            folders.push(key);
        }
    }
    Ok(folders)
}

/// Canonicalize config folders, skipping the ones that cannot be used.
#[must_use]
pub fn resolve_lenient(paths: &[PathBuf]) -> Vec<FolderKey> {
    let mut folders: Vec<FolderKey> = Vec::new();
    for path in paths {
        match canonical_dir(path) {
            Ok(key) if !folders.contains(&key) => folders.push(key),
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping configured folder: {e:#}"),
        }
    }
    folders
}

/// Union of `pinned` and `configured`, falling back to the current directory
/// when both are empty.
pub fn merge(pinned: &[FolderKey], configured: Vec<FolderKey>) -> Result<Vec<FolderKey>> {
    let mut folders = pinned.to_vec();
    for folder in configured {
        if !folders.contains(&folder) {
            folders.push(folder);
        }
    }
    if folders.is_empty() {
        let cwd = env::current_dir().context("cannot determine current directory")?;
        folders.push(canonical_dir(&cwd)?);
    }
    Ok(folders)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FolderDiff {
    pub added: Vec<FolderKey>,
    pub removed: Vec<FolderKey>,
}

impl FolderDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[must_use]
pub fn diff_folders(current: &[FolderKey], desired: &[FolderKey]) -> FolderDiff {
    FolderDiff {
        added: desired
            .iter()
            .filter(|folder| !current.contains(folder))
            .cloned()
            .collect(),
        removed: current
            .iter()
            .filter(|folder| !desired.contains(folder))
            .cloned()
            .collect(),
    }
}

fn canonical_dir(path: &Path) -> Result<FolderKey> {
    let canonical = fs::canonicalize(path)
        .with_context(|| format!("cannot open workspace folder {}", path.display()))?;
    if !canonical.is_dir() {
        anyhow::bail!("not a directory: {}", canonical.display());
    }
    Ok(FolderKey::new(canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn folders_are_canonical_and_unique() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("app");
        fs::create_dir(&nested).unwrap();

        let folders = resolve_args([nested.clone(), dir.path().join("app/../app")]).unwrap();
        assert_eq!(folders, vec![FolderKey::new(fs::canonicalize(&nested).unwrap())]);
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = resolve_args([dir.path().join("missing")]).unwrap_err();
        assert!(err.to_string().contains("cannot open workspace folder"));
    }

    #[test]
    fn files_are_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, "x").unwrap();
        assert!(resolve_args([file]).is_err());
    }

    #[test]
    fn configured_folders_skip_unusable_entries() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, "x").unwrap();

        let folders = resolve_lenient(&[
            dir.path().to_path_buf(),
            dir.path().join("missing"),
            file,
            dir.path().join("."),
        ]);
        assert_eq!(folders, vec![FolderKey::new(fs::canonicalize(dir.path()).unwrap())]);
    }

    #[test]
    fn no_folders_means_current_directory() {
        let folders = merge(&[], Vec::new()).unwrap();
        assert_eq!(
            folders,
            vec![FolderKey::new(fs::canonicalize(env::current_dir().unwrap()).unwrap())]
        );
    }

    #[test]
    fn pinned_folders_come_first() {
        let pinned = [FolderKey::from("/a"), FolderKey::from("/b")];
        let folders = merge(&pinned, vec![FolderKey::from("/b"), FolderKey::from("/c")]).unwrap();
        assert_eq!(
            folders,
            ["/a", "/b", "/c"].map(FolderKey::from).to_vec()
        );
    }

    #[test]
    fn diff_reports_both_directions() {
        let current = ["/a", "/b"].map(FolderKey::from);
        let desired = ["/b", "/c"].map(FolderKey::from);
        let diff = diff_folders(&current, &desired);
        assert_eq!(diff.added, vec![FolderKey::from("/c")]);
        assert_eq!(diff.removed, vec![FolderKey::from("/a")]);
        assert!(diff_folders(&current, &current).is_empty());
    }
}
