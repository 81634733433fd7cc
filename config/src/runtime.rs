//! Locating the helper's Python virtualenv.

use std::path::{Path, PathBuf};

/// Virtualenv directory names looked for inside a service directory, in order.
pub const VIRTUALENV_DIRS: [&str; 2] = [".venv", "venv"];

/// First existing virtualenv directory under `service_dir`.
#[must_use]
pub fn find_virtualenv(service_dir: &Path) -> Option<PathBuf> {
    VIRTUALENV_DIRS
        .iter()
        .map(|name| service_dir.join(name))
        .find(|candidate| candidate.is_dir())
}

/// Where the installer puts the helper when no directory is configured.
///
/// The platform data directory (`$XDG_DATA_HOME/opentips` on Linux), or
/// `~/.opentips` when there is none.
#[must_use]
pub fn default_service_directory() -> Option<PathBuf> {
    dirs::data_dir()
        .map(|data| data.join("opentips"))
        .or_else(|| dirs::home_dir().map(|home| home.join(".opentips")))
}

/// Resolve the virtualenv for a configured or default service directory.
///
/// A configured directory is authoritative: if it has no virtualenv the
/// lookup fails rather than falling back to the default location.
#[must_use]
pub fn locate_virtualenv(configured: Option<&Path>) -> Option<PathBuf> {
    match configured {
        Some(dir) => find_virtualenv(dir),
        None => default_service_directory().and_then(|dir| find_virtualenv(&dir)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn prefers_dot_venv() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("venv")).unwrap();
        fs::create_dir(dir.path().join(".venv")).unwrap();
        assert_eq!(find_virtualenv(dir.path()), Some(dir.path().join(".venv")));
    }

    #[test]
    fn falls_back_to_plain_venv() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("venv")).unwrap();
        assert_eq!(find_virtualenv(dir.path()), Some(dir.path().join("venv")));
    }

    #[test]
    fn files_are_not_virtualenvs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".venv"), "").unwrap();
        assert_eq!(find_virtualenv(dir.path()), None);
    }

    #[test]
    fn configured_directory_has_no_fallback() {
        let dir = TempDir::new().unwrap();
        assert_eq!(locate_virtualenv(Some(dir.path())), None);
    }
}
