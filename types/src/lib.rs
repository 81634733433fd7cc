//! Core domain types for tipsd.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod event;
mod launch;
mod tip;

pub use event::{CompleteRequest, HelperEvent, RawEvent, TipDeleted, TipList};
pub use launch::{ErrorAction, LaunchError};
pub use tip::{SUPPORTED_TIP_VERSIONS, Tip, TipId, TipIdError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Folder Key
// ============================================================================

/// Identifier for a workspace root.
///
/// Keys every piece of per-folder state: the helper process, its endpoint,
/// its retry state and its event poller. Callers are expected to hand in a
/// canonical path; the key itself does no filesystem access.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderKey(PathBuf);

impl FolderKey {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for FolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&Path> for FolderKey {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<&str> for FolderKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

// ============================================================================
// Credential
// ============================================================================

/// Language-model credential handed to the helper through its environment.
///
/// Debug output is redacted; the raw value is only reachable through
/// [`Credential::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for blank input so an empty setting counts as "absent".
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<redacted>)")
    }
}
