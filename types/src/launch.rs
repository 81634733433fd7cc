//! Launch outcomes that the restart policy inspects.

use thiserror::Error;

use crate::FolderKey;

/// Why a helper could not be launched.
///
/// Always returned as a value; the supervisor hands it to the launch
/// context's error policy, which decides whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("no runtime environment found for {folder}")]
    NoRuntimeEnvironment { folder: FolderKey },
    #[error("no credential is set and no alternative capability provider is available")]
    NoCapabilityProvider,
    #[error("failed to spawn helper: {0}")]
    SpawnFailure(String),
}

impl LaunchError {
    /// Stable short name for logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoRuntimeEnvironment { .. } => "no-runtime-environment",
            Self::NoCapabilityProvider => "no-capability-provider",
            Self::SpawnFailure(_) => "spawn-failure",
        }
    }
}

/// Directive returned by the launch-error policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Restart,
    NoRestart,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            LaunchError::NoRuntimeEnvironment {
                folder: FolderKey::from("/work"),
            },
            LaunchError::NoCapabilityProvider,
            LaunchError::SpawnFailure("ENOENT".to_string()),
        ];
        let codes: Vec<_> = errors.iter().map(LaunchError::code).collect();
        assert_eq!(
            codes,
            ["no-runtime-environment", "no-capability-provider", "spawn-failure"]
        );
    }

    #[test]
    fn message_names_folder() {
        let error = LaunchError::NoRuntimeEnvironment {
            folder: FolderKey::from("/work/app"),
        };
        assert_eq!(error.to_string(), "no runtime environment found for /work/app");
    }
}
