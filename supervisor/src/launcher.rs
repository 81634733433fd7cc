//! Precondition checks and spawn for one helper launch.

use tipsd_types::{FolderKey, LaunchError};
use tokio::sync::mpsc;

use crate::context::{LaunchContext, SpawnCommand};
use crate::process::{HandleEvent, HandleId, ProcessHandle};

/// Validate preconditions and start a helper for `folder`.
///
/// Checks run in order: runtime environment, then capability provider. The
/// alternative provider is only consulted when no credential is configured.
pub async fn launch<C: LaunchContext>(
    context: &C,
    folder: &FolderKey,
    id: HandleId,
    events: mpsc::Sender<HandleEvent>,
) -> Result<ProcessHandle, LaunchError> {
    let Some(venv) = context.locate_runtime(folder) else {
        return Err(LaunchError::NoRuntimeEnvironment {
            folder: folder.clone(),
        });
    };

    let credential = context.credential().await;
    if credential.is_none() && !context.alternative_provider_available().await {
        return Err(LaunchError::NoCapabilityProvider);
    }

    let command = SpawnCommand::for_runtime(&venv, folder, credential);
    tracing::info!(
        %folder,
        program = %command.program().display(),
        cwd = %command.cwd().display(),
        credential = if command.has_credential() { "set" } else { "not set" },
        "Launching helper process"
    );

    let child = context
        .spawn(&command)
        .map_err(|e| LaunchError::SpawnFailure(e.to_string()))?;
    Ok(ProcessHandle::watch(folder.clone(), id, child, events))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::FakeContext;

    #[tokio::test]
    async fn missing_runtime_is_checked_first() {
        let context = FakeContext::new().without_runtime().without_credential();
        let (tx, _rx) = mpsc::channel(8);
        let err = launch(&context, &FolderKey::from("/work"), 1, tx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "no-runtime-environment");
        assert_eq!(context.spawn_count(), 0);
    }

    #[tokio::test]
    async fn missing_provider_fails_without_spawning() {
        let context = FakeContext::new().without_credential();
        let (tx, _rx) = mpsc::channel(8);
        let err = launch(&context, &FolderKey::from("/work"), 1, tx)
            .await
            .unwrap_err();
        assert_eq!(err, LaunchError::NoCapabilityProvider);
        assert_eq!(context.spawn_count(), 0);
    }

    #[tokio::test]
    async fn alternative_provider_satisfies_precondition() {
        let context = FakeContext::new()
            .without_credential()
            .with_alternative_provider();
        let (tx, _rx) = mpsc::channel(8);
        let handle = launch(&context, &FolderKey::from("/work"), 1, tx).await;
        assert!(handle.is_ok());
        assert_eq!(context.spawn_count(), 1);
        assert!(!context.last_command().unwrap().has_credential());
    }

    #[tokio::test]
    async fn credential_skips_provider_check() {
        let context = FakeContext::new();
        let (tx, _rx) = mpsc::channel(8);
        launch(&context, &FolderKey::from("/work"), 1, tx)
            .await
            .unwrap();
        assert_eq!(context.provider_checks(), 0);
        assert!(context.last_command().unwrap().has_credential());
    }

    #[tokio::test]
    async fn spawn_error_is_reported() {
        let context = FakeContext::new().failing_spawn();
        let (tx, _rx) = mpsc::channel(8);
        let err = launch(&context, &FolderKey::from("/work"), 1, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::SpawnFailure(_)));
    }
}
