//! Launch context backed by the config file and the process environment.

use std::path::PathBuf;

use serde_json::Value;
use tipsd_config::TipsdConfig;
use tipsd_rpc::{CompletionError, CompletionProvider};
use tipsd_supervisor::LaunchContext;
use tipsd_types::{CompleteRequest, Credential, ErrorAction, FolderKey, LaunchError};
use tokio::sync::mpsc;

/// Callbacks from the supervisor, delivered to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSignal {
    PortChanged(FolderKey, Option<u16>),
    LaunchFailed(LaunchError),
}

pub struct HostContext {
    config: TipsdConfig,
    signals: mpsc::UnboundedSender<HostSignal>,
}

impl HostContext {
    pub fn new(config: TipsdConfig, signals: mpsc::UnboundedSender<HostSignal>) -> Self {
        Self { config, signals }
    }

    fn signal(&self, signal: HostSignal) {
        if self.signals.send(signal).is_err() {
            tracing::debug!("Event loop gone; dropping host signal");
        }
    }
}

impl LaunchContext for HostContext {
    // Looked up on every launch so a runtime installed while running is picked up.
    fn locate_runtime(&self, _folder: &FolderKey) -> Option<PathBuf> {
        self.config.locate_virtualenv()
    }

    async fn credential(&self) -> Option<Credential> {
        self.config.credential()
    }

    async fn alternative_provider_available(&self) -> bool {
        self.config.alternative_provider
    }

    fn on_port_changed(&self, folder: &FolderKey, port: Option<u16>) {
        self.signal(HostSignal::PortChanged(folder.clone(), port));
    }

    fn on_launch_error(&self, error: &LaunchError) -> ErrorAction {
        tracing::warn!(code = error.code(), "{error}");
        self.signal(HostSignal::LaunchFailed(error.clone()));
        ErrorAction::Restart
    }
}

// tipsd carries no language model client. The helper is told so and stops
// waiting instead of timing out.
impl CompletionProvider for HostContext {
    async fn complete(&self, request: &CompleteRequest) -> Result<Option<Value>, CompletionError> {
        tracing::debug!(request_id = %request.request_id, "Declining completion request");
        Err(CompletionError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn context(config: TipsdConfig) -> (HostContext, mpsc::UnboundedReceiver<HostSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (HostContext::new(config, tx), rx)
    }

    #[test]
    fn runtime_comes_from_configured_directory() {
        let dir = TempDir::new().unwrap();
        let (host, _rx) = context(TipsdConfig {
            service_directory: Some(dir.path().to_path_buf()),
            ..TipsdConfig::default()
        });
        let folder = FolderKey::from("/work");
        assert_eq!(host.locate_runtime(&folder), None);

        fs::create_dir(dir.path().join(".venv")).unwrap();
        assert_eq!(host.locate_runtime(&folder), Some(dir.path().join(".venv")));
    }

    #[test]
    fn port_changes_are_forwarded() {
        let (host, mut rx) = context(TipsdConfig::default());
        host.on_port_changed(&FolderKey::from("/work"), Some(4100));
        host.on_port_changed(&FolderKey::from("/work"), None);
        assert_eq!(
            rx.try_recv().unwrap(),
            HostSignal::PortChanged(FolderKey::from("/work"), Some(4100))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            HostSignal::PortChanged(FolderKey::from("/work"), None)
        );
    }

    #[test]
    fn launch_errors_always_restart() {
        let (host, mut rx) = context(TipsdConfig::default());
        let action = host.on_launch_error(&LaunchError::NoCapabilityProvider);
        assert_eq!(action, ErrorAction::Restart);
        assert_eq!(
            rx.try_recv().unwrap(),
            HostSignal::LaunchFailed(LaunchError::NoCapabilityProvider)
        );
    }

    #[tokio::test]
    async fn completions_are_unavailable() {
        let (host, _rx) = context(TipsdConfig::default());
        let request = CompleteRequest {
            request_id: "r1".to_string(),
            directory: "/work".to_string(),
            prompt: "p".to_string(),
            user_message: "u".to_string(),
            temperature: 0.0,
            response_format: None,
        };
        assert_eq!(
            host.complete(&request).await,
            Err(CompletionError::Unavailable)
        );
    }

    #[test]
    fn closed_event_loop_is_tolerated() {
        let (host, rx) = context(TipsdConfig::default());
        drop(rx);
        host.on_port_changed(&FolderKey::from("/work"), Some(1));
    }
}
