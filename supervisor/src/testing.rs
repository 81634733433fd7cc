//! Scripted launch context shared by the crate's tests.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tipsd_types::{Credential, ErrorAction, FolderKey, LaunchError};
use tokio::process::Child;

use crate::context::{LaunchContext, SpawnCommand};

pub(crate) const BANNER_SCRIPT: &str = "echo 'OpenTips running on 127.0.0.1:4100'; exec sleep 30";

/// Runs `/bin/sh -c <script>` in place of the helper interpreter.
pub(crate) struct FakeContext {
    runtime: Option<PathBuf>,
    credential: Option<Credential>,
    alternative: bool,
    fail_spawn: bool,
    script: String,
    action: ErrorAction,
    spawns: AtomicUsize,
    provider_checks: AtomicUsize,
    last_command: Mutex<Option<SpawnCommand>>,
    port_changes: Mutex<Vec<(FolderKey, Option<u16>)>>,
    launch_errors: Mutex<Vec<LaunchError>>,
}

impl FakeContext {
    pub(crate) fn new() -> Self {
        Self {
            runtime: Some(PathBuf::from("/opt/opentips/.venv")),
            credential: Credential::new("sk-ant-test"),
            alternative: false,
            fail_spawn: false,
            script: "exec sleep 30".to_string(),
            action: ErrorAction::Restart,
            spawns: AtomicUsize::new(0),
            provider_checks: AtomicUsize::new(0),
            last_command: Mutex::new(None),
            port_changes: Mutex::new(Vec::new()),
            launch_errors: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn without_runtime(mut self) -> Self {
        self.runtime = None;
        self
    }

    pub(crate) fn without_credential(mut self) -> Self {
        self.credential = None;
        self
    }

    pub(crate) fn with_alternative_provider(mut self) -> Self {
        self.alternative = true;
        self
    }

    pub(crate) fn failing_spawn(mut self) -> Self {
        self.fail_spawn = true;
        self
    }

    pub(crate) fn refusing_restart(mut self) -> Self {
        self.action = ErrorAction::NoRestart;
        self
    }

    pub(crate) fn with_script(mut self, script: &str) -> Self {
        self.script = script.to_string();
        self
    }

    pub(crate) fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub(crate) fn provider_checks(&self) -> usize {
        self.provider_checks.load(Ordering::SeqCst)
    }

    pub(crate) fn last_command(&self) -> Option<SpawnCommand> {
        self.last_command.lock().unwrap().clone()
    }

    pub(crate) fn port_changes(&self) -> Vec<(FolderKey, Option<u16>)> {
        self.port_changes.lock().unwrap().clone()
    }

    pub(crate) fn launch_errors(&self) -> Vec<LaunchError> {
        self.launch_errors.lock().unwrap().clone()
    }
}

impl LaunchContext for FakeContext {
    fn locate_runtime(&self, _folder: &FolderKey) -> Option<PathBuf> {
        self.runtime.clone()
    }

    async fn credential(&self) -> Option<Credential> {
        self.credential.clone()
    }

    async fn alternative_provider_available(&self) -> bool {
        self.provider_checks.fetch_add(1, Ordering::SeqCst);
        self.alternative
    }

    fn spawn(&self, command: &SpawnCommand) -> io::Result<Child> {
        *self.last_command.lock().unwrap() = Some(command.clone());
        if self.fail_spawn {
            return Err(io::Error::new(io::ErrorKind::NotFound, "python not found"));
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);
        command
            .with_program("/bin/sh", ["-c", self.script.as_str()])
            .to_command()
            .current_dir("/")
            .spawn()
    }

    fn on_port_changed(&self, folder: &FolderKey, port: Option<u16>) {
        self.port_changes.lock().unwrap().push((folder.clone(), port));
    }

    fn on_launch_error(&self, error: &LaunchError) -> ErrorAction {
        self.launch_errors.lock().unwrap().push(error.clone());
        self.action
    }
}
