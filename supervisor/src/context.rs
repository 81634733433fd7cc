//! The host's side of a launch: where the runtime lives, which credential to
//! hand over, how to spawn, and where to report endpoint changes.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tipsd_types::{Credential, ErrorAction, FolderKey, LaunchError};
use tokio::process::{Child, Command};

/// Python module the helper is started as.
pub const HELPER_MODULE: &str = "opentips.cli.main";

/// Environment variable the credential is passed through.
pub const CREDENTIAL_ENV_VAR: &str = "ANTHROPIC_API_KEY";

/// Supplied once at startup and shared by the supervisor and the status
/// aggregator. Implementations must not block in the synchronous methods.
pub trait LaunchContext: Send + Sync + 'static {
    /// Virtualenv directory of the helper runtime for `folder`, if installed.
    fn locate_runtime(&self, folder: &FolderKey) -> Option<PathBuf>;

    /// Direct credential, if the user configured one.
    fn credential(&self) -> impl Future<Output = Option<Credential>> + Send;

    /// Whether a capability provider other than a direct credential exists.
    fn alternative_provider_available(&self) -> impl Future<Output = bool> + Send;

    fn spawn(&self, command: &SpawnCommand) -> io::Result<Child> {
        tracing::debug!(?command, "Spawning helper");
        command.to_command().spawn()
    }

    /// Endpoint for `folder` changed; `None` means it is gone.
    fn on_port_changed(&self, folder: &FolderKey, port: Option<u16>);

    /// Decide whether a failed launch should be retried.
    fn on_launch_error(&self, error: &LaunchError) -> ErrorAction;
}

/// Fully resolved helper invocation.
///
/// `Debug` is safe to log: the credential redacts itself.
#[derive(Debug, Clone)]
pub struct SpawnCommand {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: PathBuf,
    env: Vec<(OsString, OsString)>,
    credential: Option<Credential>,
}

impl SpawnCommand {
    /// Build the command that runs the helper module from `venv` inside `folder`.
    #[must_use]
    pub fn for_runtime(venv: &Path, folder: &FolderKey, credential: Option<Credential>) -> Self {
        let program = if cfg!(windows) {
            venv.join("Scripts").join("python.exe")
        } else {
            venv.join("bin").join("python")
        };
        let python_path = venv.join("..");

        Self {
            program,
            args: ["-m", HELPER_MODULE, "-p", "0"]
                .into_iter()
                .map(OsString::from)
                .collect(),
            cwd: folder.as_path().to_path_buf(),
            env: vec![("PYTHONPATH".into(), python_path.into_os_string())],
            credential,
        }
    }

    /// Same environment and working directory, different executable.
    #[must_use]
    pub fn with_program<I, S>(&self, program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Extra environment on top of the inherited one. Excludes the credential.
    #[must_use]
    pub fn env(&self) -> &[(OsString, OsString)] {
        &self.env
    }

    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// The child is killed if the `Child` is dropped.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(credential) = &self.credential {
            cmd.env(CREDENTIAL_ENV_VAR, credential.expose());
        }
        cmd
    }
}
