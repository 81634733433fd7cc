//! tipsd configuration.
//!
//! Read from `~/.tipsd/config.toml`, or the file named by `TIPSD_CONFIG`.
//! Every field is optional; a missing file means all defaults.

#![allow(clippy::missing_errors_doc)]

mod runtime;

pub use runtime::{VIRTUALENV_DIRS, default_service_directory, find_virtualenv, locate_virtualenv};

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use thiserror::Error;
use tipsd_rpc::{ConnectionSettings, DEFAULT_CHANGE_DELAY};
use tipsd_supervisor::{BackoffPolicy, CREDENTIAL_ENV_VAR, StatusTiming};
use tipsd_types::Credential;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV_VAR: &str = "TIPSD_CONFIG";

const DEFAULT_TIPS_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TipsdConfig {
    /// Directory holding the helper's virtualenv.
    pub service_directory: Option<PathBuf>,
    /// Non-zero: talk to an externally run helper on this port, never spawn.
    pub rpc_port: Option<u16>,
    /// Whether a capability provider other than a direct credential exists.
    #[serde(default)]
    pub alternative_provider: bool,
    /// Extra workspace folders, re-read on reload.
    #[serde(default)]
    pub folders: Vec<PathBuf>,
    pub credentials: Option<Credentials>,
    pub supervisor: Option<SupervisorConfig>,
    pub rpc: Option<RpcConfig>,
    pub status: Option<StatusConfig>,
    pub watch: Option<WatchConfig>,
}

#[derive(Default, Deserialize)]
pub struct Credentials {
    pub anthropic: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("anthropic", &self.anthropic.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SupervisorConfig {
    pub initial_retry_ms: Option<u64>,
    pub retry_multiplier: Option<f64>,
    pub max_retry_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RpcConfig {
    pub timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub tips_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusConfig {
    pub startup_grace_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WatchConfig {
    pub enabled: Option<bool>,
    pub change_delay_ms: Option<u64>,
}

/// Expand `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string; an unclosed `${` is kept.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Pick the credential: configured value first, then the environment.
fn resolve_credential(configured: Option<&str>, from_env: Option<String>) -> Option<Credential> {
    configured
        .map(expand_env_vars)
        .and_then(Credential::new)
        .or_else(|| from_env.and_then(Credential::new))
}

/// `~/.tipsd`, home of the config file and logs.
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tipsd"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    match env::var_os(CONFIG_PATH_ENV_VAR) {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => config_dir().map(|dir| dir.join("config.toml")),
    }
}

impl TipsdConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    /// `Ok(None)` when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Configured external helper port, ignoring zero.
    #[must_use]
    pub fn rpc_port(&self) -> Option<u16> {
        self.rpc_port.filter(|&port| port != 0)
    }

    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        let configured = self
            .credentials
            .as_ref()
            .and_then(|c| c.anthropic.as_deref());
        resolve_credential(configured, env::var(CREDENTIAL_ENV_VAR).ok())
    }

    #[must_use]
    pub fn locate_virtualenv(&self) -> Option<PathBuf> {
        locate_virtualenv(self.service_directory.as_deref())
    }

    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        let defaults = BackoffPolicy::default();
        let Some(cfg) = &self.supervisor else {
            return defaults;
        };
        BackoffPolicy {
            initial: cfg
                .initial_retry_ms
                .map_or(defaults.initial, Duration::from_millis),
            multiplier: cfg.retry_multiplier.unwrap_or(defaults.multiplier),
            max: cfg.max_retry_ms.map_or(defaults.max, Duration::from_millis),
        }
    }

    #[must_use]
    pub fn status_timing(&self) -> StatusTiming {
        let defaults = StatusTiming::default();
        let Some(cfg) = &self.status else {
            return defaults;
        };
        StatusTiming {
            startup_grace: cfg
                .startup_grace_secs
                .map_or(defaults.startup_grace, Duration::from_secs),
            poll_interval: cfg
                .poll_interval_secs
                .map_or(defaults.poll_interval, Duration::from_secs),
        }
    }

    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        let defaults = ConnectionSettings::default();
        let Some(cfg) = &self.rpc else {
            return defaults;
        };
        ConnectionSettings {
            timeout: cfg.timeout_secs.map_or(defaults.timeout, Duration::from_secs),
            poll_interval: cfg
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            ..defaults
        }
    }

    /// Whether file changes are forwarded to the helpers. On by default.
    #[must_use]
    pub fn watch_enabled(&self) -> bool {
        self.watch
            .as_ref()
            .and_then(|watch| watch.enabled)
            .unwrap_or(true)
    }

    #[must_use]
    pub fn change_delay(&self) -> Duration {
        self.watch
            .as_ref()
            .and_then(|watch| watch.change_delay_ms)
            .map_or(DEFAULT_CHANGE_DELAY, Duration::from_millis)
    }

    /// Configured folders with `${VAR}` references expanded.
    #[must_use]
    pub fn folders(&self) -> Vec<PathBuf> {
        self.folders
            .iter()
            .map(|path| PathBuf::from(expand_env_vars(&path.to_string_lossy())))
            .collect()
    }

    #[must_use]
    pub fn tips_limit(&self) -> usize {
        self.rpc
            .as_ref()
            .and_then(|rpc| rpc.tips_limit)
            .unwrap_or(DEFAULT_TIPS_LIMIT)
    }
}
