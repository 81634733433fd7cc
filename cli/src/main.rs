//! tipsd - keeps one OpenTips helper running per workspace folder.
//!
//! ```text
//! tipsd [FOLDER...]
//! ```
//!
//! Folders given here are supervised until exit. Folders listed under
//! `folders` in the config file are added too, and are re-read on SIGHUP.
//! With neither, the current directory is used. Configuration is read from
//! `~/.tipsd/config.toml` (or `$TIPSD_CONFIG`); see [`tipsd_config`].

mod app;
mod context;
mod folders;
mod reload;
mod watcher;

use anyhow::Result;
use std::{
    env,
    ffi::OsString,
    fs::{self, OpenOptions},
    io,
    path::PathBuf,
    sync::Mutex,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tipsd_config::TipsdConfig;

use crate::app::App;

const USAGE: &str = "usage: tipsd [FOLDER...]";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    // ~/.tipsd/logs/tipsd.log
    let Some(candidate) = tipsd_config::config_dir().map(|dir| dir.join("logs").join("tipsd.log"))
    else {
        return (None, warnings);
    };

    if let Some(parent) = candidate.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warnings.push(format!(
            "Failed to create log dir {}: {e}",
            parent.display()
        ));
        return (None, warnings);
    }

    match OpenOptions::new().create(true).append(true).open(&candidate) {
        Ok(file) => (Some((candidate, file)), warnings),
        Err(e) => {
            warnings.push(format!(
                "Failed to open log file {}: {e}",
                candidate.display()
            ));
            (None, warnings)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<OsString> = env::args_os().skip(1).collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        println!("{USAGE}");
        return Ok(());
    }

    init_tracing();

    let config = match TipsdConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(path = %e.path().display(), "{e}; using defaults");
            TipsdConfig::default()
        }
    };
    let pinned = folders::resolve_args(args.into_iter().map(PathBuf::from))?;
    let configured = folders::resolve_lenient(&config.folders());
    let folders = folders::merge(&pinned, configured)?;
    tracing::info!(count = folders.len(), "Supervising workspace folders");

    App::new(config, pinned, folders).run().await
}
