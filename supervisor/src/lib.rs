//! Helper-process supervision for tipsd.
//!
//! One helper per workspace folder: launched by [`launch`], watched by a
//! [`ProcessHandle`], restarted with per-folder [`Backoff`] by the
//! [`Supervisor`], and summarised by the [`StatusAggregator`].

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod backoff;
mod banner;
mod context;
mod launcher;
mod process;
mod status;
mod supervisor;

#[cfg(all(test, unix))]
mod testing;

pub use backoff::{Backoff, BackoffPolicy};
pub use banner::{BANNER_MARKER, Discovery, OutputStream, PortDiscovery};
pub use context::{CREDENTIAL_ENV_VAR, HELPER_MODULE, LaunchContext, SpawnCommand};
pub use launcher::launch;
pub use process::{
    HandleEvent, HandleId, OUTPUT_TARGET, ProcessHandle, ProcessState, Transition, classify_exit,
};
pub use status::{StatusAggregator, StatusNotice, StatusTiming};
pub use supervisor::{Supervisor, SupervisorEvent};
