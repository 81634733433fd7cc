//! Transport to a running tips helper.
//!
//! [`RpcClient`] makes JSON-RPC calls over HTTP. [`EventPoller`] drains the
//! helper's event queue on a fixed interval. [`Connections`] ties both to
//! the per-folder endpoint published by the supervisor. [`ChangeNotifier`]
//! debounces file-change notifications and [`answer_completion`] answers the
//! helper's completion requests.

#![allow(clippy::missing_errors_doc)]

mod changes;
mod client;
mod completion;
mod connections;
mod migrate;
mod poller;
mod protocol;

pub use changes::{ChangeBatch, ChangeNotifier, DEFAULT_CHANGE_DELAY};
pub use client::{DEFAULT_TIMEOUT, RpcClient, RpcError};
pub use completion::{CompletionError, CompletionProvider, answer_completion};
pub use connections::{ConnectionSettings, Connections};
pub use migrate::{DEFAULT_PRIORITY, patch_tip, patch_tips};
pub use poller::{DEFAULT_POLL_INTERVAL, EventPoller, FolderEvent};
