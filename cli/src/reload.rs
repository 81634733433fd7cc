//! Reload requests. SIGHUP on unix; never fires elsewhere.

use std::future;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

#[cfg(unix)]
pub struct ReloadSignal(Option<Signal>);

#[cfg(unix)]
impl ReloadSignal {
    pub fn new() -> Self {
        match signal(SignalKind::hangup()) {
            Ok(hangup) => Self(Some(hangup)),
            Err(e) => {
                tracing::warn!("Failed to listen for SIGHUP; reload disabled: {e}");
                Self(None)
            }
        }
    }

    /// Wait for the next reload request. Cancel-safe.
    pub async fn recv(&mut self) {
        if let Some(hangup) = self.0.as_mut() {
            if hangup.recv().await.is_some() {
                return;
            }
            self.0 = None;
        }
        future::pending().await
    }
}

#[cfg(not(unix))]
pub struct ReloadSignal;

#[cfg(not(unix))]
impl ReloadSignal {
    pub fn new() -> Self {
        Self
    }

    pub async fn recv(&mut self) {
        future::pending().await
    }
}
