//! Process handle: owns one spawned helper and reports its transitions.
//!
//! The OS child lives inside a watcher task. The task forwards raw output to
//! the `tipsd::helper_output` tracing target, feeds it to [`PortDiscovery`],
//! and reports [`Transition`]s over a channel. The handle keeps the `killed`
//! flag: it is raised before the kill signal goes out, so the exit that
//! follows is reported as [`Transition::Killed`] rather than as a crash.

use std::fmt;
use std::str;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tipsd_types::FolderKey;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::banner::{Discovery, OutputStream, PortDiscovery};

/// Tracing target for verbatim helper stdout/stderr.
pub const OUTPUT_TARGET: &str = "tipsd::helper_output";

const OUTPUT_CHANNEL_CAPACITY: usize = 64;

const READ_BUFFER_BYTES: usize = 8 * 1024;

const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Distinguishes successive launches for the same folder.
pub type HandleId = u64;

/// Lifecycle transition reported by a handle's watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Ready(u16),
    /// OS-level error, or a banner whose port could not be parsed.
    Failed(String),
    /// The process ended on its own.
    Exited(Option<i32>),
    /// The process ended after a requested kill.
    Killed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEvent {
    pub folder: FolderKey,
    pub handle: HandleId,
    pub transition: Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Ready,
    Failed,
    Exited,
    Killed,
}

impl ProcessState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Exited | Self::Killed)
    }

    /// Terminal states absorb everything; `Ready` is only reachable from `Running`.
    #[must_use]
    pub fn advance(self, transition: &Transition) -> Self {
        if self.is_terminal() {
            return self;
        }
        match transition {
            Transition::Ready(_) if self == Self::Running => Self::Ready,
            Transition::Ready(_) => self,
            Transition::Failed(_) => Self::Failed,
            Transition::Exited(_) => Self::Exited,
            Transition::Killed => Self::Killed,
        }
    }
}

/// How an exit is reported depends only on whether a kill was requested.
#[must_use]
pub fn classify_exit(killed: bool, code: Option<i32>) -> Transition {
    if killed {
        Transition::Killed
    } else {
        Transition::Exited(code)
    }
}

pub struct ProcessHandle {
    folder: FolderKey,
    id: HandleId,
    pid: Option<u32>,
    state: ProcessState,
    port: Option<u16>,
    ready_since: Option<Instant>,
    killed: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("folder", &self.folder)
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("port", &self.port)
            .field("killed", &self.is_killed())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Take ownership of a freshly spawned child and start watching it.
    pub fn watch(
        folder: FolderKey,
        id: HandleId,
        mut child: Child,
        events: mpsc::Sender<HandleEvent>,
    ) -> Self {
        let pid = child.id();
        let killed = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel();

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, OutputStream::Stdout, output_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, OutputStream::Stderr, output_tx));
        }

        // The watcher owns the child; it ends by itself once the exit is reported.
        tokio::spawn(watch_child(
            Watcher {
                folder: folder.clone(),
                id,
                killed: Arc::clone(&killed),
                events,
            },
            child,
            output_rx,
            kill_rx,
        ));

        Self {
            folder,
            id,
            pid,
            state: ProcessState::Running,
            port: None,
            ready_since: None,
            killed,
            kill_tx: Some(kill_tx),
        }
    }

    #[must_use]
    pub fn folder(&self) -> &FolderKey {
        &self.folder
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Discovered port. Set at most once.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// How long the helper has been serving since it reported readiness.
    #[must_use]
    pub fn ready_for(&self) -> Option<Duration> {
        self.ready_since.map(|since| since.elapsed())
    }

    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Request termination. Idempotent.
    pub fn kill(&mut self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Record a transition reported for this handle.
    pub fn observe(&mut self, transition: &Transition) {
        if let Transition::Ready(port) = transition
            && self.port.is_none()
        {
            self.port = Some(*port);
            self.ready_since = Some(Instant::now());
        }
        self.state = self.state.advance(transition);
    }
}

struct Watcher {
    folder: FolderKey,
    id: HandleId,
    killed: Arc<AtomicBool>,
    events: mpsc::Sender<HandleEvent>,
}

impl Watcher {
    async fn report(&self, transition: Transition) {
        let _ = self
            .events
            .send(HandleEvent {
                folder: self.folder.clone(),
                handle: self.id,
                transition,
            })
            .await;
    }

    async fn inspect(&self, discovery: &mut PortDiscovery, stream: OutputStream, chunk: &str) {
        tracing::debug!(
            target: OUTPUT_TARGET,
            folder = %self.folder,
            stream = stream.as_str(),
            "{}",
            chunk.trim_end()
        );
        match discovery.feed(stream, chunk) {
            Some(Discovery::Ready { host, port }) => {
                tracing::info!(folder = %self.folder, %host, port, "Helper process started");
                self.report(Transition::Ready(port)).await;
            }
            Some(Discovery::Invalid(reason)) => {
                tracing::warn!(folder = %self.folder, %reason, "Helper banner unreadable");
                self.report(Transition::Failed(reason)).await;
            }
            None => {}
        }
    }
}

async fn forward_output<R>(
    mut reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<(OutputStream, String)>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    let mut carry = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                carry.extend_from_slice(&buf[..n]);
                let chunk = take_utf8(&mut carry);
                if !chunk.is_empty() && tx.send((stream, chunk)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(stream = stream.as_str(), "Helper output stream error: {e}");
                break;
            }
        }
    }
    if !carry.is_empty() {
        let _ = tx
            .send((stream, String::from_utf8_lossy(&carry).into_owned()))
            .await;
    }
}

/// Decode the complete UTF-8 prefix of `carry`, leaving a character split
/// across reads in place for the next one. Invalid bytes become U+FFFD.
fn take_utf8(carry: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match str::from_utf8(carry) {
            Ok(text) => {
                out.push_str(text);
                carry.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(str::from_utf8(&carry[..valid]).unwrap_or_default());
                match e.error_len() {
                    None => {
                        carry.drain(..valid);
                        return out;
                    }
                    Some(invalid) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        carry.drain(..valid + invalid);
                    }
                }
            }
        }
    }
}

async fn watch_child(
    watcher: Watcher,
    mut child: Child,
    mut output_rx: mpsc::Receiver<(OutputStream, String)>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let mut discovery = PortDiscovery::new();
    let mut kill_requested = false;

    let exit = loop {
        tokio::select! {
            Some((stream, chunk)) = output_rx.recv() => {
                watcher.inspect(&mut discovery, stream, &chunk).await;
            }
            // A dropped handle counts as a kill request.
            _ = &mut kill_rx, if !kill_requested => {
                kill_requested = true;
                watcher.killed.store(true, Ordering::SeqCst);
                if let Err(e) = child.start_kill() {
                    tracing::debug!(folder = %watcher.folder, "Kill signal failed: {e}");
                }
            }
            status = child.wait() => break status,
        }
    };

    // Output written just before exit may still be in flight. Readers stop at
    // EOF; a grandchild holding the pipe open is cut off by the grace period.
    let drain = async {
        while let Some((stream, chunk)) = output_rx.recv().await {
            watcher.inspect(&mut discovery, stream, &chunk).await;
        }
    };
    let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, drain).await;

    let killed = watcher.killed.load(Ordering::SeqCst);
    let transition = match exit {
        Ok(status) => {
            tracing::debug!(target: OUTPUT_TARGET, folder = %watcher.folder, "Helper exited with {status}");
            classify_exit(killed, status.code())
        }
        Err(_) if killed => Transition::Killed,
        Err(e) => Transition::Failed(format!("helper process error: {e}")),
    };
    watcher.report(transition).await;
}
