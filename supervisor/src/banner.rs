//! Port discovery from helper output.
//!
//! A correctly starting helper prints one line of the form
//! `OpenTips running on <host>:<port>` on stdout or stderr. That line is the
//! whole handshake: there is no other way to learn the ephemeral port.
//!
//! Output arrives in arbitrary chunks, so [`PortDiscovery`] accumulates text
//! per stream until a line can be judged; a stderr line never completes a
//! half-written stdout line. Once it has reported an outcome it goes quiet
//! for the rest of the process lifetime, even if the banner is echoed again.

/// Marker preceding `host:port` in the startup banner.
pub const BANNER_MARKER: &str = "OpenTips running on";

/// Unterminated output kept while waiting for a newline.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Which pipe a chunk of helper output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Result of finding the banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Ready { host: String, port: u16 },
    /// Banner found but the port could not be parsed. Not retried.
    Invalid(String),
}

#[derive(Debug)]
pub struct PortDiscovery {
    marker: &'static str,
    stdout: String,
    stderr: String,
    settled: bool,
}

impl Default for PortDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl PortDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self::with_marker(BANNER_MARKER)
    }

    #[must_use]
    pub fn with_marker(marker: &'static str) -> Self {
        Self {
            marker,
            stdout: String::new(),
            stderr: String::new(),
            settled: false,
        }
    }

    /// Whether an outcome has already been reported.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Feed one chunk of output from `stream`. Returns an outcome at most
    /// once per instance, whichever stream carries the banner.
    pub fn feed(&mut self, stream: OutputStream, chunk: &str) -> Option<Discovery> {
        if self.settled {
            return None;
        }
        let marker = self.marker;
        let pending = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        pending.push_str(chunk);

        let mut found = None;
        while let Some(newline) = pending.find('\n') {
            let line: String = pending.drain(..=newline).collect();
            found = scan_line(marker, &line, true);
            if found.is_some() {
                break;
            }
        }

        // A banner without a trailing newline is accepted once its port
        // digits are visibly terminated.
        if found.is_none() {
            found = scan_line(marker, pending.as_str(), false);
        }

        if found.is_none() && pending.len() > MAX_PENDING_BYTES {
            pending.clear();
        }
        found.map(|found| self.settle(found))
    }

    fn settle(&mut self, found: Discovery) -> Discovery {
        self.settled = true;
        self.stdout = String::new();
        self.stderr = String::new();
        found
    }
}

/// Inspect one line. `complete` is false for a fragment that may still grow.
fn scan_line(marker: &str, line: &str, complete: bool) -> Option<Discovery> {
    let start = line.find(marker)? + marker.len();
    let rest = line[start..].trim_start();

    let Some((host, port_text)) = split_host_port(rest) else {
        return complete.then(|| Discovery::Invalid(format!("missing port in banner: {}", rest.trim())));
    };

    let digits_len = port_text
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if !complete && digits_len == port_text.len() {
        return None;
    }

    match port_text[..digits_len].parse::<u16>() {
        Ok(port) if port != 0 => Some(Discovery::Ready {
            host: host.trim().to_string(),
            port,
        }),
        _ => Some(Discovery::Invalid(format!(
            "invalid port number: {}",
            port_text.trim()
        ))),
    }
}

/// `host:port`, or `[v6-host]:port` for IPv6 literals.
fn split_host_port(text: &str) -> Option<(&str, &str)> {
    match text.strip_prefix('[') {
        Some(bracketed) => {
            let (host, after) = bracketed.split_once(']')?;
            Some((host, after.strip_prefix(':')?))
        }
        None => text.split_once(':'),
    }
}
