//! Per-address probe driver.
//!
//! For one address, every [`ProbeSpec`] is tried in order over its own
//! connection: connect, send the request, read the header block and, in
//! range mode, scan the body for the spec's pattern. A failed connect,
//! write or header read ends the run for that address.

use crate::action::ActionRunner;
use crate::counters::Counters;
use crate::error::IoFailure;
use crate::line_buffer::LineBuffer;
use crate::socket::{SocketLimits, TimedSocket};
use crate::types::{EngineConfig, ProbeSpec, ScanMode};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Everything a probe task needs, shared read-only by all tasks.
pub struct ProbeContext {
    pub specs: Arc<[ProbeSpec]>,
    pub config: EngineConfig,
    pub mode: ScanMode,
    pub counters: Arc<Counters>,
    pub action: Arc<dyn ActionRunner>,
    limits: SocketLimits,
}

impl ProbeContext {
    pub fn new(
        specs: Arc<[ProbeSpec]>,
        config: EngineConfig,
        mode: ScanMode,
        counters: Arc<Counters>,
        action: Arc<dyn ActionRunner>,
    ) -> Self {
        let limits = SocketLimits {
            max_sockets: config.max_sockets,
            pause: config.pause,
            counters: counters.clone(),
        };
        Self {
            specs,
            config,
            mode,
            counters,
            action,
            limits,
        }
    }
}

/// Where a probe run stopped early.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Write,
    Headers,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Connect => "connect",
            Phase::Write => "write",
            Phase::Headers => "headers",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Every spec was tried.
    Done,
    /// Spec `spec` failed in `phase`; later specs were skipped.
    Aborted { spec: usize, phase: Phase },
}

/// What the header block of one response showed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeaderVerdict {
    pub success_status: bool,
    pub content_type: bool,
}

impl HeaderVerdict {
    pub fn observe(&mut self, line: &[u8]) {
        if starts_with_ignore_case(line, b"HTTP/1.") {
            if contains(line, b"200") || contains(line, b"302") {
                self.success_status = true;
            }
        } else if starts_with_ignore_case(line, b"Content-Type:") {
            self.content_type = true;
        }
    }

    /// At least one of the two checks passed.
    pub fn is_response(&self) -> bool {
        self.success_status || self.content_type
    }

    /// Both checks passed.
    pub fn is_resource(&self) -> bool {
        self.success_status && self.content_type
    }
}

/// Runs every spec against `address`.
pub async fn probe_address(ctx: &ProbeContext, address: &str) -> ProbeOutcome {
    Counters::bump(&ctx.counters.probes);
    let cfg = &ctx.config;
    let mut lines = LineBuffer::new(cfg.line_capacity, cfg.pause, ctx.counters.clone());

    for (i, spec) in ctx.specs.iter().enumerate() {
        let mut sock = match TimedSocket::open(address, cfg.port, cfg.connect_timeout, &ctx.limits).await {
            Ok(sock) => sock,
            Err(e) => {
                debug!(%address, resource = %spec.resource, error = %e, "connect failed");
                return ProbeOutcome::Aborted { spec: i, phase: Phase::Connect };
            }
        };
        trace!(%address, resource = %spec.resource, "probing");

        lines.clear();
        let result = probe_resource(ctx, address, spec, &mut sock, &mut lines).await;
        sock.close();

        if let Err(phase) = result {
            return ProbeOutcome::Aborted { spec: i, phase };
        }
    }
    ProbeOutcome::Done
}

async fn probe_resource(
    ctx: &ProbeContext,
    address: &str,
    spec: &ProbeSpec,
    sock: &mut TimedSocket,
    lines: &mut LineBuffer,
) -> Result<(), Phase> {
    let cfg = &ctx.config;
    let request = spec.request(address);
    match sock.write(request.as_bytes(), cfg.write_timeout).await {
        Ok(n) if n > 0 => {
            if n < request.len() {
                trace!(%address, written = n, total = request.len(), "short write");
            }
            Counters::bump(&ctx.counters.requests);
        }
        Ok(_) => return Err(Phase::Write),
        Err(e) => {
            debug!(%address, error = %e, "request not sent");
            return Err(Phase::Write);
        }
    }

    let block = match read_headers(sock, lines, cfg).await {
        Ok(b) => b,
        Err(e) => {
            debug!(%address, resource = %spec.resource, error = %e, "header read failed");
            return Err(Phase::Headers);
        }
    };
    let verdict = block.verdict;
    if verdict.is_response() {
        Counters::bump(&ctx.counters.responses);
    }
    if verdict.is_resource() {
        Counters::bump(&ctx.counters.resources);
    }
    if !block.complete {
        debug!(%address, resource = %spec.resource, "connection closed in headers");
        return Err(Phase::Headers);
    }
    if !verdict.is_resource() {
        return Ok(());
    }

    if ctx.mode == ScanMode::Range {
        scan_body(ctx, address, spec, sock, lines).await;
    }
    Ok(())
}

/// A header block as far as it could be read.
struct HeaderBlock {
    verdict: HeaderVerdict,
    /// False when the peer closed before the blank line.
    complete: bool,
}

/// Reads header lines up to the blank line that ends the block, or up to
/// end of stream.
async fn read_headers(
    sock: &mut TimedSocket,
    lines: &mut LineBuffer,
    cfg: &EngineConfig,
) -> Result<HeaderBlock, IoFailure> {
    let mut verdict = HeaderVerdict::default();
    loop {
        match lines.read_line(sock, cfg.read_timeout).await? {
            None => return Ok(HeaderBlock { verdict, complete: false }),
            Some(line) if line.is_empty() => return Ok(HeaderBlock { verdict, complete: true }),
            Some(line) => {
                if starts_with_ignore_case(line, b"HTTP/1.") {
                    debug!(status = %String::from_utf8_lossy(line), "status line");
                }
                verdict.observe(line);
            }
        }
    }
}

/// Scans the body until the peer closes it or goes quiet. A last line cut
/// off by the close is still searched.
async fn scan_body(
    ctx: &ProbeContext,
    address: &str,
    spec: &ProbeSpec,
    sock: &mut TimedSocket,
    lines: &mut LineBuffer,
) {
    let Some(pattern) = spec.pattern.as_deref() else {
        return;
    };
    let mut hits = 0usize;
    loop {
        match lines.read_line(sock, ctx.config.read_timeout).await {
            Ok(Some(line)) => {
                if contains(line, pattern.as_bytes()) {
                    hits += 1;
                }
            }
            Ok(None) => break,
            Err(e) => {
                trace!(%address, error = %e, "body read ended");
                break;
            }
        }
    }
    if hits == 0 {
        return;
    }

    Counters::bump(&ctx.counters.targets);
    info!(%address, resource = %spec.resource, %pattern, hits, "found target");
    if let Some(command) = spec.command.as_deref() {
        ctx.action.run(format!("{command} {address}"));
    }
}

fn starts_with_ignore_case(line: &[u8], prefix: &[u8]) -> bool {
    line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(lines: &[&str]) -> HeaderVerdict {
        let mut v = HeaderVerdict::default();
        for l in lines {
            v.observe(l.as_bytes());
        }
        v
    }

    #[test]
    fn both_checks_make_a_resource() {
        let v = verdict(&["HTTP/1.1 200 OK", "Server: x", "Content-Type: text/html"]);
        assert!(v.is_resource());
        assert!(v.is_response());
    }

    #[test]
    fn redirect_counts_as_success() {
        assert!(verdict(&["HTTP/1.0 302 Found", "content-type: text/plain"]).is_resource());
    }

    #[test]
    fn one_check_alone_is_not_a_resource() {
        let status_only = verdict(&["HTTP/1.1 200 OK", "Server: x"]);
        assert!(status_only.is_response());
        assert!(!status_only.is_resource());

        let type_only = verdict(&["HTTP/1.1 404 Not Found", "Content-Type: text/html"]);
        assert!(type_only.is_response());
        assert!(!type_only.is_resource());
    }

    #[test]
    fn status_code_outside_status_line_is_ignored() {
        let v = verdict(&["X-Code: 200", "Content-Length: 302"]);
        assert!(!v.is_response());
    }

    #[test]
    fn status_prefix_is_case_insensitive() {
        assert!(verdict(&["http/1.1 200 ok"]).success_status);
    }

    #[test]
    fn contains_finds_substrings() {
        assert!(contains(b"<p>SECRET</p>", b"SECRET"));
        assert!(!contains(b"SECRE", b"SECRET"));
        assert!(contains(b"anything", b""));
    }
}
