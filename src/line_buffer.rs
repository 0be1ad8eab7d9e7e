//! Line assembly for HTTP responses.
//!
//! [`LineBuffer`] pulls bytes from a [`ByteSource`] until it sees `\n`,
//! doubling its storage whenever a line does not fit. No maximum line
//! length is enforced. Carriage returns are dropped.

use crate::counters::Counters;
use crate::error::IoFailure;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Something that can fill a byte slice before a deadline.
/// `Ok(0)` means the peer closed the stream.
pub trait ByteSource {
    fn read_some(
        &mut self,
        buf: &mut [u8],
        deadline: Instant,
    ) -> impl Future<Output = Result<usize, IoFailure>> + Send;
}

// Serializes tasks that are stuck retrying an allocation.
fn alloc_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub struct LineBuffer {
    buf: Vec<u8>,
    /// Bytes of `buf` holding data read from the source.
    filled: usize,
    /// Bytes at the front of `buf` that belong to the line already returned.
    consumed: usize,
    eof: bool,
    pause: Duration,
    counters: Arc<Counters>,
}

impl LineBuffer {
    pub fn new(capacity: usize, pause: Duration, counters: Arc<Counters>) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            filled: 0,
            consumed: 0,
            eof: false,
            pause,
            counters,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Forgets buffered bytes so the buffer can serve a new connection.
    /// Capacity gained from earlier lines is kept.
    pub fn clear(&mut self) {
        self.filled = 0;
        self.consumed = 0;
        self.eof = false;
    }

    /// Reads the next line within `timeout`.
    ///
    /// Returns `Ok(None)` at end of stream. A final line without a trailing
    /// `\n` is still returned before the end of stream is reported.
    pub async fn read_line<S: ByteSource>(
        &mut self,
        source: &mut S,
        timeout: Duration,
    ) -> Result<Option<&[u8]>, IoFailure> {
        let deadline = Instant::now() + timeout;

        self.buf.copy_within(self.consumed..self.filled, 0);
        self.filled -= self.consumed;
        self.consumed = 0;

        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..self.filled].iter().position(|&b| b == b'\n') {
                let end = scanned + pos;
                self.consumed = end + 1;
                let len = strip_cr(&mut self.buf[..end]);
                return Ok(Some(&self.buf[..len]));
            }
            scanned = self.filled;

            if self.eof {
                if self.filled == 0 {
                    return Ok(None);
                }
                self.consumed = self.filled;
                let len = strip_cr(&mut self.buf[..self.filled]);
                return Ok(Some(&self.buf[..len]));
            }

            if self.filled == self.buf.len() {
                self.grow().await;
            }

            let n = source.read_some(&mut self.buf[self.filled..], deadline).await?;
            if n == 0 {
                self.eof = true;
            }
            self.filled += n;
        }
    }

    /// Doubles the storage. Allocation failure is treated as transient and
    /// retried until it succeeds.
    async fn grow(&mut self) {
        let additional = self.buf.len();
        if self.buf.try_reserve_exact(additional).is_err() {
            let _guard = alloc_lock().lock().await;
            loop {
                Counters::bump(&self.counters.alloc_retries);
                warn!(bytes = self.buf.len() + additional, "line buffer allocation failed, retrying");
                tokio::time::sleep(self.pause).await;
                if self.buf.try_reserve_exact(additional).is_ok() {
                    break;
                }
            }
        }
        let target = self.buf.len() + additional;
        self.buf.resize(target, 0);
    }
}

/// Removes every `\r` from `line` in place and returns the new length.
fn strip_cr(line: &mut [u8]) -> usize {
    let mut w = 0;
    for r in 0..line.len() {
        if line[r] != b'\r' {
            line[w] = line[r];
            w += 1;
        }
    }
    w
}
