//! Hand-off of follow-up commands for matched targets.

use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::{debug, warn};

/// Receives `<command> <address>` lines. Implementations must not block
/// the caller; nothing is awaited or reported back.
pub trait ActionRunner: Send + Sync {
    fn run(&self, command_line: String);
}

/// Runs each command line through `sh -c`. The line is passed verbatim;
/// quoting is the caller's business.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellAction;

impl ActionRunner for ShellAction {
    fn run(&self, command_line: String) {
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .spawn();
        match child {
            Ok(mut child) => {
                debug!(command = %command_line, "action started");
                // Reap in the background so no zombie is left behind.
                tokio::spawn(async move {
                    if let Err(e) = child.wait().await {
                        warn!(error = %e, "action did not complete");
                    }
                });
            }
            Err(e) => warn!(command = %command_line, error = %e, "failed to start action"),
        }
    }
}

/// Discards every command.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAction;

impl ActionRunner for NoAction {
    fn run(&self, _command_line: String) {}
}

/// Keeps command lines in memory; handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingAction {
    lines: Mutex<Vec<String>>,
}

impl RecordingAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl ActionRunner for RecordingAction {
    fn run(&self, command_line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(command_line);
        }
    }
}
