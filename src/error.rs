//! Error types shared by the probing engine.

use std::io;
use thiserror::Error;

/// Why a connection attempt did not reach the connected state.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("connect to {address} timed out")]
    Timeout { address: String },

    #[error("connect to {address} failed: {source}")]
    Refused {
        address: String,
        #[source]
        source: io::Error,
    },
}

impl ConnectError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectError::Timeout { .. })
    }
}

/// Failure of a timed read or write on an established connection.
#[derive(Error, Debug)]
pub enum IoFailure {
    #[error("timed out waiting for the socket")]
    Timeout,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The runtime refused to start a probe task.
#[derive(Error, Debug)]
#[error("failed to launch probe task: {reason}")]
pub struct LaunchError {
    pub reason: String,
}

impl LaunchError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Invalid engine parameters, reported once at startup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },

    #[error("scale {0} is out of range (0..=12)")]
    Scale(u32),

    #[error("max_sockets {max_sockets} is not above the lowest free descriptor {floor}")]
    Ceiling { max_sockets: usize, floor: usize },
}

/// A `resource[:pattern[:command]]` argument that could not be used.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SpecParseError {
    #[error("probe specification has no resource path")]
    MissingResource,

    #[error("resource path {0:?} contains whitespace")]
    Whitespace(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetParseError {
    #[error("invalid network {input:?}: {message}")]
    Invalid { input: String, message: String },
}
