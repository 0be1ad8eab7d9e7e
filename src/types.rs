use crate::error::{ConfigError, SpecParseError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// One HTTP resource to request from every address, with an optional body
/// pattern and an optional command to run when the pattern is seen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub resource: String,
    pub pattern: Option<String>,
    pub command: Option<String>,
}

impl ProbeSpec {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            pattern: None,
            command: None,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = non_empty(pattern.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = non_empty(command.into());
        self
    }

    /// `GET <resource> HTTP/1.1` addressed to `host`, blank-line terminated.
    pub fn request(&self, host: &str) -> String {
        format!("GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", self.resource, host)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Parses `resource[:pattern[:command]]`. The command keeps any further
/// colons, so `"/x:y:curl http://h:8080/"` is a valid spec.
impl FromStr for ProbeSpec {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let resource = parts.next().unwrap_or_default();
        if resource.is_empty() {
            return Err(SpecParseError::MissingResource);
        }
        if resource.chars().any(char::is_whitespace) {
            return Err(SpecParseError::Whitespace(resource.to_string()));
        }
        let mut spec = ProbeSpec::new(resource);
        if let Some(pattern) = parts.next() {
            spec = spec.with_pattern(pattern);
        }
        if let Some(command) = parts.next() {
            spec = spec.with_command(command);
        }
        Ok(spec)
    }
}

impl Display for ProbeSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.resource)?;
        if let Some(p) = &self.pattern {
            write!(f, " [{}]", p)?;
        }
        Ok(())
    }
}

/// Whether addresses come from a range walk or a single repeated host.
/// Body inspection only happens for ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    Range,
    SingleHost,
}

impl Display for ScanMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanMode::Range => "range",
            ScanMode::SingleHost => "single-host",
        };
        write!(f, "{}", s)
    }
}

pub const DEFAULT_SCALE: u32 = 5;
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_LINE_CAPACITY: usize = 512;
pub const DEFAULT_LAUNCH_RETRIES: u32 = 5;

/// Runtime parameters of the engine. Build with [`EngineConfig::from_scale`]
/// and check with [`EngineConfig::validate`] before use.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Concurrent probe tasks (N).
    pub workers: usize,
    /// Descriptor ceiling (M); sockets numbered at or above it are recycled.
    pub max_sockets: usize,
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Short backoff between socket, allocation and launch retries.
    pub pause: Duration,
    pub launch_retries: u32,
    pub line_capacity: usize,
    /// Sleep `pause` before every admission to cap the submission rate.
    pub pacing: bool,
}

impl EngineConfig {
    /// Derives every limit from one scan-rate knob. Higher scales allow
    /// more sockets and longer timeouts.
    pub fn from_scale(scale: u32) -> Result<Self, ConfigError> {
        if scale > 12 {
            return Err(ConfigError::Scale(scale));
        }
        Ok(Self::scaled(scale))
    }

    fn scaled(scale: u32) -> Self {
        let max_sockets = 2usize << (5 + scale);
        let connect_timeout = Duration::from_micros(2u64 << (10 + scale));
        Self {
            workers: max_sockets,
            max_sockets,
            port: DEFAULT_PORT,
            connect_timeout,
            read_timeout: connect_timeout * 10,
            write_timeout: connect_timeout,
            pause: Duration::from_micros(102_400 / (2u64 << scale)),
            launch_retries: DEFAULT_LAUNCH_RETRIES,
            line_capacity: DEFAULT_LINE_CAPACITY,
            pacing: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool); 6] = [
            ("workers", self.workers == 0),
            ("max_sockets", self.max_sockets == 0),
            ("connect_timeout", self.connect_timeout.is_zero()),
            ("read_timeout", self.read_timeout.is_zero()),
            ("write_timeout", self.write_timeout.is_zero()),
            ("line_capacity", self.line_capacity == 0),
        ];
        match checks.iter().find(|(_, bad)| *bad) {
            Some((key, _)) => Err(ConfigError::Zero { key: *key }),
            None => Ok(()),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::scaled(DEFAULT_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_only() {
        let spec: ProbeSpec = "/index.html".parse().unwrap();
        assert_eq!(spec, ProbeSpec::new("/index.html"));
    }

    #[test]
    fn parses_pattern_and_command_with_colons() {
        let spec: ProbeSpec = "/admin:Welcome:curl http://h:8080/x".parse().unwrap();
        assert_eq!(spec.resource, "/admin");
        assert_eq!(spec.pattern.as_deref(), Some("Welcome"));
        assert_eq!(spec.command.as_deref(), Some("curl http://h:8080/x"));
    }

    #[test]
    fn empty_fields_are_absent() {
        let spec: ProbeSpec = "/::".parse().unwrap();
        assert_eq!(spec.pattern, None);
        assert_eq!(spec.command, None);
    }

    #[test]
    fn rejects_missing_resource() {
        assert_eq!("".parse::<ProbeSpec>(), Err(SpecParseError::MissingResource));
        assert_eq!(":x".parse::<ProbeSpec>(), Err(SpecParseError::MissingResource));
        assert!(matches!("/a b".parse::<ProbeSpec>(), Err(SpecParseError::Whitespace(_))));
    }

    #[test]
    fn request_line_has_host_and_blank_line() {
        let req = ProbeSpec::new("/robots.txt").request("10.0.0.7");
        assert_eq!(req, "GET /robots.txt HTTP/1.1\r\nHost: 10.0.0.7\r\n\r\n");
    }

    #[test]
    fn scale_five_matches_defaults() {
        let cfg = EngineConfig::from_scale(5).unwrap();
        assert_eq!(cfg.max_sockets, 2048);
        assert_eq!(cfg.workers, 2048);
        assert_eq!(cfg.connect_timeout, Duration::from_micros(65_536));
        assert_eq!(cfg.read_timeout, Duration::from_micros(655_360));
        assert_eq!(cfg.pause, Duration::from_micros(1_600));
        let def = EngineConfig::default();
        assert_eq!(def.max_sockets, cfg.max_sockets);
        assert_eq!(def.connect_timeout, cfg.connect_timeout);
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.workers = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::Zero { key: "workers" }));
        assert_eq!(EngineConfig::from_scale(40).unwrap_err(), ConfigError::Scale(40));
    }
}
