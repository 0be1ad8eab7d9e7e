use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Settings that may be kept in a TOML file. Every field is optional; the
/// command line overrides whatever is set here.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    pub network: Option<String>,
    pub probes: Option<Vec<String>>,
    pub scale: Option<u32>,
    pub workers: Option<usize>,
    pub max_sockets: Option<usize>,
    pub port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub repeat: Option<u64>,
    pub pacing: Option<bool>,
    pub stats_interval_secs: Option<u64>,
    pub json: Option<bool>,
    pub log_format: Option<LogFormat>,
}

pub fn default_config_path() -> Option<PathBuf> {
    let proj = directories::ProjectDirs::from("org", "massprobe", "massprobe")?;
    Some(proj.config_dir().join("config.toml"))
}

pub fn load_config(path: Option<&Path>) -> io::Result<Option<FileConfig>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let cfg: FileConfig = toml::from_str(&content)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("TOML parse error: {e}")))?;
    Ok(Some(cfg))
}

pub fn save_config(cfg: &FileConfig, path: Option<&Path>) -> io::Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path().ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no default config dir"))?,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let toml_str = toml::to_string_pretty(cfg)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("TOML serialize error: {e}")))?;
    fs::write(&path, toml_str)?;
    Ok(path)
}
