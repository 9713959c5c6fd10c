use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::args::LoggerArgs;

pub const LOG_FILE_NAME: &str = "outbound_logger.log";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Answer bounce hooks with a stop verdict so the host does not send its
    /// own bounce notification to the original sender.
    #[serde(
        default,
        deserialize_with = "outbound_helpers::de::deserialize_flag"
    )]
    pub stop_bounce: bool,
    #[serde(
        default = "default_stdout",
        deserialize_with = "outbound_helpers::de::deserialize_flag"
    )]
    pub stdout: bool,
    #[serde(default)]
    pub file: FileSinkConfig,
    #[serde(
        default = "default_note_ttl",
        deserialize_with = "outbound_helpers::de::deserialize_duration"
    )]
    pub note_ttl: Duration,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let args = LoggerArgs::parse(env::args().skip(1))?;
        let config_path = args
            .config_path
            .or_else(resolve_config_path)
            .context(
                "config path not found (OUTBOUND_LOGGER_CONFIG_PATH or outbound-logger.yaml/outbound-logger.yml)",
            )?;

        load_config_yaml(&config_path)
    }

    fn normalize(&mut self) {
        self.listen = trim_owned(self.listen.clone());
        if self.listen.is_empty() {
            self.listen = default_listen();
        }

        self.note_ttl = self.note_ttl.max(Duration::from_secs(60));
        self.max_payload_bytes = self.max_payload_bytes.max(1024);
        self.file.normalize();
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSinkConfig {
    #[serde(
        default,
        deserialize_with = "outbound_helpers::de::deserialize_flag"
    )]
    pub enabled: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// fsync after every record instead of buffering.
    #[serde(
        default,
        deserialize_with = "outbound_helpers::de::deserialize_flag"
    )]
    pub sync: bool,
    #[serde(
        default = "default_flush_interval",
        deserialize_with = "outbound_helpers::de::deserialize_duration"
    )]
    pub flush_interval: Duration,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            sync: false,
            flush_interval: default_flush_interval(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("file sink enabled but `file.dir` is missing")]
    MissingFileDir,
    #[error("file sink directory is not an existing directory: {}", .0.display())]
    InvalidFileDir(PathBuf),
}

impl FileSinkConfig {
    fn normalize(&mut self) {
        self.dir = self.dir.take().filter(|dir| !dir.as_os_str().is_empty());
        self.flush_interval =
            self.flush_interval.max(Duration::from_millis(10));
    }

    /// Checks the directory of an enabled file sink and returns the full
    /// log file path. The directory is never created here.
    pub fn validate(&self) -> Result<PathBuf, ConfigError> {
        let dir = self.dir.as_ref().ok_or(ConfigError::MissingFileDir)?;
        if !dir.is_dir() {
            return Err(ConfigError::InvalidFileDir(dir.clone()));
        }
        Ok(dir.join(LOG_FILE_NAME))
    }
}

pub fn parse_config(raw: &[u8]) -> Result<Config> {
    let mut config: Config = serde_yaml::from_slice(raw)?;
    config.normalize();
    Ok(config)
}

fn load_config_yaml(path: &Path) -> Result<Config> {
    let raw = std::fs::read(path).with_context(|| {
        format!("failed to read config file {}", path.display())
    })?;
    parse_config(&raw).with_context(|| {
        format!("failed to parse YAML config {}", path.display())
    })
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Some(path) = non_empty_env("OUTBOUND_LOGGER_CONFIG_PATH") {
        return Some(PathBuf::from(path));
    }

    let mut dirs = Vec::with_capacity(2);
    if let Some(home) = non_empty_env("HOME") {
        dirs.push(PathBuf::from(home));
    }
    dirs.push(env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    dirs.into_iter()
        .flat_map(|dir| {
            [dir.join("outbound-logger.yaml"), dir.join("outbound-logger.yml")]
        })
        .find(|candidate| candidate.exists())
}

fn default_listen() -> String {
    "127.0.0.1:2148".to_string()
}

fn default_stdout() -> bool {
    true
}

fn default_note_ttl() -> Duration {
    Duration::from_secs(86_400)
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_payload_bytes() -> u64 {
    1024 * 1024
}

fn trim_owned(value: String) -> String {
    value.trim().to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    })
}
