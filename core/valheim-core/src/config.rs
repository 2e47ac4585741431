//! Monitor configuration.
//!
//! Values resolve in three layers, later ones winning:
//! - built-in defaults
//! - an optional TOML file (`VALHEIM_MONITOR_CONFIG` or `~/.valheim-monitor/config.toml`)
//! - environment variables

use crate::error::{MonitorError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_PATH_ENV: &str = "VALHEIM_MONITOR_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub container: String,
    pub bind_addr: String,
    pub port: u16,
    /// How many historical lines `docker logs --tail` replays on attach.
    pub tail_lines: u32,
    pub raw_keep_lines: usize,
    pub raw_serve_lines: usize,
    pub stale_log_seconds: u64,
    pub pending_ttl_ms: u64,
    pub player_seen_ttl_ms: u64,
    pub attempts_keep: usize,
    pub restart_delay_ms: u64,
    pub probe_timeout_ms: u64,
    pub docker_bin: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            container: "valheim".to_string(),
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            tail_lines: 400,
            raw_keep_lines: 600,
            raw_serve_lines: 400,
            stale_log_seconds: 180,
            pending_ttl_ms: 2 * 60 * 1000,
            player_seen_ttl_ms: 10 * 60 * 1000,
            attempts_keep: 30,
            restart_delay_ms: 1500,
            probe_timeout_ms: 5000,
            docker_bin: "docker".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::try_milliseconds(clamp_i64(self.pending_ttl_ms)).unwrap_or(Duration::MAX)
    }

    pub fn player_seen_ttl(&self) -> Duration {
        Duration::try_milliseconds(clamp_i64(self.player_seen_ttl_ms)).unwrap_or(Duration::MAX)
    }

    pub fn stale_log_window(&self) -> Duration {
        Duration::try_seconds(clamp_i64(self.stale_log_seconds)).unwrap_or(Duration::MAX)
    }

    pub fn restart_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.restart_delay_ms)
    }

    pub fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.probe_timeout_ms)
    }

    /// Applies environment overrides. `lookup` abstracts `std::env::var` so
    /// tests never have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = read("VALHEIM_CONTAINER") {
            self.container = value;
        }
        if let Some(value) = read("BIND_ADDR") {
            self.bind_addr = value;
        }
        if let Some(value) = read("DOCKER_BIN") {
            self.docker_bin = value;
        }
        override_parsed(&read, "PORT", &mut self.port)?;
        override_parsed(&read, "DOCKER_LOG_TAIL", &mut self.tail_lines)?;
        override_parsed(&read, "RAW_KEEP_LINES", &mut self.raw_keep_lines)?;
        override_parsed(&read, "RAW_SERVE_LINES", &mut self.raw_serve_lines)?;
        override_parsed(&read, "STALE_LOG_SECONDS", &mut self.stale_log_seconds)?;
        override_parsed(&read, "PENDING_TTL_MS", &mut self.pending_ttl_ms)?;
        override_parsed(&read, "PLAYER_SEEN_TTL_MS", &mut self.player_seen_ttl_ms)?;
        override_parsed(&read, "ATTEMPTS_KEEP", &mut self.attempts_keep)?;
        override_parsed(&read, "TAIL_RESTART_DELAY_MS", &mut self.restart_delay_ms)?;
        override_parsed(&read, "PROBE_TIMEOUT_MS", &mut self.probe_timeout_ms)?;
        Ok(())
    }
}

fn override_parsed<T, R>(read: &R, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    R: Fn(&str) -> Option<String>,
{
    if let Some(value) = read(key) {
        *target = value.parse().map_err(|_| MonitorError::InvalidSetting {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Returns the monitor's home directory (~/.valheim-monitor).
pub fn monitor_home_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".valheim-monitor"))
}

pub fn default_config_path() -> Option<PathBuf> {
    monitor_home_dir().map(|dir| dir.join("config.toml"))
}

/// Reads the TOML layer. A missing file yields defaults.
pub fn load_config_file(path: &Path) -> Result<MonitorConfig> {
    let content = match fs_err::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(MonitorConfig::default())
        }
        Err(source) => {
            return Err(MonitorError::ConfigRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    toml::from_str::<MonitorConfig>(&content).map_err(|err| MonitorError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

/// Resolves the full configuration: defaults, then file, then environment.
pub fn load_config(path: Option<PathBuf>) -> Result<MonitorConfig> {
    let path = path
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
        .or_else(default_config_path);

    let mut config = match path {
        Some(path) => load_config_file(&path)?,
        None => MonitorConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}
