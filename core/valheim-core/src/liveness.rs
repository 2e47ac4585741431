//! Container and server-process liveness facts.
//!
//! The aggregator only needs a handful of booleans and a start time. They come
//! from a [`ContainerProbe`]; [`DockerProbe`] shells out to the docker CLI.
//! Every probe failure (missing binary, non-zero exit, timeout, bad JSON) is
//! reported as an absent fact, never as an error to the caller.

use crate::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

const PGREP_SCRIPT: &str = "pgrep -af 'valheim_server\\.exe' || true";
const PS_SCRIPT: &str = "ps aux | grep -i 'valheim_server\\.exe' | grep -v grep || true";

pub trait ContainerProbe: Send + Sync {
    /// `None` when the container does not exist or cannot be inspected.
    fn inspect(&self, container: &str) -> Option<ContainerState>;

    fn server_process_running(&self, container: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub restarting: bool,
    pub status: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerStateJson {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    restarting: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    started_at: Option<String>,
}

/// Parses `docker inspect --format '{{json .State}}'` output.
pub fn parse_container_state(json: &str) -> Result<ContainerState> {
    let raw: DockerStateJson =
        serde_json::from_str(json.trim()).map_err(|source| MonitorError::Json {
            context: "docker inspect state".to_string(),
            source,
        })?;

    Ok(ContainerState {
        running: raw.running,
        restarting: raw.restarting,
        status: raw
            .status
            .map(|status| status.trim().to_string())
            .filter(|status| !status.is_empty()),
        started_at: raw.started_at.as_deref().and_then(parse_started_at),
    })
}

/// Docker reports `0001-01-01T00:00:00Z` for containers that never started.
fn parse_started_at(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
        .filter(|parsed| parsed.timestamp() > 0)
}

#[derive(Debug, Clone)]
pub struct DockerProbe {
    docker_bin: String,
    timeout: Duration,
}

impl DockerProbe {
    pub fn new(docker_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            timeout,
        }
    }

    fn exec_script(&self, container: &str, script: &str) -> Result<String> {
        run_command_with_timeout(
            &self.docker_bin,
            &["exec", "-i", container, "sh", "-lc", script],
            self.timeout,
        )
    }
}

impl ContainerProbe for DockerProbe {
    fn inspect(&self, container: &str) -> Option<ContainerState> {
        let output = run_command_with_timeout(
            &self.docker_bin,
            &["inspect", container, "--format", "{{json .State}}"],
            self.timeout,
        );

        match output.and_then(|stdout| parse_container_state(&stdout)) {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::debug!(error = %err, container = %container, "Container inspect failed");
                None
            }
        }
    }

    fn server_process_running(&self, container: &str) -> bool {
        for script in [PGREP_SCRIPT, PS_SCRIPT] {
            match self.exec_script(container, script) {
                Ok(stdout) if !stdout.trim().is_empty() => return true,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(error = %err, container = %container, "Process probe failed");
                }
            }
        }
        false
    }
}

/// Runs a command to completion, killing it once `timeout` elapses.
/// Returns stdout on a zero exit status. Reading stdout shares the same
/// deadline, so a grandchild holding the pipe open cannot stall the caller.
pub fn run_command_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let command = format!("{} {}", program, args.first().copied().unwrap_or_default());
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| MonitorError::CommandSpawn {
            command: command.clone(),
            source,
        })?;

    let (stdout_tx, stdout_rx) = mpsc::channel();
    let stdout = child.stdout.take();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut stdout) = stdout {
            let _ = stdout.read_to_end(&mut buffer);
        }
        let _ = stdout_tx.send(buffer);
    });

    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MonitorError::CommandTimeout {
                    command,
                    timeout_ms,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                return Err(MonitorError::Io {
                    context: format!("waiting for {}", command),
                    source,
                })
            }
        }
    };

    if !status.success() {
        return Err(MonitorError::CommandFailed {
            command,
            details: format!("exit status {}", status),
        });
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    let stdout = match stdout_rx.recv_timeout(remaining) {
        Ok(buffer) => buffer,
        Err(RecvTimeoutError::Disconnected) => Vec::new(),
        Err(RecvTimeoutError::Timeout) => {
            return Err(MonitorError::CommandTimeout {
                command,
                timeout_ms,
            })
        }
    };

    Ok(String::from_utf8_lossy(&stdout).into_owned())
}
