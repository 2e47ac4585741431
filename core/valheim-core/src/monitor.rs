//! Process-level wiring: one tracker, one raw line buffer, one tail, one
//! aggregator. Built once at startup and handed to the query layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::config::MonitorConfig;
use crate::history::BoundedLog;
use crate::liveness::{ContainerProbe, DockerProbe};
use crate::status::{StatusAggregator, StatusReport};
use crate::tail::{LogTail, TailCommand, TailStats};
use crate::tracker::{SessionTracker, SharedTracker, TrackerSettings};

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub pid: u32,
    pub version: &'static str,
    pub container: String,
    pub started_at: DateTime<Utc>,
    pub raw_lines_buffered: usize,
    pub tail: TailStats,
}

pub struct MonitorContext {
    config: MonitorConfig,
    tracker: SharedTracker,
    raw_lines: Arc<Mutex<BoundedLog<String>>>,
    tail: LogTail,
    aggregator: StatusAggregator,
    started_at: DateTime<Utc>,
}

impl MonitorContext {
    /// Docker-backed context: `docker logs -f` for lines, `docker inspect`
    /// and `docker exec` for liveness.
    pub fn new(config: MonitorConfig) -> Self {
        let command =
            TailCommand::docker_logs(&config.docker_bin, &config.container, config.tail_lines);
        let probe = Arc::new(DockerProbe::new(
            config.docker_bin.clone(),
            config.probe_timeout(),
        ));
        Self::with_parts(config, command, probe)
    }

    pub fn with_parts(
        config: MonitorConfig,
        command: TailCommand,
        probe: Arc<dyn ContainerProbe>,
    ) -> Self {
        let tracker = SharedTracker::new(SessionTracker::new(TrackerSettings::from(&config)));
        let raw_lines = Arc::new(Mutex::new(BoundedLog::new(config.raw_keep_lines)));
        let tail = LogTail::new(command, config.restart_delay());
        let aggregator = StatusAggregator::new(
            probe,
            tracker.clone(),
            config.container.clone(),
            config.stale_log_window(),
        );

        {
            let tracker = tracker.clone();
            let raw_lines = Arc::clone(&raw_lines);
            tail.on_line(move |line| {
                raw_lines
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(line.to_string());
                tracker.ingest(line, Some(Utc::now()));
            });
        }

        let container = config.container.clone();
        tail.on_error(move |err| {
            tracing::error!(container = %container, error = %err, "Log tail error");
        });

        Self {
            config,
            tracker,
            raw_lines,
            tail,
            aggregator,
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &SharedTracker {
        &self.tracker
    }

    pub fn start(&self) {
        tracing::info!(container = %self.config.container, "Starting log tail");
        self.tail.start();
    }

    pub fn stop(&self) {
        self.tail.stop();
    }

    pub fn status(&self) -> StatusReport {
        self.aggregator.build_status()
    }

    /// Newest buffered lines, oldest first. `limit` can only narrow the
    /// configured serve window.
    pub fn raw_lines(&self, limit: Option<usize>) -> Vec<String> {
        let serve = limit
            .map(|limit| limit.min(self.config.raw_serve_lines))
            .unwrap_or(self.config.raw_serve_lines);
        self.raw_lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .tail(serve)
    }

    /// Clears tracker state. The raw line buffer is kept for debugging.
    pub fn reset(&self) {
        self.tracker.reset();
        tracing::info!(container = %self.config.container, "Tracker state reset");
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION"),
            container: self.config.container.clone(),
            started_at: self.started_at,
            raw_lines_buffered: self
                .raw_lines
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            tail: self.tail.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::ContainerState;
    use std::thread;
    use std::time::{Duration, Instant};

    struct RunningContainer;

    impl ContainerProbe for RunningContainer {
        fn inspect(&self, _container: &str) -> Option<ContainerState> {
            Some(ContainerState {
                running: true,
                restarting: false,
                status: Some("running".to_string()),
                started_at: None,
            })
        }

        fn server_process_running(&self, _container: &str) -> bool {
            true
        }
    }

    fn context_for(script: &str, config: MonitorConfig) -> MonitorContext {
        MonitorContext::with_parts(
            config,
            TailCommand::new("sh", &["-c", script]),
            Arc::new(RunningContainer),
        )
    }

    fn wait_for<F: Fn() -> bool>(check: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn lines_flow_into_tracker_and_raw_buffer() {
        let script = concat!(
            "printf 'Game server connected\\n",
            "Got connection SteamID 123\\n",
            "Got handshake from client 123\\n",
            "Got character ZDOID from Alice : 123:1\\n'; sleep 5",
        );
        let context = context_for(script, MonitorConfig::default());
        context.start();

        assert!(wait_for(|| context.tracker().snapshot().players_online == 1));
        let report = context.status();
        assert!(report.server_ready);
        assert_eq!(report.snapshot.players[0].name.as_deref(), Some("Alice"));
        assert!(report.snapshot.pending.is_empty());

        let raw = context.raw_lines(None);
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[0], "Game server connected");
        context.stop();
    }

    #[test]
    fn raw_lines_respect_serve_window() {
        let config = MonitorConfig {
            raw_keep_lines: 5,
            raw_serve_lines: 3,
            ..MonitorConfig::default()
        };
        let context = context_for("for i in 1 2 3 4 5 6 7; do echo line$i; done; sleep 5", config);
        context.start();

        assert!(wait_for(|| context.health().tail.lines_delivered == 7));
        assert_eq!(context.raw_lines(None), vec!["line5", "line6", "line7"]);
        assert_eq!(context.raw_lines(Some(1)), vec!["line7"]);
        assert_eq!(context.raw_lines(Some(50)).len(), 3);
        assert_eq!(context.health().raw_lines_buffered, 5);
        context.stop();
    }

    #[test]
    fn reset_clears_tracker_but_keeps_raw_lines() {
        let context = context_for(
            "echo 'Got connection SteamID 9'; sleep 5",
            MonitorConfig::default(),
        );
        context.start();
        assert!(wait_for(|| context.tracker().snapshot().pending.len() == 1));

        context.reset();
        let snapshot = context.tracker().snapshot();
        assert!(snapshot.pending.is_empty());
        assert!(snapshot.last_line.is_none());
        assert_eq!(context.raw_lines(None).len(), 1);
        context.stop();
    }
}
