//! Readiness verdict.
//!
//! Merges container facts with a tracker snapshot. The decision itself lives
//! in [`evaluate`], a pure function, so every branch of the precedence chain
//! is testable without Docker or a clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::liveness::{ContainerProbe, ContainerState};
use crate::tracker::SharedTracker;
use crate::types::LogSnapshot;

/// The most fundamental failing precondition, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    ContainerNotFound,
    ContainerNotRunning { status: String },
    ContainerRestarting,
    ProcessNotRunning,
    StaleLogs { age_secs: Option<i64> },
    NoReadyMarker,
    ReadyMarkerStale,
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusError::ContainerNotFound => write!(f, "Container not found"),
            StatusError::ContainerNotRunning { status } => {
                write!(f, "Container not running ({})", status)
            }
            StatusError::ContainerRestarting => write!(f, "Container restarting"),
            StatusError::ProcessNotRunning => write!(f, "valheim_server.exe process not running"),
            StatusError::StaleLogs { age_secs: Some(age) } => {
                write!(f, "No fresh logs ({}s old)", age)
            }
            StatusError::StaleLogs { age_secs: None } => write!(f, "No fresh logs (?s old)"),
            StatusError::NoReadyMarker => write!(f, "Server not ready yet (no ready marker seen)"),
            StatusError::ReadyMarkerStale => {
                write!(f, "Ready marker is from previous container start")
            }
        }
    }
}

/// Container facts as seen by one probe round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessFacts {
    pub exists: bool,
    pub running: bool,
    pub restarting: bool,
    pub status: Option<String>,
    pub proc_running: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl LivenessFacts {
    pub fn from_state(state: Option<&ContainerState>, proc_running: bool) -> Self {
        match state {
            Some(state) => Self {
                exists: true,
                running: state.running,
                restarting: state.restarting,
                status: state.status.clone(),
                proc_running: state.running && proc_running,
                started_at: state.started_at,
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub at: DateTime<Utc>,
    pub container: String,
    pub container_exists: bool,
    pub container_running: bool,
    pub container_status: String,
    pub container_restarting: bool,
    pub proc_running: bool,
    pub log_age_secs: Option<i64>,
    pub server_ready: bool,
    pub online: bool,
    pub last_error: Option<String>,
    pub connections_hint: String,
    #[serde(flatten)]
    pub snapshot: LogSnapshot,
}

/// Seconds since the last log line, floored and clamped at zero.
pub fn log_age_secs(last_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    last_seen_at.map(|seen| (now - seen).num_seconds().max(0))
}

pub fn logs_fresh(
    last_seen_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stale_window: Duration,
) -> bool {
    last_seen_at.is_some_and(|seen| now - seen <= stale_window)
}

/// First failing precondition, or `None` when the server is ready.
pub fn diagnose(
    facts: &LivenessFacts,
    snapshot: &LogSnapshot,
    fresh: bool,
    age_secs: Option<i64>,
) -> Option<StatusError> {
    if !facts.exists {
        return Some(StatusError::ContainerNotFound);
    }
    if !facts.running {
        return Some(StatusError::ContainerNotRunning {
            status: container_status(facts),
        });
    }
    if facts.restarting {
        return Some(StatusError::ContainerRestarting);
    }
    if !facts.proc_running {
        return Some(StatusError::ProcessNotRunning);
    }
    if !fresh {
        return Some(StatusError::StaleLogs { age_secs });
    }
    let ready_at = match snapshot.ready_at {
        Some(ready_at) => ready_at,
        None => return Some(StatusError::NoReadyMarker),
    };
    match facts.started_at {
        Some(started_at) if ready_at < started_at => Some(StatusError::ReadyMarkerStale),
        _ => None,
    }
}

pub fn evaluate(
    container: &str,
    facts: &LivenessFacts,
    snapshot: LogSnapshot,
    now: DateTime<Utc>,
    stale_window: Duration,
) -> StatusReport {
    let fresh = logs_fresh(snapshot.last_seen_at, now, stale_window);
    let age_secs = log_age_secs(snapshot.last_seen_at, now);
    let alive = facts.running && facts.proc_running;

    let ready_after_start = match (snapshot.ready_at, facts.started_at) {
        (Some(_), None) => true,
        (Some(ready_at), Some(started_at)) => ready_at >= started_at,
        (None, _) => false,
    };

    let last_error = diagnose(facts, &snapshot, fresh, age_secs).map(|err| err.to_string());

    StatusReport {
        at: now,
        container: container.to_string(),
        container_exists: facts.exists,
        container_running: facts.running,
        container_status: container_status(facts),
        container_restarting: facts.restarting,
        proc_running: facts.proc_running,
        log_age_secs: age_secs,
        server_ready: alive && ready_after_start && fresh,
        online: alive && fresh,
        last_error,
        connections_hint: format!(
            "proc={}, logsFresh={}",
            yes_no(facts.proc_running),
            yes_no(fresh)
        ),
        snapshot,
    }
}

fn container_status(facts: &LivenessFacts) -> String {
    facts
        .status
        .clone()
        .unwrap_or_else(|| "unknown".to_string())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Pulls probe facts and a tracker snapshot for each status request.
///
/// Safe to call from many request threads at once: the probe calls are
/// independent and each is bounded by the probe's own timeout.
#[derive(Clone)]
pub struct StatusAggregator {
    probe: Arc<dyn ContainerProbe>,
    tracker: SharedTracker,
    container: String,
    stale_window: Duration,
}

impl StatusAggregator {
    pub fn new(
        probe: Arc<dyn ContainerProbe>,
        tracker: SharedTracker,
        container: impl Into<String>,
        stale_window: Duration,
    ) -> Self {
        Self {
            probe,
            tracker,
            container: container.into(),
            stale_window,
        }
    }

    pub fn collect_facts(&self) -> LivenessFacts {
        let state = self.probe.inspect(&self.container);
        let proc_running = match &state {
            Some(state) if state.running => self.probe.server_process_running(&self.container),
            _ => false,
        };
        LivenessFacts::from_state(state.as_ref(), proc_running)
    }

    pub fn build_status(&self) -> StatusReport {
        let facts = self.collect_facts();
        let snapshot = self.tracker.snapshot();
        let report = evaluate(&self.container, &facts, snapshot, Utc::now(), self.stale_window);
        if let Some(err) = &report.last_error {
            tracing::debug!(container = %self.container, last_error = %err, "Server not ready");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::SessionTracker;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_770_000_000 + secs, 0).single().expect("timestamp")
    }

    fn empty_snapshot() -> LogSnapshot {
        SessionTracker::default().snapshot()
    }

    fn healthy_facts() -> LivenessFacts {
        LivenessFacts {
            exists: true,
            running: true,
            restarting: false,
            status: Some("running".to_string()),
            proc_running: true,
            started_at: Some(at(0)),
        }
    }

    fn ready_snapshot() -> LogSnapshot {
        let mut snapshot = empty_snapshot();
        snapshot.last_seen_at = Some(at(100));
        snapshot.ready_at = Some(at(50));
        snapshot
    }

    #[test]
    fn precedence_truth_table() {
        let window = Duration::seconds(180);
        let now = at(110);

        // Each row breaks exactly one more precondition than the row below it,
        // so the first failing check is the one that must be reported.
        let rows: Vec<(&str, LivenessFacts, LogSnapshot, Option<&str>)> = vec![
            (
                "absent",
                LivenessFacts::default(),
                LogSnapshot {
                    ready_at: None,
                    last_seen_at: None,
                    ..ready_snapshot()
                },
                Some("Container not found"),
            ),
            (
                "stopped",
                LivenessFacts {
                    running: false,
                    restarting: true,
                    status: Some("exited".to_string()),
                    proc_running: false,
                    ..healthy_facts()
                },
                LogSnapshot {
                    ready_at: None,
                    last_seen_at: None,
                    ..ready_snapshot()
                },
                Some("Container not running (exited)"),
            ),
            (
                "restarting",
                LivenessFacts {
                    restarting: true,
                    proc_running: false,
                    ..healthy_facts()
                },
                LogSnapshot {
                    ready_at: None,
                    last_seen_at: None,
                    ..ready_snapshot()
                },
                Some("Container restarting"),
            ),
            (
                "no process",
                LivenessFacts {
                    proc_running: false,
                    ..healthy_facts()
                },
                LogSnapshot {
                    ready_at: None,
                    last_seen_at: None,
                    ..ready_snapshot()
                },
                Some("valheim_server.exe process not running"),
            ),
            (
                "stale logs",
                healthy_facts(),
                LogSnapshot {
                    ready_at: None,
                    last_seen_at: Some(at(-500)),
                    ..ready_snapshot()
                },
                Some("No fresh logs (610s old)"),
            ),
            (
                "no ready marker",
                healthy_facts(),
                LogSnapshot {
                    ready_at: None,
                    ..ready_snapshot()
                },
                Some("Server not ready yet (no ready marker seen)"),
            ),
            (
                "ready before start",
                LivenessFacts {
                    started_at: Some(at(60)),
                    ..healthy_facts()
                },
                ready_snapshot(),
                Some("Ready marker is from previous container start"),
            ),
            ("ready", healthy_facts(), ready_snapshot(), None),
        ];

        for (name, facts, snapshot, expected) in rows {
            let report = evaluate("valheim", &facts, snapshot, now, window);
            assert_eq!(report.last_error.as_deref(), expected, "row: {name}");
        }
    }

    #[test]
    fn not_running_wins_over_everything_below_it() {
        let facts = LivenessFacts {
            exists: true,
            running: false,
            status: None,
            ..LivenessFacts::default()
        };
        let report = evaluate(
            "valheim",
            &facts,
            empty_snapshot(),
            at(0),
            Duration::seconds(180),
        );
        assert_eq!(
            report.last_error.as_deref(),
            Some("Container not running (unknown)")
        );
        assert_eq!(report.container_status, "unknown");
        assert!(!report.online);
        assert!(!report.server_ready);
    }

    #[test]
    fn missing_log_timestamp_reports_unknown_age() {
        let report = evaluate(
            "valheim",
            &healthy_facts(),
            empty_snapshot(),
            at(0),
            Duration::seconds(180),
        );
        assert_eq!(report.log_age_secs, None);
        assert_eq!(report.last_error.as_deref(), Some("No fresh logs (?s old)"));
        assert_eq!(report.connections_hint, "proc=yes, logsFresh=no");
    }

    #[test]
    fn ready_and_online_when_everything_holds() {
        let report = evaluate(
            "valheim",
            &healthy_facts(),
            ready_snapshot(),
            at(110),
            Duration::seconds(180),
        );
        assert!(report.server_ready);
        assert!(report.online);
        assert_eq!(report.log_age_secs, Some(10));
        assert_eq!(report.connections_hint, "proc=yes, logsFresh=yes");
    }

    #[test]
    fn unknown_start_time_accepts_any_ready_marker() {
        let facts = LivenessFacts {
            started_at: None,
            ..healthy_facts()
        };
        let report = evaluate(
            "valheim",
            &facts,
            ready_snapshot(),
            at(110),
            Duration::seconds(180),
        );
        assert!(report.server_ready);
        assert_eq!(report.last_error, None);
    }

    #[test]
    fn online_without_ready_marker() {
        let snapshot = LogSnapshot {
            ready_at: None,
            ..ready_snapshot()
        };
        let report = evaluate(
            "valheim",
            &healthy_facts(),
            snapshot,
            at(110),
            Duration::seconds(180),
        );
        assert!(report.online);
        assert!(!report.server_ready);
    }

    #[test]
    fn freshness_boundary_is_inclusive() {
        assert!(logs_fresh(Some(at(0)), at(180), Duration::seconds(180)));
        assert!(!logs_fresh(Some(at(0)), at(181), Duration::seconds(180)));
        assert_eq!(log_age_secs(Some(at(10)), at(0)), Some(0));
    }

    #[test]
    fn report_flattens_snapshot_fields() {
        let report = evaluate(
            "valheim",
            &healthy_facts(),
            ready_snapshot(),
            at(110),
            Duration::seconds(180),
        );
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["container"], "valheim");
        assert_eq!(value["players_online"], 0);
        assert!(value.get("snapshot").is_none());

        let decoded: StatusReport = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, report);
    }

    struct FakeProbe {
        state: Option<ContainerState>,
        proc_running: bool,
        process_checks: AtomicUsize,
    }

    impl ContainerProbe for FakeProbe {
        fn inspect(&self, _container: &str) -> Option<ContainerState> {
            self.state.clone()
        }

        fn server_process_running(&self, _container: &str) -> bool {
            self.process_checks.fetch_add(1, Ordering::SeqCst);
            self.proc_running
        }
    }

    #[test]
    fn process_check_is_skipped_for_stopped_container() {
        let probe = Arc::new(FakeProbe {
            state: Some(ContainerState {
                running: false,
                restarting: false,
                status: Some("exited".to_string()),
                started_at: None,
            }),
            proc_running: true,
            process_checks: AtomicUsize::new(0),
        });
        let aggregator = StatusAggregator::new(
            probe.clone(),
            SharedTracker::default(),
            "valheim",
            Duration::seconds(180),
        );

        let report = aggregator.build_status();
        assert_eq!(probe.process_checks.load(Ordering::SeqCst), 0);
        assert!(!report.proc_running);
        assert_eq!(
            report.last_error.as_deref(),
            Some("Container not running (exited)")
        );
    }

    #[test]
    fn build_status_uses_live_tracker_state() {
        let probe = Arc::new(FakeProbe {
            state: Some(ContainerState {
                running: true,
                restarting: false,
                status: Some("running".to_string()),
                started_at: None,
            }),
            proc_running: true,
            process_checks: AtomicUsize::new(0),
        });
        let tracker = SharedTracker::default();
        let aggregator = StatusAggregator::new(
            probe.clone(),
            tracker.clone(),
            "valheim",
            Duration::seconds(180),
        );

        tracker.ingest("Game server connected", Some(Utc::now()));
        let report = aggregator.build_status();
        assert_eq!(probe.process_checks.load(Ordering::SeqCst), 1);
        assert!(report.server_ready);
        assert!(report.online);
        assert_eq!(report.last_error, None);
    }
}
