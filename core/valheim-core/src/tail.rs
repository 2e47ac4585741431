//! Supervised `docker logs -f` follower.
//!
//! `LogTail` keeps a line stream flowing from an external process and restarts
//! that process after an unexpected exit. Lifecycle:
//!
//! ```text
//! Stopped --start()--> Running --exit--> RestartPending --timer--> Running
//!    ^                                                      |
//!    +------------------------- stop() ---------------------+
//! ```
//!
//! `stop()` is valid from any phase and cancels a pending restart timer, so
//! nothing is relaunched after a manual stop.
//!
//! Observers run on the tail's reader threads. A panicking observer is caught
//! and logged; it never reaches the supervisor or the other observers.

use serde::Serialize;
use std::io::{BufRead, BufReader, Read};
use std::panic::{self, AssertUnwindSafe};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const STDERR_TAIL_BYTES: usize = 8000;
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", format_exit(.command, .code, .signal, .stderr_tail))]
    UnexpectedExit {
        command: String,
        code: Option<i32>,
        signal: Option<i32>,
        stderr_tail: String,
    },

    #[error("failed to wait on {command}: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

fn format_exit(
    command: &str,
    code: &Option<i32>,
    signal: &Option<i32>,
    stderr_tail: &str,
) -> String {
    let code = code.map_or_else(|| "null".to_string(), |value| value.to_string());
    let signal = signal.map_or_else(|| "null".to_string(), |value| value.to_string());
    let mut message = format!("{} exited (code={}, signal={})", command, code, signal);
    let tail = stderr_tail.trim();
    if !tail.is_empty() {
        message.push_str(" | ");
        message.push_str(tail);
    }
    message
}

/// Program and arguments for the followed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TailCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// `docker logs -f --tail <n> <container>`
    pub fn docker_logs(docker_bin: &str, container: &str, tail_lines: u32) -> Self {
        Self {
            program: docker_bin.to_string(),
            args: vec![
                "logs".to_string(),
                "-f".to_string(),
                "--tail".to_string(),
                tail_lines.to_string(),
                container.to_string(),
            ],
        }
    }

    pub fn label(&self) -> String {
        match self.args.first() {
            Some(first) => format!("{} {}", self.program, first),
            None => self.program.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TailPhase {
    Stopped,
    Running,
    RestartPending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TailStats {
    pub phase: TailPhase,
    pub launches: u64,
    pub restarts_scheduled: u64,
    pub lines_delivered: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

type LineObserver = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(&TailError) + Send + Sync>;

#[derive(Default)]
struct Observers {
    line: Vec<LineObserver>,
    error: Vec<ErrorObserver>,
}

struct Control {
    phase: TailPhase,
    stopped_manually: bool,
    /// Bumped on every launch; exits reported for an older run are ignored.
    run_id: u64,
    /// Bumped whenever a restart timer is armed or cancelled.
    timer_id: u64,
    pid: Option<u32>,
    launches: u64,
    restarts_scheduled: u64,
    last_error: Option<String>,
}

struct ExitReport {
    code: Option<i32>,
    signal: Option<i32>,
    stderr_tail: String,
}

struct Inner {
    command: TailCommand,
    restart_delay: Duration,
    observers: RwLock<Observers>,
    control: Mutex<Control>,
    timer_wake: Condvar,
    /// Run currently allowed to deliver lines; 0 when none.
    active_run: AtomicU64,
    lines_delivered: AtomicU64,
}

pub struct LogTail {
    inner: Arc<Inner>,
}

impl LogTail {
    pub fn new(command: TailCommand, restart_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                command,
                restart_delay,
                observers: RwLock::new(Observers::default()),
                control: Mutex::new(Control {
                    phase: TailPhase::Stopped,
                    stopped_manually: false,
                    run_id: 0,
                    timer_id: 0,
                    pid: None,
                    launches: 0,
                    restarts_scheduled: 0,
                    last_error: None,
                }),
                timer_wake: Condvar::new(),
                active_run: AtomicU64::new(0),
                lines_delivered: AtomicU64::new(0),
            }),
        }
    }

    pub fn on_line<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .line
            .push(Arc::new(handler));
    }

    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&TailError) + Send + Sync + 'static,
    {
        self.inner
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .error
            .push(Arc::new(handler));
    }

    /// Launches the follower. No-op while running; cancels a pending restart
    /// and launches immediately otherwise.
    pub fn start(&self) {
        let result = {
            let mut control = self.inner.lock_control();
            if control.phase == TailPhase::Running {
                return;
            }
            control.stopped_manually = false;
            control.timer_id += 1;
            self.inner.timer_wake.notify_all();
            Inner::launch(&self.inner, &mut control)
        };

        if let Err(err) = result {
            self.inner.emit_error(&err);
        }
    }

    /// Stops the follower and cancels any pending restart.
    pub fn stop(&self) {
        let pid = {
            let mut control = self.inner.lock_control();
            control.stopped_manually = true;
            control.phase = TailPhase::Stopped;
            control.timer_id += 1;
            self.inner.active_run.store(0, Ordering::SeqCst);
            control.pid.take()
        };
        self.inner.timer_wake.notify_all();

        if let Some(pid) = pid {
            terminate(pid);
        }
    }

    pub fn phase(&self) -> TailPhase {
        self.inner.lock_control().phase
    }

    pub fn stats(&self) -> TailStats {
        let control = self.inner.lock_control();
        TailStats {
            phase: control.phase,
            launches: control.launches,
            restarts_scheduled: control.restarts_scheduled,
            lines_delivered: self.inner.lines_delivered.load(Ordering::Relaxed),
            last_error: control.last_error.clone(),
        }
    }
}

impl Drop for LogTail {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        // Recover from poisoning - observers run outside this lock, so a
        // poisoned guard can only come from a panic in our own bookkeeping.
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn launch(this: &Arc<Self>, control: &mut Control) -> Result<(), TailError> {
        let spawned = Command::new(&this.command.program)
            .args(&this.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                control.phase = TailPhase::Stopped;
                control.pid = None;
                let err = TailError::Spawn {
                    command: this.command.label(),
                    source,
                };
                control.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        control.run_id += 1;
        control.launches += 1;
        control.phase = TailPhase::Running;
        control.pid = Some(child.id());
        let run_id = control.run_id;
        this.active_run.store(run_id, Ordering::SeqCst);

        tracing::info!(
            command = %this.command.label(),
            pid = child.id(),
            run_id,
            "Log tail started"
        );

        let stdout_reader = child
            .stdout
            .take()
            .map(|stdout| spawn_stdout_reader(Arc::clone(this), run_id, stdout));
        let stderr_reader = child.stderr.take().map(spawn_stderr_reader);

        let inner = Arc::clone(this);
        thread::spawn(move || inner.wait_for_exit(run_id, child, stdout_reader, stderr_reader));
        Ok(())
    }

    fn wait_for_exit(
        self: Arc<Self>,
        run_id: u64,
        mut child: Child,
        stdout_reader: Option<JoinHandle<()>>,
        stderr_reader: Option<JoinHandle<String>>,
    ) {
        let status = child.wait();
        if let Some(handle) = stdout_reader {
            let _ = handle.join();
        }
        let stderr_tail = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        match status {
            Ok(status) => {
                let (code, signal) = exit_parts(&status);
                self.handle_exit(
                    run_id,
                    ExitReport {
                        code,
                        signal,
                        stderr_tail,
                    },
                );
            }
            Err(source) => {
                let err = TailError::Wait {
                    command: self.command.label(),
                    source,
                };
                self.emit_error(&err);
                self.handle_exit(
                    run_id,
                    ExitReport {
                        code: None,
                        signal: None,
                        stderr_tail,
                    },
                );
            }
        }
    }

    fn handle_exit(self: &Arc<Self>, run_id: u64, report: ExitReport) {
        let err = {
            let mut control = self.lock_control();
            if control.run_id != run_id {
                return;
            }
            control.pid = None;
            let _ = self
                .active_run
                .compare_exchange(run_id, 0, Ordering::SeqCst, Ordering::SeqCst);

            if control.stopped_manually {
                control.phase = TailPhase::Stopped;
                tracing::debug!(run_id, "Log tail exited after manual stop");
                return;
            }

            let err = TailError::UnexpectedExit {
                command: self.command.label(),
                code: report.code,
                signal: report.signal,
                stderr_tail: report.stderr_tail,
            };
            control.last_error = Some(err.to_string());

            if control.phase != TailPhase::RestartPending {
                control.phase = TailPhase::RestartPending;
                control.timer_id += 1;
                control.restarts_scheduled += 1;
                let timer_id = control.timer_id;
                let inner = Arc::clone(self);
                thread::spawn(move || inner.run_restart_timer(timer_id));
                tracing::warn!(
                    run_id,
                    delay_ms = self.restart_delay.as_millis() as u64,
                    "Log tail exited; restart scheduled"
                );
            }
            err
        };

        self.emit_error(&err);
    }

    fn run_restart_timer(self: Arc<Self>, timer_id: u64) {
        let deadline = Instant::now() + self.restart_delay;
        let mut control = self.lock_control();
        loop {
            if control.timer_id != timer_id || control.phase != TailPhase::RestartPending {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            control = self
                .timer_wake
                .wait_timeout(control, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }

        tracing::info!("Restarting log tail");
        let result = Self::launch(&self, &mut control);
        drop(control);
        if let Err(err) = result {
            self.emit_error(&err);
        }
    }

    fn deliver_line(&self, run_id: u64, line: &str) {
        if self.active_run.load(Ordering::SeqCst) != run_id {
            return;
        }
        self.lines_delivered.fetch_add(1, Ordering::Relaxed);

        let observers = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .line
            .clone();
        for observer in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(line))).is_err() {
                tracing::warn!("Log line observer panicked; continuing");
            }
        }
    }

    fn emit_error(&self, err: &TailError) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .error
            .clone();
        for observer in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(err))).is_err() {
                tracing::warn!("Log error observer panicked; continuing");
            }
        }
    }
}

fn spawn_stdout_reader(inner: Arc<Inner>, run_id: u64, stdout: ChildStdout) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buffer);
                    inner.deliver_line(run_id, text.trim_end_matches(['\n', '\r']));
                }
                Err(err) => {
                    tracing::debug!(error = %err, run_id, "Log tail stdout read failed");
                    break;
                }
            }
        }
    })
}

fn spawn_stderr_reader(stderr: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut reader = stderr;
        let mut captured: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    captured.extend_from_slice(&chunk[..n]);
                    if captured.len() > STDERR_TAIL_BYTES {
                        let excess = captured.len() - STDERR_TAIL_BYTES;
                        captured.drain(..excess);
                    }
                }
            }
        }
        String::from_utf8_lossy(&captured).into_owned()
    })
}

#[cfg(unix)]
fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}

#[cfg(unix)]
fn terminate(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: libc::kill with SIGTERM is a standard POSIX signal delivery.
    // The pid belongs to a child we spawned and have not yet reaped.
    #[allow(unsafe_code)]
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        tracing::debug!(pid, "SIGTERM delivery failed; process likely already exited");
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32) {
    tracing::warn!(pid, "Process termination is only supported on unix");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    impl LogTail {
        /// Marks a run as live without spawning anything.
        fn simulate_running(&self) -> u64 {
            let mut control = self.inner.lock_control();
            control.run_id += 1;
            control.launches += 1;
            control.phase = TailPhase::Running;
            control.stopped_manually = false;
            self.inner.active_run.store(control.run_id, Ordering::SeqCst);
            control.run_id
        }

        fn simulate_exit(&self, run_id: u64, code: i32) {
            self.inner.handle_exit(
                run_id,
                ExitReport {
                    code: Some(code),
                    signal: None,
                    stderr_tail: "boom".to_string(),
                },
            );
        }
    }

    fn sh(script: &str) -> TailCommand {
        TailCommand::new("sh", &["-c", script])
    }

    fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    #[test]
    fn docker_logs_command_shape() {
        let command = TailCommand::docker_logs("docker", "valheim", 400);
        assert_eq!(command.program, "docker");
        assert_eq!(command.args, vec!["logs", "-f", "--tail", "400", "valheim"]);
        assert_eq!(command.label(), "docker logs");
    }

    #[test]
    fn unexpected_exit_message_includes_code_and_stderr() {
        let err = TailError::UnexpectedExit {
            command: "docker logs".to_string(),
            code: Some(1),
            signal: None,
            stderr_tail: "Error: No such container: valheim\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "docker logs exited (code=1, signal=null) | Error: No such container: valheim"
        );
    }

    #[test]
    fn unexpected_exit_emits_one_error_and_schedules_one_restart() {
        let tail = LogTail::new(sh("exit 0"), Duration::from_secs(60));
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        tail.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let run_id = tail.simulate_running();
        tail.simulate_exit(run_id, 1);

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(tail.phase(), TailPhase::RestartPending);
        assert_eq!(tail.stats().restarts_scheduled, 1);

        // A second exit report while the restart is pending must not arm
        // another timer.
        tail.simulate_exit(run_id, 1);
        assert_eq!(tail.stats().restarts_scheduled, 1);
        assert_eq!(tail.phase(), TailPhase::RestartPending);

        tail.stop();
        assert_eq!(tail.phase(), TailPhase::Stopped);
    }

    #[test]
    fn exit_after_manual_stop_is_silent() {
        let tail = LogTail::new(sh("exit 0"), Duration::from_secs(60));
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        tail.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let run_id = tail.simulate_running();
        tail.stop();
        tail.simulate_exit(run_id, 143);

        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(tail.stats().restarts_scheduled, 0);
        assert_eq!(tail.phase(), TailPhase::Stopped);
    }

    #[test]
    fn stale_run_exit_is_ignored() {
        let tail = LogTail::new(sh("exit 0"), Duration::from_secs(60));
        let old_run = tail.simulate_running();
        let _new_run = tail.simulate_running();
        tail.simulate_exit(old_run, 1);
        assert_eq!(tail.phase(), TailPhase::Running);
        assert_eq!(tail.stats().restarts_scheduled, 0);
        tail.stop();
    }

    #[test]
    fn delivers_lines_in_order() {
        let tail = LogTail::new(sh("printf 'one\\ntwo\\r\\nthree\\n'"), Duration::from_secs(60));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        tail.on_line(move |line| {
            let _ = tx.lock().expect("sender").send(line.to_string());
        });
        tail.start();

        let lines: Vec<String> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("line"))
            .collect();
        assert_eq!(lines, vec!["one", "two", "three"]);
        tail.stop();
    }

    #[test]
    fn start_is_idempotent_while_running() {
        let tail = LogTail::new(sh("sleep 5"), Duration::from_secs(60));
        tail.start();
        tail.start();
        assert_eq!(tail.stats().launches, 1);
        assert_eq!(tail.phase(), TailPhase::Running);
        tail.stop();
        assert_eq!(tail.phase(), TailPhase::Stopped);
    }

    #[test]
    fn restarts_after_unexpected_exit() {
        let tail = LogTail::new(sh("echo tick; exit 3"), Duration::from_millis(50));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        tail.on_error(move |err| {
            let _ = tx.lock().expect("sender").send(err.to_string());
        });
        tail.start();

        let first = rx.recv_timeout(Duration::from_secs(5)).expect("exit error");
        assert!(first.contains("code=3"), "unexpected message: {first}");
        assert!(wait_until(Duration::from_secs(5), || tail.stats().launches >= 2));
        tail.stop();
    }

    #[test]
    fn stop_cancels_pending_restart() {
        let tail = LogTail::new(sh("exit 2"), Duration::from_millis(200));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        tail.on_error(move |_| {
            let _ = tx.lock().expect("sender").send(());
        });
        tail.start();

        rx.recv_timeout(Duration::from_secs(5)).expect("exit error");
        assert!(wait_until(Duration::from_secs(2), || {
            tail.phase() == TailPhase::RestartPending
        }));
        tail.stop();
        thread::sleep(Duration::from_millis(400));

        assert_eq!(tail.stats().launches, 1);
        assert_eq!(tail.phase(), TailPhase::Stopped);
    }

    #[test]
    fn spawn_failure_is_reported_without_restart() {
        let tail = LogTail::new(
            TailCommand::new("/nonexistent/valheim-monitor-docker", &["logs"]),
            Duration::from_millis(10),
        );
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        tail.on_error(move |err| {
            sink.lock().expect("messages").push(err.to_string());
        });
        tail.start();
        thread::sleep(Duration::from_millis(50));

        let messages = messages.lock().expect("messages");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("failed to start"));
        assert_eq!(tail.phase(), TailPhase::Stopped);
        assert_eq!(tail.stats().restarts_scheduled, 0);
    }

    #[test]
    fn panicking_observer_does_not_block_others() {
        let tail = LogTail::new(sh("echo hello"), Duration::from_secs(60));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        tail.on_line(|_| panic!("observer failure"));
        tail.on_line(move |line| {
            let _ = tx.lock().expect("sender").send(line.to_string());
        });
        tail.start();

        let line = rx.recv_timeout(Duration::from_secs(5)).expect("line");
        assert_eq!(line, "hello");
        tail.stop();
    }

    #[test]
    fn panicking_error_observer_does_not_block_others() {
        let tail = LogTail::new(sh("exit 1"), Duration::from_secs(60));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        tail.on_error(|_| panic!("observer failure"));
        tail.on_error(move |err| {
            let _ = tx.lock().expect("sender").send(err.to_string());
        });
        tail.start();

        let message = rx.recv_timeout(Duration::from_secs(5)).expect("error");
        assert!(message.contains("code=1"), "unexpected message: {message}");
        tail.stop();
    }
}
