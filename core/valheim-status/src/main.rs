//! valheim-status: command-line client for the Valheim monitor.
//!
//! ## Subcommands
//!
//! - `status`: readiness verdict and who is online
//! - `raw`: newest lines from the daemon's raw log buffer
//! - `health`: daemon and log tail health
//! - `reset`: clear the daemon's tracked session state
//! - `replay`: run a saved log file through a local tracker (no daemon needed)

mod daemon_client;
mod logging;
mod replay;

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use valheim_core::{StatusReport, TrackerSettings};
use valheim_monitor_protocol::Method;

#[derive(Parser)]
#[command(name = "valheim-status")]
#[command(about = "Query the Valheim server monitor")]
#[command(version)]
struct Cli {
    /// Monitor address (host:port); defaults to $VALHEIM_MONITOR_ADDR or 127.0.0.1:8080
    #[arg(long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the readiness verdict and online players
    Status {
        /// Print the full status report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the newest raw log lines
    Raw {
        /// Number of lines to fetch (capped by the daemon's serve window)
        #[arg(long)]
        lines: Option<usize>,
    },

    /// Show daemon health and log tail statistics
    Health,

    /// Clear tracked players, pending connections and attempt history
    Reset,

    /// Replay a saved server log offline and print the resulting snapshot
    Replay {
        /// Log file to replay
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Pending connection TTL in milliseconds
        #[arg(long)]
        pending_ttl_ms: Option<i64>,

        /// Player inactivity TTL in milliseconds
        #[arg(long)]
        player_ttl_ms: Option<i64>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();
    let addr = daemon_client::resolve_addr(cli.addr, |key| std::env::var(key).ok());

    let result = match cli.command {
        Commands::Status { json } => run_status(&addr, json),
        Commands::Raw { lines } => run_raw(&addr, lines),
        Commands::Health => run_health(&addr),
        Commands::Reset => run_reset(&addr),
        Commands::Replay {
            file,
            pending_ttl_ms,
            player_ttl_ms,
        } => run_replay(file, pending_ttl_ms, player_ttl_ms),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "valheim-status failed");
        eprintln!("valheim-status: {}", err);
        std::process::exit(1);
    }
}

fn run_status(addr: &str, as_json: bool) -> Result<(), String> {
    let data = daemon_client::call(addr, Method::GetStatus, None)?;
    if as_json {
        return print_json(&data);
    }
    let report: StatusReport = serde_json::from_value(data)
        .map_err(|err| format!("Unexpected status payload: {}", err))?;
    print!("{}", format_summary(&report));
    Ok(())
}

fn run_raw(addr: &str, lines: Option<usize>) -> Result<(), String> {
    let params = lines.map(|limit| json!({ "limit": limit }));
    let data = daemon_client::call(addr, Method::GetRawLines, params)?;
    let text = data.get("text").and_then(Value::as_str).unwrap_or_default();
    if !text.is_empty() {
        println!("{}", text);
    }
    Ok(())
}

fn run_health(addr: &str) -> Result<(), String> {
    let data = daemon_client::call(addr, Method::GetHealth, None)?;
    print_json(&data)
}

fn run_reset(addr: &str) -> Result<(), String> {
    daemon_client::call(addr, Method::ResetState, None)?;
    println!("Monitor state reset");
    Ok(())
}

fn run_replay(
    file: PathBuf,
    pending_ttl_ms: Option<i64>,
    player_ttl_ms: Option<i64>,
) -> Result<(), String> {
    let mut settings = TrackerSettings::default();
    if let Some(ms) = pending_ttl_ms {
        settings.pending_ttl = Duration::milliseconds(ms);
    }
    if let Some(ms) = player_ttl_ms {
        settings.player_seen_ttl = Duration::milliseconds(ms);
    }

    let snapshot = replay::replay_file(&file, settings)?;
    print_json(&snapshot)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| format!("Failed to format JSON: {}", err))?;
    println!("{}", text);
    Ok(())
}

fn format_summary(report: &StatusReport) -> String {
    let snapshot = &report.snapshot;
    let mut out = String::new();

    let verdict = if report.server_ready {
        "READY"
    } else if report.online {
        "ONLINE (not ready)"
    } else {
        "DOWN"
    };
    out.push_str(&format!("{}: {}\n", report.container, verdict));
    if let Some(err) = &report.last_error {
        out.push_str(&format!("  error:    {}\n", err));
    }
    out.push_str(&format!(
        "  container: {} ({})\n",
        report.container_status, report.connections_hint
    ));
    if let Some(world) = &snapshot.world {
        out.push_str(&format!("  world:    {}\n", world));
    }
    if let Some(version) = &snapshot.server_version {
        out.push_str(&format!(
            "  version:  {} (network {})\n",
            version.version, version.network
        ));
    }
    if let Some(age) = report.log_age_secs {
        out.push_str(&format!("  last log: {}s ago\n", age));
    }

    out.push_str(&format!("  players:  {} online\n", snapshot.players_online));
    for player in &snapshot.players {
        let name = player.name.as_deref().unwrap_or("?");
        let since = player
            .connected_at
            .map(|at| format!(" for {}", format_age(report.at, at)))
            .unwrap_or_default();
        out.push_str(&format!("    - {} [{}]{}\n", name, player.id, since));
    }
    if !snapshot.pending.is_empty() {
        out.push_str(&format!("  pending:  {}\n", snapshot.pending.len()));
        for pending in &snapshot.pending {
            out.push_str(&format!(
                "    - {} ({})\n",
                pending.id,
                pending.stage.as_str()
            ));
        }
    }
    if let Some(attempt) = snapshot.recent_attempts.first() {
        out.push_str(&format!(
            "  last failed attempt: {} {} ({})\n",
            attempt.id,
            attempt.kind.as_str(),
            attempt.detail
        ));
    }
    out
}

fn format_age(now: DateTime<Utc>, since: DateTime<Utc>) -> String {
    let secs = (now - since).num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}
