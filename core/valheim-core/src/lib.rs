//! # valheim-core
//!
//! Core library for the Valheim server monitor: follows the container log,
//! rebuilds player sessions from it and decides whether the server is ready.
//!
//! ## Design Principles
//!
//! - **Synchronous**: Plain threads and mutexes. No async runtime.
//! - **Never fails on input**: Unrecognised log lines are ignored, probe
//!   failures read as "absent". Errors are reserved for configuration and
//!   command plumbing.
//! - **Snapshots are copies**: Readers never alias tracker state.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use valheim_core::{load_config, MonitorContext};
//!
//! let context = MonitorContext::new(load_config(None)?);
//! context.start();
//! let report = context.status();
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod history;
pub mod liveness;
pub mod monitor;
pub mod patterns;
pub mod status;
pub mod tail;
pub mod tracker;
pub mod types;

pub use classify::{classify, parse_log_timestamp, Classified, LineMarkers, LogEvent};
pub use config::*;
pub use error::{MonitorError, Result};
pub use history::BoundedLog;
pub use liveness::{ContainerProbe, ContainerState, DockerProbe};
pub use monitor::{HealthReport, MonitorContext};
pub use status::{evaluate, LivenessFacts, StatusAggregator, StatusError, StatusReport};
pub use tail::{LogTail, TailCommand, TailError, TailPhase, TailStats};
pub use tracker::{SessionTracker, SharedTracker, TrackerSettings};
pub use types::*;
