//! Data model shared by the tracker, the aggregator and clients.
//!
//! Everything here is plain owned data: snapshots are deep copies of tracker
//! state and can be handed to other threads or serialized freely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection id as printed by the server (a SteamID), or a synthesized
/// `unknown:<name>` placeholder when a join could not be correlated.
pub type ConnectionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStage {
    Connected,
    Handshake,
}

impl PendingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStage::Connected => "connected",
            PendingStage::Handshake => "handshake",
        }
    }
}

/// Why a connection attempt ended without the player entering the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    WrongPassword,
    PendingTimeout,
    DisconnectBeforeJoin,
}

impl AttemptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptKind::WrongPassword => "wrong_password",
            AttemptKind::PendingTimeout => "pending_timeout",
            AttemptKind::DisconnectBeforeJoin => "disconnect_before_join",
        }
    }
}

/// Last lifecycle event applied to a player record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerEvent {
    InWorld,
    WrongPassword,
    ClosingSocket,
    PeerDisconnected,
    StaleTimeout,
    /// A new connection arrived for an id that was still marked online.
    Reconnecting,
}

impl PlayerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerEvent::InWorld => "in_world",
            PlayerEvent::WrongPassword => "wrong_password",
            PlayerEvent::ClosingSocket => "closing_socket",
            PlayerEvent::PeerDisconnected => "peer_disconnected",
            PlayerEvent::StaleTimeout => "stale_timeout",
            PlayerEvent::Reconnecting => "reconnecting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConnection {
    pub id: ConnectionId,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub stage: PendingStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reason: Option<AttemptKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub online: bool,
    pub last_event: PlayerEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: ConnectionId,
    pub at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: AttemptKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_line: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    pub version: String,
    pub network: String,
}

/// Point-in-time copy of everything the tracker knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSnapshot {
    pub server_ready_from_log: bool,
    pub world: Option<String>,
    pub server_version: Option<ServerVersion>,
    pub last_line: Option<String>,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub players_online: usize,
    /// Players currently online, most recently active first.
    pub players: Vec<Player>,
    /// Pending connections, most recently active first.
    pub pending: Vec<PendingConnection>,
    /// Attempt history, newest first.
    pub recent_attempts: Vec<AttemptRecord>,
}
