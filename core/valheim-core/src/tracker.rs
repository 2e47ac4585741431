//! Session tracking over the server log.
//!
//! `SessionTracker` consumes lines one at a time and rebuilds the connection
//! lifecycle: pending connections, players, and an audit trail of attempts
//! that never made it into the world. It is deliberately not thread-safe;
//! [`SharedTracker`] wraps it in a mutex so every ingest or snapshot is one
//! critical section.
//!
//! Joins are correlated heuristically. The server logs "Got character ZDOID"
//! with a name but no SteamID, so the name is bound to the most recently
//! active pending connection. Two players joining at the same moment can be
//! swapped; that is a known accuracy limit of the log format.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::classify::{classify, parse_log_timestamp, LineMarkers, LogEvent};
use crate::config::MonitorConfig;
use crate::history::BoundedLog;
use crate::types::{
    AttemptKind, AttemptRecord, ConnectionId, LogSnapshot, PendingConnection, PendingStage,
    Player, PlayerEvent, ServerVersion,
};

pub const DEFAULT_ATTEMPTS_KEEP: usize = 30;
const UNKNOWN_ID_PREFIX: &str = "unknown:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub pending_ttl: Duration,
    pub player_seen_ttl: Duration,
    pub attempts_keep: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::minutes(2),
            player_seen_ttl: Duration::minutes(10),
            attempts_keep: DEFAULT_ATTEMPTS_KEEP,
        }
    }
}

impl From<&MonitorConfig> for TrackerSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            pending_ttl: config.pending_ttl(),
            player_seen_ttl: config.player_seen_ttl(),
            attempts_keep: config.attempts_keep,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ServerLogState {
    server_ready: bool,
    world: Option<String>,
    version: Option<ServerVersion>,
    last_line: Option<String>,
    first_seen_at: Option<DateTime<Utc>>,
    last_seen_at: Option<DateTime<Utc>>,
    ready_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SessionTracker {
    settings: TrackerSettings,
    summary: ServerLogState,
    pending: BTreeMap<ConnectionId, PendingConnection>,
    players: BTreeMap<ConnectionId, Player>,
    attempts: BoundedLog<AttemptRecord>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

impl SessionTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            summary: ServerLogState::default(),
            pending: BTreeMap::new(),
            players: BTreeMap::new(),
            attempts: BoundedLog::new(settings.attempts_keep),
        }
    }

    pub fn settings(&self) -> TrackerSettings {
        self.settings
    }

    /// Feeds one log line.
    ///
    /// `at` is the ingestion time; when absent the line's own
    /// `MM/DD/YYYY HH:MM:SS:` prefix is used, then the current clock. Never
    /// fails: unrecognised lines only advance the activity timestamps, and
    /// blank lines are dropped entirely.
    pub fn ingest(&mut self, line: &str, at: Option<DateTime<Utc>>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let at = at
            .or_else(|| parse_log_timestamp(line))
            .unwrap_or_else(Utc::now);
        // Never let an entity's clock run backwards.
        let at = match self.summary.last_seen_at {
            Some(last) if at < last => last,
            _ => at,
        };

        self.summary.last_line = Some(line.to_string());
        self.touch(at);
        self.sweep(at);

        let classified = classify(line);
        self.apply_markers(classified.markers, at);

        let Some(event) = classified.event else {
            return;
        };

        match event {
            LogEvent::Connected { id } => self.on_pending(id, PendingStage::Connected, at),
            LogEvent::Handshake { id } => self.on_pending(id, PendingStage::Handshake, at),
            LogEvent::WrongPassword { id } => self.on_wrong_password(id, at, line),
            LogEvent::CharacterBound { name } => self.on_character(name, at),
            LogEvent::ClosingSocket { id } => self.on_closing_socket(id, at, line),
            LogEvent::PeerDisconnected { id } => {
                self.mark_player_offline(&id, at, PlayerEvent::PeerDisconnected)
            }
            LogEvent::GenericDisconnect => {
                tracing::debug!("Unattributed disconnect marker");
            }
        }
    }

    pub fn snapshot(&self) -> LogSnapshot {
        let mut players: Vec<Player> = self
            .players
            .values()
            .filter(|player| player.online)
            .cloned()
            .collect();
        players.sort_by(|left, right| right.last_seen_at.cmp(&left.last_seen_at));

        let mut pending: Vec<PendingConnection> = self.pending.values().cloned().collect();
        pending.sort_by(|left, right| right.last_seen_at.cmp(&left.last_seen_at));

        LogSnapshot {
            server_ready_from_log: self.summary.server_ready,
            world: self.summary.world.clone(),
            server_version: self.summary.version.clone(),
            last_line: self.summary.last_line.clone(),
            first_seen_at: self.summary.first_seen_at,
            last_seen_at: self.summary.last_seen_at,
            ready_at: self.summary.ready_at,
            players_online: players.len(),
            players,
            pending,
            recent_attempts: self.attempts.newest_first(),
        }
    }

    /// Every player ever seen, online or not.
    pub fn known_players(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }

    pub fn reset(&mut self) {
        self.summary = ServerLogState::default();
        self.pending.clear();
        self.players.clear();
        self.attempts.clear();
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if self.summary.first_seen_at.is_none() {
            self.summary.first_seen_at = Some(at);
        }
        self.summary.last_seen_at = Some(at);
    }

    fn apply_markers(&mut self, markers: LineMarkers, at: DateTime<Utc>) {
        if let Some(version) = markers.version {
            tracing::info!(
                version = %version.version,
                network = %version.network,
                "Server version seen"
            );
            self.summary.version = Some(version);
        }
        if let Some(world) = markers.world {
            tracing::info!(world = %world, "World load seen");
            self.summary.world = Some(world);
        }
        if markers.steam_ready && !self.summary.server_ready {
            self.summary.server_ready = true;
        }
        if markers.lobby_ready && self.summary.ready_at.is_none() {
            tracing::info!(ready_at = %at.to_rfc3339(), "Server ready marker seen");
            self.summary.ready_at = Some(at);
        }
    }

    /// Expires idle pending connections and flags silent players offline.
    fn sweep(&mut self, at: DateTime<Utc>) {
        let expired: Vec<ConnectionId> = self
            .pending
            .values()
            .filter(|pending| at - pending.last_seen_at > self.settings.pending_ttl)
            .map(|pending| pending.id.clone())
            .collect();
        for id in expired {
            let stage = self
                .pending
                .get(&id)
                .map(|pending| pending.stage.as_str())
                .unwrap_or("unknown");
            let detail = format!("Pending TTL exceeded (stage={})", stage);
            tracing::info!(id = %id, "Pending connection timed out");
            self.drop_pending(&id, at, AttemptKind::PendingTimeout, detail, None);
        }

        let player_ttl = self.settings.player_seen_ttl;
        for player in self.players.values_mut() {
            if player.online && at - player.last_seen_at > player_ttl {
                tracing::info!(id = %player.id, name = ?player.name, "Player marked stale");
                player.online = false;
                player.last_event = PlayerEvent::StaleTimeout;
            }
        }
    }

    fn on_pending(&mut self, id: ConnectionId, stage: PendingStage, at: DateTime<Utc>) {
        // A fresh connection for an id still shown online means the previous
        // session ended without a disconnect line.
        if let Some(player) = self.players.get_mut(&id) {
            if player.online {
                player.online = false;
                player.last_seen_at = at;
                player.last_event = PlayerEvent::Reconnecting;
            }
        }

        let pending = self.ensure_pending(&id, at);
        pending.stage = stage;
        tracing::debug!(id = %id, stage = stage.as_str(), "Pending connection updated");
    }

    fn on_wrong_password(&mut self, id: ConnectionId, at: DateTime<Utc>, line: &str) {
        tracing::info!(id = %id, "Connection rejected: wrong password");
        self.drop_pending(
            &id,
            at,
            AttemptKind::WrongPassword,
            "Rejected at password prompt".to_string(),
            Some(line),
        );
        self.mark_player_offline(&id, at, PlayerEvent::WrongPassword);
    }

    fn on_character(&mut self, name: String, at: DateTime<Utc>) {
        match self.most_recent_pending() {
            Some(id) => self.promote_pending(id, name, at),
            None => {
                let pseudo_id = format!("{}{}", UNKNOWN_ID_PREFIX, name);
                tracing::info!(name = %name, id = %pseudo_id, "Join without pending connection");
                let player = self.ensure_player(&pseudo_id, at);
                if !player.online || player.connected_at.is_none() {
                    player.connected_at = Some(at);
                }
                player.last_seen_at = at;
                player.online = true;
                player.last_event = PlayerEvent::InWorld;
                player.name = Some(name);
            }
        }
    }

    fn on_closing_socket(&mut self, id: ConnectionId, at: DateTime<Utc>, line: &str) {
        if let Some(stage) = self.pending.get(&id).map(|pending| pending.stage) {
            let detail = format!("Closed before join (stage={})", stage.as_str());
            tracing::info!(id = %id, "Connection closed before join");
            self.drop_pending(
                &id,
                at,
                AttemptKind::DisconnectBeforeJoin,
                detail,
                Some(line),
            );
        } else if self.players.contains_key(&id) {
            self.mark_player_offline(&id, at, PlayerEvent::ClosingSocket);
        }
    }

    fn ensure_pending(&mut self, id: &str, at: DateTime<Utc>) -> &mut PendingConnection {
        let pending = self
            .pending
            .entry(id.to_string())
            .or_insert_with(|| PendingConnection {
                id: id.to_string(),
                first_seen_at: at,
                last_seen_at: at,
                stage: PendingStage::Connected,
                last_reason: None,
            });
        pending.last_seen_at = at;
        pending
    }

    fn ensure_player(&mut self, id: &str, at: DateTime<Utc>) -> &mut Player {
        self.players
            .entry(id.to_string())
            .or_insert_with(|| Player {
                id: id.to_string(),
                name: None,
                connected_at: None,
                last_seen_at: at,
                online: false,
                last_event: PlayerEvent::InWorld,
            })
    }

    /// Pending connection with the latest activity. Ties go to the id that
    /// sorts last so the choice never depends on insertion order.
    fn most_recent_pending(&self) -> Option<ConnectionId> {
        self.pending
            .values()
            .max_by(|left, right| {
                left.last_seen_at
                    .cmp(&right.last_seen_at)
                    .then_with(|| left.id.cmp(&right.id))
            })
            .map(|pending| pending.id.clone())
    }

    fn promote_pending(&mut self, id: ConnectionId, name: String, at: DateTime<Utc>) {
        let Some(pending) = self.pending.remove(&id) else {
            return;
        };

        let player = self.ensure_player(&id, at);
        if !player.online || player.connected_at.is_none() {
            player.connected_at = Some(pending.first_seen_at);
        }
        player.last_seen_at = at;
        player.online = true;
        player.last_event = PlayerEvent::InWorld;
        player.name = Some(name);
        tracing::info!(id = %id, name = ?player.name, "Player entered world");
    }

    fn drop_pending(
        &mut self,
        id: &str,
        at: DateTime<Utc>,
        kind: AttemptKind,
        detail: String,
        line: Option<&str>,
    ) {
        if let Some(mut pending) = self.pending.remove(id) {
            pending.last_seen_at = at;
            pending.last_reason = Some(kind);
        }
        self.attempts.push(AttemptRecord {
            id: id.to_string(),
            at,
            kind,
            detail,
            raw_line: line.map(str::to_string),
        });
    }

    fn mark_player_offline(&mut self, id: &str, at: DateTime<Utc>, reason: PlayerEvent) {
        let Some(player) = self.players.get_mut(id) else {
            return;
        };
        player.last_seen_at = at;
        player.online = false;
        player.last_event = reason;
        tracing::info!(id = %id, reason = reason.as_str(), "Player marked offline");
    }
}

/// Mutex-guarded tracker shared between the tail observer and status readers.
#[derive(Debug, Clone, Default)]
pub struct SharedTracker {
    inner: Arc<Mutex<SessionTracker>>,
}

impl SharedTracker {
    pub fn new(tracker: SessionTracker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    pub fn ingest(&self, line: &str, at: Option<DateTime<Utc>>) {
        // Recover from poisoning - tracker state is still internally consistent
        // because every mutation completes before the guard drops.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .ingest(line, at);
    }

    pub fn snapshot(&self) -> LogSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .snapshot()
    }

    pub fn reset(&self) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .reset();
    }
}
