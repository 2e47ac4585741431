//! Line classification for the Valheim server log.
//!
//! A line carries two kinds of information:
//! - *markers* (version, world, readiness) which can co-occur and never stop
//!   further matching, and
//! - at most one *connection event*, picked by the first entry of
//!   [`EVENT_MATCHERS`] that matches.

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::patterns::*;
use crate::types::{ConnectionId, ServerVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Connected { id: ConnectionId },
    Handshake { id: ConnectionId },
    WrongPassword { id: ConnectionId },
    CharacterBound { name: String },
    ClosingSocket { id: ConnectionId },
    PeerDisconnected { id: ConnectionId },
    /// `RPC_Disconnect` / `Socket closed by peer`: no id, so no attribution.
    GenericDisconnect,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMarkers {
    pub version: Option<ServerVersion>,
    pub world: Option<String>,
    /// `Opened Steam server` / `ZNET START`
    pub steam_ready: bool,
    /// `Game server connected` / `Registering lobby`
    pub lobby_ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub markers: LineMarkers,
    pub event: Option<LogEvent>,
}

type EventMatcher = fn(&str) -> Option<LogEvent>;

/// Evaluated in order; the first match wins.
pub const EVENT_MATCHERS: &[(&str, EventMatcher)] = &[
    ("connection", match_connection),
    ("handshake", match_handshake),
    ("wrong_password", match_wrong_password),
    ("character", match_character),
    ("closing_socket", match_closing_socket),
    ("peer_disconnected", match_peer_disconnected),
    ("generic_disconnect", match_generic_disconnect),
];

pub fn classify(line: &str) -> Classified {
    Classified {
        markers: scan_markers(line),
        event: classify_event(line),
    }
}

pub fn classify_event(line: &str) -> Option<LogEvent> {
    EVENT_MATCHERS.iter().find_map(|(_, matcher)| matcher(line))
}

pub fn scan_markers(line: &str) -> LineMarkers {
    let version = RE_VERSION.captures(line).map(|caps| ServerVersion {
        version: caps[1].to_string(),
        network: caps[2].to_string(),
    });
    let world = RE_WORLD
        .captures(line)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty());

    LineMarkers {
        version,
        world,
        steam_ready: RE_STEAM_SERVER_OPENED.is_match(line) || RE_ZNET_START.is_match(line),
        lobby_ready: RE_GAME_SERVER_CONNECTED.is_match(line) || RE_REGISTERING_LOBBY.is_match(line),
    }
}

/// Parses the `MM/DD/YYYY HH:MM:SS:` prefix, interpreted in host local time.
pub fn parse_log_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let caps = RE_LOG_TIMESTAMP.captures(line)?;
    let field = |index: usize| caps[index].parse::<u32>().ok();

    let month = field(1)?;
    let day = field(2)?;
    let year = i32::try_from(field(3)?).ok()?;
    let hour = field(4)?;
    let minute = field(5)?;
    let second = field(6)?;

    Local
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

fn capture_id(re: &regex::Regex, line: &str) -> Option<ConnectionId> {
    re.captures(line).map(|caps| caps[1].to_string())
}

fn match_connection(line: &str) -> Option<LogEvent> {
    capture_id(&RE_CONNECTION, line).map(|id| LogEvent::Connected { id })
}

fn match_handshake(line: &str) -> Option<LogEvent> {
    capture_id(&RE_HANDSHAKE, line).map(|id| LogEvent::Handshake { id })
}

fn match_wrong_password(line: &str) -> Option<LogEvent> {
    capture_id(&RE_WRONG_PASSWORD, line).map(|id| LogEvent::WrongPassword { id })
}

fn match_character(line: &str) -> Option<LogEvent> {
    RE_CHARACTER
        .captures(line)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty())
        .map(|name| LogEvent::CharacterBound { name })
}

fn match_closing_socket(line: &str) -> Option<LogEvent> {
    capture_id(&RE_CLOSING_SOCKET, line).map(|id| LogEvent::ClosingSocket { id })
}

fn match_peer_disconnected(line: &str) -> Option<LogEvent> {
    capture_id(&RE_PEER_DISCONNECTED, line).map(|id| LogEvent::PeerDisconnected { id })
}

fn match_generic_disconnect(line: &str) -> Option<LogEvent> {
    if RE_RPC_DISCONNECT.is_match(line) || RE_SOCKET_CLOSED_BY_PEER.is_match(line) {
        Some(LogEvent::GenericDisconnect)
    } else {
        None
    }
}
