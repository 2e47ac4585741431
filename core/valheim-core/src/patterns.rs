//! Compiled regex patterns for the Valheim dedicated server log format.
//!
//! These patterns are compiled once on first use and reused by the line
//! classifier. Update these when the server's log wording changes.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Server Lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

pub static RE_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Valheim version:\s*([0-9A-Za-z.\-]+)\s*\(network version\s*([0-9]+)\)")
        .unwrap()
});
pub static RE_WORLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Load world:\s*([^(]+)\s*\(").unwrap());
pub static RE_STEAM_SERVER_OPENED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Opened Steam server").unwrap());
pub static RE_ZNET_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ZNET START").unwrap());
pub static RE_GAME_SERVER_CONNECTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Game server connected").unwrap());
pub static RE_REGISTERING_LOBBY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Registering lobby").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Connection Lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

pub static RE_CONNECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Got connection SteamID\s+(\d+)").unwrap());
pub static RE_HANDSHAKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Got handshake from client\s+(\d+)").unwrap());
pub static RE_WRONG_PASSWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Peer\s+(\d+)\s+has wrong password").unwrap());
// "Got character ZDOID from Pikus : 912527495:1"
pub static RE_CHARACTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Got character ZDOID from\s+(.+?)\s*:\s*").unwrap());
pub static RE_CLOSING_SOCKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Closing socket\s+(\d+)").unwrap());
pub static RE_PEER_DISCONNECTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Peer\s+(\d+)\s+disconnected").unwrap());
pub static RE_SOCKET_CLOSED_BY_PEER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Socket closed by peer").unwrap());
pub static RE_RPC_DISCONNECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)RPC_Disconnect\b").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Line Prefix
// ═══════════════════════════════════════════════════════════════════════════════

// "02/17/2026 20:08:01: ..."
pub static RE_LOG_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2})/(\d{2})/(\d{4}) (\d{2}):(\d{2}):(\d{2}):").unwrap()
});
