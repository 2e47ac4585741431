//! Offline replay: feeds a saved server log through a local tracker.
//!
//! Each line is ingested at its embedded `MM/DD/YYYY HH:MM:SS:` stamp so TTLs
//! play out in log time. Unstamped lines (stack traces, `(Filename: ...)`)
//! inherit the previous stamp, or the first one in the file when they lead.

use std::path::Path;
use valheim_core::{parse_log_timestamp, LogSnapshot, SessionTracker, TrackerSettings};

pub fn replay_file(path: &Path, settings: TrackerSettings) -> Result<LogSnapshot, String> {
    let content = fs_err::read_to_string(path).map_err(|err| err.to_string())?;
    let snapshot = replay_lines(content.lines(), settings);
    tracing::info!(
        path = %path.display(),
        players_online = snapshot.players_online,
        attempts = snapshot.recent_attempts.len(),
        "Replayed log file"
    );
    Ok(snapshot)
}

pub fn replay_lines<'a, I>(lines: I, settings: TrackerSettings) -> LogSnapshot
where
    I: IntoIterator<Item = &'a str>,
{
    let lines: Vec<&str> = lines.into_iter().collect();
    let mut last_stamp = lines.iter().find_map(|line| parse_log_timestamp(line));

    let mut tracker = SessionTracker::new(settings);
    for line in lines {
        if let Some(stamp) = parse_log_timestamp(line) {
            last_stamp = Some(stamp);
        }
        tracker.ingest(line, last_stamp);
    }
    tracker.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use valheim_core::AttemptKind;

    const SESSION_LOG: &str = "\
02/17/2026 19:55:13: Valheim version: 0.217.46 (network version 27)
02/17/2026 19:55:14: Load world: Midgard (Midgard.fwl)
02/17/2026 19:55:20: Game server connected
02/17/2026 20:08:01: Got connection SteamID 111
02/17/2026 20:08:02: Got handshake from client 111
02/17/2026 20:08:09: Got character ZDOID from Alice : 912527495:1
02/17/2026 20:10:00: Got connection SteamID 222
02/17/2026 20:10:03: Peer 222 has wrong password
02/17/2026 20:11:00: Got connection SteamID 333
02/17/2026 20:20:00: Console: saved world
";

    #[test]
    fn replays_a_saved_session() {
        let snapshot = replay_lines(SESSION_LOG.lines(), TrackerSettings::default());

        assert_eq!(snapshot.world.as_deref(), Some("Midgard"));
        assert!(snapshot.ready_at.is_some());
        assert_eq!(snapshot.players_online, 0, "Alice went stale after 10 minutes");
        assert!(snapshot.pending.is_empty());

        let kinds: Vec<AttemptKind> = snapshot
            .recent_attempts
            .iter()
            .map(|attempt| attempt.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![AttemptKind::PendingTimeout, AttemptKind::WrongPassword]
        );
    }

    #[test]
    fn longer_ttls_keep_players_online() {
        let settings = TrackerSettings {
            pending_ttl: Duration::hours(1),
            player_seen_ttl: Duration::hours(1),
            ..TrackerSettings::default()
        };
        let snapshot = replay_lines(SESSION_LOG.lines(), settings);
        assert_eq!(snapshot.players_online, 1);
        assert_eq!(snapshot.players[0].name.as_deref(), Some("Alice"));
        assert_eq!(snapshot.pending.len(), 1);
        assert_eq!(snapshot.pending[0].id, "333");
    }

    #[test]
    fn unstamped_lines_keep_log_time() {
        let log = "\
(Filename: ./Runtime/Export/Debug/Debug.bindings.h Line: 35)
02/17/2026 20:08:01: Got connection SteamID 111
02/17/2026 20:08:02: Got handshake from client 111
(Filename: ./Runtime/Export/Debug/Debug.bindings.h Line: 35)
02/17/2026 20:08:09: Got character ZDOID from Alice : 912527495:1
";
        let snapshot = replay_lines(log.lines(), TrackerSettings::default());

        assert_eq!(snapshot.players_online, 1);
        assert_eq!(snapshot.players[0].id, "111");
        assert_eq!(snapshot.players[0].name.as_deref(), Some("Alice"));
        assert!(snapshot.recent_attempts.is_empty());
        assert_eq!(
            snapshot.last_seen_at,
            parse_log_timestamp("02/17/2026 20:08:09: x")
        );
    }

    #[test]
    fn replays_from_disk() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("server.log");
        fs_err::write(&path, SESSION_LOG).expect("write log");

        let snapshot = replay_file(&path, TrackerSettings::default()).expect("replay");
        assert_eq!(snapshot.world.as_deref(), Some("Midgard"));
    }

    #[test]
    fn missing_file_is_reported() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let err = replay_file(&temp_dir.path().join("absent.log"), TrackerSettings::default())
            .unwrap_err();
        assert!(err.contains("absent.log"));
    }
}
