//! Built-in parsers for a military-sim server log grammar: player
//! connect/disconnect, kill/damage, admin broadcast, round/map change.
//! Illustrative content — the registry is generic over [`super::LineParser`]
//! and callers may register their own.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;

use super::{LineParser, ParsedFields};
use crate::event::EventKind;

/// `[2026.07.27-14.32.10:123]` — the engine-log timestamp prefix shared by
/// every built-in pattern.
const TIMESTAMP_PREFIX: &str = r"\[(?P<date>\d{4}\.\d{2}\.\d{2})-(?P<time>\d{2}\.\d{2}\.\d{2}):(?P<millis>\d{3})\]\s+";

fn parse_engine_timestamp(date: &str, time: &str, millis: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(
        &format!("{date}-{time}"),
        "%Y.%m.%d-%H.%M.%S",
    )
    .ok()?;
    let millis: i64 = millis.parse().ok()?;
    Some((naive + TimeDelta::milliseconds(millis)).and_utc())
}

pub fn all() -> Vec<Box<dyn LineParser>> {
    vec![
        Box::new(PlayerConnectParser),
        Box::new(PlayerDisconnectParser),
        Box::new(KillParser),
        Box::new(DamageParser),
        Box::new(AdminBroadcastParser),
        Box::new(RoundChangeParser),
    ]
}

static CONNECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{TIMESTAMP_PREFIX}LogGame: Player '(?P<player>[^']+)' \(ID: (?P<steam_id>\d+)\) has connected$"
    ))
    .expect("valid connect regex")
});

struct PlayerConnectParser;
impl LineParser for PlayerConnectParser {
    fn id(&self) -> &'static str {
        "builtin.player_connect"
    }
    fn kind(&self) -> EventKind {
        EventKind::PlayerConnect
    }
    fn parse(&self, line: &str) -> Option<ParsedFields> {
        let caps = CONNECT_RE.captures(line)?;
        let mut payload = BTreeMap::new();
        payload.insert("player".to_string(), caps["player"].to_string());
        payload.insert("steam_id".to_string(), caps["steam_id"].to_string());
        Some(ParsedFields {
            timestamp: parse_engine_timestamp(&caps["date"], &caps["time"], &caps["millis"]),
            payload,
        })
    }
}

static DISCONNECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{TIMESTAMP_PREFIX}LogGame: Player '(?P<player>[^']+)' \(ID: (?P<steam_id>\d+)\) has disconnected$"
    ))
    .expect("valid disconnect regex")
});

struct PlayerDisconnectParser;
impl LineParser for PlayerDisconnectParser {
    fn id(&self) -> &'static str {
        "builtin.player_disconnect"
    }
    fn kind(&self) -> EventKind {
        EventKind::PlayerDisconnect
    }
    fn parse(&self, line: &str) -> Option<ParsedFields> {
        let caps = DISCONNECT_RE.captures(line)?;
        let mut payload = BTreeMap::new();
        payload.insert("player".to_string(), caps["player"].to_string());
        payload.insert("steam_id".to_string(), caps["steam_id"].to_string());
        Some(ParsedFields {
            timestamp: parse_engine_timestamp(&caps["date"], &caps["time"], &caps["millis"]),
            payload,
        })
    }
}

static KILL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{TIMESTAMP_PREFIX}LogGame: '(?P<killer>[^']+)' killed '(?P<victim>[^']+)' with '(?P<weapon>[^']+)'$"
    ))
    .expect("valid kill regex")
});

struct KillParser;
impl LineParser for KillParser {
    fn id(&self) -> &'static str {
        "builtin.kill"
    }
    fn kind(&self) -> EventKind {
        EventKind::Kill
    }
    fn parse(&self, line: &str) -> Option<ParsedFields> {
        let caps = KILL_RE.captures(line)?;
        let mut payload = BTreeMap::new();
        payload.insert("killer".to_string(), caps["killer"].to_string());
        payload.insert("victim".to_string(), caps["victim"].to_string());
        payload.insert("weapon".to_string(), caps["weapon"].to_string());
        Some(ParsedFields {
            timestamp: parse_engine_timestamp(&caps["date"], &caps["time"], &caps["millis"]),
            payload,
        })
    }
}

static DAMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{TIMESTAMP_PREFIX}LogGame: '(?P<attacker>[^']+)' damaged '(?P<victim>[^']+)' for (?P<amount>\d+) with '(?P<weapon>[^']+)'$"
    ))
    .expect("valid damage regex")
});

struct DamageParser;
impl LineParser for DamageParser {
    fn id(&self) -> &'static str {
        "builtin.damage"
    }
    fn kind(&self) -> EventKind {
        EventKind::Damage
    }
    fn parse(&self, line: &str) -> Option<ParsedFields> {
        let caps = DAMAGE_RE.captures(line)?;
        let mut payload = BTreeMap::new();
        payload.insert("attacker".to_string(), caps["attacker"].to_string());
        payload.insert("victim".to_string(), caps["victim"].to_string());
        payload.insert("amount".to_string(), caps["amount"].to_string());
        payload.insert("weapon".to_string(), caps["weapon"].to_string());
        Some(ParsedFields {
            timestamp: parse_engine_timestamp(&caps["date"], &caps["time"], &caps["millis"]),
            payload,
        })
    }
}

static ADMIN_BROADCAST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{TIMESTAMP_PREFIX}LogGame: ADMIN BROADCAST: (?P<message>.+)$"
    ))
    .expect("valid admin broadcast regex")
});

struct AdminBroadcastParser;
impl LineParser for AdminBroadcastParser {
    fn id(&self) -> &'static str {
        "builtin.admin_broadcast"
    }
    fn kind(&self) -> EventKind {
        EventKind::AdminBroadcast
    }
    fn parse(&self, line: &str) -> Option<ParsedFields> {
        let caps = ADMIN_BROADCAST_RE.captures(line)?;
        let mut payload = BTreeMap::new();
        payload.insert("message".to_string(), caps["message"].to_string());
        Some(ParsedFields {
            timestamp: parse_engine_timestamp(&caps["date"], &caps["time"], &caps["millis"]),
            payload,
        })
    }
}

static ROUND_CHANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{TIMESTAMP_PREFIX}LogGame: Match State Changed from (?P<from>\S+) to (?P<to>\S+)$"
    ))
    .expect("valid round change regex")
});

struct RoundChangeParser;
impl LineParser for RoundChangeParser {
    fn id(&self) -> &'static str {
        "builtin.round_change"
    }
    fn kind(&self) -> EventKind {
        EventKind::RoundChange
    }
    fn parse(&self, line: &str) -> Option<ParsedFields> {
        let caps = ROUND_CHANGE_RE.captures(line)?;
        let mut payload = BTreeMap::new();
        payload.insert("from_state".to_string(), caps["from"].to_string());
        payload.insert("to_state".to_string(), caps["to"].to_string());
        Some(ParsedFields {
            timestamp: parse_engine_timestamp(&caps["date"], &caps["time"], &caps["millis"]),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONNECT: &str =
        "[2026.07.27-14.32.10:123] LogGame: Player 'Alice' (ID: 76561198000000001) has connected";
    const SAMPLE_KILL: &str =
        "[2026.07.27-14.33.05:042] LogGame: 'Alice' killed 'Bob' with 'M4A1'";
    const SAMPLE_ADMIN: &str =
        "[2026.07.27-14.34.00:000] LogGame: ADMIN BROADCAST: server restarting in 5 minutes";
    const SAMPLE_ROUND: &str =
        "[2026.07.27-14.40.00:000] LogGame: Match State Changed from InProgress to PostRound";

    #[test]
    fn parses_connect_line() {
        let parsed = PlayerConnectParser.parse(SAMPLE_CONNECT).unwrap();
        assert_eq!(parsed.payload["player"], "Alice");
        assert_eq!(parsed.payload["steam_id"], "76561198000000001");
        assert!(parsed.timestamp.is_some());
    }

    #[test]
    fn parses_kill_line() {
        let parsed = KillParser.parse(SAMPLE_KILL).unwrap();
        assert_eq!(parsed.payload["killer"], "Alice");
        assert_eq!(parsed.payload["victim"], "Bob");
        assert_eq!(parsed.payload["weapon"], "M4A1");
    }

    #[test]
    fn parses_admin_broadcast() {
        let parsed = AdminBroadcastParser.parse(SAMPLE_ADMIN).unwrap();
        assert_eq!(parsed.payload["message"], "server restarting in 5 minutes");
    }

    #[test]
    fn parses_round_change() {
        let parsed = RoundChangeParser.parse(SAMPLE_ROUND).unwrap();
        assert_eq!(parsed.payload["from_state"], "InProgress");
        assert_eq!(parsed.payload["to_state"], "PostRound");
    }

    #[test]
    fn unrelated_line_does_not_match_any_builtin() {
        let line = "just some unrelated engine chatter";
        for parser in all() {
            assert!(parser.parse(line).is_none(), "{} matched noise", parser.id());
        }
    }

    #[test]
    fn registry_picks_first_matching_builtin() {
        let registry = super::super::ParserRegistry::builtin();
        let line = crate::line::LogLine::new(SAMPLE_KILL, Utc::now());
        let event = registry
            .match_line(crate::ids::ServerId::random(), &line)
            .unwrap();
        assert_eq!(event.kind, EventKind::Kill);
        assert_eq!(event.parser_id, "builtin.kill");
    }
}
