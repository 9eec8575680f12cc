use std::collections::BTreeMap;

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ServerId;

/// The military-sim event kinds the built-in parser registry recognizes.
/// Illustrative content — `ParserRegistry` is generic over
/// [`crate::parser::LineParser`] and is not limited to these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PlayerConnect,
    PlayerDisconnect,
    Kill,
    Damage,
    AdminBroadcast,
    RoundChange,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::PlayerConnect => "player_connect",
            EventKind::PlayerDisconnect => "player_disconnect",
            EventKind::Kill => "kill",
            EventKind::Damage => "damage",
            EventKind::AdminBroadcast => "admin_broadcast",
            EventKind::RoundChange => "round_change",
        };
        f.write_str(s)
    }
}

/// A stable 128-bit hash of `(server_id, kind, canonicalized_payload)`.
/// Two events with identical server, kind, and payload produce the same
/// fingerprint regardless of payload key insertion order or incidental
/// whitespace — `payload` is a `BTreeMap`, so key order is already
/// canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFingerprint(u128);

impl EventFingerprint {
    pub fn compute(server_id: ServerId, kind: EventKind, payload: &BTreeMap<String, String>) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(server_id.as_uuid().as_bytes());
        hasher.update(kind.to_string().as_bytes());
        for (key, value) in payload {
            hasher.update(key.trim().as_bytes());
            hasher.update(b"=");
            hasher.update(normalize_whitespace(value).as_bytes());
            hasher.update(b";");
        }
        let digest = hasher.finalize();
        let bytes: [u8; 16] = digest.as_bytes()[..16]
            .try_into()
            .expect("blake3 digest is at least 16 bytes");
        Self(u128::from_le_bytes(bytes))
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl std::fmt::Display for EventFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A recognized, typed event extracted from a [`crate::line::LogLine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub server_id: ServerId,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: BTreeMap<String, String>,
    pub raw_line: String,
    pub parser_id: String,
}

impl ParsedEvent {
    pub fn fingerprint(&self) -> EventFingerprint {
        EventFingerprint::compute(self.server_id, self.kind, &self.payload)
    }
}
