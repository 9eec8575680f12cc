//! Parser Registry (C2): an ordered list of pure, stateless line parsers.

pub mod builtin;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::event::{EventKind, ParsedEvent};
use crate::ids::ServerId;
use crate::line::LogLine;

/// What a successful parse extracts from a line, before it is wrapped into
/// a [`ParsedEvent`] with the registry's `server_id`/`parser_id` context.
pub struct ParsedFields {
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: BTreeMap<String, String>,
}

/// A pure, stateless pattern matcher for one event kind.
pub trait LineParser: Send + Sync {
    /// Stable identifier recorded on every event this parser produces.
    fn id(&self) -> &'static str;

    fn kind(&self) -> EventKind;

    /// Attempt to match `line`; `None` means "not this parser's line", not
    /// an error.
    fn parse(&self, line: &str) -> Option<ParsedFields>;
}

/// Tries parsers in registration order and returns the first match.
/// Ordering matters only when patterns can overlap — earlier entries win.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn LineParser>>,
}

impl ParserRegistry {
    pub fn new(parsers: Vec<Box<dyn LineParser>>) -> Self {
        Self { parsers }
    }

    /// The registry pre-loaded with the built-in military-sim parsers.
    pub fn builtin() -> Self {
        Self::new(builtin::all())
    }

    pub fn register(&mut self, parser: Box<dyn LineParser>) {
        self.parsers.push(parser);
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Match `line` against every parser in order, returning the first hit
    /// as a fully-formed [`ParsedEvent`], or `None`.
    pub fn match_line(&self, server_id: ServerId, line: &LogLine) -> Option<ParsedEvent> {
        if line.raw_text.is_empty() {
            return None;
        }

        for parser in &self.parsers {
            if let Some(fields) = parser.parse(&line.raw_text) {
                return Some(ParsedEvent {
                    server_id,
                    kind: parser.kind(),
                    timestamp: fields.timestamp.unwrap_or(line.received_at),
                    payload: fields.payload,
                    raw_line: line.raw_text.clone(),
                    parser_id: parser.id().to_string(),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysMatch;
    impl LineParser for AlwaysMatch {
        fn id(&self) -> &'static str {
            "always"
        }
        fn kind(&self) -> EventKind {
            EventKind::AdminBroadcast
        }
        fn parse(&self, _line: &str) -> Option<ParsedFields> {
            Some(ParsedFields {
                timestamp: None,
                payload: BTreeMap::new(),
            })
        }
    }

    struct NeverMatch;
    impl LineParser for NeverMatch {
        fn id(&self) -> &'static str {
            "never"
        }
        fn kind(&self) -> EventKind {
            EventKind::Kill
        }
        fn parse(&self, _line: &str) -> Option<ParsedFields> {
            None
        }
    }

    #[test]
    fn first_match_wins() {
        let registry = ParserRegistry::new(vec![Box::new(AlwaysMatch), Box::new(NeverMatch)]);
        let line = LogLine::new("anything", Utc::now());
        let event = registry
            .match_line(ServerId::random(), &line)
            .expect("should match");
        assert_eq!(event.parser_id, "always");
    }

    #[test]
    fn no_match_returns_none() {
        let registry = ParserRegistry::new(vec![Box::new(NeverMatch)]);
        let line = LogLine::new("anything", Utc::now());
        assert!(registry.match_line(ServerId::random(), &line).is_none());
    }

    #[test]
    fn empty_line_never_matches() {
        let registry = ParserRegistry::new(vec![Box::new(AlwaysMatch)]);
        let line = LogLine::new("", Utc::now());
        assert!(registry.match_line(ServerId::random(), &line).is_none());
    }
}
