use chrono::{DateTime, Utc};

/// A single line read off a log transport.
///
/// Lines are never reordered relative to source emission; the trailing
/// newline is stripped before a `LogLine` is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub raw_text: String,
    pub received_at: DateTime<Utc>,
}

impl LogLine {
    pub fn new(raw_text: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            raw_text: raw_text.into(),
            received_at,
        }
    }
}
