//! One line of the acknowledgment log.
//!
//! ```text
//! Message acknowledged: Id = 0; DateTime = 2024-03-01T10:00:00.123Z; Instant = 1709287200
//! Message received: Id = 0; DateTime = 2024-03-01T10:00:01.456Z; Instant = 1709287201
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// What happened to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// the broker confirmed a published message
    Acknowledged,
    /// a message was consumed from the queue
    Received,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            EventKind::Acknowledged => "acknowledged",
            EventKind::Received => "received",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub kind: EventKind,
    pub id: String,
    pub at: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(kind: EventKind, id: impl Into<String>, at: DateTime<Utc>) -> Self {
        LogRecord {
            kind,
            id: id.into(),
            at,
        }
    }

    /// record for a publish confirmation, stamped now
    pub fn acknowledged(id: impl Into<String>) -> Self {
        Self::new(EventKind::Acknowledged, id, Utc::now())
    }

    /// record for a consumed message, stamped now
    pub fn received(id: impl Into<String>) -> Self {
        Self::new(EventKind::Received, id, Utc::now())
    }

    /// seconds since the unix epoch
    pub fn epoch_seconds(&self) -> i64 {
        self.at.timestamp()
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Message {}: Id = {}; DateTime = {}; Instant = {}",
            self.kind,
            self.id,
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.epoch_seconds()
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("line does not start with a known event")]
    UnknownEvent,
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("bad timestamp '{0}'")]
    BadTimestamp(String),
    #[error("DateTime and Instant disagree")]
    InconsistentInstant,
}

fn field<'a>(part: Option<&'a str>, name: &'static str) -> Result<&'a str, RecordParseError> {
    part.map(str::trim)
        .and_then(|p| p.strip_prefix(name))
        .and_then(|p| p.trim_start().strip_prefix('='))
        .map(str::trim)
        .ok_or(RecordParseError::MissingField(name))
}

impl FromStr for LogRecord {
    type Err = RecordParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
        let (kind, rest) = if let Some(rest) = line.strip_prefix("Message acknowledged:") {
            (EventKind::Acknowledged, rest)
        } else if let Some(rest) = line.strip_prefix("Message received:") {
            (EventKind::Received, rest)
        } else {
            return Err(RecordParseError::UnknownEvent);
        };

        let mut parts = rest.split(';');
        let id = field(parts.next(), "Id")?;
        let date_time = field(parts.next(), "DateTime")?;
        let instant = field(parts.next(), "Instant")?;

        let at = DateTime::parse_from_rfc3339(date_time)
            .map_err(|_| RecordParseError::BadTimestamp(date_time.to_owned()))?
            .with_timezone(&Utc);
        let instant: i64 = instant
            .parse()
            .map_err(|_| RecordParseError::BadTimestamp(instant.to_owned()))?;
        if instant != at.timestamp() {
            return Err(RecordParseError::InconsistentInstant);
        }

        Ok(LogRecord::new(kind, id, at))
    }
}
