use chrono::{Local, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use std::fmt::Display;
use std::sync::LazyLock;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static LINE_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(?P<time>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\] \[(?P<level>[A-Z]+?)\]: (?P<message>.*)$",
    )
    .expect("log line grammar must be a valid regex")
});

/// Severity a worker attached to a log line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum RecordLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
    /// Any other uppercase word the worker used as a level.
    Other(String),
}

impl RecordLevel {
    pub fn as_str(&self) -> &str {
        match self {
            RecordLevel::Debug => "DEBUG",
            RecordLevel::Info => "INFO",
            RecordLevel::Warning => "WARNING",
            RecordLevel::Error => "ERROR",
            RecordLevel::Fatal => "FATAL",
            RecordLevel::Other(level) => level,
        }
    }
}

impl From<&str> for RecordLevel {
    fn from(value: &str) -> Self {
        match value {
            "DEBUG" => RecordLevel::Debug,
            "INFO" => RecordLevel::Info,
            "WARNING" => RecordLevel::Warning,
            "ERROR" => RecordLevel::Error,
            "FATAL" => RecordLevel::Fatal,
            other => RecordLevel::Other(other.to_string()),
        }
    }
}

impl From<RecordLevel> for String {
    fn from(value: RecordLevel) -> Self {
        value.as_str().to_string()
    }
}

impl Display for RecordLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the worker's combined output.
///
/// Lines following `[YYYY-MM-DD HH:MM:SS] [LEVEL]: message` are [`LogRecord::Parsed`]; anything
/// else keeps only the raw text and the moment it was captured.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    Parsed {
        raw: String,
        timestamp: NaiveDateTime,
        level: RecordLevel,
        message: String,
    },
    Unparsed {
        raw: String,
        captured_at: NaiveDateTime,
    },
}

impl LogRecord {
    /// Parses a single output line. Never fails: lines outside the grammar, including empty ones,
    /// become [`LogRecord::Unparsed`].
    pub fn parse(line: &str) -> Self {
        Self::try_parse(line).unwrap_or_else(|| LogRecord::Unparsed {
            raw: line.to_string(),
            captured_at: Local::now().naive_local(),
        })
    }

    fn try_parse(line: &str) -> Option<Self> {
        let captures = LINE_GRAMMAR.captures(line)?;
        // The grammar accepts impossible dates such as month 13.
        let timestamp = NaiveDateTime::parse_from_str(&captures["time"], TIMESTAMP_FORMAT).ok()?;

        Some(LogRecord::Parsed {
            raw: line.to_string(),
            timestamp,
            level: RecordLevel::from(&captures["level"]),
            message: captures["message"].to_string(),
        })
    }

    pub fn raw(&self) -> &str {
        match self {
            LogRecord::Parsed { raw, .. } | LogRecord::Unparsed { raw, .. } => raw,
        }
    }

    /// Parsed timestamp, or the capture time for unparsed lines.
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            LogRecord::Parsed { timestamp, .. } => *timestamp,
            LogRecord::Unparsed { captured_at, .. } => *captured_at,
        }
    }

    pub fn level(&self) -> Option<&RecordLevel> {
        match self {
            LogRecord::Parsed { level, .. } => Some(level),
            LogRecord::Unparsed { .. } => None,
        }
    }

    pub fn parsed_message(&self) -> Option<&str> {
        match self {
            LogRecord::Parsed { message, .. } => Some(message),
            LogRecord::Unparsed { .. } => None,
        }
    }

    /// Message of the line, falling back to the raw text.
    pub fn message(&self) -> &str {
        self.parsed_message().unwrap_or_else(|| self.raw())
    }
}
