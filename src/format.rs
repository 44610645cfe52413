use crate::remote::RawEvent;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("regex compilation failed: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("pattern '{0}' has no named capture groups")]
    NoNamedGroups(String),
}

/// Unit handed to the downstream sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub tag: String,
    /// Event time in whole seconds since the epoch.
    pub time: i64,
    #[serde(rename = "record")]
    pub fields: Map<String, Value>,
}

#[derive(Debug)]
enum Mode {
    Json,
    Pattern(Regex),
}

/// Turns raw log messages into records.
///
/// Never fails on message content: non-JSON input is wrapped as
/// `{"message": ...}` and an unmatched pattern yields no fields.
#[derive(Debug)]
pub struct RecordFormatter {
    mode: Mode,
    json_fallback_reported: AtomicBool,
    pattern_miss_reported: AtomicBool,
}

impl RecordFormatter {
    pub fn json() -> Self {
        Self::with_mode(Mode::Json)
    }

    /// Build a pattern formatter. `/.../` delimiters around the pattern are
    /// stripped, so both `^(?<a>.*)$` and `/^(?<a>.*)$/` are accepted.
    pub fn pattern(pattern: &str) -> Result<Self, FormatError> {
        let body = strip_delimiters(pattern);
        let regex = Regex::new(body)?;

        if regex.capture_names().flatten().next().is_none() {
            return Err(FormatError::NoNamedGroups(body.to_string()));
        }

        Ok(Self::with_mode(Mode::Pattern(regex)))
    }

    pub fn from_config(format: Option<&str>) -> Result<Self, FormatError> {
        match format {
            Some(pattern) => Self::pattern(pattern),
            None => Ok(Self::json()),
        }
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            json_fallback_reported: AtomicBool::new(false),
            pattern_miss_reported: AtomicBool::new(false),
        }
    }

    pub fn format(&self, tag: &str, event: &RawEvent) -> Record {
        Record {
            tag: tag.to_string(),
            time: time_seconds(event.timestamp_ms),
            fields: self.fields(&event.message),
        }
    }

    pub fn fields(&self, message: &str) -> Map<String, Value> {
        match &self.mode {
            Mode::Json => self.json_fields(message),
            Mode::Pattern(regex) => self.pattern_fields(regex, message),
        }
    }

    fn json_fields(&self, message: &str) -> Map<String, Value> {
        match serde_json::from_str::<Value>(message) {
            Ok(Value::Object(map)) => map,
            _ => {
                if !self.json_fallback_reported.swap(true, Ordering::Relaxed) {
                    warn!(
                        "Log message is not a JSON object, wrapping as {{\"message\": ...}} (reported once)"
                    );
                } else {
                    debug!("Wrapping non-JSON log message");
                }
                let mut map = Map::new();
                map.insert("message".to_string(), Value::String(message.to_string()));
                map
            }
        }
    }

    fn pattern_fields(&self, regex: &Regex, message: &str) -> Map<String, Value> {
        let mut map = Map::new();

        let Some(captures) = regex.captures(message) else {
            if !self.pattern_miss_reported.swap(true, Ordering::Relaxed) {
                warn!(
                    pattern = %regex.as_str(),
                    "Log message did not match format pattern, emitting no fields (reported once)"
                );
            } else {
                debug!("Log message did not match format pattern");
            }
            return map;
        };

        for name in regex.capture_names().flatten() {
            if let Some(value) = captures.name(name) {
                map.insert(name.to_string(), Value::String(value.as_str().to_string()));
            }
        }

        map
    }
}


fn strip_delimiters(pattern: &str) -> &str {
    pattern
        .strip_prefix('/')
        .and_then(|p| p.strip_suffix('/'))
        .unwrap_or(pattern)
}

/// Whole seconds for a millisecond timestamp, rounding toward negative infinity.
pub fn time_seconds(timestamp_ms: i64) -> i64 {
    timestamp_ms.div_euclid(1000)
}
