//! Session schedule: parsing, validation and loading.
//!
//! A schedule is an ordered list of `{subject, start, end}` records, read
//! either from a JSON array or from TOML `[[session]]` tables. Windows that
//! wrap past midnight are rejected here rather than handled at run time.

use chrono::NaiveTime;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("failed to read schedule {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON schedule: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML schedule: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("session {index}: subject must not be empty")]
    EmptySubject { index: usize },
    #[error("session '{subject}': invalid time '{value}' (expected HH:MM)")]
    InvalidTime { subject: String, value: String },
    #[error("session '{subject}': end {end} is not after start {start}; overnight sessions are not supported")]
    InvertedWindow {
        subject: String,
        start: NaiveTime,
        end: NaiveTime,
    },
}

/// A scheduled capture window for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    subject: String,
    start: NaiveTime,
    end: NaiveTime,
}

impl Session {
    /// Build a session, rejecting empty and overnight windows.
    pub fn new(
        subject: impl Into<String>,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Self, ScheduleError> {
        let subject = subject.into();
        if end <= start {
            return Err(ScheduleError::InvertedWindow {
                subject,
                start,
                end,
            });
        }
        Ok(Self {
            subject,
            start,
            end,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }
}

/// Raw record as it appears in the configuration file.
#[derive(Debug, Deserialize)]
struct SessionEntry {
    subject: String,
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct TomlSchedule {
    #[serde(default)]
    session: Vec<SessionEntry>,
}

/// Ordered, validated list of sessions.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    sessions: Vec<Session>,
}

impl Schedule {
    pub fn new(sessions: Vec<Session>) -> Self {
        warn_on_overlap(&sessions);
        Self { sessions }
    }

    /// Parse the `[{"subject": .., "start": "HH:MM", "end": "HH:MM"}, ..]` form.
    pub fn from_json_str(src: &str) -> Result<Self, ScheduleError> {
        let entries: Vec<SessionEntry> = serde_json::from_str(src)?;
        Self::from_entries(entries)
    }

    /// Parse the `[[session]]` TOML form.
    pub fn from_toml_str(src: &str) -> Result<Self, ScheduleError> {
        let parsed: TomlSchedule = toml::from_str(src)?;
        Self::from_entries(parsed.session)
    }

    /// Load a schedule file; `.toml` files are read as TOML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ScheduleError> {
        let src = std::fs::read_to_string(path).map_err(|source| ScheduleError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let schedule = if is_toml {
            Self::from_toml_str(&src)?
        } else {
            Self::from_json_str(&src)?
        };

        tracing::info!(
            path = %path.display(),
            sessions = schedule.len(),
            "schedule loaded"
        );
        Ok(schedule)
    }

    fn from_entries(entries: Vec<SessionEntry>) -> Result<Self, ScheduleError> {
        let mut sessions = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let subject = entry.subject.trim().to_string();
            if subject.is_empty() {
                return Err(ScheduleError::EmptySubject { index });
            }
            let start = parse_time_of_day(&subject, &entry.start)?;
            let end = parse_time_of_day(&subject, &entry.end)?;
            sessions.push(Session::new(subject, start, end)?);
        }
        Ok(Self::new(sessions))
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Parse "HH:MM" (seconds are accepted but optional).
pub fn parse_time_of_day(subject: &str, value: &str) -> Result<NaiveTime, ScheduleError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| ScheduleError::InvalidTime {
            subject: subject.to_string(),
            value: value.to_string(),
        })
}

/// Sessions run strictly in order, so one that starts before its predecessor
/// ends will only get whatever is left of its window.
fn warn_on_overlap(sessions: &[Session]) {
    for pair in sessions.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.start < prev.end {
            tracing::warn!(
                previous = prev.subject(),
                previous_end = %prev.end,
                subject = next.subject(),
                start = %next.start,
                "session starts before the previous one ends; it will be shortened or missed"
            );
        }
    }
}
