use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp layout used for every persisted datetime ("2024-03-01 09:15:02").
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Attendance status recorded for a (person, subject) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::Late => "Late",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attendance status '{0}' (expected present, absent or late)")]
pub struct UnknownStatus(pub String);

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "late" => Ok(Self::Late),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// One append-only attendance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub person: String,
    pub subject: String,
    pub status: AttendanceStatus,
    pub timestamp: NaiveDateTime,
}

/// Uniqueness key for Present events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PresenceKey {
    pub person: String,
    pub subject: String,
}

impl PresenceKey {
    pub fn new(person: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            person: person.into(),
            subject: subject.into(),
        }
    }
}

/// A single face reported by a [`FaceEngine`](crate::sampler::FaceEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Gallery label of the matched identity; `None` (or empty) when unknown.
    pub identity: Option<String>,
    /// Detector or matcher confidence, informational only.
    pub confidence: f32,
}

impl Detection {
    pub fn known(identity: impl Into<String>, confidence: f32) -> Self {
        Self {
            identity: Some(identity.into()),
            confidence,
        }
    }

    pub fn unknown(confidence: f32) -> Self {
        Self {
            identity: None,
            confidence,
        }
    }
}

/// Normalized output of one sampled frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleResult {
    /// Every detected face, recognized or not.
    pub face_count: usize,
    /// Resolved identities only, in detection order.
    pub identities: Vec<String>,
}

impl SampleResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Metadata persisted alongside a session's best frame image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestFrameRecord {
    pub subject: String,
    pub captured_at: NaiveDateTime,
    pub face_count: usize,
    pub image_path: String,
}
