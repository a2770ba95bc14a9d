//! Best-frame selection: keeps the frame with the most faces per session.

use crate::ledger::StoreError;
use crate::types::BestFrameRecord;
use chrono::NaiveDateTime;
use thiserror::Error;

/// Winning frame of a finished session, ready to be persisted.
#[derive(Debug, Clone)]
pub struct BestFrame<F> {
    pub frame: F,
    pub subject: String,
    pub captured_at: NaiveDateTime,
    pub face_count: usize,
}

impl<F> BestFrame<F> {
    /// Metadata record for this frame once its image lives at `image_path`.
    pub fn record(&self, image_path: impl Into<String>) -> BestFrameRecord {
        BestFrameRecord {
            subject: self.subject.clone(),
            captured_at: self.captured_at,
            face_count: self.face_count,
            image_path: image_path.into(),
        }
    }
}

/// Running maximum of faces detected within one session.
#[derive(Debug)]
pub struct BestFrameTracker<F> {
    best: Option<(F, usize)>,
}

impl<F> Default for BestFrameTracker<F> {
    fn default() -> Self {
        Self { best: None }
    }
}

impl<F: Clone> BestFrameTracker<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a copy of `frame` if it beats the current maximum.
    ///
    /// Ties keep the earlier frame; a zero count never wins.
    pub fn observe(&mut self, frame: &F, face_count: usize) -> bool {
        if face_count <= self.max_faces() {
            return false;
        }
        self.best = Some((frame.clone(), face_count));
        true
    }

    pub fn max_faces(&self) -> usize {
        self.best.as_ref().map_or(0, |(_, n)| *n)
    }

    /// Hand over the winning frame and reset for the next session.
    pub fn finalize(&mut self, subject: &str, at: NaiveDateTime) -> Option<BestFrame<F>> {
        let (frame, face_count) = self.best.take()?;
        Some(BestFrame {
            frame,
            subject: subject.to_string(),
            captured_at: at,
            face_count,
        })
    }
}

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("frame cannot be encoded: {0}")]
    Encode(String),
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Frame-record store: accepts best-frame metadata.
pub trait FrameRecordStore {
    fn record_frame(&self, record: &BestFrameRecord) -> Result<(), StoreError>;
}

/// Persists a session's best frame: writes the image, then inserts its record.
pub trait EvidenceSink<F> {
    fn persist(&mut self, best: BestFrame<F>) -> Result<BestFrameRecord, EvidenceError>;
}
