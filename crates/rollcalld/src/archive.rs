//! Best-frame evidence: JPEG on disk plus a row in the frame table.

use image::{ImageError, ImageFormat};
use rollcall_core::{BestFrame, BestFrameRecord, EvidenceError, EvidenceSink, FrameRecordStore};
use rollcall_hw::Frame;
use std::path::PathBuf;

pub struct EvidenceArchive<R> {
    dir: PathBuf,
    records: R,
}

impl<R: FrameRecordStore> EvidenceArchive<R> {
    pub fn new(dir: impl Into<PathBuf>, records: R) -> Self {
        Self {
            dir: dir.into(),
            records,
        }
    }

    /// `<dir>/<timestamp>_<subject>_best.jpg`, suffixed `_2`, `_3`, ... when
    /// that name is already taken.
    fn image_path(&self, best: &BestFrame<Frame>) -> PathBuf {
        let stem = format!(
            "{}_{}_best",
            best.captured_at.format("%Y%m%d_%H%M%S"),
            file_safe(&best.subject)
        );
        let mut path = self.dir.join(format!("{stem}.jpg"));
        let mut n = 2;
        while path.exists() {
            path = self.dir.join(format!("{stem}_{n}.jpg"));
            n += 1;
        }
        path
    }
}

impl<R: FrameRecordStore> EvidenceSink<Frame> for EvidenceArchive<R> {
    fn persist(&mut self, best: BestFrame<Frame>) -> Result<BestFrameRecord, EvidenceError> {
        let path = self.image_path(&best);
        let display = path.display().to_string();

        std::fs::create_dir_all(&self.dir).map_err(|source| EvidenceError::Write {
            path: self.dir.display().to_string(),
            source,
        })?;

        let image = best.frame.to_image().ok_or_else(|| {
            EvidenceError::Encode(format!(
                "frame {} has {} bytes for {}x{}",
                best.frame.sequence,
                best.frame.data.len(),
                best.frame.width,
                best.frame.height
            ))
        })?;
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| match e {
                ImageError::IoError(source) => EvidenceError::Write {
                    path: display.clone(),
                    source,
                },
                other => EvidenceError::Encode(other.to_string()),
            })?;

        let record = best.record(display);
        self.records.record_frame(&record)?;
        tracing::debug!(path = %record.image_path, "evidence image written");
        Ok(record)
    }
}

fn file_safe(subject: &str) -> String {
    subject
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
