//! Detector + embedder pair loaded from one model directory.

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::{Embedding, FaceBox};
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const EMBEDDER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Model directory used when none is configured: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}

pub struct FacePipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl FacePipeline {
    pub fn new(detector: FaceDetector, embedder: FaceEmbedder) -> Self {
        Self { detector, embedder }
    }

    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, VisionError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let embedder = FaceEmbedder::load(&model_dir.join(EMBEDDER_MODEL_FILE))?;
        Ok(Self::new(detector, embedder))
    }

    pub fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>, VisionError> {
        Ok(self.detector.detect(frame)?)
    }

    pub fn embed(&mut self, frame: &GrayImage, face: &FaceBox) -> Result<Embedding, VisionError> {
        Ok(self.embedder.embed(frame, face)?)
    }

    /// Embedding of the largest face in `frame`, if any face is found.
    pub fn embed_largest(&mut self, frame: &GrayImage) -> Result<Option<Embedding>, VisionError> {
        let faces = self.detect(frame)?;
        let Some(largest) = faces.iter().max_by(|a, b| a.area().total_cmp(&b.area())) else {
            return Ok(None);
        };
        self.embed(frame, largest).map(Some)
    }
}
