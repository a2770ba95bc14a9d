//! Face engine backed by rollcall-vision: detect, embed, match the gallery.

use image::GrayImage;
use rollcall_core::{Detection, EngineError, FaceEngine};
use rollcall_hw::Frame;
use rollcall_vision::{Embedding, FaceBox, FacePipeline, Gallery, VisionError};

/// Detection and embedding models, split out so the matching logic can run
/// against fakes.
pub trait FaceModels {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceBox>, VisionError>;
    fn embed(&mut self, image: &GrayImage, face: &FaceBox) -> Result<Embedding, VisionError>;
}

impl FaceModels for FacePipeline {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceBox>, VisionError> {
        FacePipeline::detect(self, image)
    }

    fn embed(&mut self, image: &GrayImage, face: &FaceBox) -> Result<Embedding, VisionError> {
        FacePipeline::embed(self, image, face)
    }
}

pub struct VisionEngine<M = FacePipeline> {
    models: M,
    gallery: Gallery,
    threshold: f32,
}

impl<M: FaceModels> VisionEngine<M> {
    pub fn new(models: M, gallery: Gallery, threshold: f32) -> Self {
        Self {
            models,
            gallery,
            threshold,
        }
    }
}

impl<M: FaceModels> FaceEngine<Frame> for VisionEngine<M> {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<Detection>, EngineError> {
        if frame.is_dark {
            tracing::debug!(sequence = frame.sequence, "dark frame, skipping detection");
            return Ok(Vec::new());
        }
        let image = frame
            .to_image()
            .ok_or_else(|| format!("frame {} does not match its dimensions", frame.sequence))?;

        let faces = self.models.detect(&image)?;
        let mut detections = Vec::with_capacity(faces.len());
        for face in &faces {
            // A face that cannot be embedded still counts toward the frame total.
            let embedding = match self.models.embed(&image, face) {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "embedding failed, face left unidentified");
                    detections.push(Detection::unknown(face.score));
                    continue;
                }
            };
            match self.gallery.identify(&embedding, self.threshold) {
                Some(hit) => {
                    tracing::debug!(label = %hit.label, similarity = hit.similarity, "face matched");
                    detections.push(Detection::known(hit.label, hit.similarity));
                }
                None => detections.push(Detection::unknown(face.score)),
            }
        }
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_vision::GalleryEntry;
    use std::path::PathBuf;

    /// Returns fixed boxes; the embedding of a box is read off its x position.
    struct FakeModels {
        faces: Vec<FaceBox>,
        embeddings: Vec<(f32, Option<Vec<f32>>)>,
    }

    impl FaceModels for FakeModels {
        fn detect(&mut self, _: &GrayImage) -> Result<Vec<FaceBox>, VisionError> {
            Ok(self.faces.clone())
        }

        fn embed(&mut self, _: &GrayImage, face: &FaceBox) -> Result<Embedding, VisionError> {
            let values = self
                .embeddings
                .iter()
                .find(|(x, _)| *x == face.x)
                .and_then(|(_, v)| v.clone());
            values.map(Embedding::from_raw).ok_or_else(|| {
                VisionError::Embedder(rollcall_vision::embedder::EmbedderError::EmptyCrop(*face))
            })
        }
    }

    fn face_at(x: f32) -> FaceBox {
        FaceBox { x, y: 10.0, width: 20.0, height: 20.0, score: 0.8 }
    }

    fn gallery() -> Gallery {
        Gallery::from_entries(vec![
            GalleryEntry {
                label: "ana".into(),
                embedding: Embedding::from_raw(vec![1.0, 0.0, 0.0]),
                source: PathBuf::from("images/ana.jpg"),
            },
            GalleryEntry {
                label: "ben".into(),
                embedding: Embedding::from_raw(vec![0.0, 1.0, 0.0]),
                source: PathBuf::from("images/ben.jpg"),
            },
        ])
    }

    fn frame(level: u8) -> Frame {
        Frame::from_gray(vec![level; 64 * 48], 64, 48, 1)
    }

    #[test]
    fn test_known_unknown_and_failed_faces() {
        let models = FakeModels {
            faces: vec![face_at(0.0), face_at(30.0), face_at(60.0)],
            embeddings: vec![
                (0.0, Some(vec![0.1, 0.95, 0.0])),
                (30.0, Some(vec![0.0, 0.0, 1.0])),
                (60.0, None),
            ],
        };
        let mut engine = VisionEngine::new(models, gallery(), 0.4);
        let detections = engine.analyze(&frame(120)).unwrap();

        assert_eq!(detections.len(), 3);
        assert_eq!(detections[0].identity.as_deref(), Some("ben"));
        assert!(detections[1].identity.is_none());
        assert!(detections[2].identity.is_none());
    }

    #[test]
    fn test_dark_frame_has_no_faces() {
        let models = FakeModels {
            faces: vec![face_at(0.0)],
            embeddings: vec![(0.0, Some(vec![1.0, 0.0, 0.0]))],
        };
        let mut engine = VisionEngine::new(models, gallery(), 0.4);
        assert!(engine.analyze(&frame(0)).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_frame_is_an_error() {
        let models = FakeModels { faces: vec![], embeddings: vec![] };
        let mut engine = VisionEngine::new(models, gallery(), 0.4);
        let bad = Frame::from_gray(vec![100; 10], 64, 48, 9);
        assert!(engine.analyze(&bad).is_err());
    }
}
