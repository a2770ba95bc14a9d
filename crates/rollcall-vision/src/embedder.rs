//! ArcFace embedder via ONNX Runtime.
//!
//! Faces are cropped to a padded square around the detector box and scaled
//! to 112x112 before inference.

use crate::types::{Embedding, FaceBox};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
/// Extra context kept around the detector box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face box {0:?} lies outside the frame")]
    EmptyCrop(FaceBox),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the ArcFace model (e.g. `w600k_r50.onnx`).
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Embed the face inside `face`.
    pub fn embed(&mut self, frame: &GrayImage, face: &FaceBox) -> Result<Embedding, EmbedderError> {
        let crop = crop_face(frame, face)?;
        let input = to_tensor(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding output: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM} values, got {}",
                raw.len()
            )));
        }
        Ok(Embedding::from_raw(raw.to_vec()))
    }
}

fn crop_face(frame: &GrayImage, face: &FaceBox) -> Result<GrayImage, EmbedderError> {
    let (x, y, side) = face
        .square_crop(CROP_MARGIN, frame.width(), frame.height())
        .ok_or(EmbedderError::EmptyCrop(*face))?;
    let region = imageops::crop_imm(frame, x, y, side, side).to_image();
    Ok(imageops::resize(&region, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
}

/// Grayscale crop into a 3-channel NCHW tensor.
fn to_tensor(crop: &GrayImage) -> Array4<f32> {
    let side = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in crop.enumerate_pixels() {
        let v = (pixel.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }
    tensor
}
