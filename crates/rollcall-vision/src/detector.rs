//! SCRFD face detector via ONNX Runtime.
//!
//! The frame is letterboxed into a 640x640 square, run through the model and
//! decoded from the three stride heads (8, 16, 32). Overlapping boxes are
//! removed with greedy non-maximum suppression.

use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected model layout: {0}")]
    BadModel(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Mapping from letterboxed model space back to frame space.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let (new_w, new_h) = Self::scaled(width, height, scale);
        Self {
            scale,
            pad_x: ((INPUT_SIZE - new_w) / 2) as f32,
            pad_y: ((INPUT_SIZE - new_h) / 2) as f32,
        }
    }

    fn scaled(width: u32, height: u32, scale: f32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        (w, h)
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Head {
    score: usize,
    bbox: usize,
}

/// SCRFD face detector.
pub struct FaceDetector {
    session: Session,
    heads: [Head; 3],
    score_threshold: f32,
    nms_threshold: f32,
}

impl FaceDetector {
    /// Load the SCRFD model (e.g. `det_10g.onnx`).
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 6 {
            return Err(DetectorError::BadModel(format!(
                "expected score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }
        let heads = locate_heads(&names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            heads = ?heads,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            heads,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, letterbox) = letterbox_tensor(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (head, &stride) in self.heads.iter().zip(STRIDES.iter()) {
            let (_, scores) = outputs[head.score].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores for stride {stride}: {e}"))
            })?;
            let (_, boxes) = outputs[head.bbox].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("boxes for stride {stride}: {e}"))
            })?;
            decode_head(
                scores,
                boxes,
                stride,
                &letterbox,
                self.score_threshold,
                &mut candidates,
            );
        }

        Ok(suppress(candidates, self.nms_threshold))
    }
}

/// Find the score and bbox outputs per stride by name (`score_8`, `bbox_8`, ...),
/// falling back to the stock export order of scores, then boxes, then keypoints.
fn locate_heads(names: &[String]) -> [Head; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<Head>> = STRIDES
        .iter()
        .map(|&s| {
            Some(Head {
                score: position("score", s)?,
                bbox: position("bbox", s)?,
            })
        })
        .collect();

    match named {
        Some(heads) => [heads[0], heads[1], heads[2]],
        None => {
            tracing::debug!(?names, "SCRFD outputs unnamed, using positional layout");
            [
                Head { score: 0, bbox: 3 },
                Head { score: 1, bbox: 4 },
                Head { score: 2, bbox: 5 },
            ]
        }
    }
}

/// Resize into a padded 640x640 NCHW tensor. Padding normalizes to zero.
fn letterbox_tensor(frame: &GrayImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width(), frame.height());
    let (new_w, new_h) = Letterbox::scaled(frame.width(), frame.height(), letterbox.scale);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let v = (pixel.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        let (tx, ty) = (ox + x as usize, oy + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }
    (tensor, letterbox)
}

/// Decode one stride head. Anchors sit at the top-left of each grid cell and
/// box offsets are distances (left, top, right, bottom) in stride units.
fn decode_head(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
    out: &mut Vec<FaceBox>,
) {
    let cells = INPUT_SIZE as usize / stride;
    let step = stride as f32;

    for row in 0..cells {
        for col in 0..cells {
            for k in 0..ANCHORS_PER_CELL {
                let idx = (row * cells + col) * ANCHORS_PER_CELL + k;
                let Some(&score) = scores.get(idx) else {
                    return;
                };
                if score <= threshold {
                    continue;
                }
                let Some(d) = boxes.get(idx * 4..idx * 4 + 4) else {
                    return;
                };

                let (ax, ay) = (col as f32 * step, row as f32 * step);
                let (x1, y1) = letterbox.to_frame(ax - d[0] * step, ay - d[1] * step);
                let (x2, y2) = letterbox.to_frame(ax + d[2] * step, ay + d[3] * step);
                out.push(FaceBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    score,
                });
            }
        }
    }
}

/// Greedy non-maximum suppression. Returns survivors sorted by score.
fn suppress(mut candidates: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<FaceBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
