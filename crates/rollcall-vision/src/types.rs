use serde::{Deserialize, Serialize};

/// A detected face in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub score: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Square region centred on the box, grown by `margin` on each side and
    /// clamped to a `frame_w` x `frame_h` frame. Returns `(x, y, side)`.
    pub fn square_crop(&self, margin: f32, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32)> {
        let side = self.width.max(self.height) * (1.0 + 2.0 * margin);
        let cx = self.x + self.width / 2.0;
        let cy = self.y + self.height / 2.0;

        let x0 = (cx - side / 2.0).max(0.0);
        let y0 = (cy - side / 2.0).max(0.0);
        let x1 = (cx + side / 2.0).min(frame_w as f32);
        let y1 = (cy + side / 2.0).min(frame_h as f32);

        let side = (x1 - x0).min(y1 - y0).floor();
        if side < 1.0 {
            return None;
        }
        Some((x0.floor() as u32, y0.floor() as u32, side as u32))
    }
}

/// L2-normalized face embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Normalize raw model output to unit length.
    pub fn from_raw(raw: Vec<f32>) -> Self {
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.into_iter().map(|v| v / norm).collect()
        } else {
            raw
        };
        Self { values }
    }

    /// Cosine similarity in [-1, 1]; 0.0 when either side is a zero vector.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
        for (a, b) in self.values.iter().zip(&other.values) {
            dot += a * b;
            na += a * a;
            nb += b * b;
        }
        let denom = na.sqrt() * nb.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}
