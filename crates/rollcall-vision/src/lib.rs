//! rollcall-vision — Face detection and recognition.
//!
//! SCRFD finds faces, ArcFace embeds them, and a [`Gallery`] built from a
//! folder of reference photos names them. Both models run on CPU through
//! ONNX Runtime.

pub mod detector;
pub mod embedder;
pub mod gallery;
pub mod pipeline;
pub mod types;

pub use gallery::{Gallery, GalleryEntry, GalleryMatch};
pub use pipeline::{default_model_dir, FacePipeline, VisionError};
pub use types::{Embedding, FaceBox};
