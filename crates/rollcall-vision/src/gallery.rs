//! Known faces, one reference image per file.
//!
//! The label of an image is its file name up to the first `.`, so
//! `images/ana.jpg` and `images/2024/ana.front.png` both enroll `ana`.

use crate::pipeline::{FacePipeline, VisionError};
use crate::types::Embedding;
use image::GrayImage;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
    pub source: PathBuf,
}

/// Best gallery match for a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryMatch {
    pub label: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    /// Embed every reference image under `dir`. Images that fail to decode,
    /// have no detectable face, or fail inference are skipped with a warning.
    pub fn build(dir: &Path, pipeline: &mut FacePipeline) -> Result<Self, VisionError> {
        Self::build_with(dir, |image| pipeline.embed_largest(image))
    }

    /// [`build`](Self::build) with the embedding step supplied by the caller.
    pub fn build_with<F>(dir: &Path, mut embed: F) -> Result<Self, VisionError>
    where
        F: FnMut(&GrayImage) -> Result<Option<Embedding>, VisionError>,
    {
        let mut entries = Vec::new();
        for (label, path) in scan_images(dir)? {
            let image = match image::open(&path) {
                Ok(img) => img.to_luma8(),
                Err(source) => {
                    let err = VisionError::Image { path: path.clone(), source };
                    tracing::warn!(error = %err, "skipping reference image");
                    continue;
                }
            };
            match embed(&image) {
                Ok(Some(embedding)) => entries.push(GalleryEntry {
                    label,
                    embedding,
                    source: path,
                }),
                Ok(None) => tracing::warn!(path = %path.display(), "no face in reference image"),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to embed reference image; skipping"
                ),
            }
        }

        tracing::info!(dir = %dir.display(), faces = entries.len(), "gallery loaded");
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.entries.iter().map(|e| e.label.clone()).collect();
        labels.sort();
        labels.dedup();
        labels
    }

    /// Most similar entry, if its similarity reaches `threshold`.
    pub fn identify(&self, probe: &Embedding, threshold: f32) -> Option<GalleryMatch> {
        self.entries
            .iter()
            .map(|e| (e, probe.similarity(&e.embedding)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .filter(|(_, sim)| *sim >= threshold)
            .map(|(e, similarity)| GalleryMatch {
                label: e.label.clone(),
                similarity,
            })
    }
}

/// Label for a reference image path.
pub fn label_for(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let label = name.split('.').next()?.trim();
    (!label.is_empty()).then(|| label.to_string())
}

/// Reference images under `dir` (recursively), sorted by path.
pub fn scan_images(dir: &Path) -> Result<Vec<(String, PathBuf)>, VisionError> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let listing = std::fs::read_dir(&current).map_err(|source| VisionError::Io {
            path: current.clone(),
            source,
        })?;
        for entry in listing {
            let path = entry
                .map_err(|source| VisionError::Io {
                    path: current.clone(),
                    source,
                })?
                .path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if !is_image {
                continue;
            }
            if let Some(label) = label_for(&path) {
                found.push((label, path));
            }
        }
    }

    found.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(found)
}
