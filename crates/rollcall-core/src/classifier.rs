//! Identity classification.
//!
//! The pipeline only sees [`IdentityClassifier`]. [`KnnClassifier`] is the
//! bundled implementation: k-nearest-neighbours by cosine similarity over a
//! gallery of labelled embeddings produced offline.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_K: usize = 3;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("probe has {probe} dimensions, gallery has {gallery}")]
    DimensionMismatch { probe: usize, gallery: usize },
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read gallery {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse gallery: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("gallery is empty")]
    Empty,
    #[error("gallery entry {index} ({label}) has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("k must be at least 1")]
    InvalidK,
}

/// Result of classifying one probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Nearest known identity.
    Match { label: String, similarity: f32 },
    /// Nothing in the gallery was close enough.
    Unknown { similarity: f32 },
}

/// Embedding → identity label.
pub trait IdentityClassifier: Send + Sync {
    fn classify(&self, probe: &Embedding) -> Result<Classification, ClassifyError>;
}

/// One labelled training embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub label: String,
    pub values: Vec<f32>,
}

pub struct KnnClassifier {
    gallery: Vec<(String, Embedding)>,
    dim: usize,
    k: usize,
    min_similarity: Option<f32>,
}

impl KnnClassifier {
    /// Build a classifier over `entries`. All entries must share one dimension.
    ///
    /// `min_similarity = None` always answers with the nearest label, however far.
    pub fn new(
        entries: Vec<GalleryEntry>,
        k: usize,
        min_similarity: Option<f32>,
    ) -> Result<Self, GalleryError> {
        if k == 0 {
            return Err(GalleryError::InvalidK);
        }
        let dim = entries.first().map(|e| e.values.len()).ok_or(GalleryError::Empty)?;

        let mut gallery = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            if entry.values.len() != dim {
                return Err(GalleryError::DimensionMismatch {
                    index,
                    label: entry.label,
                    expected: dim,
                    actual: entry.values.len(),
                });
            }
            gallery.push((entry.label, Embedding::new(entry.values)));
        }

        Ok(Self {
            gallery,
            dim,
            k,
            min_similarity,
        })
    }

    /// Load a gallery written as a JSON array of `{label, values}` objects.
    pub fn from_json_file(
        path: &Path,
        k: usize,
        min_similarity: Option<f32>,
    ) -> Result<Self, GalleryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| GalleryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let entries: Vec<GalleryEntry> = serde_json::from_str(&raw)?;
        let classifier = Self::new(entries, k, min_similarity)?;
        tracing::info!(
            path = %path.display(),
            entries = classifier.len(),
            labels = classifier.label_count(),
            dim = classifier.dim,
            k,
            ?min_similarity,
            "gallery loaded"
        );
        Ok(classifier)
    }

    pub fn len(&self) -> usize {
        self.gallery.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gallery.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of distinct labels in the gallery.
    pub fn label_count(&self) -> usize {
        let mut labels: Vec<&str> = self.gallery.iter().map(|(l, _)| l.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        labels.len()
    }
}

impl IdentityClassifier for KnnClassifier {
    fn classify(&self, probe: &Embedding) -> Result<Classification, ClassifyError> {
        if probe.dim() != self.dim {
            return Err(ClassifyError::DimensionMismatch {
                probe: probe.dim(),
                gallery: self.dim,
            });
        }

        let mut scored: Vec<(f32, &str)> = self
            .gallery
            .iter()
            .map(|(label, emb)| (probe.similarity(emb), label.as_str()))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let Some(&(nearest, _)) = scored.first() else {
            return Ok(Classification::Unknown { similarity: 0.0 });
        };
        if let Some(min) = self.min_similarity {
            if nearest < min {
                return Ok(Classification::Unknown { similarity: nearest });
            }
        }

        // label -> (votes, best similarity among its votes)
        let mut votes: HashMap<&str, (usize, f32)> = HashMap::new();
        for &(sim, label) in scored.iter().take(self.k) {
            let slot = votes.entry(label).or_insert((0, f32::NEG_INFINITY));
            slot.0 += 1;
            slot.1 = slot.1.max(sim);
        }

        let winner = votes.into_iter().max_by(|a, b| {
            a.1 .0
                .cmp(&b.1 .0)
                .then(a.1 .1.partial_cmp(&b.1 .1).unwrap_or(std::cmp::Ordering::Equal))
        });
        let Some((label, (_, similarity))) = winner else {
            return Ok(Classification::Unknown { similarity: nearest });
        };

        Ok(Classification::Match {
            label: label.to_string(),
            similarity,
        })
    }
}
