//! Frame analysis: detection → embedding → classification.
//!
//! [`analyze_frame`] is the synchronous, CPU-bound half of the pipeline.
//! [`FrameAnalyzer`] is how the async half reaches it; the daemon implements
//! it with a pool of worker threads, [`InlineAnalyzer`] runs it in place.

use crate::classifier::{Classification, ClassifyError, IdentityClassifier};
use crate::extractor::EmbeddingExtractor;
use crate::pipeline::Stage;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// What a frame turned out to contain.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// No single usable face.
    NoFace,
    /// The extractor hit an unexpected fault. Answered like `NoFace`, but logged as an error.
    ExtractionFault(String),
    /// A face, but nobody in the gallery is close enough.
    Unknown { similarity: f32 },
    /// A face classified to `label`.
    Identified { label: String, similarity: f32 },
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait FrameAnalyzer: Send + Sync {
    async fn analyze(&self, frame: Arc<[u8]>) -> Result<Recognition, AnalyzeError>;
}

/// Run one frame through `extractor` and `classifier`.
pub fn analyze_frame<E, C>(
    extractor: &mut E,
    classifier: &C,
    frame: &[u8],
) -> Result<Recognition, AnalyzeError>
where
    E: EmbeddingExtractor + ?Sized,
    C: IdentityClassifier + ?Sized,
{
    tracing::trace!(stage = %Stage::Detecting, bytes = frame.len());
    let face = match extractor.detect(frame) {
        Ok(Some(face)) => face,
        Ok(None) => return Ok(Recognition::NoFace),
        Err(e) => return Ok(Recognition::ExtractionFault(e.to_string())),
    };

    tracing::trace!(stage = %Stage::Embedding);
    let embedding = match extractor.embed(&face) {
        Ok(Some(embedding)) => embedding,
        Ok(None) => return Ok(Recognition::NoFace),
        Err(e) => return Ok(Recognition::ExtractionFault(e.to_string())),
    };

    tracing::trace!(stage = %Stage::Classifying, dim = embedding.dim());
    Ok(match classifier.classify(&embedding)? {
        Classification::Match { label, similarity } => Recognition::Identified { label, similarity },
        Classification::Unknown { similarity } => Recognition::Unknown { similarity },
    })
}

/// Analyzer that runs on the calling task. Fine for tests and light loads;
/// extraction blocks the executor thread while it runs.
pub struct InlineAnalyzer<E, C> {
    extractor: Mutex<E>,
    classifier: Arc<C>,
}

impl<E, C> InlineAnalyzer<E, C> {
    pub fn new(extractor: E, classifier: Arc<C>) -> Self {
        Self {
            extractor: Mutex::new(extractor),
            classifier,
        }
    }
}

#[async_trait]
impl<E, C> FrameAnalyzer for InlineAnalyzer<E, C>
where
    E: EmbeddingExtractor + Send,
    C: IdentityClassifier,
{
    async fn analyze(&self, frame: Arc<[u8]>) -> Result<Recognition, AnalyzeError> {
        let mut extractor = self
            .extractor
            .lock()
            .map_err(|_| AnalyzeError::Unavailable("extractor lock poisoned".into()))?;
        analyze_frame(&mut *extractor, self.classifier.as_ref(), &frame)
    }
}
