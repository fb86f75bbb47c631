//! rollcall-vision: ONNX face extractor for the attendance pipeline.
//!
//! Decodes an encoded frame (JPEG, PNG, anything `image` reads), finds the
//! face with SCRFD, aligns it and embeds it with ArcFace.

pub mod alignment;
pub mod detector;
pub mod recognizer;

use image::RgbImage;
use rollcall_core::{Embedding, EmbeddingExtractor, ExtractError};
use std::path::Path;
use thiserror::Error;

pub use detector::{Detection, FaceDetector};
pub use recognizer::FaceRecognizer;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unusable model: {0}")]
    Model(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A frame with the one face chosen for embedding.
pub struct DetectedFace {
    pub frame: RgbImage,
    pub detection: Detection,
}

/// [`EmbeddingExtractor`] backed by ONNX Runtime sessions.
///
/// Sessions are not shared; build one extractor per worker thread.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    reject_multiple_faces: bool,
}

/// Intra-op threads per session when `workers` extractors share `cores`.
///
/// Each worker runs one session at a time, so the cores are split between
/// workers instead of every session claiming several of them.
pub fn session_threads(workers: usize, cores: usize) -> usize {
    (cores / workers.max(1)).max(1)
}

impl OnnxExtractor {
    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`, each
    /// session limited to `intra_threads` threads.
    pub fn load(model_dir: &Path, intra_threads: usize) -> Result<Self, VisionError> {
        Ok(Self {
            detector: FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE), intra_threads)?,
            recognizer: FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE), intra_threads)?,
            reject_multiple_faces: true,
        })
    }

    /// Embed the most confident face even when others are present.
    pub fn allow_multiple_faces(mut self) -> Self {
        self.reject_multiple_faces = false;
        self
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    type Face = DetectedFace;

    fn detect(&mut self, image: &[u8]) -> Result<Option<DetectedFace>, ExtractError> {
        let frame = match image::load_from_memory(image) {
            Ok(decoded) => decoded.to_rgb8(),
            Err(e) => {
                tracing::debug!(error = %e, "frame is not a decodable image");
                return Ok(None);
            }
        };
        let faces = self
            .detector
            .detect(&frame)
            .map_err(|e| ExtractError::Detection(e.to_string()))?;
        let count = faces.len();
        let Some(detection) = select_face(faces, self.reject_multiple_faces) else {
            tracing::debug!(faces = count, "no single face in frame");
            return Ok(None);
        };
        Ok(Some(DetectedFace { frame, detection }))
    }

    fn embed(&mut self, face: &DetectedFace) -> Result<Option<Embedding>, ExtractError> {
        let aligned = alignment::align_face(&face.frame, &face.detection.landmarks);
        self.recognizer
            .embed(&aligned)
            .map(Some)
            .map_err(|e| ExtractError::Embedding(e.to_string()))
    }
}

/// Pick the face to embed from detections sorted by descending score.
/// More than one face is ambiguous when `reject_multiple` is set.
pub fn select_face(mut faces: Vec<Detection>, reject_multiple: bool) -> Option<Detection> {
    if faces.is_empty() || (reject_multiple && faces.len() > 1) {
        return None;
    }
    Some(faces.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(score: f32) -> Detection {
        Detection {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            score,
            landmarks: [(0.0, 0.0); 5],
        }
    }

    #[test]
    fn test_select_face() {
        assert_eq!(select_face(vec![], true), None);
        assert_eq!(select_face(vec![face(0.9)], true), Some(face(0.9)));
        assert_eq!(select_face(vec![face(0.9), face(0.6)], true), None);
        assert_eq!(select_face(vec![face(0.9), face(0.6)], false), Some(face(0.9)));
    }

    #[test]
    fn test_session_threads_split_cores() {
        assert_eq!(session_threads(8, 8), 1);
        assert_eq!(session_threads(2, 8), 4);
        assert_eq!(session_threads(3, 8), 2);
        assert_eq!(session_threads(16, 8), 1);
        assert_eq!(session_threads(0, 4), 4);
        assert_eq!(session_threads(1, 0), 1);
    }

    #[test]
    fn test_missing_models_are_reported() {
        let dir = std::env::temp_dir().join("rollcall-vision-no-models");
        match OnnxExtractor::load(&dir, 1) {
            Err(VisionError::ModelNotFound(path)) => assert!(path.ends_with(DETECTOR_MODEL_FILE)),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("models should be missing"),
        }
    }
}
