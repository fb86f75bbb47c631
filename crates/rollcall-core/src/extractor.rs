//! Embedding extraction capability.
//!
//! `Ok(None)` from either step is a definite "no usable face" and is an
//! ordinary branch of the pipeline. `Err` is reserved for faults the
//! extractor did not expect (inference runtime failures and the like).

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("detection fault: {0}")]
    Detection(String),
    #[error("embedding fault: {0}")]
    Embedding(String),
}

/// Image → optional face → optional embedding.
///
/// Methods take `&mut self` because inference sessions are usually
/// single-threaded; give each worker its own instance.
pub trait EmbeddingExtractor {
    /// A located face, in whatever form `embed` needs.
    type Face;

    /// Decode the encoded image and locate exactly one face.
    ///
    /// Undecodable images and ambiguous frames (several faces) are `Ok(None)`.
    fn detect(&mut self, image: &[u8]) -> Result<Option<Self::Face>, ExtractError>;

    /// Compute the embedding of a detected face.
    fn embed(&mut self, face: &Self::Face) -> Result<Option<Embedding>, ExtractError>;

    fn detect_and_embed(&mut self, image: &[u8]) -> Result<Option<Embedding>, ExtractError> {
        match self.detect(image)? {
            Some(face) => self.embed(&face),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Treats the first byte as a face id; 0 means no face, 0xFF means fault.
    struct ByteExtractor;

    impl EmbeddingExtractor for ByteExtractor {
        type Face = u8;

        fn detect(&mut self, image: &[u8]) -> Result<Option<u8>, ExtractError> {
            match image.first() {
                Some(0xFF) => Err(ExtractError::Detection("boom".into())),
                Some(0) | None => Ok(None),
                Some(&b) => Ok(Some(b)),
            }
        }

        fn embed(&mut self, face: &u8) -> Result<Option<Embedding>, ExtractError> {
            Ok(Some(Embedding::new(vec![*face as f32])))
        }
    }

    #[test]
    fn test_detect_and_embed_face() {
        let emb = ByteExtractor.detect_and_embed(&[3]).unwrap().unwrap();
        assert_eq!(emb.values, vec![3.0]);
    }

    #[test]
    fn test_detect_and_embed_no_face() {
        assert!(ByteExtractor.detect_and_embed(&[]).unwrap().is_none());
        assert!(ByteExtractor.detect_and_embed(&[0]).unwrap().is_none());
    }

    #[test]
    fn test_detect_and_embed_fault_propagates() {
        assert!(matches!(
            ByteExtractor.detect_and_embed(&[0xFF]),
            Err(ExtractError::Detection(_))
        ));
    }
}
