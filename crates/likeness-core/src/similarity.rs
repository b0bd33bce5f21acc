//! Descriptor comparison: Euclidean distance mapped to a 0–100 similarity.

use crate::types::{Embedding, FaceAnalysis};
use serde::Serialize;
use thiserror::Error;

/// Minimum similarity percentage for a match. Fixed; not configurable.
pub const MATCH_THRESHOLD: u8 = 60;

#[derive(Error, Debug, PartialEq)]
pub enum SimilarityError {
    #[error("descriptor length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("descriptors are empty")]
    Empty,
}

/// Similarity percentage between two descriptors.
///
/// `round(max(0, (1 - distance) * 100))`. Distances of 1 or more clamp to 0.
pub fn score(a: &Embedding, b: &Embedding) -> Result<u8, SimilarityError> {
    Ok(percent_from_distance(checked_distance(a, b)?))
}

/// Euclidean distance, rejecting descriptors of different lengths.
pub fn checked_distance(a: &Embedding, b: &Embedding) -> Result<f32, SimilarityError> {
    if a.values.len() != b.values.len() {
        return Err(SimilarityError::LengthMismatch {
            left: a.values.len(),
            right: b.values.len(),
        });
    }
    if a.values.is_empty() {
        return Err(SimilarityError::Empty);
    }
    Ok(a.euclidean_distance(b))
}

pub fn percent_from_distance(distance: f32) -> u8 {
    let similarity = ((1.0 - distance) * 100.0).max(0.0);
    similarity.round().min(100.0) as u8
}

pub fn is_match(similarity_percent: u8) -> bool {
    similarity_percent >= MATCH_THRESHOLD
}

/// Outcome of comparing a reference face with a comparison face.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub is_match: bool,
    pub similarity_percent: u8,
    pub distance: f32,
    pub reference: FaceAnalysis,
    pub comparison: FaceAnalysis,
}

impl ComparisonResult {
    pub fn from_analyses(
        reference: FaceAnalysis,
        comparison: FaceAnalysis,
    ) -> Result<Self, SimilarityError> {
        let distance = checked_distance(&reference.descriptor, &comparison.descriptor)?;
        let similarity_percent = percent_from_distance(distance);
        Ok(Self {
            is_match: is_match(similarity_percent),
            similarity_percent,
            distance,
            reference,
            comparison,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    #[test]
    fn test_identical_descriptors_score_100() {
        let a = emb(&[0.1, -0.4, 0.9]);
        assert_eq!(score(&a, &a.clone()), Ok(100));
        assert!(is_match(100));
    }

    #[test]
    fn test_distance_one_or_more_scores_zero() {
        let a = emb(&[0.0, 0.0]);
        assert_eq!(score(&a, &emb(&[1.0, 0.0])), Ok(0));
        assert_eq!(score(&a, &emb(&[3.0, 4.0])), Ok(0));
        assert!(!is_match(0));
    }

    #[test]
    fn test_score_is_symmetric() {
        let a = emb(&[0.12, 0.33, -0.25, 0.08]);
        let b = emb(&[0.02, 0.41, -0.05, 0.11]);
        assert_eq!(score(&a, &b), score(&b, &a));
    }

    #[test]
    fn test_rounding() {
        // distance 0.254 → 74.6 → 75
        assert_eq!(percent_from_distance(0.254), 75);
        // distance 0.256 → 74.4 → 74
        assert_eq!(percent_from_distance(0.256), 74);
    }

    #[test]
    fn test_match_threshold_boundary() {
        assert!(is_match(60));
        assert!(!is_match(59));
        assert_eq!(percent_from_distance(0.4), 60);
        assert_eq!(percent_from_distance(0.41), 59);
    }

    #[test]
    fn test_length_mismatch() {
        let err = score(&emb(&[1.0]), &emb(&[1.0, 2.0])).unwrap_err();
        assert_eq!(err, SimilarityError::LengthMismatch { left: 1, right: 2 });
    }

    #[test]
    fn test_empty_descriptors() {
        assert_eq!(score(&emb(&[]), &emb(&[])), Err(SimilarityError::Empty));
    }
}
