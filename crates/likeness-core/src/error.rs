use crate::similarity::SimilarityError;
use thiserror::Error;

/// Unexpected failure while running the analysis pipeline on an image.
///
/// "No face found" is not an error; analyzers report it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("image dimensions are zero")]
    ZeroDimensions,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("descriptor comparison failed: {0}")]
    Similarity(#[from] SimilarityError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}
