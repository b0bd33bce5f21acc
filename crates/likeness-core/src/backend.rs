//! The analysis seam: anything that can find and describe a face.

use crate::attributes::{AgeGenderEstimator, ExpressionClassifier};
use crate::detector::FaceDetector;
use crate::error::AnalysisError;
use crate::landmarks::LandmarkDetector;
use crate::models::{ModelError, ModelKind};
use crate::recognizer::FaceRecognizer;
use crate::types::{BoundingBox, FaceAnalysis};
use image::RgbImage;
use std::collections::HashMap;

/// Single-threaded face analysis backend.
///
/// Only the highest-confidence face is considered. An image without a face
/// yields `Ok(None)`; errors are reserved for unexpected failures.
pub trait FaceBackend: Send + 'static {
    /// Detection pass only, used for live sampling.
    fn detect(&mut self, image: &RgbImage) -> Result<Option<BoundingBox>, AnalysisError>;

    /// Detection, landmarks, descriptor, expressions and age/gender.
    fn analyze(&mut self, image: &RgbImage) -> Result<Option<FaceAnalysis>, AnalysisError>;
}

/// ONNX Runtime backend built from the five model files.
pub struct OnnxBackend {
    detector: FaceDetector,
    landmarks: LandmarkDetector,
    recognizer: FaceRecognizer,
    expressions: ExpressionClassifier,
    age_gender: AgeGenderEstimator,
}

impl OnnxBackend {
    /// Build every session from fetched model bytes. Blocking.
    pub fn from_models(
        mut models: HashMap<ModelKind, Vec<u8>>,
        intra_threads: usize,
    ) -> Result<Self, ModelError> {
        let mut take = |kind: ModelKind| {
            models
                .remove(&kind)
                .ok_or_else(|| ModelError::NotFound(kind.file_name().to_string()))
        };

        Ok(Self {
            detector: FaceDetector::from_bytes(&take(ModelKind::Detector)?, intra_threads)?,
            landmarks: LandmarkDetector::from_bytes(&take(ModelKind::Landmarks)?, intra_threads)?,
            recognizer: FaceRecognizer::from_bytes(&take(ModelKind::Recognition)?, intra_threads)?,
            expressions: ExpressionClassifier::from_bytes(&take(ModelKind::Expression)?, intra_threads)?,
            age_gender: AgeGenderEstimator::from_bytes(&take(ModelKind::AgeGender)?, intra_threads)?,
        })
    }
}

impl FaceBackend for OnnxBackend {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<BoundingBox>, AnalysisError> {
        self.detector.detect_single(image)
    }

    fn analyze(&mut self, image: &RgbImage) -> Result<Option<FaceAnalysis>, AnalysisError> {
        let Some(detection) = self.detector.detect_single(image)? else {
            return Ok(None);
        };

        let landmarks = self.landmarks.locate(image, &detection)?;
        // Prefer the detector's own five points; fall back to the 68-point layout.
        let five_point = detection.landmarks.unwrap_or_else(|| landmarks.five_point());
        let descriptor = self.recognizer.describe(image, &five_point)?;
        let expressions = self.expressions.classify(image, &detection)?;
        let (age, gender) = self.age_gender.estimate(image, &detection)?;

        tracing::debug!(
            confidence = detection.confidence,
            age,
            gender = %gender.label,
            expression = expressions.dominant().0,
            "face analyzed"
        );

        Ok(Some(FaceAnalysis {
            descriptor,
            landmarks,
            expressions,
            age,
            gender,
            detection,
        }))
    }
}
