//! Expression (FER+) and age/gender (InsightFace genderage) estimation.

use crate::alignment::SquareCrop;
use crate::error::AnalysisError;
use crate::models::ModelError;
use crate::types::{BoundingBox, Expressions, Gender, GenderLabel};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

const EXPRESSION_INPUT_SIZE: u32 = 64;
const EXPRESSION_CROP_EXPAND: f32 = 1.1;
const AGE_GENDER_INPUT_SIZE: u32 = 96;
const AGE_GENDER_CROP_EXPAND: f32 = 1.5;

/// FER+ output order: neutral, happiness, surprise, sadness, anger, disgust, fear, contempt.
const FERPLUS_CLASSES: usize = 8;

pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn from_bytes(model: &[u8], intra_threads: usize) -> Result<Self, ModelError> {
        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_memory(model)?;
        tracing::info!("loaded FER+ expression model");
        Ok(Self { session })
    }

    pub fn classify(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Expressions, AnalysisError> {
        let patch = SquareCrop::around(face, EXPRESSION_CROP_EXPAND).extract(image, EXPRESSION_INPUT_SIZE);

        // Single grayscale channel, raw 0–255 values.
        let size = EXPRESSION_INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 1, size, size));
        for (x, y, p) in patch.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] =
                0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        }

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalysisError::InferenceFailed(format!("expressions: {e}")))?;

        expressions_from_logits(logits)
    }
}

/// Softmax over FER+ logits, folding contempt into disgusted.
pub fn expressions_from_logits(logits: &[f32]) -> Result<Expressions, AnalysisError> {
    if logits.len() < FERPLUS_CLASSES {
        return Err(AnalysisError::InferenceFailed(format!(
            "expected {FERPLUS_CLASSES} expression logits, got {}",
            logits.len()
        )));
    }
    let p = softmax(&logits[..FERPLUS_CLASSES]);
    Ok(Expressions {
        neutral: p[0],
        happy: p[1],
        surprised: p[2],
        sad: p[3],
        angry: p[4],
        disgusted: p[5] + p[7],
        fearful: p[6],
    })
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

pub struct AgeGenderEstimator {
    session: Session,
}

impl AgeGenderEstimator {
    pub fn from_bytes(model: &[u8], intra_threads: usize) -> Result<Self, ModelError> {
        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_memory(model)?;
        tracing::info!("loaded age/gender model");
        Ok(Self { session })
    }

    pub fn estimate(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<(f32, Gender), AnalysisError> {
        let patch = SquareCrop::around(face, AGE_GENDER_CROP_EXPAND).extract(image, AGE_GENDER_INPUT_SIZE);

        // genderage expects raw BGR values.
        let size = AGE_GENDER_INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, p) in patch.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = p[2 - c] as f32;
            }
        }

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalysisError::InferenceFailed(format!("age/gender: {e}")))?;

        decode_age_gender(raw)
    }
}

/// `[female, male, age / 100]` → (age in years, gender).
pub fn decode_age_gender(raw: &[f32]) -> Result<(f32, Gender), AnalysisError> {
    let [female, male, age] = raw.get(..3).and_then(|s| <[f32; 3]>::try_from(s).ok()).ok_or_else(|| {
        AnalysisError::InferenceFailed(format!("expected 3 age/gender values, got {}", raw.len()))
    })?;

    let p = softmax(&[female, male]);
    let gender = if p[1] >= p[0] {
        Gender { label: GenderLabel::Male, probability: p[1] }
    } else {
        Gender { label: GenderLabel::Female, probability: p[0] }
    };
    Ok(((age * 100.0).max(0.0), gender))
}
