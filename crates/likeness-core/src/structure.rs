//! Illustrative facial-structure summary.
//!
//! Fixed ratio thresholds over [`FacialFeatures`]. This is a display metric,
//! not a trained classifier, and makes no demographic claim. The confidence
//! carries deliberate random jitter so it must never be read as a measurement.

use crate::features::FacialFeatures;
use rand::Rng;
use serde::Serialize;

pub const STRUCTURE_DISCLAIMER: &str = "Illustrative metric, not a scientific claim";

const PRIMARY_LABEL: &str = "Diverse facial features detected";
const ELONGATED_RATIO: f32 = 1.3;
const ROUND_RATIO: f32 = 1.1;
const WIDE_NOSE_RATIO: f32 = 0.25;
const WIDE_EYES_RATIO: f32 = 0.4;
const CONFIDENCE_BASE: f32 = 75.0;
const CONFIDENCE_JITTER: f32 = 15.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureSummary {
    pub primary: &'static str,
    /// Display-only; includes random jitter.
    pub confidence: f32,
    pub features: Vec<&'static str>,
    pub disclaimer: &'static str,
}

/// Deterministic part of the summary: one label per proportion.
pub fn structure_labels(features: &FacialFeatures) -> Vec<&'static str> {
    let mut labels = Vec::with_capacity(3);

    if features.face_ratio > ELONGATED_RATIO {
        labels.push("Elongated facial structure");
    } else if features.face_ratio < ROUND_RATIO {
        labels.push("Round facial structure");
    } else {
        labels.push("Balanced facial proportions");
    }

    // A zero width gives inf (wide) for a nonzero numerator and NaN (narrow) for zero.
    let width = features.face_width as f32;
    let nose_to_face = features.nose_width as f32 / width;
    let eye_to_face = features.eye_distance as f32 / width;

    labels.push(if nose_to_face > WIDE_NOSE_RATIO {
        "Wider nasal bridge"
    } else {
        "Narrow nasal bridge"
    });
    labels.push(if eye_to_face > WIDE_EYES_RATIO {
        "Wide-set eyes"
    } else {
        "Close-set eyes"
    });

    labels
}

pub fn describe_structure<R: Rng + ?Sized>(features: &FacialFeatures, rng: &mut R) -> StructureSummary {
    StructureSummary {
        primary: PRIMARY_LABEL,
        confidence: CONFIDENCE_BASE + rng.gen::<f32>() * CONFIDENCE_JITTER,
        features: structure_labels(features),
        disclaimer: STRUCTURE_DISCLAIMER,
    }
}
