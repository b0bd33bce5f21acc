//! Human-readable and JSON rendering of a comparison.

use likeness_core::{
    describe_structure, extract_features, ComparisonResult, Expressions, FaceAnalysis, FacialFeatures,
    Gender, StructureSummary, MATCH_THRESHOLD,
};
use rand::Rng;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExpressionScore {
    pub name: &'static str,
    pub probability: f32,
}

/// Per-image display data.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub features: FacialFeatures,
    pub dominant_expression: ExpressionScore,
    pub expressions: Expressions,
    pub age: f32,
    pub gender: Gender,
    pub structure: StructureSummary,
}

impl ImageSummary {
    pub fn from_analysis<R: Rng + ?Sized>(analysis: &FaceAnalysis, rng: &mut R) -> Self {
        let features = extract_features(&analysis.landmarks);
        let structure = describe_structure(&features, rng);
        let (name, probability) = analysis.expressions.dominant();
        Self {
            features,
            dominant_expression: ExpressionScore { name, probability },
            expressions: analysis.expressions,
            age: analysis.age,
            gender: analysis.gender,
            structure,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub result: ComparisonResult,
    pub reference: ImageSummary,
    pub comparison: ImageSummary,
}

impl ComparisonReport {
    pub fn new<R: Rng + ?Sized>(result: ComparisonResult, rng: &mut R) -> Self {
        let reference = ImageSummary::from_analysis(&result.reference, rng);
        let comparison = ImageSummary::from_analysis(&result.comparison, rng);
        Self { result, reference, comparison }
    }

    pub fn verdict(&self) -> &'static str {
        if self.result.is_match {
            "Match Found!"
        } else {
            "No Match"
        }
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} Similarity: {}%", self.verdict(), self.result.similarity_percent)?;
        writeln!(
            f,
            "  descriptor distance {:.3} (match at {}% or above)",
            self.result.distance, MATCH_THRESHOLD
        )?;
        writeln!(f)?;
        write_summary(f, "Reference image", &self.reference)?;
        writeln!(f)?;
        write_summary(f, "Comparison image", &self.comparison)
    }
}

impl fmt::Display for ImageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_summary(f, "Face", self)
    }
}

fn write_summary(f: &mut fmt::Formatter<'_>, title: &str, summary: &ImageSummary) -> fmt::Result {
    let features = &summary.features;
    writeln!(f, "{title}")?;
    writeln!(
        f,
        "  age ~{:.0}, {} ({:.0}%)",
        summary.age,
        summary.gender.label,
        summary.gender.probability * 100.0
    )?;
    writeln!(
        f,
        "  expression: {} ({:.0}%)",
        summary.dominant_expression.name,
        summary.dominant_expression.probability * 100.0
    )?;
    writeln!(
        f,
        "  eye distance {}px, face {}x{}px (ratio {:.2}), nose {}px, mouth {}px, {} landmarks",
        features.eye_distance,
        features.face_width,
        features.face_height,
        features.face_ratio,
        features.nose_width,
        features.mouth_width,
        features.landmark_count
    )?;
    writeln!(
        f,
        "  structure: {} ({:.0}% confidence; {})",
        summary.structure.features.join(", "),
        summary.structure.confidence,
        summary.structure.disclaimer.to_lowercase()
    )
}
