//! likeness-core — face analysis and comparison engine.
//!
//! SCRFD detection, 68-point landmarks, ArcFace descriptors and FER+ /
//! genderage attributes, all running via ONNX Runtime on the CPU, plus the
//! pure scoring and measurement functions built on their output.

pub mod alignment;
pub mod attributes;
pub mod backend;
pub mod detector;
pub mod error;
pub mod features;
pub mod landmarks;
pub mod models;
pub mod recognizer;
pub mod similarity;
pub mod structure;
pub mod types;

pub use backend::{FaceBackend, OnnxBackend};
pub use error::AnalysisError;
pub use features::{extract_features, FacialFeatures};
pub use models::{default_model_dir, http_client, ModelError, ModelKind, ModelSource, DEFAULT_FETCH_TIMEOUT};
pub use similarity::{is_match, score, ComparisonResult, SimilarityError, MATCH_THRESHOLD};
pub use structure::{describe_structure, StructureSummary};
pub use types::{
    BoundingBox, Embedding, Expressions, FaceAnalysis, Gender, GenderLabel, Landmarks68, Point,
};
