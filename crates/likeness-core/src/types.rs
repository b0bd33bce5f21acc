use serde::{Deserialize, Serialize};

/// Number of points in the iBUG 68-point landmark layout.
pub const LANDMARK_COUNT: usize = 68;

/// Bounding box for a detected face, with optional five-point landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score in [0, 1].
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// An ordered set of exactly 68 facial landmarks (iBUG layout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Landmarks68 {
    points: Vec<Point>,
}

impl Landmarks68 {
    /// Wrap a point sequence. Returns `None` unless exactly 68 points are given.
    pub fn new(points: Vec<Point>) -> Option<Self> {
        (points.len() == LANDMARK_COUNT).then_some(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Point {
        self.points[index]
    }

    pub fn jaw_outline(&self) -> &[Point] {
        &self.points[0..=16]
    }

    pub fn right_eyebrow(&self) -> &[Point] {
        &self.points[17..=21]
    }

    pub fn left_eyebrow(&self) -> &[Point] {
        &self.points[22..=26]
    }

    pub fn nose(&self) -> &[Point] {
        &self.points[27..=35]
    }

    pub fn left_eye(&self) -> &[Point] {
        &self.points[36..=41]
    }

    pub fn right_eye(&self) -> &[Point] {
        &self.points[42..=47]
    }

    pub fn mouth(&self) -> &[Point] {
        &self.points[48..=67]
    }

    /// Five alignment points in detector order: eye centroids, nose tip, mouth corners.
    pub fn five_point(&self) -> [(f32, f32); 5] {
        let centroid = |pts: &[Point]| {
            let n = pts.len() as f32;
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
            (sx / n, sy / n)
        };
        let nose = self.point(30);
        let left_mouth = self.point(48);
        let right_mouth = self.point(54);
        [
            centroid(self.left_eye()),
            centroid(self.right_eye()),
            (nose.x, nose.y),
            (left_mouth.x, left_mouth.y),
            (right_mouth.x, right_mouth.y),
        ]
    }
}

impl TryFrom<Vec<Point>> for Landmarks68 {
    type Error = String;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        let len = points.len();
        Self::new(points).ok_or_else(|| format!("expected {LANDMARK_COUNT} landmarks, got {len}"))
    }
}

impl From<Landmarks68> for Vec<Point> {
    fn from(landmarks: Landmarks68) -> Self {
        landmarks.points
    }
}

/// Face descriptor vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance between two embeddings of the same length.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Expression probabilities. Values sum to ~1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Expressions {
    pub neutral: f32,
    pub happy: f32,
    pub sad: f32,
    pub angry: f32,
    pub fearful: f32,
    pub disgusted: f32,
    pub surprised: f32,
}

impl Expressions {
    /// Name/probability pairs in a fixed order.
    pub fn entries(&self) -> [(&'static str, f32); 7] {
        [
            ("neutral", self.neutral),
            ("happy", self.happy),
            ("sad", self.sad),
            ("angry", self.angry),
            ("fearful", self.fearful),
            ("disgusted", self.disgusted),
            ("surprised", self.surprised),
        ]
    }

    /// Highest-probability expression. Ties keep the earlier entry.
    pub fn dominant(&self) -> (&'static str, f32) {
        self.entries()
            .into_iter()
            .fold(("neutral", f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderLabel {
    Male,
    Female,
}

impl std::fmt::Display for GenderLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenderLabel::Male => f.write_str("male"),
            GenderLabel::Female => f.write_str("female"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gender {
    pub label: GenderLabel,
    pub probability: f32,
}

/// Full analysis of the single highest-confidence face in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAnalysis {
    pub descriptor: Embedding,
    pub landmarks: Landmarks68,
    pub expressions: Expressions,
    /// Estimated age in years.
    pub age: f32,
    pub gender: Gender,
    pub detection: BoundingBox,
}
