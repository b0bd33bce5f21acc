//! Geometric measurements derived from a 68-point landmark set.
//!
//! Display-only; none of these values feed the match decision.

use crate::types::Landmarks68;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacialFeatures {
    /// Inner-eye-corner distance, pixels.
    pub eye_distance: u32,
    /// Jaw span from point 0 to point 16, pixels.
    pub face_width: u32,
    /// Chin (8) to nose bridge (27), pixels.
    pub face_height: u32,
    /// Height / width, two decimals. 0 when the width is 0.
    pub face_ratio: f32,
    pub nose_width: u32,
    pub mouth_width: u32,
    pub landmark_count: usize,
}

pub fn extract_features(landmarks: &Landmarks68) -> FacialFeatures {
    let jaw = landmarks.jaw_outline();
    let left_eye = landmarks.left_eye();
    let right_eye = landmarks.right_eye();
    let nose = landmarks.nose();
    let mouth = landmarks.mouth();

    let eye_distance = right_eye[0].distance(&left_eye[3]);
    let face_width = (jaw[16].x - jaw[0].x).abs();
    let face_height = (jaw[8].y - landmarks.point(27).y).abs();

    // Ratio uses the unrounded spans.
    let face_ratio = if face_width > 0.0 {
        (face_height / face_width * 100.0).round() / 100.0
    } else {
        0.0
    };

    FacialFeatures {
        eye_distance: round_px(eye_distance),
        face_width: round_px(face_width),
        face_height: round_px(face_height),
        face_ratio,
        nose_width: round_px((nose[4].x - nose[0].x).abs()),
        mouth_width: round_px((mouth[6].x - mouth[0].x).abs()),
        landmark_count: landmarks.points().len(),
    }
}

fn round_px(v: f32) -> u32 {
    v.round().max(0.0) as u32
}
