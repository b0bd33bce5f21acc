//! 68-point landmark regression via ONNX Runtime.
//!
//! The network sees a 112×112 square crop around the detection and returns
//! 136 values: (x, y) pairs relative to the crop in [0, 1].

use crate::alignment::SquareCrop;
use crate::error::AnalysisError;
use crate::models::ModelError;
use crate::types::{BoundingBox, Landmarks68, Point, LANDMARK_COUNT};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

const LANDMARK_INPUT_SIZE: u32 = 112;
const LANDMARK_CROP_EXPAND: f32 = 1.2;

pub struct LandmarkDetector {
    session: Session,
}

impl LandmarkDetector {
    pub fn from_bytes(model: &[u8], intra_threads: usize) -> Result<Self, ModelError> {
        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_memory(model)?;
        tracing::info!("loaded 68-point landmark model");
        Ok(Self { session })
    }

    pub fn locate(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Landmarks68, AnalysisError> {
        let crop = SquareCrop::around(face, LANDMARK_CROP_EXPAND);
        let patch = crop.extract(image, LANDMARK_INPUT_SIZE);
        let input = preprocess(&patch);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalysisError::InferenceFailed(format!("landmarks: {e}")))?;

        decode(raw, &crop)
    }
}

fn preprocess(patch: &RgbImage) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in patch.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Crop-relative (x, y) pairs → image-space landmarks.
fn decode(raw: &[f32], crop: &SquareCrop) -> Result<Landmarks68, AnalysisError> {
    if raw.len() < LANDMARK_COUNT * 2 {
        return Err(AnalysisError::InferenceFailed(format!(
            "expected {} landmark values, got {}",
            LANDMARK_COUNT * 2,
            raw.len()
        )));
    }
    let points = raw[..LANDMARK_COUNT * 2]
        .chunks_exact(2)
        .map(|p| {
            let (x, y) = crop.to_image(p[0], p[1]);
            Point::new(x, y)
        })
        .collect();

    Landmarks68::new(points)
        .ok_or_else(|| AnalysisError::InferenceFailed("landmark count mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_maps_crop_coordinates() {
        let crop = SquareCrop { x: 10.0, y: 20.0, side: 100.0 };
        let mut raw = vec![0.5f32; 136];
        raw[0] = 0.0;
        raw[1] = 1.0;

        let lm = decode(&raw, &crop).unwrap();
        assert_eq!(lm.point(0), Point::new(10.0, 120.0));
        assert_eq!(lm.point(67), Point::new(60.0, 70.0));
    }

    #[test]
    fn test_decode_rejects_short_output() {
        let crop = SquareCrop { x: 0.0, y: 0.0, side: 1.0 };
        assert!(decode(&[0.0; 10], &crop).is_err());
    }

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        let patch = RgbImage::from_pixel(LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE, image::Rgb([255, 0, 51]));
        let t = preprocess(&patch);
        assert_eq!(t[[0, 0, 5, 5]], 1.0);
        assert_eq!(t[[0, 1, 5, 5]], 0.0);
        assert!((t[[0, 2, 5, 5]] - 0.2).abs() < 1e-6);
    }
}
