//! ArcFace face descriptor via ONNX Runtime.
//!
//! Produces an L2-normalized 512-dimensional descriptor from a face aligned
//! to the 112×112 template (w600k_r50 model).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::error::AnalysisError;
use crate::models::ModelError;
use crate::types::Embedding;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD's 128
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn from_bytes(model: &[u8], intra_threads: usize) -> Result<Self, ModelError> {
        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_memory(model)?;

        tracing::info!(
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace recognizer"
        );
        Ok(Self { session })
    }

    /// Descriptor for the face at `five_point` landmarks in `image`.
    pub fn describe(
        &mut self,
        image: &RgbImage,
        five_point: &[(f32, f32); 5],
    ) -> Result<Embedding, AnalysisError> {
        let aligned = alignment::align_face(image, five_point);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalysisError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(AnalysisError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

/// 112×112 RGB crop → NCHW tensor in [-1, 1].
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_range() {
        let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
        aligned.put_pixel(0, 0, image::Rgb([255, 0, 128]));
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 0]] - 0.5 / 127.5).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
