//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts L2-normalized 512-dimensional embeddings from aligned face
//! crops, using the w600k_r50 ArcFace model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = ALIGNED_SIZE as usize;
const NORM_MEAN: f32 = 127.5;
// ArcFace normalization is symmetric (mean == std), unlike SCRFD's.
const NORM_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download w600k_r50.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — detector must provide landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract an embedding for a detected face.
    ///
    /// The face must carry landmarks; it is warped to the canonical
    /// 112×112 position before inference.
    pub fn extract(
        &mut self,
        image: &GrayImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;

        let aligned = alignment::align_face(image, landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so Euclidean distance and cosine similarity agree
        // on the unit sphere.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

/// Convert a 112×112 aligned grayscale crop into the NCHW input tensor,
/// replicating luma across the three channels.
fn preprocess(aligned: &GrayImage) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let pixel = if (x as u32) < aligned.width() && (y as u32) < aligned.height() {
                aligned.get_pixel(x as u32, y as u32)[0] as f32
            } else {
                0.0
            };

            let normalized = (pixel - NORM_MEAN) / NORM_STD;
            for c in 0..3 {
                tensor[[0, c, y, x]] = normalized;
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_output_shape() {
        let aligned = GrayImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, image::Luma([128]));
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
    }

    #[test]
    fn preprocess_symmetric_normalization() {
        let aligned = GrayImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, image::Luma([128]));
        let tensor = preprocess(&aligned);
        let expected = (128.0 - NORM_MEAN) / NORM_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn preprocess_extremes_map_to_unit_range() {
        let mut aligned = GrayImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
        aligned.put_pixel(0, 0, image::Luma([255]));
        let tensor = preprocess(&aligned);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 0, 1]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn preprocess_replicates_luma_across_channels() {
        let aligned = GrayImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, image::Luma([100]));
        let tensor = preprocess(&aligned);
        for y in [0, 50, 111] {
            for x in [0, 50, 111] {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }
}
