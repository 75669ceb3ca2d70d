//! Face embedding extraction via ONNX Runtime.
//!
//! [`FacenetEmbedder`] crops a detected face, resizes it to 160×160 and runs
//! an InceptionResnetV1 (VGGFace2) export, producing a 512-dimensional
//! vector compared by cosine distance.

use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FACENET_INPUT_SIZE: u32 = 160;
const FACENET_MEAN: f32 = 127.5;
const FACENET_STD: f32 = 128.0;
pub const FACENET_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a detected face into an embedding vector.
pub trait Embedder {
    fn embed(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, EmbedderError>;
}

/// FaceNet-style embedder backed by an ONNX Runtime session.
pub struct FacenetEmbedder {
    session: Session,
}

impl FacenetEmbedder {
    /// Load the embedding model from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FaceNet model"
        );

        Ok(Self { session })
    }

    /// Crop the face and resize it to the model input size.
    fn crop(frame: &RgbImage, face: &BoundingBox) -> Result<RgbImage, EmbedderError> {
        let (x, y, w, h) = face
            .crop_rect(frame.width(), frame.height())
            .ok_or(EmbedderError::EmptyCrop)?;
        let region = imageops::crop_imm(frame, x, y, w, h).to_image();
        Ok(imageops::resize(
            &region,
            FACENET_INPUT_SIZE,
            FACENET_INPUT_SIZE,
            FilterType::Triangle,
        ))
    }

    /// 160×160 RGB crop → NCHW float tensor, `(p - 127.5) / 128`.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = FACENET_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 - FACENET_MEAN) / FACENET_STD;
            }
        }
        tensor
    }
}

impl Embedder for FacenetEmbedder {
    fn embed(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, EmbedderError> {
        let crop = Self::crop(frame, face)?;
        let input = Self::preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != FACENET_EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
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
    use image::Rgb;

    #[test]
    fn test_crop_resizes_to_input_size() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));
        let face = BoundingBox { x: 8.0, y: 4.0, width: 30.0, height: 40.0, confidence: 0.9 };
        let crop = FacenetEmbedder::crop(&frame, &face).unwrap();
        assert_eq!(crop.dimensions(), (FACENET_INPUT_SIZE, FACENET_INPUT_SIZE));
    }

    #[test]
    fn test_crop_outside_frame_fails() {
        let frame = RgbImage::new(64, 48);
        let face = BoundingBox { x: 100.0, y: 0.0, width: 30.0, height: 40.0, confidence: 0.9 };
        assert!(matches!(
            FacenetEmbedder::crop(&frame, &face),
            Err(EmbedderError::EmptyCrop)
        ));
    }

    #[test]
    fn test_preprocess_channel_order_and_scale() {
        let face = RgbImage::from_pixel(FACENET_INPUT_SIZE, FACENET_INPUT_SIZE, Rgb([255, 128, 0]));
        let t = FacenetEmbedder::preprocess(&face);
        assert_eq!(t.shape(), &[1, 3, 160, 160]);
        assert!((t[[0, 0, 5, 5]] - 127.5 / 128.0).abs() < 1e-6);
        assert!((t[[0, 1, 5, 5]] - 0.5 / 128.0).abs() < 1e-6);
        assert!((t[[0, 2, 5, 5]] + 127.5 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
