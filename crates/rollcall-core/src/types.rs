use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum EmbeddingError {
    #[error("encoded embedding is empty")]
    Empty,
    #[error("encoded embedding length {0} is not a multiple of 4")]
    Misaligned(usize),
    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score in [0, 1].
    pub confidence: f32,
}

impl BoundingBox {
    /// Integer crop rectangle `(x, y, w, h)` clipped to a `width`×`height` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn crop_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(width);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(height);

        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Face embedding vector (512-dimensional for the FaceNet model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Zero-norm inputs compare as 0.
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

    /// Cosine distance, `1 - similarity`, in [0, 2].
    pub fn distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }

    /// Element-wise mean of equally sized samples.
    ///
    /// Returns `None` for an empty slice or when dimensions disagree.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let dim = first.dim();
        if samples.iter().any(|s| s.dim() != dim) {
            return None;
        }

        let mut sum = vec![0.0f32; dim];
        for sample in samples {
            for (acc, v) in sum.iter_mut().zip(&sample.values) {
                *acc += v;
            }
        }
        let n = samples.len() as f32;
        Some(Embedding::new(sum.into_iter().map(|v| v / n).collect()))
    }

    /// Serialize as concatenated little-endian `f32`s.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(std::mem::size_of_val(self.values.as_slice()));
        for value in &self.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Inverse of [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(blob: &[u8]) -> Result<Self, EmbeddingError> {
        if blob.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if blob.len() % 4 != 0 {
            return Err(EmbeddingError::Misaligned(blob.len()));
        }

        let values: Vec<f32> = blob
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite);
        }
        Ok(Self { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_distance_identical_is_zero() {
        let a = emb(&[0.3, -1.2, 4.0]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_orthogonal_is_one() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!((a.distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_opposite_is_two() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[-1.0, 0.0]);
        assert!((a.distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_similarity_is_scale_invariant() {
        let a = emb(&[1.0, 2.0, 3.0]);
        let b = emb(&[10.0, 20.0, 30.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_elementwise() {
        let m = Embedding::mean(&[emb(&[1.0, 2.0]), emb(&[3.0, 6.0])]).unwrap();
        assert_eq!(m.values, vec![2.0, 4.0]);
    }

    #[test]
    fn test_mean_rejects_empty_and_mismatched() {
        assert!(Embedding::mean(&[]).is_none());
        assert!(Embedding::mean(&[emb(&[1.0]), emb(&[1.0, 2.0])]).is_none());
    }

    #[test]
    fn test_bytes_layout_is_little_endian_f32() {
        let e = emb(&[1.0, -2.5]);
        let bytes = e.to_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(Embedding::from_bytes(&bytes).unwrap(), e);
    }

    #[test]
    fn test_from_bytes_rejects_bad_blobs() {
        assert_eq!(Embedding::from_bytes(&[]), Err(EmbeddingError::Empty));
        assert_eq!(Embedding::from_bytes(&[0, 0, 0]), Err(EmbeddingError::Misaligned(3)));
        let nan = f32::NAN.to_le_bytes();
        assert_eq!(Embedding::from_bytes(&nan), Err(EmbeddingError::NonFinite));
    }

    #[test]
    fn test_crop_rect_clamps_to_frame() {
        let b = BoundingBox { x: -10.0, y: 5.5, width: 50.0, height: 200.0, confidence: 0.9 };
        assert_eq!(b.crop_rect(100, 100), Some((0, 5, 40, 95)));
    }

    #[test]
    fn test_crop_rect_outside_frame() {
        let b = BoundingBox { x: 150.0, y: 0.0, width: 10.0, height: 10.0, confidence: 0.9 };
        assert_eq!(b.crop_rect(100, 100), None);
    }
}
