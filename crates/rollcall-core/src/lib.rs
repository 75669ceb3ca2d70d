//! rollcall-core — face detection, embedding, and known-face matching.
//!
//! Detection uses SCRFD and embeddings use a FaceNet export, both through
//! ONNX Runtime. The [`Detector`] and [`Embedder`] traits are the seams the
//! enrollment and recognition flows depend on.

pub mod detector;
pub mod embedder;
pub mod gallery;
pub mod types;

pub use detector::{Detector, DetectorError, ScrfdDetector};
pub use embedder::{Embedder, EmbedderError, FacenetEmbedder};
pub use gallery::{EmbeddingCache, FaceMatch, KnownFace, DEFAULT_MATCH_THRESHOLD};
pub use types::{BoundingBox, Embedding, EmbeddingError};
