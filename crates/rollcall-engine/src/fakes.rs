//! Scripted stand-ins for the camera and models, shared by the engine tests.

use image::RgbImage;
use rollcall_core::{BoundingBox, Detector, DetectorError, Embedder, EmbedderError, Embedding};
use rollcall_hw::{CameraError, Frame, FrameSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub fn frame(sequence: u32) -> Frame {
    Frame::new(RgbImage::new(64, 48), sequence)
}

/// A frame captured at an explicit instant.
pub fn frame_at(sequence: u32, timestamp: Instant) -> Frame {
    Frame {
        timestamp,
        ..frame(sequence)
    }
}

/// A face box whose embedding (see [`FakeEmbedder`]) is `[x, y]`.
pub fn face_at(x: f32, y: f32, confidence: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width: 10.0,
        height: 10.0,
        confidence,
    }
}

/// Yields the scripted results in order, then `EndOfStream` forever.
/// Sets `released` when dropped.
pub struct ScriptedSource {
    script: VecDeque<Result<Frame, CameraError>>,
    pub released: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Result<Frame, CameraError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn frames(n: u32) -> Self {
        Self::new((0..n).map(|i| Ok(frame(i))))
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.script.pop_front().unwrap_or(Err(CameraError::EndOfStream))
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Never runs out of frames.
pub struct EndlessSource;

impl FrameSource for EndlessSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        std::thread::sleep(std::time::Duration::from_millis(1));
        Ok(frame(0))
    }
}

/// Returns the scripted detections per call; repeats the last entry once
/// the script is exhausted. `None` entries fail the call.
pub struct FakeDetector {
    script: VecDeque<Option<Vec<BoundingBox>>>,
    last: Option<Vec<BoundingBox>>,
}

impl FakeDetector {
    pub fn new(script: impl IntoIterator<Item = Option<Vec<BoundingBox>>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            last: Some(Vec::new()),
        }
    }

    /// Detects the same faces on every frame.
    pub fn always(faces: Vec<BoundingBox>) -> Self {
        Self::new([Some(faces)])
    }
}

impl Detector for FakeDetector {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last
            .clone()
            .ok_or_else(|| DetectorError::InferenceFailed("scripted failure".into()))
    }
}

/// A box [`FakeEmbedder`] refuses to embed.
pub fn unembeddable(confidence: f32) -> BoundingBox {
    BoundingBox {
        width: 0.0,
        ..face_at(0.0, 0.0, confidence)
    }
}

/// Embeds a box as `[x, y]`. Zero-width boxes fail.
pub struct FakeEmbedder;

impl Embedder for FakeEmbedder {
    fn embed(&mut self, _frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, EmbedderError> {
        if face.width <= 0.0 {
            return Err(EmbedderError::EmptyCrop);
        }
        Ok(Embedding::new(vec![face.x, face.y]))
    }
}
