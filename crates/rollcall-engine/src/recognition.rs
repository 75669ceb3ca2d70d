//! Continuous recognition: detect faces frame by frame, match them against
//! the enrolled set, and record attendance at most once per rate-limit
//! window per student.

use crate::config::Config;
use chrono::{Local, NaiveDateTime};
use rollcall_core::{BoundingBox, Detector, Embedder, EmbeddingCache, FaceMatch};
use rollcall_hw::{CameraError, Frame, FrameSource};
use rollcall_store::{RecordStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn recognition thread: {0}")]
    Spawn(std::io::Error),
    #[error("recognition thread panicked")]
    ThreadPanicked,
}

/// Remembers when each identity was last marked present.
///
/// Elapsed time is measured between frame capture instants, so wall-clock
/// changes such as a DST fallback never extend the window. Process-local;
/// starts empty for every session.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    last_marked: HashMap<(String, String), Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_marked: HashMap::new(),
        }
    }

    /// True if the identity was never marked or its last mark is strictly
    /// more than the window before `at`.
    pub fn is_due(&self, enrollment_number: &str, name: &str, at: Instant) -> bool {
        match self
            .last_marked
            .get(&(enrollment_number.to_string(), name.to_string()))
        {
            Some(last) => at.saturating_duration_since(*last) > self.window,
            None => true,
        }
    }

    pub fn record(&mut self, enrollment_number: &str, name: &str, at: Instant) {
        self.last_marked
            .insert((enrollment_number.to_string(), name.to_string()), at);
    }
}

/// Tunables for a recognition session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionSettings {
    pub match_threshold: f32,
    pub min_confidence: f32,
    pub rate_limit_window: Duration,
    pub max_frame_errors: usize,
}

impl RecognitionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            match_threshold: config.match_threshold,
            min_confidence: config.detection_confidence,
            rate_limit_window: config.rate_limit_window(),
            max_frame_errors: config.max_frame_errors,
        }
    }
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    Unknown,
    /// A new attendance record was written.
    Marked { face_match: FaceMatch, record_id: i64 },
    /// Recognized, but marked within the rate-limit window.
    AlreadyMarked { face_match: FaceMatch },
}

/// One processed face in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceResult {
    pub face: BoundingBox,
    pub outcome: FaceOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecognitionStats {
    pub frames: usize,
    pub faces: usize,
    pub marked: usize,
    pub duplicates_suppressed: usize,
    pub unknown: usize,
}

impl RecognitionStats {
    fn tally(&mut self, results: &[FaceResult]) {
        self.frames += 1;
        self.faces += results.len();
        for result in results {
            match result.outcome {
                FaceOutcome::Unknown => self.unknown += 1,
                FaceOutcome::Marked { .. } => self.marked += 1,
                FaceOutcome::AlreadyMarked { .. } => self.duplicates_suppressed += 1,
            }
        }
    }
}

/// A running attendance session over a snapshot of the enrolled faces.
pub struct RecognitionSession<D, E> {
    detector: D,
    embedder: E,
    store: RecordStore,
    cache: EmbeddingCache,
    limiter: RateLimiter,
    settings: RecognitionSettings,
}

impl<D: Detector, E: Embedder> RecognitionSession<D, E> {
    pub fn new(
        detector: D,
        embedder: E,
        store: RecordStore,
        cache: EmbeddingCache,
        settings: RecognitionSettings,
    ) -> Self {
        Self {
            detector,
            embedder,
            store,
            cache,
            limiter: RateLimiter::new(settings.rate_limit_window),
            settings,
        }
    }

    pub fn known_faces(&self) -> usize {
        self.cache.len()
    }

    /// Detect, embed and match every face in `frame`, recording attendance
    /// stamped `now` for recognized students who are due.
    ///
    /// `now` is only the stored wall-clock time; the rate-limit window is
    /// measured on the frame's capture instant.
    ///
    /// Detection and embedding failures are logged and skipped. A failed
    /// attendance write is returned as an error.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        now: NaiveDateTime,
    ) -> Result<Vec<FaceResult>, RecognitionError> {
        let faces = match self.detector.detect(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, frame = frame.sequence, "detection failed, skipping frame");
                return Ok(Vec::new());
            }
        };

        let min_confidence = self.settings.min_confidence;
        let mut results = Vec::new();
        for face in faces.into_iter().filter(|f| f.confidence > min_confidence) {
            let embedding = match self.embedder.embed(&frame.image, &face) {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(error = %e, frame = frame.sequence, "embedding failed, skipping face");
                    continue;
                }
            };

            let outcome = match self.cache.best_match(&embedding, self.settings.match_threshold) {
                None => FaceOutcome::Unknown,
                Some(m) => self.mark(m, frame.timestamp, now)?,
            };
            results.push(FaceResult { face, outcome });
        }

        Ok(results)
    }

    fn mark(
        &mut self,
        m: FaceMatch,
        captured: Instant,
        now: NaiveDateTime,
    ) -> Result<FaceOutcome, RecognitionError> {
        if !self.limiter.is_due(&m.enrollment_number, &m.name, captured) {
            tracing::debug!(enrollment = %m.enrollment_number, "already marked within window");
            return Ok(FaceOutcome::AlreadyMarked { face_match: m });
        }

        let record = self
            .store
            .insert_attendance_at(m.student_id, &m.name, &m.enrollment_number, now)?;
        self.limiter.record(&m.enrollment_number, &m.name, captured);
        tracing::info!(
            name = %m.name,
            enrollment = %m.enrollment_number,
            confidence = m.confidence_percent(),
            "attendance marked"
        );

        Ok(FaceOutcome::Marked {
            face_match: m,
            record_id: record.id,
        })
    }

    /// Process frames from `source` until `stop` is set or the source ends.
    ///
    /// Capture errors are retried; `max_frame_errors` consecutive failures
    /// abort the loop with the last error. The source is dropped on return.
    pub fn run<S: FrameSource>(
        &mut self,
        mut source: S,
        stop: &AtomicBool,
    ) -> Result<RecognitionStats, RecognitionError> {
        let mut stats = RecognitionStats::default();
        let mut consecutive_errors = 0usize;
        tracing::info!(known = self.cache.len(), "recognition started");

        while !stop.load(Ordering::Relaxed) {
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(CameraError::EndOfStream) => {
                    tracing::info!("frame source ended");
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(error = %e, consecutive_errors, "frame capture failed");
                    if consecutive_errors >= self.settings.max_frame_errors.max(1) {
                        tracing::error!(consecutive_errors, "too many capture failures, stopping");
                        return Err(e.into());
                    }
                    continue;
                }
            };
            consecutive_errors = 0;

            let results = self.process_frame(&frame, Local::now().naive_local())?;
            stats.tally(&results);
        }

        tracing::info!(
            frames = stats.frames,
            marked = stats.marked,
            duplicates = stats.duplicates_suppressed,
            unknown = stats.unknown,
            "recognition stopped"
        );
        Ok(stats)
    }
}

/// Handle to a recognition session running on its own thread.
pub struct RecognitionHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<RecognitionStats, RecognitionError>>,
}

impl RecognitionHandle {
    /// Ask the session to stop after the current frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the session to end and return its statistics.
    pub fn join(self) -> Result<RecognitionStats, RecognitionError> {
        self.thread
            .join()
            .map_err(|_| RecognitionError::ThreadPanicked)?
    }
}

/// Run `session` over `source` on a dedicated thread.
pub fn spawn_recognition<D, E, S>(
    mut session: RecognitionSession<D, E>,
    source: S,
) -> Result<RecognitionHandle, RecognitionError>
where
    D: Detector + Send + 'static,
    E: Embedder + Send + 'static,
    S: FrameSource + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();

    let thread = std::thread::Builder::new()
        .name("rollcall-recognition".into())
        .spawn(move || {
            tracing::info!("recognition thread started");
            let result = session.run(source, &flag);
            tracing::info!("recognition thread exiting");
            result
        })
        .map_err(RecognitionError::Spawn)?;

    Ok(RecognitionHandle { stop, thread })
}
