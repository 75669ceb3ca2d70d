//! Enrollment: capture one or more face samples for a new student and store
//! their mean embedding.
//!
//! [`EnrollSession`] is driven by the caller one frame at a time:
//! `observe` holds the best face of the latest frame as a pending sample,
//! `confirm` accepts it, and `finish` averages the accepted samples into a
//! single stored encoding. [`run_enroll`] wraps the session around a
//! [`FrameSource`] and a control callback.

use crate::roster::Roster;
use rollcall_core::{BoundingBox, Detector, Embedder, Embedding};
use rollcall_hw::{CameraError, Frame, FrameSource};
use rollcall_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("enrollment number already registered: {0}")]
    DuplicateKey(String),
    #[error("{0} must not be empty")]
    InvalidIdentity(&'static str),
    #[error("no face samples were captured")]
    NoCaptures,
    #[error("enrollment session already closed")]
    Closed,
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
}

impl From<StoreError> for EnrollError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateKey(key) => Self::DuplicateKey(key),
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollState {
    AwaitingCapture,
    /// `n` samples accepted so far.
    Confirmed(usize),
    Done,
    Cancelled,
}

impl EnrollState {
    fn is_closed(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// What the session saw in the most recent frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameObservation {
    /// A face above the confidence threshold is pending confirmation.
    Face(BoundingBox),
    NoFace,
    /// Detection or embedding failed; the frame was ignored.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The pending sample was accepted; the new sample count.
    Accepted(usize),
    /// No face is pending, so nothing was captured.
    NothingPending,
}

/// The caller's decision after each frame in [`run_enroll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollAction {
    Continue,
    Capture,
    Finish,
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    Enrolled {
        student_id: i64,
        name: String,
        enrollment_number: String,
        samples: usize,
    },
    Cancelled,
}

pub struct EnrollSession {
    name: String,
    enrollment_number: String,
    pending: Option<Embedding>,
    samples: Vec<Embedding>,
    state: EnrollState,
}

impl EnrollSession {
    /// Start enrolling `name` under `enrollment_number`.
    ///
    /// Both must be non-blank (surrounding whitespace is dropped) and the
    /// enrollment number must not already be registered.
    pub fn begin(roster: &Roster, name: &str, enrollment_number: &str) -> Result<Self, EnrollError> {
        let name = name.trim();
        let enrollment_number = enrollment_number.trim();
        if name.is_empty() {
            return Err(EnrollError::InvalidIdentity("name"));
        }
        if enrollment_number.is_empty() {
            return Err(EnrollError::InvalidIdentity("enrollment number"));
        }
        if roster.is_enrolled(enrollment_number)? {
            return Err(EnrollError::DuplicateKey(enrollment_number.to_string()));
        }

        tracing::info!(name, enrollment = enrollment_number, "enrollment started");
        Ok(Self {
            name: name.to_string(),
            enrollment_number: enrollment_number.to_string(),
            pending: None,
            samples: Vec::new(),
            state: EnrollState::AwaitingCapture,
        })
    }

    pub fn state(&self) -> EnrollState {
        self.state
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Run detection on `frame` and hold the most confident face scoring
    /// strictly above `min_confidence` as the pending sample.
    ///
    /// The pending sample always reflects the latest frame: a frame with no
    /// usable face clears it.
    pub fn observe(
        &mut self,
        frame: &Frame,
        detector: &mut dyn Detector,
        embedder: &mut dyn Embedder,
        min_confidence: f32,
    ) -> Result<FrameObservation, EnrollError> {
        if self.state.is_closed() {
            return Err(EnrollError::Closed);
        }
        self.pending = None;

        let faces = match detector.detect(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, frame = frame.sequence, "enroll: detection failed, skipping frame");
                return Ok(FrameObservation::Skipped);
            }
        };

        let Some(face) = faces
            .into_iter()
            .filter(|f| f.confidence > min_confidence)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        else {
            return Ok(FrameObservation::NoFace);
        };

        match embedder.embed(&frame.image, &face) {
            Ok(embedding) => {
                self.pending = Some(embedding);
                Ok(FrameObservation::Face(face))
            }
            Err(e) => {
                tracing::warn!(error = %e, frame = frame.sequence, "enroll: embedding failed, skipping frame");
                Ok(FrameObservation::Skipped)
            }
        }
    }

    /// Accept the pending sample, if any.
    pub fn confirm(&mut self) -> Result<Confirmation, EnrollError> {
        if self.state.is_closed() {
            return Err(EnrollError::Closed);
        }
        let Some(sample) = self.pending.take() else {
            return Ok(Confirmation::NothingPending);
        };
        self.samples.push(sample);
        self.state = EnrollState::Confirmed(self.samples.len());
        tracing::info!(
            enrollment = %self.enrollment_number,
            samples = self.samples.len(),
            "enroll: sample captured"
        );
        Ok(Confirmation::Accepted(self.samples.len()))
    }

    pub fn cancel(&mut self) -> EnrollOutcome {
        if !self.state.is_closed() {
            self.state = EnrollState::Cancelled;
            tracing::info!(enrollment = %self.enrollment_number, "enrollment cancelled");
        }
        EnrollOutcome::Cancelled
    }

    /// Store the student with the element-wise mean of the accepted samples.
    ///
    /// With no accepted samples this fails with [`EnrollError::NoCaptures`]
    /// and the session stays open for further captures.
    pub fn finish(&mut self, roster: &mut Roster) -> Result<EnrollOutcome, EnrollError> {
        if self.state.is_closed() {
            return Err(EnrollError::Closed);
        }
        let embedding = Embedding::mean(&self.samples).ok_or(EnrollError::NoCaptures)?;

        let face = roster.enroll(&self.name, &self.enrollment_number, embedding)?;
        self.state = EnrollState::Done;
        tracing::info!(
            student_id = face.student_id,
            enrollment = %face.enrollment_number,
            samples = self.samples.len(),
            "student enrolled"
        );

        Ok(EnrollOutcome::Enrolled {
            student_id: face.student_id,
            name: face.name,
            enrollment_number: face.enrollment_number,
            samples: self.samples.len(),
        })
    }
}

/// Drive `session` with frames from `source` until `control` finishes or
/// cancels it.
///
/// `control` is called after every frame with what was seen and the session
/// state. `Finish` is ignored until at least one sample has been confirmed.
/// An exhausted source finishes the session, failing with
/// [`EnrollError::NoCaptures`] if nothing was confirmed. The source is dropped,
/// releasing the device, on every return path.
pub fn run_enroll<S, F>(
    mut source: S,
    mut session: EnrollSession,
    roster: &mut Roster,
    detector: &mut dyn Detector,
    embedder: &mut dyn Embedder,
    min_confidence: f32,
    mut control: F,
) -> Result<EnrollOutcome, EnrollError>
where
    S: FrameSource,
    F: FnMut(&FrameObservation, &EnrollSession) -> EnrollAction,
{
    loop {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(CameraError::EndOfStream) => {
                tracing::debug!("enroll: source exhausted");
                return session.finish(roster);
            }
            Err(e) => return Err(e.into()),
        };

        let observation = session.observe(&frame, detector, embedder, min_confidence)?;
        match control(&observation, &session) {
            EnrollAction::Continue => {}
            EnrollAction::Capture => {
                if session.confirm()? == Confirmation::NothingPending {
                    tracing::debug!("enroll: capture requested with no face in view");
                }
            }
            EnrollAction::Finish if session.sample_count() == 0 => {
                tracing::debug!("enroll: finish requested before any capture, continuing");
            }
            EnrollAction::Finish => return session.finish(roster),
            EnrollAction::Cancel => return Ok(session.cancel()),
        }
    }
}
