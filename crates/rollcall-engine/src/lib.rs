//! rollcall-engine — enrollment and recognition flows over the record store.
//!
//! [`Roster`] owns the store and the cache of known faces. Enrollment is a
//! caller-driven [`EnrollSession`]; attendance is taken by a
//! [`RecognitionSession`], usually on its own thread via
//! [`spawn_recognition`].

pub mod config;
pub mod enroll;
pub mod models;
pub mod recognition;
pub mod roster;

#[cfg(test)]
mod fakes;

pub use config::{Config, ConfigError};
pub use enroll::{
    run_enroll, Confirmation, EnrollAction, EnrollError, EnrollOutcome, EnrollSession, EnrollState,
    FrameObservation,
};
pub use models::{load_models, ModelError};
pub use recognition::{
    spawn_recognition, FaceOutcome, FaceResult, RateLimiter, RecognitionError, RecognitionHandle,
    RecognitionSession, RecognitionSettings, RecognitionStats,
};
pub use roster::Roster;
