//! rollcall-hw — Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access, conversion of the common webcam pixel
//! formats to RGB, and the [`FrameSource`] trait the capture flows consume.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::Frame;
