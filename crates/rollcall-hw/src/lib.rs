//! rollcall-hw — Camera capture and live preview.
//!
//! Provides V4L2-based frame capture behind [`FrameSource`] and a preview
//! window behind [`Surface`], so the capture loop can run against fakes.

pub mod camera;
pub mod display;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, FrameSource, PixelFormat};
pub use display::{DisplayError, Overlay, PreviewWindow, Surface};
pub use frame::Frame;
