//! Frame acquisition for the kiosk.
//!
//! Provides V4L2-based camera access and a still-image source, both
//! delivering grayscale frames through the [`FrameSource`] trait.

pub mod camera;
pub mod frame;
pub mod still;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use still::StillImage;

/// Anything that can hand out grayscale frames one at a time.
///
/// An `Err` means the source is done for this scan; callers treat it as the
/// end of the stream rather than a reportable failure.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}
