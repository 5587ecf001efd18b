//! Still-image frame source.
//!
//! Serves a single image file as one grayscale frame. Used for registering
//! from a photo instead of a live camera.

use crate::camera::CameraError;
use crate::frame::Frame;
use crate::FrameSource;
use std::path::{Path, PathBuf};

pub struct StillImage {
    path: PathBuf,
    frame: Option<Frame>,
}

impl StillImage {
    /// Decode `path` (any format the `image` crate reads) to grayscale.
    pub fn open(path: &Path) -> Result<Self, CameraError> {
        let gray = image::open(path)
            .map_err(|e| CameraError::Image(format!("{}: {e}", path.display())))?
            .into_luma8();
        let (width, height) = gray.dimensions();
        tracing::info!(path = %path.display(), width, height, "still image loaded");
        Ok(Self {
            path: path.to_path_buf(),
            frame: Some(Frame::new(gray.into_raw(), width, height, 0)),
        })
    }
}

impl FrameSource for StillImage {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.frame.take().ok_or(CameraError::Exhausted)
    }

    fn describe(&self) -> String {
        format!("image {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_still_image_served_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        GrayImage::from_pixel(8, 6, Luma([140])).save(&path).unwrap();

        let mut source = StillImage::open(&path).unwrap();
        let frame = source.read_frame().unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        assert_eq!(frame.data.len(), 48);
        assert!(frame.data.iter().all(|&p| p == 140));

        assert!(matches!(source.read_frame(), Err(CameraError::Exhausted)));
    }

    #[test]
    fn test_missing_file() {
        let err = StillImage::open(Path::new("/nonexistent/face.png")).err().unwrap();
        assert!(matches!(err, CameraError::Image(_)));
    }
}
