//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::FrameSource;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot capture video")]
    StreamingNotSupported,
    #[error("image source: {0}")]
    Image(String),
    #[error("no more frames")]
    Exhausted,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    /// Formats in the order the kiosk asks for them.
    const PREFERENCE: [PixelFormat; 3] = [Self::Yuyv, Self::Grey, Self::Y16];

    fn fourcc(self) -> FourCC {
        match self {
            Self::Yuyv => FourCC::new(b"YUYV"),
            Self::Grey => FourCC::new(b"GREY"),
            Self::Y16 => FourCC::new(b"Y16 "),
        }
    }

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        // Some drivers report Y16 with a NUL pad instead of a space.
        if fourcc == FourCC::new(b"Y16\0") {
            return Some(Self::Y16);
        }
        Self::PREFERENCE.into_iter().find(|f| f.fourcc() == fourcc)
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device (e.g. "/dev/video0") at roughly `width`x`height`.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }
        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("cannot query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let (pixel_format, width, height) = negotiate(&device, width, height)?;
        tracing::info!(device = device_path, card = %caps.card, width, height, format = ?pixel_format, "camera opened");

        Ok(Self {
            device,
            width,
            height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Capture a single frame, converted to grayscale.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let gray = self.to_grayscale(buf)?;
        Ok(Frame::new(gray, self.width, self.height, meta.sequence))
    }

    /// Discard `count` frames while auto-exposure settles.
    pub fn warm_up(&self, count: usize) {
        if count > 0 {
            tracing::debug!(count, "discarding warmup frames");
        }
        for _ in 0..count {
            let _ = self.capture_frame();
        }
    }

    fn to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;
        let converted = match self.pixel_format {
            PixelFormat::Grey => buf.get(..pixels).map(<[u8]>::to_vec).ok_or_else(|| {
                frame::FrameError::InvalidLength { expected: pixels, actual: buf.len() }
            }),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion: {e}", self.pixel_format)))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo { path, name: caps.card.clone(), driver: caps.driver.clone() })
            })
            .collect()
    }
}

fn open_error(device_path: &str, e: std::io::Error) -> CameraError {
    match e.raw_os_error() {
        Some(libc::EBUSY) => CameraError::DeviceBusy,
        _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
    }
}

/// Ask for each preferred format in turn; keep the first one the driver accepts.
fn negotiate(device: &Device, width: u32, height: u32) -> Result<(PixelFormat, u32, u32), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("cannot read format: {e}")))?;
    fmt.width = width;
    fmt.height = height;

    let mut offered = Vec::new();
    for wanted in PixelFormat::PREFERENCE {
        fmt.fourcc = wanted.fourcc();
        let got = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("cannot set format: {e}")))?;
        if let Some(pixel_format) = PixelFormat::from_fourcc(got.fourcc) {
            return Ok((pixel_format, got.width, got.height));
        }
        tracing::debug!(wanted = ?wanted, got = ?got.fourcc, "format not accepted");
        offered.push(got.fourcc);
    }
    Err(CameraError::FormatNegotiationFailed(format!(
        "driver offered {offered:?}; need YUYV, GREY or Y16"
    )))
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn describe(&self) -> String {
        format!("camera {} ({}x{})", self.device_path, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        for format in PixelFormat::PREFERENCE {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16\0")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist", 640, 480).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_open_error_busy() {
        let busy = std::io::Error::from_raw_os_error(libc::EBUSY);
        assert!(matches!(open_error("/dev/video0", busy), CameraError::DeviceBusy));
        let denied = std::io::Error::from_raw_os_error(libc::EACCES);
        assert!(matches!(open_error("/dev/video0", denied), CameraError::DeviceNotFound(_)));
    }
}
