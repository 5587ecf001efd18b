//! Frame type and pixel conversion: YUYV/Y16 to grayscale, dark detection.

/// A captured grayscale frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_THRESHOLD);
        Self { data, width, height, sequence, is_dark }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_THRESHOLD: f32 = 0.95;

/// Convert packed YUYV (4:2:2) to grayscale by keeping the Y bytes.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width as usize) * (height as usize) * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: yuyv.len() });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width as usize) * (height as usize) * 2;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: y16.len() });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// True if more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let gray = yuyv_to_grayscale(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // 0x12FF and 0xAB00, little-endian.
        let gray = y16_to_grayscale(&[0xFF, 0x12, 0x00, 0xAB], 2, 1).unwrap();
        assert_eq!(gray, vec![0x12, 0xAB]);
        assert!(y16_to_grayscale(&[0xFF], 1, 1).is_err());
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&[0u8; 100], DARK_THRESHOLD));
        assert!(!is_dark_frame(&[128u8; 100], DARK_THRESHOLD));
        assert!(is_dark_frame(&[], DARK_THRESHOLD));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, DARK_THRESHOLD));
    }

    #[test]
    fn test_frame_new_flags_dark() {
        let frame = Frame::new(vec![0u8; 16], 4, 4, 7);
        assert!(frame.is_dark);
        assert_eq!(frame.avg_brightness(), 0.0);
        assert!(!Frame::new(vec![200u8; 16], 4, 4, 8).is_dark);
    }
}
