//! Per-frame scanning.
//!
//! A scan is driven one frame at a time by the caller, which decides when
//! to stop. Each step reports whether the frame produced a result.

use crate::index::{FaceIndex, IndexEntry};
use crate::types::{DetectedFace, FrameView};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("detector error: {0}")]
    Detector(#[from] crate::detector::DetectorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] crate::encoder::EncoderError),
    #[error("frame is {width}x{height} but holds only {len} bytes")]
    IncompleteFrame { width: u32, height: u32, len: usize },
}

/// Face identity service: embeds every face visible in a frame.
pub trait FaceEncoder {
    /// Faces sorted by detector confidence, best first.
    fn encode(&mut self, frame: FrameView<'_>) -> Result<Vec<DetectedFace>, VisionError>;
}

/// Barcode service: decodes every symbol visible in a frame.
pub trait BarcodeReader {
    fn decode(&self, frame: FrameView<'_>) -> Vec<String>;
}

/// Result of one scan step.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanStep<T> {
    /// A frame was read but produced nothing.
    Pending,
    Found(T),
    /// The frame source is exhausted or failed; the scan is over.
    Ended,
}

impl<T> ScanStep<T> {
    pub fn is_done(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Embed `frame` and resolve the first face that matches the index.
pub fn probe_face<E: FaceEncoder + ?Sized>(
    encoder: &mut E,
    frame: FrameView<'_>,
    index: &FaceIndex,
    tolerance: f64,
) -> Result<ScanStep<IndexEntry>, VisionError> {
    check_frame(&frame)?;
    let faces = encoder.encode(frame)?;
    for face in &faces {
        if let Some(hit) = index.first_match(&face.embedding, tolerance) {
            tracing::debug!(person = %hit.name, confidence = face.confidence, "face matched");
            return Ok(ScanStep::Found(hit.clone()));
        }
    }
    tracing::trace!(faces = faces.len(), "no matching face in frame");
    Ok(ScanStep::Pending)
}

/// Decode `frame` and return its first barcode payload.
pub fn probe_barcode<R: BarcodeReader + ?Sized>(reader: &R, frame: FrameView<'_>) -> ScanStep<String> {
    if !frame.is_complete() {
        return ScanStep::Pending;
    }
    match reader.decode(frame).into_iter().next() {
        Some(payload) => ScanStep::Found(payload),
        None => ScanStep::Pending,
    }
}

/// Pick the most confident face across a burst of frames.
pub fn best_face<E: FaceEncoder + ?Sized>(
    encoder: &mut E,
    frames: &[FrameView<'_>],
) -> Result<Option<DetectedFace>, VisionError> {
    let mut best: Option<DetectedFace> = None;
    for frame in frames {
        check_frame(frame)?;
        if let Some(face) = encoder.encode(*frame)?.into_iter().next() {
            if best.as_ref().map_or(true, |b| face.confidence > b.confidence) {
                best = Some(face);
            }
        }
    }
    Ok(best)
}

fn check_frame(frame: &FrameView<'_>) -> Result<(), VisionError> {
    if frame.is_complete() {
        Ok(())
    } else {
        Err(VisionError::IncompleteFrame {
            width: frame.width,
            height: frame.height,
            len: frame.pixels.len(),
        })
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::types::Embedding;

    /// Encoder that plays back scripted faces per call, then none.
    pub struct ScriptedEncoder {
        pub script: Vec<Vec<DetectedFace>>,
        pub calls: usize,
    }

    impl ScriptedEncoder {
        pub fn new(script: Vec<Vec<DetectedFace>>) -> Self {
            Self { script, calls: 0 }
        }
    }

    impl FaceEncoder for ScriptedEncoder {
        fn encode(&mut self, _frame: FrameView<'_>) -> Result<Vec<DetectedFace>, VisionError> {
            let faces = self.script.get(self.calls).cloned().unwrap_or_default();
            self.calls += 1;
            Ok(faces)
        }
    }

    pub fn face(embedding: Embedding, confidence: f32) -> DetectedFace {
        DetectedFace { embedding, confidence }
    }
}
