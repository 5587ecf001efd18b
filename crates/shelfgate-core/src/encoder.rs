//! Face signature extraction via ONNX Runtime.
//!
//! Each detected face is cropped (with a small margin), resized to the
//! embedding model's square input and reduced to a 128-value signature.

use crate::detector::FaceDetector;
use crate::scan::{FaceEncoder, VisionError};
use crate::types::{BoundingBox, DetectedFace, Embedding, FrameView, EMBEDDING_DIM};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const MEAN: f32 = 127.5;
const STD: f32 = 127.5;
/// Extra context kept around the detector box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.2;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("bad embedding: {0}")]
    Embedding(#[from] crate::types::EmbeddingError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detector + embedding model pair implementing [`FaceEncoder`].
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    session: Session,
    input_size: u32,
}

impl OnnxFaceEncoder {
    pub fn load(detector: FaceDetector, model_path: &Path, input_size: u32) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            input_size,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { detector, session, input_size })
    }

    fn embed(&mut self, gray: &GrayImage, face: &BoundingBox) -> Result<Embedding, EncoderError> {
        let chip = crop_face(gray, face, self.input_size);
        let input = to_tensor(&chip);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(Embedding::new(raw.iter().map(|&v| v as f64).collect())?)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, frame: FrameView<'_>) -> Result<Vec<DetectedFace>, VisionError> {
        let faces = self.detector.detect(frame)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let expected = (frame.width as usize) * (frame.height as usize);
        let gray = frame
            .pixels
            .get(..expected)
            .and_then(|px| GrayImage::from_raw(frame.width, frame.height, px.to_vec()))
            .ok_or(VisionError::IncompleteFrame {
                width: frame.width,
                height: frame.height,
                len: frame.pixels.len(),
            })?;

        let mut out = Vec::with_capacity(faces.len());
        for face in &faces {
            let embedding = self.embed(&gray, face)?;
            out.push(DetectedFace { embedding, confidence: face.confidence });
        }
        Ok(out)
    }
}

/// Square crop around `face`, clamped to the frame and resized to `size`.
fn crop_face(gray: &GrayImage, face: &BoundingBox, size: u32) -> GrayImage {
    let side = face.width.max(face.height) * (1.0 + 2.0 * CROP_MARGIN);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let max_x = gray.width().saturating_sub(1) as f32;
    let max_y = gray.height().saturating_sub(1) as f32;
    let x0 = (cx - side / 2.0).clamp(0.0, max_x) as u32;
    let y0 = (cy - side / 2.0).clamp(0.0, max_y) as u32;
    let w = (side as u32).clamp(1, gray.width() - x0);
    let h = (side as u32).clamp(1, gray.height() - y0);

    let crop = imageops::crop_imm(gray, x0, y0, w, h).to_image();
    imageops::resize(&crop, size, size, FilterType::Triangle)
}

fn to_tensor(chip: &GrayImage) -> Array4<f32> {
    let (w, h) = (chip.width() as usize, chip.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in chip.enumerate_pixels() {
        let v = (pixel.0[0] as f32 - MEAN) / STD;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_crop_face_size() {
        let gray = GrayImage::from_pixel(320, 240, Luma([90]));
        let chip = crop_face(&gray, &face(100.0, 60.0, 80.0, 100.0), 150);
        assert_eq!(chip.dimensions(), (150, 150));
        assert!(chip.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn test_crop_face_clamped_at_edges() {
        let gray = GrayImage::from_pixel(64, 48, Luma([10]));
        // Box hanging off the bottom-right corner.
        let chip = crop_face(&gray, &face(50.0, 40.0, 40.0, 40.0), 112);
        assert_eq!(chip.dimensions(), (112, 112));
        // Entirely outside the frame still yields a valid chip.
        let chip = crop_face(&gray, &face(-500.0, -500.0, 10.0, 10.0), 112);
        assert_eq!(chip.dimensions(), (112, 112));
    }

    #[test]
    fn test_to_tensor_normalisation() {
        let chip = GrayImage::from_pixel(4, 4, Luma([255]));
        let tensor = to_tensor(&chip);
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);
        assert!((tensor[[0, 2, 3, 3]] - 1.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 0, 0]], tensor[[0, 1, 0, 0]]);
    }
}
