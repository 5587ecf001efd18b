//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame to a square input, decodes the three stride
//! levels (score, box distances, keypoints) and merges them with NMS.

use crate::types::{BoundingBox, FrameView};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const MEAN: f32 = 127.5;
const STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer does not match {0}x{1}")]
    BadFrame(u32, u32),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when letterboxing, used to map boxes back.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((INPUT_SIZE as f32 - new_w) / 2.0).floor(),
            pad_y: ((INPUT_SIZE as f32 - new_h) / 2.0).floor(),
        }
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub struct FaceDetector {
    session: Session,
    /// (score, bbox, kps) output indices per stride.
    outputs: [(usize, usize, usize); 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs, model has {}",
                names.len()
            )));
        }
        let outputs = output_layout(&names);
        tracing::info!(path = %model_path.display(), ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    /// Faces in `frame`, best confidence first.
    pub fn detect(&mut self, frame: FrameView<'_>) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(frame)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut found = Vec::new();
        for (level, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.outputs[level];
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            found.extend(decode_level(
                tensor(score_idx, "scores")?,
                tensor(bbox_idx, "boxes")?,
                tensor(kps_idx, "keypoints")?,
                stride,
                &letterbox,
            ));
        }

        Ok(nms(found, NMS_THRESHOLD))
    }
}

/// Map output names to stride slots, falling back to the standard
/// `[scores 8/16/32, boxes 8/16/32, kps 8/16/32]` order.
fn output_layout(names: &[String]) -> [(usize, usize, usize); 3] {
    let find = |prefix: &str, stride: usize| names.iter().position(|n| *n == format!("{prefix}_{stride}"));
    let mut layout = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in layout.iter_mut().zip(STRIDES.iter()) {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => *slot = (s, b, k),
            _ => return [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
        }
    }
    layout
}

fn preprocess(frame: FrameView<'_>) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let expected = (frame.width as usize) * (frame.height as usize);
    let gray = GrayImage::from_raw(
        frame.width,
        frame.height,
        frame.pixels.get(..expected).unwrap_or_default().to_vec(),
    )
    .ok_or(DetectorError::BadFrame(frame.width, frame.height))?;

    let letterbox = Letterbox::fit(frame.width, frame.height);
    let new_w = ((frame.width as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((frame.height as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = imageops::resize(&gray, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding stays at 0.0, which is MEAN after normalisation.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (ox + x as usize, oy + y as usize);
        if tx >= size || ty >= size {
            continue;
        }
        let v = (pixel.0[0] as f32 - MEAN) / STD;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }
    Ok((tensor, letterbox))
}

fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE as usize / stride;
    let step = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|(_, score)| **score > CONFIDENCE_THRESHOLD)
        .filter_map(|(idx, &score)| {
            let cell = idx / ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * step;
            let ay = (cell / grid_w) as f32 * step;

            let d = boxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Non-maximum suppression; result is sorted by confidence.
fn nms(mut dets: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in dets {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence, landmarks: None }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &bbox(20.0, 20.0, 5.0, 5.0, 1.0)), 0.0);
        assert!((iou(&a, &bbox(5.0, 0.0, 10.0, 10.0, 1.0)) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlap() {
        let kept = nms(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
                bbox(300.0, 300.0, 40.0, 40.0, 0.6),
            ],
            NMS_THRESHOLD,
        );
        let conf: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(conf, vec![0.9, 0.6]);
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::fit(1280, 720);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
        let (x, y) = lb.unmap(100.0 * 0.5, 50.0 * 0.5 + 140.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_output_layout_named_and_fallback() {
        let named: Vec<String> = ["bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(output_layout(&named), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);

        let numeric: Vec<String> = (0..9).map(|i| i.to_string()).collect();
        assert_eq!(output_layout(&numeric), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_level_single_anchor() {
        // One confident anchor at cell (1, 0) of stride 32, box extending one stride each way.
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let cells = (640 / 32) * (640 / 32) * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; cells];
        let mut boxes = vec![0.0; cells * 4];
        scores[2] = 0.95;
        boxes[8..12].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let dets = decode_level(&scores, &boxes, &[], 32, &lb);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (0.0, -32.0, 64.0, 64.0));
        assert!(d.landmarks.is_none());
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let pixels = vec![255u8; 64 * 32];
        let (tensor, lb) = preprocess(FrameView::new(&pixels, 64, 32)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 1, 320, 320]];
        assert!((inside - (255.0 - MEAN) / STD).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_rejects_short_buffer() {
        let pixels = vec![0u8; 10];
        assert!(matches!(
            preprocess(FrameView::new(&pixels, 64, 32)),
            Err(DetectorError::BadFrame(64, 32))
        ));
    }
}
