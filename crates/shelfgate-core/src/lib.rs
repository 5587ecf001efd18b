//! Circulation logic and the vision services around it.
//!
//! The issue/return state machine, the in-memory face index and the kiosk
//! session live here, together with the ONNX face encoder (SCRFD detector
//! plus a 128-dim embedding model) and the EAN-8 / Code 128 barcode reader.

pub mod barcode;
pub mod circulation;
mod code128;
pub mod detector;
mod ean8;
pub mod encoder;
pub mod index;
pub mod scan;
pub mod session;
pub mod types;

use std::path::PathBuf;

pub use barcode::{ScanlineReader, Symbology};
pub use circulation::{CirculationError, CirculationState, ItemCode, Outcome};
pub use detector::FaceDetector;
pub use encoder::OnnxFaceEncoder;
pub use index::{FaceIndex, IndexEntry};
pub use scan::{BarcodeReader, FaceEncoder, ScanStep, VisionError};
pub use session::{KioskSession, SessionState, VerifiedPerson};
pub use types::{BoundingBox, DetectedFace, Embedding, EmbeddingError, FrameView, EMBEDDING_DIM};

/// Model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("shelfgate/models")
}
