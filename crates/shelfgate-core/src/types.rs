use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of values in a face signature.
pub const EMBEDDING_DIM: usize = 128;

const BYTES_PER_VALUE: usize = std::mem::size_of::<f64>();

#[derive(Error, Debug, PartialEq)]
pub enum EmbeddingError {
    #[error("expected {expected}-dim embedding, got {actual}")]
    WrongDimension { expected: usize, actual: usize },
    #[error("face signature blob is {0} bytes, expected {expected}", expected = EMBEDDING_DIM * BYTES_PER_VALUE)]
    BadBlobLength(usize),
    #[error("embedding contains a non-finite value")]
    NonFinite,
}

/// Borrowed grayscale frame handed to the vision services.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// Grayscale pixel data (width * height bytes).
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> FrameView<'a> {
    pub fn new(pixels: &'a [u8], width: u32, height: u32) -> Self {
        Self { pixels, width, height }
    }

    /// True if the buffer is large enough for the stated dimensions.
    pub fn is_complete(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() >= (self.width as usize) * (self.height as usize)
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face signature: a fixed-length vector compared by Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f64>,
}

impl Embedding {
    /// Build an embedding, rejecting vectors of the wrong length or with NaN/inf.
    pub fn new(values: Vec<f64>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::WrongDimension {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite);
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Euclidean distance between two embeddings.
    pub fn distance(&self, other: &Embedding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Serialize as little-endian `f64`s, the on-disk face signature format.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * BYTES_PER_VALUE);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self, EmbeddingError> {
        if blob.len() != EMBEDDING_DIM * BYTES_PER_VALUE {
            return Err(EmbeddingError::BadBlobLength(blob.len()));
        }
        let values = blob
            .chunks_exact(BYTES_PER_VALUE)
            .map(|chunk| {
                let mut bytes = [0u8; BYTES_PER_VALUE];
                bytes.copy_from_slice(chunk);
                f64::from_le_bytes(bytes)
            })
            .collect();
        Self::new(values)
    }
}

/// One face found in a frame, with the detector's confidence.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub embedding: Embedding,
    pub confidence: f32,
}

#[cfg(test)]
pub(crate) fn embedding_at(offset: f64) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[0] = offset;
    Embedding::new(values).unwrap()
}
