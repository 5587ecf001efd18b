//! In-memory face index.
//!
//! Holds every registered face signature in registration order, with
//! squared norms precomputed so that probing a frame never touches the
//! record store. The index is built once at startup and extended on each
//! registration.

use crate::types::Embedding;

/// A registered identity as seen by the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub person_id: i64,
    pub name: String,
}

#[derive(Debug, Default, Clone)]
pub struct FaceIndex {
    entries: Vec<IndexEntry>,
    embeddings: Vec<Embedding>,
    sq_norms: Vec<f64>,
}

impl FaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from `(entry, embedding)` rows, keeping their order.
    pub fn build<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (IndexEntry, Embedding)>,
    {
        let mut index = Self::new();
        for (entry, embedding) in rows {
            index.insert(entry, embedding);
        }
        index
    }

    pub fn insert(&mut self, entry: IndexEntry, embedding: Embedding) {
        self.sq_norms.push(sq_norm(embedding.values()));
        self.entries.push(entry);
        self.embeddings.push(embedding);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Match vector in enumeration order: `true` where `distance <= tolerance`.
    pub fn compare_faces(&self, probe: &Embedding, tolerance: f64) -> Vec<bool> {
        let probe_sq = sq_norm(probe.values());
        let limit = tolerance * tolerance;
        self.embeddings
            .iter()
            .zip(self.sq_norms.iter())
            .map(|(known, &known_sq)| {
                // ||a - b||^2 = ||a||^2 + ||b||^2 - 2 a.b, clamped against rounding.
                let d2 = (probe_sq + known_sq - 2.0 * dot(probe.values(), known.values())).max(0.0);
                d2 <= limit
            })
            .collect()
    }

    /// First entry in enumeration order within `tolerance` of `probe`.
    pub fn first_match(&self, probe: &Embedding, tolerance: f64) -> Option<&IndexEntry> {
        self.compare_faces(probe, tolerance)
            .iter()
            .position(|&m| m)
            .map(|i| &self.entries[i])
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn sq_norm(v: &[f64]) -> f64 {
    dot(v, v)
}
