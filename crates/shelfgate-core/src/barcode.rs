//! Scanline barcode reader.
//!
//! Samples horizontal rows of a grayscale frame, binarises each row at the
//! midpoint of its range and hands the run lengths to each enabled
//! symbology decoder. Rows are tried in both directions so upside-down
//! symbols decode too. Payloads are reported in the order first seen.

use crate::scan::BarcodeReader;
use crate::types::FrameView;
use crate::{code128, ean8};

const MIN_CONTRAST: u8 = 32;

/// A run of equal-colour pixels: `(is_bar, width)`.
pub(crate) type Run = (bool, f32);

/// Linear symbologies the reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    Ean8,
    Code128,
}

impl Symbology {
    fn decode(self, runs: &[Run]) -> Option<String> {
        match self {
            Self::Ean8 => ean8::decode_runs(runs),
            Self::Code128 => code128::decode_runs(runs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanlineReader {
    scanlines: u32,
    symbologies: Vec<Symbology>,
}

impl Default for ScanlineReader {
    fn default() -> Self {
        Self {
            scanlines: 16,
            symbologies: vec![Symbology::Ean8, Symbology::Code128],
        }
    }
}

impl ScanlineReader {
    pub fn with_scanlines(mut self, scanlines: u32) -> Self {
        self.scanlines = scanlines.max(1);
        self
    }

    /// Restrict decoding to `symbologies`, tried in the given order.
    pub fn with_symbologies(mut self, symbologies: &[Symbology]) -> Self {
        self.symbologies = symbologies.to_vec();
        self
    }

    fn decode_row(&self, row: &[u8]) -> Option<(Symbology, String)> {
        let runs = binarise(row)?;
        let reversed: Vec<Run> = runs.iter().rev().copied().collect();
        self.symbologies.iter().find_map(|&sym| {
            sym.decode(&runs)
                .or_else(|| sym.decode(&reversed))
                .map(|code| (sym, code))
        })
    }
}

impl BarcodeReader for ScanlineReader {
    fn decode(&self, frame: FrameView<'_>) -> Vec<String> {
        if !frame.is_complete() {
            return Vec::new();
        }
        let width = frame.width as usize;
        let mut found: Vec<String> = Vec::new();

        for k in 0..self.scanlines {
            let y = (frame.height as usize) * (k as usize + 1) / (self.scanlines as usize + 1);
            let row = &frame.pixels[y * width..(y + 1) * width];
            if let Some((symbology, code)) = self.decode_row(row) {
                if !found.contains(&code) {
                    tracing::debug!(row = y, ?symbology, code = %code, "barcode decoded");
                    found.push(code);
                }
            }
        }
        found
    }
}

fn binarise(row: &[u8]) -> Option<Vec<Run>> {
    let lo = *row.iter().min()?;
    let hi = *row.iter().max()?;
    if hi - lo < MIN_CONTRAST {
        return None;
    }
    let threshold = lo + (hi - lo) / 2;

    let mut runs: Vec<Run> = Vec::new();
    for &p in row {
        let bar = p < threshold;
        match runs.last_mut() {
            Some((last, width)) if *last == bar => *width += 1.0,
            _ => runs.push((bar, 1.0)),
        }
    }
    Some(runs)
}

/// Rows of `modules` ('1' = bar) with a 10-module quiet zone, `scale` pixels per module.
#[cfg(test)]
pub(crate) fn render(modules: &str, scale: usize, height: usize) -> (Vec<u8>, u32, u32) {
    let quiet = "0".repeat(10);
    let pattern = format!("{quiet}{modules}{quiet}");
    let row: Vec<u8> = pattern
        .chars()
        .flat_map(|m| std::iter::repeat(if m == '1' { 20 } else { 230 }).take(scale))
        .collect();
    let width = row.len();
    (row.repeat(height), width as u32, height as u32)
}
