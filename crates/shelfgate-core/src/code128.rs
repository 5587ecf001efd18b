//! Code 128: a start symbol, data symbols, a modulo-103 check symbol and
//! the stop pattern. Each symbol is three bars and three spaces spanning
//! 11 modules; the stop adds a trailing bar for 13. Code sets A, B and C
//! are decoded with switches between them; FNC1 is skipped, and symbols
//! that carry shift or FNC2-4 are rejected.

use crate::barcode::Run;

const SYMBOL_MODULES: f32 = 11.0;
const STOP_MODULES: f32 = 13.0;
const QUIET_MODULES: f32 = 5.0;
const MAX_SYMBOL_ERROR: f32 = 1.5;
const MAX_SYMBOLS: usize = 64;

const START_A: u8 = 103;
const START_B: u8 = 104;
const START_C: u8 = 105;
const STOP: [f32; 7] = [2.0, 3.0, 3.0, 1.0, 1.0, 1.0, 2.0];

/// Element widths (bar, space, bar, space, bar, space) of symbol values 0..=105.
pub(crate) const PATTERNS: [[u8; 6]; 106] = [
    [2, 1, 2, 2, 2, 2], [2, 2, 2, 1, 2, 2], [2, 2, 2, 2, 2, 1], [1, 2, 1, 2, 2, 3],
    [1, 2, 1, 3, 2, 2], [1, 3, 1, 2, 2, 2], [1, 2, 2, 2, 1, 3], [1, 2, 2, 3, 1, 2],
    [1, 3, 2, 2, 1, 2], [2, 2, 1, 2, 1, 3], [2, 2, 1, 3, 1, 2], [2, 3, 1, 2, 1, 2],
    [1, 1, 2, 2, 3, 2], [1, 2, 2, 1, 3, 2], [1, 2, 2, 2, 3, 1], [1, 1, 3, 2, 2, 2],
    [1, 2, 3, 1, 2, 2], [1, 2, 3, 2, 2, 1], [2, 2, 3, 2, 1, 1], [2, 2, 1, 1, 3, 2],
    [2, 2, 1, 2, 3, 1], [2, 1, 3, 2, 1, 2], [2, 2, 3, 1, 1, 2], [3, 1, 2, 1, 3, 1],
    [3, 1, 1, 2, 2, 2], [3, 2, 1, 1, 2, 2], [3, 2, 1, 2, 2, 1], [3, 1, 2, 2, 1, 2],
    [3, 2, 2, 1, 1, 2], [3, 2, 2, 2, 1, 1], [2, 1, 2, 1, 2, 3], [2, 1, 2, 3, 2, 1],
    [2, 3, 2, 1, 2, 1], [1, 1, 1, 3, 2, 3], [1, 3, 1, 1, 2, 3], [1, 3, 1, 3, 2, 1],
    [1, 1, 2, 3, 1, 3], [1, 3, 2, 1, 1, 3], [1, 3, 2, 3, 1, 1], [2, 1, 1, 3, 1, 3],
    [2, 3, 1, 1, 1, 3], [2, 3, 1, 3, 1, 1], [1, 1, 2, 1, 3, 3], [1, 1, 2, 3, 3, 1],
    [1, 3, 2, 1, 3, 1], [1, 1, 3, 1, 2, 3], [1, 1, 3, 3, 2, 1], [1, 3, 3, 1, 2, 1],
    [3, 1, 3, 1, 2, 1], [2, 1, 1, 3, 3, 1], [2, 3, 1, 1, 3, 1], [2, 1, 3, 1, 1, 3],
    [2, 1, 3, 3, 1, 1], [2, 1, 3, 1, 3, 1], [3, 1, 1, 1, 2, 3], [3, 1, 1, 3, 2, 1],
    [3, 3, 1, 1, 2, 1], [3, 1, 2, 1, 1, 3], [3, 1, 2, 3, 1, 1], [3, 3, 2, 1, 1, 1],
    [3, 1, 4, 1, 1, 1], [2, 2, 1, 4, 1, 1], [4, 3, 1, 1, 1, 1], [1, 1, 1, 2, 2, 4],
    [1, 1, 1, 4, 2, 2], [1, 2, 1, 1, 2, 4], [1, 2, 1, 4, 2, 1], [1, 4, 1, 1, 2, 2],
    [1, 4, 1, 2, 2, 1], [1, 1, 2, 2, 1, 4], [1, 1, 2, 4, 1, 2], [1, 2, 2, 1, 1, 4],
    [1, 2, 2, 4, 1, 1], [1, 4, 2, 1, 1, 2], [1, 4, 2, 2, 1, 1], [2, 4, 1, 2, 1, 1],
    [2, 2, 1, 1, 1, 4], [4, 1, 3, 1, 1, 1], [2, 4, 1, 1, 1, 2], [1, 3, 4, 1, 1, 1],
    [1, 1, 1, 2, 4, 2], [1, 2, 1, 1, 4, 2], [1, 2, 1, 2, 4, 1], [1, 1, 4, 2, 1, 2],
    [1, 2, 4, 1, 1, 2], [1, 2, 4, 2, 1, 1], [4, 1, 1, 2, 1, 2], [4, 2, 1, 1, 1, 2],
    [4, 2, 1, 2, 1, 1], [2, 1, 2, 1, 4, 1], [2, 1, 4, 1, 2, 1], [4, 1, 2, 1, 2, 1],
    [1, 1, 1, 1, 4, 3], [1, 1, 1, 3, 4, 1], [1, 3, 1, 1, 4, 1], [1, 1, 4, 1, 1, 3],
    [1, 1, 4, 3, 1, 1], [4, 1, 1, 1, 1, 3], [4, 1, 1, 3, 1, 1], [1, 1, 3, 1, 4, 1],
    [1, 1, 4, 1, 3, 1], [3, 1, 1, 1, 4, 1], [4, 1, 1, 1, 3, 1], [2, 1, 1, 4, 1, 2],
    [2, 1, 1, 2, 1, 4], [2, 1, 1, 2, 3, 2],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeSet {
    A,
    B,
    C,
}

pub(crate) fn decode_runs(runs: &[Run]) -> Option<String> {
    (0..runs.len())
        .filter(|&i| runs[i].0)
        .find_map(|i| decode_from(runs, i))
}

/// Decode a symbol whose start character begins at run `start`.
fn decode_from(runs: &[Run], start: usize) -> Option<String> {
    let first = runs.get(start..start + 6)?;
    let module = total(first) / SYMBOL_MODULES;
    if start > 0 && runs[start - 1].1 < QUIET_MODULES * module {
        return None;
    }
    let start_value = match_symbol(first)?;
    if !(START_A..=START_C).contains(&start_value) {
        return None;
    }

    let mut values = vec![start_value];
    let mut pos = start + 6;
    loop {
        if runs.get(pos..pos + 7).is_some_and(is_stop) {
            break;
        }
        values.push(match_symbol(runs.get(pos..pos + 6)?)?);
        pos += 6;
        if values.len() > MAX_SYMBOLS {
            return None;
        }
    }

    // start, at least one data symbol, check
    if values.len() < 3 {
        return None;
    }
    let check = values.pop()?;
    let weighted: u32 = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as u32).max(1) * v as u32)
        .sum();
    if weighted % 103 != check as u32 {
        return None;
    }
    text(start_value, &values[1..])
}

fn total(runs: &[Run]) -> f32 {
    runs.iter().map(|r| r.1).sum()
}

fn scaled(runs: &[Run], modules: f32) -> impl Iterator<Item = f32> + '_ {
    let unit = total(runs) / modules;
    runs.iter().map(move |r| r.1 / unit)
}

fn match_symbol(runs: &[Run]) -> Option<u8> {
    let widths: Vec<f32> = scaled(runs, SYMBOL_MODULES).collect();
    let (value, error) = PATTERNS
        .iter()
        .enumerate()
        .map(|(v, pattern)| {
            let err: f32 = pattern.iter().zip(&widths).map(|(&p, w)| (p as f32 - w).abs()).sum();
            (v, err)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    (error < MAX_SYMBOL_ERROR).then_some(value as u8)
}

fn is_stop(runs: &[Run]) -> bool {
    let error: f32 = scaled(runs, STOP_MODULES).zip(STOP).map(|(w, s)| (w - s).abs()).sum();
    error < MAX_SYMBOL_ERROR
}

fn text(start: u8, data: &[u8]) -> Option<String> {
    let mut set = match start {
        START_A => CodeSet::A,
        START_B => CodeSet::B,
        _ => CodeSet::C,
    };
    let mut out = String::new();
    for &v in data {
        match (set, v) {
            (_, 102) => {}
            (CodeSet::C, 0..=99) => {
                out.push(char::from(b'0' + v / 10));
                out.push(char::from(b'0' + v % 10));
            }
            (CodeSet::A | CodeSet::B, 99) => set = CodeSet::C,
            (CodeSet::A | CodeSet::C, 100) => set = CodeSet::B,
            (CodeSet::B | CodeSet::C, 101) => set = CodeSet::A,
            (CodeSet::A, 0..=63) | (CodeSet::B, 0..=95) => out.push(char::from(b' ' + v)),
            (CodeSet::A, 64..=95) => out.push(char::from(v - 64)),
            _ => return None,
        }
    }
    (!out.is_empty()).then_some(out)
}
