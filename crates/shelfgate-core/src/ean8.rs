//! EAN-8: 67 modules laid out as start guard, four left digits, centre
//! guard, four right digits, end guard. A payload is accepted only if its
//! check digit holds.

use crate::barcode::Run;

const MODULES: f32 = 67.0;
/// Runs per symbol: 3 + 4*4 + 5 + 4*4 + 3.
const RUNS: usize = 43;
const MAX_DIGIT_ERROR: f32 = 1.5;

/// Run widths (in modules) of each digit, first run first. Left-half digits
/// start with a space and right-half digits with a bar; widths are the same.
const DIGIT_WIDTHS: [[f32; 4]; 10] = [
    [3.0, 2.0, 1.0, 1.0],
    [2.0, 2.0, 2.0, 1.0],
    [2.0, 1.0, 2.0, 2.0],
    [1.0, 4.0, 1.0, 1.0],
    [1.0, 1.0, 3.0, 2.0],
    [1.0, 2.0, 3.0, 1.0],
    [1.0, 1.0, 1.0, 4.0],
    [1.0, 3.0, 1.0, 2.0],
    [1.0, 2.0, 1.0, 3.0],
    [3.0, 1.0, 1.0, 2.0],
];

pub(crate) fn decode_runs(runs: &[Run]) -> Option<String> {
    (1..runs.len().saturating_sub(RUNS - 1))
        .filter(|&i| runs[i].0)
        .find_map(|i| decode_symbol(&runs[i..i + RUNS], runs[i - 1].1))
}

/// Decode one candidate symbol. `quiet` is the width of the space before it.
fn decode_symbol(sym: &[Run], quiet: f32) -> Option<String> {
    let module = sym.iter().map(|r| r.1).sum::<f32>() / MODULES;
    if quiet < 3.0 * module {
        return None;
    }

    let guards = sym[0..3].iter().chain(&sym[19..24]).chain(&sym[40..43]);
    if !guards.into_iter().all(|r| r.1 >= 0.5 * module && r.1 <= 1.6 * module) {
        return None;
    }

    let mut digits = [0u8; 8];
    for k in 0..4 {
        digits[k] = match_digit(&sym[3 + 4 * k..7 + 4 * k])?;
        digits[4 + k] = match_digit(&sym[24 + 4 * k..28 + 4 * k])?;
    }

    if !check_digit_ok(&digits) {
        return None;
    }
    Some(digits.iter().map(|d| char::from(b'0' + d)).collect())
}

fn match_digit(runs: &[Run]) -> Option<u8> {
    let total: f32 = runs.iter().map(|r| r.1).sum();
    let scaled: Vec<f32> = runs.iter().map(|r| r.1 * 7.0 / total).collect();

    let (digit, error) = DIGIT_WIDTHS
        .iter()
        .enumerate()
        .map(|(d, widths)| {
            let err: f32 = widths.iter().zip(&scaled).map(|(w, s)| (w - s).abs()).sum();
            (d, err)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))?;

    (error < MAX_DIGIT_ERROR).then_some(digit as u8)
}

/// EAN check: weights 3,1,3,1,... from the left over the first seven digits.
fn check_digit_ok(digits: &[u8; 8]) -> bool {
    let sum: u32 = digits[..7]
        .iter()
        .enumerate()
        .map(|(i, &d)| d as u32 * if i % 2 == 0 { 3 } else { 1 })
        .sum();
    (10 - sum % 10) % 10 == digits[7] as u32
}
