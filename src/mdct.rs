//! Long-window MDCT used to bring the long-term predictor into the spectral domain
//!
//! Direct evaluation of
//! `X[k] = sum(w[n] * x[n] * cos(pi / N * (n + 1/2 + N/2) * (k + 1/2)))`
//! for `N = 1024` outputs over `2N` windowed inputs. The cosine argument is
//! a multiple of `pi / 4N`, so one table of `8N` entries covers every term.

use std::f64::consts::PI;

use lazy_static::lazy_static;

use crate::types::BLOCK_LEN;

/// Input samples of one long transform
pub const MDCT_INPUT_LEN: usize = 2 * BLOCK_LEN;

const COS_TABLE_LEN: usize = 8 * BLOCK_LEN;

lazy_static! {
    /// cos(pi * m / 4N) for one full period
    static ref COS_TABLE: Vec<f32> = (0..COS_TABLE_LEN)
        .map(|m| (PI * m as f64 / (4 * BLOCK_LEN) as f64).cos() as f32)
        .collect();

    /// Sine window over the `2N` inputs
    static ref SINE_WINDOW: Vec<f32> = (0..MDCT_INPUT_LEN)
        .map(|n| (PI / MDCT_INPUT_LEN as f64 * (n as f64 + 0.5)).sin() as f32)
        .collect();
}

/// Sine window of a long transform
pub fn sine_window() -> &'static [f32] {
    &SINE_WINDOW
}

/// Window `input` with the sine window and transform it into `out`
///
/// `input` must hold [`MDCT_INPUT_LEN`] samples and `out` [`BLOCK_LEN`].
pub fn mdct_long(input: &[f32], out: &mut [f32]) {
    debug_assert_eq!(input.len(), MDCT_INPUT_LEN);
    debug_assert_eq!(out.len(), BLOCK_LEN);

    let windowed: Vec<f32> = input.iter().zip(SINE_WINDOW.iter()).map(|(x, w)| x * w).collect();
    for (k, o) in out.iter_mut().enumerate() {
        let kk = 2 * k + 1;
        let mut acc = 0.0f32;
        for (n, &x) in windowed.iter().enumerate() {
            if x == 0.0 {
                continue;
            }
            let arg = ((2 * n + 1 + BLOCK_LEN) * kk) % COS_TABLE_LEN;
            acc += x * COS_TABLE[arg];
        }
        *o = acc;
    }
}
