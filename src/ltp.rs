//! Long-term prediction
//!
//! The predictor repeats the input from `lag` samples ago, scaled by a
//! quantized gain, and transforms it with the long MDCT. Bands where coding
//! the difference is cheaper and cleaner switch to the residual; the frame
//! keeps LTP only if the saved bits pay for the side information.

use crate::mdct::{mdct_long, MDCT_INPUT_LEN};
use crate::quantization::{abs_pow34_vec, BandQuantizer};
use crate::tables::{LTP_COEF, MAX_LTP_LONG_SFB};
use crate::types::{ChannelData, PsyBand, BLOCK_LEN, MAX_BANDS};

/// Time-domain history kept per channel
pub const LTP_HISTORY_LEN: usize = 3 * BLOCK_LEN;

/// Largest searched lag
pub const LTP_MAX_LAG: usize = 2048;

/// Fixed side information cost of a frame using LTP
const LTP_FRAME_BITS: i32 = 15;

/// Lambda above which LTP is not tried
pub const LTP_LAMBDA_LIMIT: f32 = 120.0;

/// LTP side information of one channel
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct LtpInfo {
    pub present: bool,
    pub lag: u16,
    pub coef_idx: u8,
    pub coef: f32,
    /// Per band slot: the residual is coded
    pub used: Vec<bool>,
}

/// Predicted spectrum of the current frame
#[derive(Debug, Clone)]
pub struct LtpPrediction {
    pub lag: u16,
    pub coef_idx: u8,
    pub coef: f32,
    pub spectrum: Vec<f32>,
}

/// Rolling time-domain history of one channel
#[derive(Debug, Clone)]
pub struct LtpState {
    history: Vec<f32>,
    lag: u16,
}

impl Default for LtpState {
    fn default() -> Self {
        Self::new()
    }
}

impl LtpState {
    pub fn new() -> Self {
        Self {
            history: vec![0.0; LTP_HISTORY_LEN],
            lag: 0,
        }
    }

    pub fn history(&self) -> &[f32] {
        &self.history
    }

    /// Lag found for the current frame, 0 if none
    pub fn lag(&self) -> u16 {
        self.lag
    }

    pub fn clear_lag(&mut self) {
        self.lag = 0;
    }

    /// Find the best lag and gain for the transform window `input`
    ///
    /// `input` is the current long transform window: the previous frame's
    /// new samples followed by this frame's. Returns `None` when no lag
    /// correlates positively.
    pub fn predict(&mut self, input: &[f32]) -> Option<LtpPrediction> {
        debug_assert_eq!(input.len(), MDCT_INPUT_LEN);
        self.lag = 0;

        let mut best_corr = 0.0f32;
        let mut best = None;
        for lag in 1..=LTP_MAX_LAG {
            let known = (BLOCK_LEN + lag).min(MDCT_INPUT_LEN);
            let mut s0 = 0.0f32;
            let mut s1 = 0.0f32;
            for j in 0..known {
                let h = self.history[2 * BLOCK_LEN + j - lag];
                s0 += input[j] * h;
                s1 += h * h;
            }
            if s1 <= 0.0 {
                continue;
            }
            let corr = s0 / s1.sqrt();
            if corr > best_corr {
                best_corr = corr;
                best = Some((lag, s0 / s1));
            }
        }
        let (lag, gain) = best?;

        let coef_idx = LTP_COEF
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - gain).abs().total_cmp(&(b.1 - gain).abs()))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let coef = LTP_COEF[coef_idx];

        let known = (BLOCK_LEN + lag).min(MDCT_INPUT_LEN);
        let mut predicted = vec![0.0f32; MDCT_INPUT_LEN];
        for (j, p) in predicted.iter_mut().enumerate().take(known) {
            *p = coef * self.history[2 * BLOCK_LEN + j - lag];
        }
        let mut spectrum = vec![0.0f32; BLOCK_LEN];
        mdct_long(&predicted, &mut spectrum);

        self.lag = lag as u16;
        log::trace!("ltp: lag {} gain {:.3} (index {})", lag, gain, coef_idx);
        Some(LtpPrediction {
            lag: lag as u16,
            coef_idx: coef_idx as u8,
            coef,
            spectrum,
        })
    }

    /// Append this frame's new samples (the second half of `input`)
    ///
    /// The history holds the encoder input rather than the decoded signal,
    /// so the lag search does not run an inverse transform per frame.
    pub fn push_frame(&mut self, input: &[f32]) {
        debug_assert_eq!(input.len(), MDCT_INPUT_LEN);
        self.history.copy_within(BLOCK_LEN.., 0);
        self.history[2 * BLOCK_LEN..].copy_from_slice(&input[BLOCK_LEN..]);
    }
}

/// Code the prediction residual in every band where it pays off
///
/// Band costs are taken at the channel's current scalefactors and band
/// types. Returns whether LTP is kept; when it is not, `ch.coeffs` is left
/// exactly as it was.
pub fn search_for_ltp(
    ch: &mut ChannelData,
    bands: &[PsyBand],
    prediction: &LtpPrediction,
    lambda: f32,
    quantizer: BandQuantizer,
) -> bool {
    ch.ltp = LtpInfo::default();
    if ch.window.is_short() || lambda > LTP_LAMBDA_LIMIT {
        return false;
    }

    let max_ltp = ch.window.max_sfb().min(MAX_LTP_LONG_SFB);
    let original = ch.coeffs.clone();
    let mut used = vec![false; MAX_BANDS];
    let mut saved_bits = -(LTP_FRAME_BITS + max_ltp as i32);
    let mut count = 0;

    for g in 0..max_ltp {
        let range = ch.window.band_range(0, g);
        let band = &bands[g];
        if band.threshold <= 0.0 {
            continue;
        }
        let coeffs = &ch.coeffs[range.clone()];
        let residual: Vec<f32> = coeffs.iter().zip(&prediction.spectrum[range.clone()]).map(|(c, p)| c - p).collect();
        let plain = quantizer.cost(coeffs, &abs_pow34_vec(coeffs), ch.sf_idx[g], ch.band_type[g]);
        let predicted = quantizer.cost(&residual, &abs_pow34_vec(&residual), ch.sf_idx[g], ch.band_type[g]);
        if predicted.distortion < plain.distortion && predicted.bits < plain.bits {
            ch.coeffs[range].copy_from_slice(&residual);
            used[g] = true;
            saved_bits += plain.bits as i32 - predicted.bits as i32;
            count += 1;
        }
    }

    if count == 0 || saved_bits < 0 {
        if count > 0 {
            log::trace!("ltp: {} bands rejected, saved {} bits", count, saved_bits);
            ch.coeffs = original;
        }
        return false;
    }

    ch.ltp = LtpInfo {
        present: true,
        lag: prediction.lag,
        coef_idx: prediction.coef_idx,
        coef: prediction.coef,
        used,
    };
    log::debug!("ltp: lag {} on {} bands, {} bits saved", prediction.lag, count, saved_bits);
    true
}
