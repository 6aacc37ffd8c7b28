//! Backward-adaptive prediction across frames
//!
//! Every coefficient of the lower bands has a second-order lattice predictor
//! that adapts from the coefficients it has seen, so no predictor taps are
//! transmitted. State arithmetic is rounded to 16-bit mantissas to keep the
//! predictors reproducible. Groups of predictors are reset on a round-robin
//! schedule to bound drift.

use crate::quantization::{abs_pow34_vec, find_max_val, find_min_book, BandQuantizer};
use crate::tables::{MAX_PREDICTORS, PRED_SFB_MAX};
use crate::types::{BandType, ChannelData, PsyBand, MAX_BANDS};

/// First band evaluated for prediction
pub const PRED_SFB_START: usize = 10;

/// Number of reset groups; group `g` holds every 30th predictor from `g - 1`
pub const PRED_RESET_GROUPS: usize = 30;

/// A group older than this is reset at once
const PRED_RESET_FRAME_MIN: u32 = 240;

/// The most overdue group is reset once older than this
const PRED_RESET_MIN: u32 = 64;

const PRED_A: f32 = 61.0 / 64.0;
const PRED_ALPHA: f32 = 29.0 / 32.0;

/// Round to the nearest 16-bit mantissa
fn flt16_round(x: f32) -> f32 {
    f32::from_bits(x.to_bits().wrapping_add(0x0000_8000) & 0xFFFF_0000)
}

/// Round to the nearest 16-bit mantissa, ties to even
fn flt16_even(x: f32) -> f32 {
    let bits = x.to_bits();
    f32::from_bits(bits.wrapping_add(0x0000_7FFF).wrapping_add((bits >> 16) & 1) & 0xFFFF_0000)
}

/// Truncate to a 16-bit mantissa
fn flt16_trunc(x: f32) -> f32 {
    f32::from_bits(x.to_bits() & 0xFFFF_0000)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Predictor {
    r0: f32,
    r1: f32,
    k1: f32,
    cor0: f32,
    cor1: f32,
    var0: f32,
    var1: f32,
    x_est: f32,
}

impl Default for Predictor {
    fn default() -> Self {
        Self {
            r0: 0.0,
            r1: 0.0,
            k1: 0.0,
            cor0: 0.0,
            cor1: 0.0,
            var0: 1.0,
            var1: 1.0,
            x_est: 0.0,
        }
    }
}

impl Predictor {
    /// Adapt to `coef` and return the prediction error
    fn update(&mut self, coef: f32) -> f32 {
        let e0 = coef - self.x_est;
        let e1 = e0 - self.k1 * self.r0;
        let (r0, r1) = (self.r0, self.r1);

        self.cor1 = flt16_trunc(PRED_ALPHA * self.cor1 + r1 * e1);
        self.var1 = flt16_trunc(PRED_ALPHA * self.var1 + 0.5 * (r1 * r1 + e1 * e1));
        self.cor0 = flt16_trunc(PRED_ALPHA * self.cor0 + r0 * e0);
        self.var0 = flt16_trunc(PRED_ALPHA * self.var0 + 0.5 * (r0 * r0 + e0 * e0));
        self.r1 = flt16_trunc(PRED_A * (r0 - self.k1 * e0));
        self.r0 = flt16_trunc(PRED_A * e0);

        self.k1 = if self.var0 > 1.0 {
            self.cor0 * flt16_even(PRED_A / self.var0)
        } else {
            0.0
        };
        let k2 = if self.var1 > 1.0 {
            self.cor1 * flt16_even(PRED_A / self.var1)
        } else {
            0.0
        };
        self.x_est = flt16_round(self.k1 * self.r0 + k2 * self.r1);
        e0
    }
}

/// Prediction side information of one channel
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct PredictionInfo {
    pub present: bool,
    /// Per band: the prediction residual is coded
    pub used: Vec<bool>,
    /// Reset group signalled this frame (1..=30)
    pub reset_group: Option<u8>,
}

/// Predictors of one channel carried across frames
#[derive(Debug, Clone)]
pub struct PredictorState {
    predictors: Vec<Predictor>,
    /// Frames since each group was last reset; index 0 is unused
    reset_count: [u32; PRED_RESET_GROUPS + 1],
}

impl Default for PredictorState {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictorState {
    pub fn new() -> Self {
        let mut reset_count = [0u32; PRED_RESET_GROUPS + 1];
        for (i, c) in reset_count.iter_mut().enumerate() {
            *c = i as u32;
        }
        Self {
            predictors: vec![Predictor::default(); MAX_PREDICTORS],
            reset_count,
        }
    }

    /// Prediction of coefficient `k` for the current frame
    pub fn predicted(&self, k: usize) -> f32 {
        self.predictors.get(k).map_or(0.0, |p| p.x_est)
    }

    pub fn reset_all(&mut self) {
        self.predictors.iter_mut().for_each(|p| *p = Predictor::default());
    }

    fn reset_group(&mut self, group: usize) {
        for k in (group - 1..MAX_PREDICTORS).step_by(PRED_RESET_GROUPS) {
            self.predictors[k] = Predictor::default();
        }
        self.reset_count[group] = 0;
    }

    /// Advance the reset counters and pick the group to reset this frame
    fn schedule_reset(&mut self) -> Option<usize> {
        for g in 1..=PRED_RESET_GROUPS {
            self.reset_count[g] += 1;
        }
        if let Some(g) = (1..=PRED_RESET_GROUPS).find(|&g| self.reset_count[g] > PRED_RESET_FRAME_MIN) {
            return Some(g);
        }
        let mut oldest = 1;
        for g in 2..=PRED_RESET_GROUPS {
            if self.reset_count[g] > self.reset_count[oldest] {
                oldest = g;
            }
        }
        (self.reset_count[oldest] > PRED_RESET_MIN).then_some(oldest)
    }
}

/// Number of bands carrying predictors for this layout
fn prediction_bands(ch: &ChannelData) -> usize {
    let offsets = ch.window.swb_offset();
    let mut pmax = ch.window.max_sfb().min(PRED_SFB_MAX[ch.window.sr_index()]);
    while pmax > 0 && offsets[pmax] as usize > MAX_PREDICTORS {
        pmax -= 1;
    }
    pmax
}

/// Decide which bands code the prediction residual
///
/// Costs are taken at the channel's current scalefactors. Prediction is
/// kept when the total cost with residuals does not exceed the cost
/// without. Coefficients are not modified; see [`apply_prediction`].
pub fn search_for_pred(
    ch: &mut ChannelData,
    bands: &[PsyBand],
    state: &mut PredictorState,
    lambda: f32,
    quantizer: BandQuantizer,
) -> bool {
    ch.prediction = PredictionInfo::default();
    if ch.window.is_short() {
        return false;
    }
    ch.prediction.reset_group = state.schedule_reset().map(|g| g as u8);

    let pmax = prediction_bands(ch);
    let mut used = vec![false; MAX_BANDS];
    let mut cost_coeffs = 0u32;
    let mut cost_pred = 0u32;
    let mut count = 0;

    for g in PRED_SFB_START..pmax {
        let band_type = ch.band_type[g];
        if ch.zeroes[g] || band_type == BandType::ZERO || !band_type.is_spectral() || bands[g].threshold <= 0.0 {
            continue;
        }
        let range = ch.window.band_range(0, g);
        let sf = ch.sf_idx[g];
        let weight = lambda / bands[g].threshold;

        let coeffs = &ch.coeffs[range.clone()];
        let plain = quantizer.cost(coeffs, &abs_pow34_vec(coeffs), sf, band_type);
        cost_coeffs += plain.bits;

        let residual: Vec<f32> = range.clone().map(|k| ch.coeffs[k] - state.predicted(k)).collect();
        let scaled = abs_pow34_vec(&residual);
        let cb_p = find_min_book(find_max_val(1, residual.len(), &scaled), sf, quantizer.rounding()).clamp(BandType::spectral(1), band_type);
        let predicted = quantizer.cost(&residual, &scaled, sf, cb_p);

        if predicted.rd(weight) < plain.rd(weight) {
            used[g] = true;
            cost_pred += predicted.bits;
            count += 1;
        } else {
            cost_pred += plain.bits;
        }
    }

    if count > 0 && cost_coeffs < cost_pred {
        log::trace!("prediction: {} bands dropped, {} > {} bits", count, cost_pred, cost_coeffs);
        count = 0;
    }
    if count > 0 {
        ch.prediction.present = true;
        ch.prediction.used = used;
        log::trace!("prediction: {} bands, {} bits saved", count, cost_coeffs - cost_pred);
    }
    ch.prediction.present
}

/// Replace the chosen bands by their residuals and adapt every predictor
///
/// Runs once per frame after [`search_for_pred`]. Short windows reset all
/// predictors instead. Bands not using prediction keep their coefficients
/// bit for bit.
pub fn apply_prediction(ch: &mut ChannelData, state: &mut PredictorState) {
    if ch.window.is_short() {
        state.reset_all();
        return;
    }
    let pmax = prediction_bands(ch);
    for g in 0..pmax {
        let used = ch.prediction.present && ch.prediction.used.get(g).copied().unwrap_or(false);
        for k in ch.window.band_range(0, g) {
            // adapts on the unquantized input, not the decoder's reconstruction
            let residual = state.predictors[k].update(ch.coeffs[k]);
            if used {
                ch.coeffs[k] = residual;
            }
        }
    }
    if let Some(group) = ch.prediction.reset_group {
        state.reset_group(group as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::Rounding;
    use crate::types::{WindowInfo, BLOCK_LEN};

    fn coded_channel(coeffs: &[f32], sf: i32) -> ChannelData {
        let window = WindowInfo::long(44100).unwrap();
        let mut ch = ChannelData::new(window.clone(), coeffs);
        let scaled = abs_pow34_vec(coeffs);
        for g in 0..window.num_swb() {
            let r = window.band_range(0, g);
            ch.sf_idx[g] = sf;
            ch.band_type[g] = find_min_book(find_max_val(1, r.len(), &scaled[r.start..]), sf, Rounding::Nearest);
            ch.zeroes[g] = ch.band_type[g] == BandType::ZERO;
        }
        ch
    }

    fn flat_bands() -> Vec<PsyBand> {
        vec![
            PsyBand {
                energy: 1.0e8,
                threshold: 1.0e4,
                spread: 1.0
            };
            MAX_BANDS
        ]
    }

    #[test]
    fn test_flt16_helpers() {
        assert_eq!(flt16_trunc(1.0), 1.0);
        assert_eq!(flt16_trunc(f32::from_bits(0x3F80_FFFF)).to_bits(), 0x3F80_0000);
        assert_eq!(flt16_round(f32::from_bits(0x3F80_8000)).to_bits(), 0x3F81_0000);
        assert_eq!(flt16_even(f32::from_bits(0x3F80_8000)).to_bits(), 0x3F80_0000);
        assert_eq!(flt16_even(f32::from_bits(0x3F81_8000)).to_bits(), 0x3F82_0000);
    }

    #[test]
    fn test_predictor_tracks_constant_input() {
        let mut p = Predictor::default();
        for _ in 0..20 {
            p.update(100.0);
        }
        assert!(p.x_est > 35.0 && p.x_est < 60.0, "{}", p.x_est);
        assert!(p.update(100.0).abs() < 100.0);
    }

    #[test]
    fn test_reset_schedule() {
        let mut state = PredictorState::new();
        // group 30 starts at 30 and is the first to pass 64
        let mut first = None;
        for frame in 1..=40 {
            if let Some(g) = state.schedule_reset() {
                first = Some((frame, g));
                break;
            }
        }
        assert_eq!(first, Some((35, 30)));
        state.predictors[29].x_est = 5.0;
        state.predictors[59].x_est = 5.0;
        state.reset_group(30);
        assert_eq!(state.reset_count[30], 0);
        assert_eq!(state.predicted(29), 0.0);
        assert_eq!(state.predicted(59), 0.0);
    }

    #[test]
    fn test_untrained_predictors_are_not_used() {
        let coeffs = vec![1000.0; BLOCK_LEN];
        let mut ch = coded_channel(&coeffs, 120);
        let mut state = PredictorState::new();
        assert!(!search_for_pred(&mut ch, &flat_bands(), &mut state, 120.0, BandQuantizer::new(Rounding::Nearest)));
        apply_prediction(&mut ch, &mut state);
        assert_eq!(ch.coeffs, coeffs);
        // the predictors still adapted
        assert!(state.predicted(0) != 0.0 || state.predictors[0].var0 > 1.0);
    }

    #[test]
    fn test_trained_predictors_reduce_residual() {
        let coeffs = vec![1000.0; BLOCK_LEN];
        let mut state = PredictorState::new();
        let quantizer = BandQuantizer::new(Rounding::Nearest);
        for _ in 0..20 {
            let mut ch = coded_channel(&coeffs, 120);
            ch.prediction = PredictionInfo::default();
            apply_prediction(&mut ch, &mut state);
        }
        let mut ch = coded_channel(&coeffs, 120);
        let k = ch.window.band_range(0, PRED_SFB_START).start;
        let expected = 1000.0 - state.predicted(k);
        assert!(search_for_pred(&mut ch, &flat_bands(), &mut state, 120.0, quantizer));
        assert!(ch.prediction.used[PRED_SFB_START]);
        assert!(!ch.prediction.used[0]);
        apply_prediction(&mut ch, &mut state);
        assert_eq!(ch.coeffs[k], expected);
        assert_eq!(ch.coeffs[0], 1000.0);
    }

    #[test]
    fn test_predictors_adapt_from_input_when_unused() {
        let coeffs: Vec<f32> = (0..BLOCK_LEN).map(|i| ((i % 11) as f32 - 5.0) * 300.0).collect();
        let mut ch = coded_channel(&coeffs, 110);
        let mut state = PredictorState::new();
        apply_prediction(&mut ch, &mut state);
        assert_eq!(ch.coeffs, coeffs);
        for k in [0, 7, 100] {
            let mut reference = Predictor::default();
            reference.update(coeffs[k]);
            assert_eq!(state.predicted(k), reference.x_est);
        }
    }

    #[test]
    fn test_short_window_resets() {
        let mut state = PredictorState::new();
        state.predictors[3].x_est = 7.0;
        let window = WindowInfo::eight_short(44100, &[8]).unwrap();
        let mut ch = ChannelData::new(window, &[1.0; BLOCK_LEN]);
        assert!(!search_for_pred(&mut ch, &flat_bands(), &mut state, 120.0, BandQuantizer::default()));
        apply_prediction(&mut ch, &mut state);
        assert_eq!(state.predicted(3), 0.0);
        assert!(ch.coeffs.iter().all(|&c| c == 1.0));
    }
}
