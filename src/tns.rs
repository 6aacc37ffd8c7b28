//! Temporal noise shaping
//!
//! Open-loop prediction across frequency. A window is filtered only when the
//! prediction gain over its upper bands lands inside a fixed window; the
//! filter runs over a copy of the unfiltered coefficients, so a window left
//! alone is untouched.

use crate::lpc;
use crate::tables::{TNS_COEF_4BIT, TNS_MAX_BANDS_1024, TNS_MAX_BANDS_128, TNS_MIN_SFB_LONG, TNS_MIN_SFB_SHORT};
use crate::types::{ChannelData, PsyBand, WindowSequence, BAND_STRIDE, SHORT_WINDOW_LEN};

/// Predictor order for long windows
pub const TNS_MAX_ORDER: usize = 12;

/// Predictor order for short windows
pub const TNS_MAX_ORDER_SHORT: usize = 7;

/// Lowest accepted prediction gain
const GAIN_THRESHOLD_LOW: f64 = 1.4;

/// Highest accepted prediction gain
const GAIN_THRESHOLD_HIGH: f64 = 1.16 * GAIN_THRESHOLD_LOW;

/// One filter over a run of bands
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct TnsFilter {
    /// Number of bands covered, counted down from the previous filter
    pub length: usize,
    pub order: usize,
    /// Filter from high to low frequencies
    pub downward: bool,
    /// 4-bit indices into the reflection coefficient table
    pub coef_idx: Vec<u8>,
    /// Reconstructed reflection coefficients
    pub coef: Vec<f32>,
}

/// TNS side information of one channel
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct TnsInfo {
    pub present: bool,
    /// Filters of each window, topmost first; empty for unfiltered windows
    pub windows: Vec<Vec<TnsFilter>>,
}

impl TnsInfo {
    pub fn filter_count(&self) -> usize {
        self.windows.iter().map(Vec::len).sum()
    }
}

fn quantize_coef(k: f64) -> u8 {
    let mut best = 0usize;
    let mut best_err = f64::INFINITY;
    for (i, &v) in TNS_COEF_4BIT.iter().enumerate() {
        let err = (k - v as f64).abs();
        if err < best_err {
            best_err = err;
            best = i;
        }
    }
    best as u8
}

/// Bands `[start, end)` covered by TNS for this layout
fn band_limits(ch: &ChannelData) -> (usize, usize) {
    let window = &ch.window;
    let sr = window.sr_index();
    let (max_bands, min_sfb) = if window.is_short() {
        (TNS_MAX_BANDS_128[sr], TNS_MIN_SFB_SHORT[sr])
    } else {
        (TNS_MAX_BANDS_1024[sr], TNS_MIN_SFB_LONG[sr])
    };
    let end = max_bands.min(window.max_sfb()).min(window.num_swb());
    (min_sfb.min(end), end)
}

/// Decide the TNS filters of every window of `ch`
///
/// Fills `ch.tns` and returns whether any window is filtered. The
/// coefficients are not modified; see [`apply_tns`].
pub fn search_for_tns(ch: &mut ChannelData, bands: &[PsyBand]) -> bool {
    ch.tns = TnsInfo::default();
    let (sfb_start, sfb_end) = band_limits(ch);
    let window = ch.window.clone();
    let offsets = window.swb_offset();
    let sfb_len = sfb_end - sfb_start;
    if sfb_len == 0 {
        return false;
    }

    let short = window.is_short();
    let order = if short { TNS_MAX_ORDER_SHORT } else { TNS_MAX_ORDER };
    let n_filt = if short { 1 } else { 2 };
    let slant = match window.sequence() {
        WindowSequence::LongStop => Some(true),
        WindowSequence::LongStart => Some(false),
        _ => None,
    };

    let mut count = 0;
    ch.tns.windows = vec![Vec::new(); window.num_windows()];
    for w in 0..window.num_windows() {
        let base = w * SHORT_WINDOW_LEN;
        let region = &ch.coeffs[base + offsets[sfb_start] as usize..base + offsets[sfb_end] as usize];
        let Some(analysis) = lpc::analyze(region, order) else {
            continue;
        };
        if !analysis.gain.is_finite() || !(GAIN_THRESHOLD_LOW..=GAIN_THRESHOLD_HIGH).contains(&analysis.gain) {
            continue;
        }

        // energy of the lower and upper halves of the region
        let mut en = [0.0f32; 2];
        for g in sfb_start..sfb_end {
            let half = usize::from(g > sfb_start + sfb_len / 2);
            en[half] += bands[w * BAND_STRIDE + g].energy;
        }

        let mut filters = Vec::with_capacity(n_filt);
        let mut top = sfb_end;
        for f in 0..n_filt {
            let length = if f + 1 == n_filt { top - sfb_start } else { sfb_len / n_filt };
            let bottom = top - length;
            let filter_order = order / n_filt;
            let span = &ch.coeffs[base + offsets[bottom] as usize..base + offsets[top] as usize];
            let reflection = if n_filt == 1 {
                Some(analysis.reflection.clone())
            } else {
                lpc::analyze(span, filter_order).map(|a| a.reflection)
            };
            let coef_idx: Vec<u8> = reflection
                .unwrap_or_else(|| vec![0.0; filter_order])
                .iter()
                .map(|&k| quantize_coef(k))
                .collect();
            let coef = coef_idx.iter().map(|&i| TNS_COEF_4BIT[i as usize]).collect();
            let downward = slant.unwrap_or(en[f.min(1)] < en[1 - f.min(1)]);
            filters.push(TnsFilter {
                length,
                order: filter_order,
                downward,
                coef_idx,
                coef,
            });
            top = bottom;
        }
        ch.tns.windows[w] = filters;
        count += 1;
    }
    ch.tns.present = count > 0;
    if ch.tns.present {
        log::trace!("tns: {} of {} windows filtered", count, window.num_windows());
    }
    ch.tns.present
}

/// Run the chosen TNS filters over the coefficients of `ch`
pub fn apply_tns(ch: &mut ChannelData) {
    if !ch.tns.present {
        return;
    }
    let (_, sfb_end) = band_limits(ch);
    let offsets = ch.window.swb_offset();
    for (w, filters) in ch.tns.windows.iter().enumerate() {
        let base = w * SHORT_WINDOW_LEN;
        let mut top = sfb_end;
        for filter in filters {
            let bottom = top.saturating_sub(filter.length);
            let start = base + offsets[bottom] as usize;
            let end = base + offsets[top] as usize;
            top = bottom;
            if filter.order == 0 || end <= start {
                continue;
            }
            let taps = lpc::step_up(&filter.coef);
            let source = ch.coeffs[start..end].to_vec();
            let size = source.len();
            for m in 0..size {
                let pos = if filter.downward { size - 1 - m } else { m };
                let mut pred = 0.0f32;
                for (i, &a) in taps.iter().enumerate().take(m) {
                    let prev = if filter.downward { pos + i + 1 } else { pos - i - 1 };
                    pred += a * source[prev];
                }
                ch.coeffs[start + pos] = source[pos] - pred;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{WindowInfo, MAX_BANDS};

    fn ar1_coeffs(rho: f32) -> Vec<f32> {
        let mut seed = 0xDEAD_BEEFu32;
        let mut prev = 0.0f32;
        (0..1024)
            .map(|_| {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let noise = (seed >> 8) as f32 / (1u32 << 24) as f32 - 0.5;
                prev = rho * prev + noise * 1000.0;
                prev
            })
            .collect()
    }

    fn bands_for(ch: &ChannelData) -> Vec<PsyBand> {
        let mut bands = vec![PsyBand::default(); MAX_BANDS];
        for g in 0..ch.window.num_swb() {
            let energy = ch.coeffs[ch.window.band_range(0, g)].iter().map(|c| c * c).sum();
            bands[g] = PsyBand {
                energy,
                threshold: 1.0,
                spread: 1.0,
            };
        }
        bands
    }

    #[test]
    fn test_quantize_coef() {
        assert_eq!(quantize_coef(0.0), 0);
        assert_eq!(quantize_coef(0.59), 3);
        assert!(TNS_COEF_4BIT[quantize_coef(-0.9) as usize] < -0.85);
    }

    #[test]
    fn test_silence_is_not_filtered() {
        let mut ch = ChannelData::new(WindowInfo::long(44100).unwrap(), &[0.0; 1024]);
        let bands = bands_for(&ch);
        assert!(!search_for_tns(&mut ch, &bands));
        apply_tns(&mut ch);
        assert!(ch.coeffs.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_filter_follows_gain_window() {
        let coeffs = ar1_coeffs(0.58);
        let mut ch = ChannelData::new(WindowInfo::long(44100).unwrap(), &coeffs);
        let bands = bands_for(&ch);
        let (start, end) = band_limits(&ch);
        let offsets = ch.window.swb_offset();
        let region = offsets[start] as usize..offsets[end] as usize;
        let gain = lpc::analyze(&coeffs[region.clone()], TNS_MAX_ORDER).unwrap().gain;

        let present = search_for_tns(&mut ch, &bands);
        assert_eq!(present, (GAIN_THRESHOLD_LOW..=GAIN_THRESHOLD_HIGH).contains(&gain));
        apply_tns(&mut ch);
        if present {
            assert_eq!(ch.tns.filter_count(), 2);
            let before: f32 = coeffs[region.clone()].iter().map(|c| c * c).sum();
            let after: f32 = ch.coeffs[region].iter().map(|c| c * c).sum();
            assert!(after < before);
            assert_eq!(&ch.coeffs[..offsets[start] as usize], &coeffs[..offsets[start] as usize]);
        } else {
            assert_eq!(ch.coeffs, coeffs);
        }
    }

    #[test]
    fn test_strong_prediction_is_rejected() {
        // gain far above the accepted window
        let coeffs = ar1_coeffs(0.95);
        let mut ch = ChannelData::new(WindowInfo::long(44100).unwrap(), &coeffs);
        let bands = bands_for(&ch);
        assert!(!search_for_tns(&mut ch, &bands));
        apply_tns(&mut ch);
        assert_eq!(ch.coeffs, coeffs);
    }
}
