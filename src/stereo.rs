//! Joint stereo decisions for channel pairs
//!
//! Mid/side replaces L and R of a band by `M = (L + R) / 2` and `S = (L - R) / 2`.
//! Intensity replaces both by one combined signal in the left channel plus an
//! energy ratio and a phase class in the right channel. Both are only
//! evaluated when the two channels share a window layout.

use crate::quantization::{abs_pow34_vec, find_max_val, find_min_book, BandQuantizer};
use crate::search::{first_chain_scalefactor, init_nextband_map, sfdelta_can_remove_band, sfdelta_can_replace};
use crate::types::{BandType, ChannelPair, PsyBand, BAND_STRIDE, SCALE_DIV_512, SCALE_MAX_POS};

/// Scalefactor steps of each side boost trial
const SIDE_BOOST_STEP: i32 = 3;

/// Number of side boost trials
const SIDE_BOOST_TRIALS: i32 = 4;

/// Lambda at which the intensity floor is nominal
const IS_LAMBDA_REF: f32 = 170.0;

/// Parameters of the stereo decisions for one frame
#[derive(Debug, Clone, Copy)]
pub struct StereoParams {
    pub lambda: f32,
    /// Bands starting at or below this frequency are never mid/side coded
    pub ms_low_limit_hz: f32,
    /// Intensity floor at the reference lambda
    pub is_low_limit_hz: f32,
    pub quantizer: BandQuantizer,
}

impl StereoParams {
    fn is_floor(&self) -> f32 {
        self.is_low_limit_hz * (self.lambda / IS_LAMBDA_REF)
    }
}

/// Relative masking sensitivity of the side channel at bark `b`
fn bval2bmax(b: f32) -> f32 {
    0.001 + 0.0035 * (b * b * b) / (15.5 * 15.5 * 15.5)
}

/// Outcome of one intensity phase trial
#[derive(Debug, Clone, Copy)]
struct IsTrial {
    pass: bool,
    phase: f32,
    error: f32,
    ener01: f32,
}

/// Cost of coding band `g` of the group `w..w + len` in intensity stereo with `phase`
#[allow(clippy::too_many_arguments)]
fn is_encoding_err(
    pair: &ChannelPair,
    bands: [&[PsyBand]; 2],
    params: &StereoParams,
    w: usize,
    len: usize,
    g: usize,
    ener0: f32,
    ener1: f32,
    ener01: f32,
    phase: f32,
) -> IsTrial {
    let fail = IsTrial {
        pass: false,
        phase,
        error: f32::INFINITY,
        ener01,
    };
    if ener01 <= 0.0 || ener0 <= 0.0 {
        return fail;
    }

    let [ch0, ch1] = &pair.ch;
    let window = &ch0.window;
    let b = w * BAND_STRIDE + g;
    let is_sf = (ch0.sf_idx[b] - 4).max(1);
    // right channel predicted from the combined signal by its amplitude ratio
    let e01_34 = phase * (ener1 / ener0).sqrt().powf(0.75);
    let scale = (ener0 / ener01).sqrt();
    let mut dist1 = 0.0f32;
    let mut dist2 = 0.0f32;

    for w2 in 0..len {
        let bb = b + w2 * BAND_STRIDE;
        let range = window.band_range(w + w2, g);
        let left = &ch0.coeffs[range.clone()];
        let right = &ch1.coeffs[range];
        let band0 = &bands[0][bb];
        let band1 = &bands[1][bb];
        let minthr = band0.threshold.min(band1.threshold);

        let is: Vec<f32> = left.iter().zip(right).map(|(l, r)| (l + phase * r) * scale).collect();
        let l34 = abs_pow34_vec(left);
        let r34 = abs_pow34_vec(right);
        let i34 = abs_pow34_vec(&is);
        let maxval = find_max_val(1, is.len(), &i34);
        let is_band_type = find_min_book(maxval, is_sf, params.quantizer.rounding());

        dist1 += params
            .quantizer
            .rd_cost(left, &l34, ch0.sf_idx[bb], ch0.band_type[bb], params.lambda / band0.threshold);
        dist1 += params
            .quantizer
            .rd_cost(right, &r34, ch1.sf_idx[bb], ch1.band_type[bb], params.lambda / band1.threshold);
        dist2 += params
            .quantizer
            .rd_cost(&is, &i34, is_sf, is_band_type, params.lambda / minthr);

        let mut spec_err = 0.0f32;
        for i in 0..is.len() {
            let dl = l34[i] - i34[i];
            let dr = r34[i] - i34[i] * e01_34;
            spec_err += dl * dl + dr * dr;
        }
        dist2 += spec_err * params.lambda / minthr;
    }

    IsTrial {
        pass: dist2 <= dist1,
        phase,
        error: dist2 - dist1,
        ener01,
    }
}

/// Decide intensity stereo per band
///
/// Only bands above the intensity floor where both channels are coded (not
/// zero, not noise) are considered. Returns the number of intensity groups.
pub fn search_for_is(pair: &mut ChannelPair, bands: [&[PsyBand]; 2], params: &StereoParams) -> usize {
    if !pair.common_window {
        return 0;
    }
    let window = pair.ch[0].window.clone();
    let groups: Vec<(usize, usize)> = window.groups().collect();
    let nextband1 = init_nextband_map(&pair.ch[1]);
    let floor = params.is_floor();
    let mut prev_sf1: Option<i32> = None;
    let mut prev_bt: Option<BandType> = None;
    let mut prev_is = false;
    let mut count = 0;

    for &(w, len) in &groups {
        for g in 0..window.num_swb() {
            let b = w * BAND_STRIDE + g;
            let eligible = window.band_start_hz(g) > floor
                && pair.ch.iter().all(|ch| !ch.zeroes[b] && ch.band_type[b] != BandType::NOISE)
                && sfdelta_can_remove_band(&pair.ch[1], &nextband1, prev_sf1, b);
            if eligible {
                let (mut ener0, mut ener1, mut ener01, mut ener01p) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
                for w2 in 0..len {
                    let range = window.band_range(w + w2, g);
                    for i in range {
                        let c0 = pair.ch[0].coeffs[i];
                        let c1 = pair.ch[1].coeffs[i];
                        ener0 += c0 * c0;
                        ener1 += c1 * c1;
                        ener01 += (c0 + c1) * (c0 + c1);
                        ener01p += (c0 - c1) * (c0 - c1);
                    }
                }
                let out_of_phase = is_encoding_err(pair, bands, params, w, len, g, ener0, ener1, ener01p, -1.0);
                let in_phase = is_encoding_err(pair, bands, params, w, len, g, ener0, ener1, ener01, 1.0);
                let best = if out_of_phase.pass && out_of_phase.error < in_phase.error {
                    out_of_phase
                } else {
                    in_phase
                };
                if best.pass {
                    let (this, other) = if best.phase > 0.0 {
                        (BandType::INTENSITY, BandType::INTENSITY2)
                    } else {
                        (BandType::INTENSITY2, BandType::INTENSITY)
                    };
                    // switching phase class against the previous band is
                    // cheaper signalled through the mid/side flag
                    let flip = prev_is && prev_bt != Some(this);
                    let band_type = if flip { other } else { this };
                    for w2 in 0..len {
                        let bb = b + w2 * BAND_STRIDE;
                        pair.is_mask[bb] = true;
                        pair.ms_mask[bb] = flip;
                        pair.ch[0].is_ener[bb] = (ener0 / best.ener01).sqrt();
                        pair.ch[1].is_ener[bb] = ener0 / ener1;
                        pair.ch[1].band_type[bb] = band_type;
                    }
                    prev_bt = Some(band_type);
                    count += 1;
                }
            }
            if !pair.ch[1].zeroes[b] && pair.ch[1].band_type[b].is_spectral() {
                prev_sf1 = Some(pair.ch[1].sf_idx[b]);
            }
            prev_is = pair.is_mask[b];
        }
    }
    pair.is_mode = count > 0;
    if count > 0 {
        log::trace!("intensity stereo: {} groups", count);
    }
    count
}

/// Decide mid/side coding per band
///
/// For each band coded in both channels, tries mid/side at the smaller of
/// the two scalefactors with the side channel boosted by up to three steps
/// of three. The band switches when the weighted distortion does not grow
/// and fewer bits are spent.
pub fn search_for_ms(pair: &mut ChannelPair, bands: [&[PsyBand]; 2], params: &StereoParams) -> usize {
    if !pair.common_window {
        return 0;
    }
    let window = pair.ch[0].window.clone();
    let groups: Vec<(usize, usize)> = window.groups().collect();
    let nextband0 = init_nextband_map(&pair.ch[0]);
    let nextband1 = init_nextband_map(&pair.ch[1]);
    let mslambda = (params.lambda / 120.0).min(1.0);
    let num_swb = window.num_swb();
    let mut prev_mid = first_chain_scalefactor(&pair.ch[0]);
    let mut prev_side = first_chain_scalefactor(&pair.ch[1]);
    let mut count = 0;

    for &(w, len) in &groups {
        for g in 0..num_swb {
            let b = w * BAND_STRIDE + g;
            let bmax = bval2bmax(g as f32 * 17.0 / num_swb as f32) / 0.0045;
            if !pair.is_mask[b] {
                for w2 in 0..len {
                    pair.ms_mask[b + w2 * BAND_STRIDE] = false;
                }
            }
            let eligible = !pair.ch[0].zeroes[b]
                && !pair.ch[1].zeroes[b]
                && !pair.is_mask[b]
                && window.band_start_hz(g) > params.ms_low_limit_hz;
            if eligible {
                let mut mids: Vec<Vec<f32>> = Vec::with_capacity(len);
                let mut sides: Vec<Vec<f32>> = Vec::with_capacity(len);
                for w2 in 0..len {
                    let range = window.band_range(w + w2, g);
                    let l = &pair.ch[0].coeffs[range.clone()];
                    let r = &pair.ch[1].coeffs[range];
                    let m: Vec<f32> = l.iter().zip(r).map(|(l, r)| (l + r) * 0.5).collect();
                    let s: Vec<f32> = l.iter().zip(r).map(|(l, r)| (l - r) * 0.5).collect();
                    mids.push(m);
                    sides.push(s);
                }
                let m34: Vec<Vec<f32>> = mids.iter().map(|m| abs_pow34_vec(m)).collect();
                let s34: Vec<Vec<f32>> = sides.iter().map(|s| abs_pow34_vec(s)).collect();
                let mmax = m34.iter().flatten().fold(0.0f32, |a, &v| a.max(v));
                let smax = s34.iter().flatten().fold(0.0f32, |a, &v| a.max(v));
                let noise0 = pair.ch[0].band_type[b] == BandType::NOISE;
                let noise1 = pair.ch[1].band_type[b] == BandType::NOISE;

                for boost in 0..SIDE_BOOST_TRIALS {
                    let minidx = pair.ch[0].sf_idx[b].min(pair.ch[1].sf_idx[b]);
                    let mididx = minidx.clamp(0, SCALE_MAX_POS - SCALE_DIV_512);
                    let sididx = (minidx - boost * SIDE_BOOST_STEP).clamp(0, SCALE_MAX_POS - SCALE_DIV_512);
                    if !noise0
                        && !noise1
                        && (!sfdelta_can_replace(&pair.ch[0], &nextband0, prev_mid, mididx, b)
                            || !sfdelta_can_replace(&pair.ch[1], &nextband1, prev_side, sididx, b))
                    {
                        continue;
                    }
                    let midcb = find_min_book(mmax, mididx, params.quantizer.rounding()).max(BandType::spectral(1));
                    let sidcb = find_min_book(smax, sididx, params.quantizer.rounding()).max(BandType::spectral(1));

                    let (mut dist1, mut dist2) = (0.0f32, 0.0f32);
                    let (mut b0, mut b1) = (0u32, 0u32);
                    for w2 in 0..len {
                        let bb = b + w2 * BAND_STRIDE;
                        let range = window.band_range(w + w2, g);
                        let band0 = &bands[0][bb];
                        let band1 = &bands[1][bb];
                        let minthr = band0.threshold.min(band1.threshold);
                        let l = &pair.ch[0].coeffs[range.clone()];
                        let r = &pair.ch[1].coeffs[range];
                        let q = &params.quantizer;

                        let cl = q.cost(l, &abs_pow34_vec(l), pair.ch[0].sf_idx[bb], pair.ch[0].band_type[bb]);
                        let cr = q.cost(r, &abs_pow34_vec(r), pair.ch[1].sf_idx[bb], pair.ch[1].band_type[bb]);
                        let cm = q.cost(&mids[w2], &m34[w2], mididx, midcb);
                        let cs = q.cost(&sides[w2], &s34[w2], sididx, sidcb);
                        // the side sign flips with channel order; signed books are not sign-symmetric
                        let flipped: Vec<f32> = sides[w2].iter().map(|v| -v).collect();
                        let side_bits = cs.bits.max(q.cost(&flipped, &s34[w2], sididx, sidcb).bits);
                        dist1 += cl.distortion * params.lambda / band0.threshold
                            + cr.distortion * params.lambda / band1.threshold;
                        dist2 += cm.distortion * params.lambda / minthr + cs.distortion * mslambda / (minthr * bmax);
                        b0 += cl.bits + cr.bits;
                        b1 += cm.bits + side_bits;
                    }

                    let use_ms = dist2 <= dist1 && b1 < b0;
                    if use_ms {
                        let keep = if !noise0 && !noise1 {
                            for w2 in 0..len {
                                let bb = b + w2 * BAND_STRIDE;
                                pair.ch[0].sf_idx[bb] = mididx;
                                pair.ch[1].sf_idx[bb] = sididx;
                                pair.ch[0].band_type[bb] = midcb;
                                pair.ch[1].band_type[bb] = sidcb;
                            }
                            true
                        } else {
                            // both noise: the flag selects correlated noise
                            noise0 && noise1
                        };
                        if keep {
                            for w2 in 0..len {
                                pair.ms_mask[b + w2 * BAND_STRIDE] = true;
                            }
                            count += 1;
                        }
                        break;
                    } else if b1 > b0 {
                        break;
                    }
                }
            }
            if !pair.ch[0].zeroes[b] && pair.ch[0].band_type[b].is_spectral() {
                prev_mid = Some(pair.ch[0].sf_idx[b]);
            }
            if !pair.ch[1].zeroes[b] && !pair.is_mask[b] && pair.ch[1].band_type[b].is_spectral() {
                prev_side = Some(pair.ch[1].sf_idx[b]);
            }
        }
    }
    pair.ms_mode = count > 0;
    if count > 0 {
        log::trace!("mid/side stereo: {} groups", count);
    }
    count
}

/// Rewrite the pair's coefficients according to the intensity and mid/side masks
pub fn apply_joint_stereo(pair: &mut ChannelPair) {
    if !pair.common_window {
        return;
    }
    apply_intensity_stereo(pair);
    apply_mid_side_stereo(pair);
}

fn apply_intensity_stereo(pair: &mut ChannelPair) {
    let window = pair.ch[0].window.clone();
    for (w, len) in window.groups() {
        for w2 in 0..len {
            for g in 0..window.num_swb() {
                let b = w * BAND_STRIDE + g;
                if !pair.is_mask[b] {
                    continue;
                }
                let mut p = if pair.ch[1].band_type[b] == BandType::INTENSITY { 1.0 } else { -1.0 };
                if pair.ms_mask[b] {
                    p = -p;
                }
                let scale = pair.ch[0].is_ener[b];
                let [ch0, ch1] = &mut pair.ch;
                for i in window.band_range(w + w2, g) {
                    ch0.coeffs[i] = (ch0.coeffs[i] + p * ch1.coeffs[i]) * scale;
                    ch1.coeffs[i] = 0.0;
                }
            }
        }
    }
}

fn apply_mid_side_stereo(pair: &mut ChannelPair) {
    let window = pair.ch[0].window.clone();
    for (w, len) in window.groups() {
        for w2 in 0..len {
            for g in 0..window.num_swb() {
                let b = w * BAND_STRIDE + g;
                // the mask doubles as a phase flag for intensity and noise bands
                if !pair.ms_mask[b]
                    || pair.is_mask[b]
                    || !pair.ch[0].band_type[b].is_spectral()
                    || !pair.ch[1].band_type[b].is_spectral()
                {
                    continue;
                }
                let [ch0, ch1] = &mut pair.ch;
                for i in window.band_range(w + w2, g) {
                    let m = (ch0.coeffs[i] + ch1.coeffs[i]) * 0.5;
                    let s = (ch0.coeffs[i] - ch1.coeffs[i]) * 0.5;
                    ch0.coeffs[i] = m;
                    ch1.coeffs[i] = s;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::Rounding;
    use crate::types::{ChannelData, WindowInfo, MAX_BANDS};

    fn params() -> StereoParams {
        StereoParams {
            lambda: 120.0,
            ms_low_limit_hz: 0.0,
            is_low_limit_hz: 6100.0,
            quantizer: BandQuantizer::new(Rounding::Nearest),
        }
    }

    fn coded_channel(coeffs: &[f32], sf: i32) -> ChannelData {
        let window = WindowInfo::long(44100).unwrap();
        let mut ch = ChannelData::new(window.clone(), coeffs);
        let scaled = abs_pow34_vec(coeffs);
        for g in 0..window.num_swb() {
            let range = window.band_range(0, g);
            let maxval = find_max_val(1, range.len(), &scaled[range.start..]);
            let cb = find_min_book(maxval, sf, Rounding::Nearest);
            if cb != BandType::ZERO {
                ch.zeroes[g] = false;
                ch.sf_idx[g] = sf;
                ch.band_type[g] = cb;
            }
        }
        ch
    }

    fn bands(coeffs: &[f32]) -> Vec<PsyBand> {
        let window = WindowInfo::long(44100).unwrap();
        let mut out = vec![PsyBand::default(); MAX_BANDS];
        for g in 0..window.num_swb() {
            let energy: f32 = coeffs[window.band_range(0, g)].iter().map(|c| c * c).sum();
            out[g] = PsyBand {
                energy,
                threshold: energy * 0.01 + 1.0,
                spread: 1.0,
            };
        }
        out
    }

    fn signal(seed: usize, amp: f32) -> Vec<f32> {
        (0..1024).map(|i| (((i * 7 + seed * 13) % 17) as f32 - 8.0) * amp).collect()
    }

    #[test]
    fn test_identical_channels_prefer_mid_side() {
        let left = signal(1, 100.0);
        let right = left.clone();
        let mut pair = ChannelPair::new(coded_channel(&left, 120), coded_channel(&right, 120));
        let b = bands(&left);
        let count = search_for_ms(&mut pair, [&b, &b], &params());
        assert!(count > 0);
        assert!(pair.ms_mode);
    }

    #[test]
    fn test_mid_side_is_symmetric() {
        let left = signal(1, 100.0);
        let right: Vec<f32> = signal(2, 60.0).iter().zip(&left).map(|(a, b)| a + b).collect();
        let (bl, br) = (bands(&left), bands(&right));

        let mut pair = ChannelPair::new(coded_channel(&left, 118), coded_channel(&right, 118));
        search_for_ms(&mut pair, [&bl, &br], &params());
        let mut swapped = ChannelPair::new(coded_channel(&right, 118), coded_channel(&left, 118));
        search_for_ms(&mut swapped, [&br, &bl], &params());
        assert_eq!(pair.ms_mask, swapped.ms_mask);
    }

    #[test]
    fn test_mid_side_after_leading_zero_band() {
        let mut left = signal(1, 100.0);
        left[..4].fill(0.0);
        let mut pair = ChannelPair::new(coded_channel(&left, 120), coded_channel(&left, 120));
        assert!(pair.ch[0].zeroes[0]);
        assert_eq!(pair.ch[0].sf_idx[0], 0);
        let b = bands(&left);
        search_for_ms(&mut pair, [&b, &b], &params());
        assert!(!pair.ms_mask[0]);
        assert!(pair.ms_mask[1]);
    }

    #[test]
    fn test_mid_side_starts_above_low_limit() {
        let left = signal(1, 100.0);
        let window = WindowInfo::long(44100).unwrap();
        let params = StereoParams {
            ms_low_limit_hz: window.band_start_hz(3),
            ..params()
        };
        let mut pair = ChannelPair::new(coded_channel(&left, 120), coded_channel(&left, 120));
        let b = bands(&left);
        search_for_ms(&mut pair, [&b, &b], &params);
        assert!(!pair.ms_mask[2]);
        assert!(!pair.ms_mask[3]);
        assert!(pair.ms_mask[4]);
    }

    #[test]
    fn test_mismatched_windows_skip_stereo() {
        let left = signal(1, 100.0);
        let mut right = coded_channel(&left, 120);
        right.window = WindowInfo::eight_short(44100, &[8]).unwrap();
        let mut pair = ChannelPair::new(coded_channel(&left, 120), right);
        assert!(!pair.common_window);
        let b = bands(&left);
        assert_eq!(search_for_ms(&mut pair, [&b, &b], &params()), 0);
        assert_eq!(search_for_is(&mut pair, [&b, &b], &params()), 0);
    }

    #[test]
    fn test_intensity_for_scaled_copy() {
        let left = signal(3, 200.0);
        let right: Vec<f32> = left.iter().map(|v| v * 0.5).collect();
        let mut pair = ChannelPair::new(coded_channel(&left, 120), coded_channel(&right, 120));
        let (bl, br) = (bands(&left), bands(&right));
        let mut p = params();
        p.is_low_limit_hz = 0.0;
        let count = search_for_is(&mut pair, [&bl, &br], &p);
        assert!(count > 0);
        assert!(pair.is_mode);
        for g in 0..MAX_BANDS {
            if pair.is_mask[g] {
                assert!(pair.ch[1].band_type[g].is_intensity());
                assert!((pair.ch[1].is_ener[g] - 4.0).abs() < 1e-2);
            }
        }
        let original_left = pair.ch[0].coeffs.clone();
        apply_joint_stereo(&mut pair);
        for g in 0..pair.ch[0].window.num_swb() {
            if pair.is_mask[g] {
                for i in pair.ch[0].window.band_range(0, g) {
                    assert_eq!(pair.ch[1].coeffs[i], 0.0);
                    // in-phase copy: scaled sum keeps the left energy
                    assert!((pair.ch[0].coeffs[i].abs() - original_left[i].abs()).abs() <= original_left[i].abs() * 1e-3 + 1e-3);
                }
            }
        }
    }

    #[test]
    fn test_apply_mid_side() {
        let left = vec![3.0; 1024];
        let right = vec![1.0; 1024];
        let mut pair = ChannelPair::new(coded_channel(&left, 100), coded_channel(&right, 100));
        pair.ms_mask[0] = true;
        apply_joint_stereo(&mut pair);
        for i in pair.ch[0].window.band_range(0, 0) {
            assert_eq!(pair.ch[0].coeffs[i], 2.0);
            assert_eq!(pair.ch[1].coeffs[i], 1.0);
        }
        let next = pair.ch[0].window.band_range(0, 1).start;
        assert_eq!(pair.ch[0].coeffs[next], 3.0);
    }
}
