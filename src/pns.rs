//! Perceptual noise substitution
//!
//! Noise-like bands near their masking threshold can be replaced by a noise
//! energy record that the decoder fills with random values. `mark_pns` flags
//! candidates before the scalefactor search; `search_for_pns` makes the final
//! decision for the variants that do not do so inside their own search.

use crate::quantization::{abs_pow34_vec, pow2sf};
use crate::search::{init_nextband_map, sfdelta_can_remove_band, SearchContext};
use crate::tables::SCALE_DIFF_ZERO;
use crate::types::{BandType, ChannelData, PsyBand, BAND_STRIDE, SCALE_MAX_DIFF};

/// Lowest frequency considered for noise substitution
pub const NOISE_LOW_LIMIT: f32 = 4000.0;

const NOISE_SPREAD_THRESHOLD: f32 = 0.9;

const NOISE_LAMBDA_REPLACE: f32 = 1.948;

/// Signalling bits of a noise band following another noise band
pub const NOISE_BITS_CONTINUED: f32 = 5.0;

/// Signalling bits of a noise band starting a new run
pub const NOISE_BITS_NEW: f32 = 9.0;

/// Lambda dependent thresholds shared by the noise substitution passes
#[derive(Debug, Clone, Copy)]
pub struct PnsParams {
    lambda: f32,
    freq_mult: f32,
    cutoff_line: usize,
    spread_threshold: f32,
    thr_mult: f32,
    dist_bias: f32,
    transient_ratio: f32,
}

impl PnsParams {
    pub fn new(lambda: f32, sample_rate: u32, window_len: usize, cutoff_hz: u32) -> Self {
        let lambda = lambda.max(f32::EPSILON);
        Self {
            lambda,
            freq_mult: sample_rate as f32 * 0.5 / window_len as f32,
            cutoff_line: (cutoff_hz as u64 * 2 * window_len as u64 / sample_rate as u64) as usize,
            spread_threshold: (NOISE_SPREAD_THRESHOLD * (lambda / 100.0).max(0.5)).min(0.75),
            thr_mult: NOISE_LAMBDA_REPLACE * (100.0 / lambda),
            dist_bias: (4.0 * 120.0 / lambda).clamp(0.25, 4.0),
            transient_ratio: (lambda / 140.0).min(0.7),
        }
    }

    pub fn spread_threshold(&self) -> f32 {
        self.spread_threshold
    }

    /// Frequency of a band start line, and whether the band may carry noise at all
    fn band_position(&self, start_line: usize) -> (f32, bool) {
        let freq = start_line as f32 * self.freq_mult;
        (freq, freq >= NOISE_LOW_LIMIT && start_line < self.cutoff_line)
    }

    fn freq_boost(freq: f32) -> f32 {
        (0.88 * freq / NOISE_LOW_LIMIT).max(1.0)
    }

    /// Distortion weight of a noise band, loosened at high frequencies
    pub fn dist_thresh(&self, freq: f32) -> f32 {
        (2.5 * NOISE_LOW_LIMIT / freq).clamp(0.5, 2.5) * self.dist_bias
    }

    /// Estimated rate-distortion cost of coding band `g` of the group at `w` as noise
    pub fn noise_rd(&self, bands: &[PsyBand], w: usize, group_len: usize, g: usize, freq: f32, continued: bool) -> f32 {
        let dist_thresh = self.dist_thresh(freq);
        let mut rd = if continued { NOISE_BITS_CONTINUED } else { NOISE_BITS_NEW };
        for w2 in 0..group_len {
            let band = &bands[(w + w2) * BAND_STRIDE + g];
            rd += band.energy / (band.spread * band.spread) * self.lambda * dist_thresh / band.threshold;
        }
        rd
    }
}

/// Energy statistics of one band over a window group
#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupEnergy {
    pub energy: f32,
    pub threshold: f32,
    pub spread: f32,
    pub min_energy: f32,
    pub max_energy: f32,
}

impl GroupEnergy {
    pub(crate) fn gather(bands: &[PsyBand], w: usize, group_len: usize, g: usize) -> Self {
        let mut stats = Self {
            energy: 0.0,
            threshold: 0.0,
            spread: 2.0,
            min_energy: f32::INFINITY,
            max_energy: 0.0,
        };
        for w2 in 0..group_len {
            let band = &bands[(w + w2) * BAND_STRIDE + g];
            stats.energy += band.energy;
            stats.threshold += band.threshold;
            stats.spread = stats.spread.min(band.spread);
            stats.min_energy = stats.min_energy.min(band.energy);
            stats.max_energy = stats.max_energy.max(band.energy);
        }
        stats
    }

    /// Target energy of the substituted noise
    pub(crate) fn noise_target(&self) -> f32 {
        self.energy * (self.spread * self.spread).min(1.0)
    }
}

/// Flag the bands that may be substituted by noise
pub fn mark_pns(params: &PnsParams, bands: &[PsyBand], ch: &mut ChannelData) {
    let groups: Vec<(usize, usize)> = ch.window.groups().collect();
    ch.band_alt = ch.band_type;
    for &(w, len) in &groups {
        for g in 0..ch.window.num_swb() {
            let start = ch.window.swb_offset()[g] as usize;
            let (freq, in_range) = params.band_position(start);
            let stats = GroupEnergy::gather(bands, w, len, g);
            let can_pns = in_range
                && stats.energy >= stats.threshold * (1.5 / PnsParams::freq_boost(freq)).sqrt()
                && stats.spread >= params.spread_threshold
                && stats.min_energy >= params.transient_ratio * stats.max_energy;
            for w2 in 0..len {
                let b = (w + w2) * BAND_STRIDE + g;
                ch.can_pns[b] = can_pns;
                if in_range {
                    ch.pns_ener[b] = stats.energy;
                }
            }
        }
    }
}

/// Replace bands by noise where that is cheaper than coding them
///
/// Compares the coded cost of each band at its searched scalefactor and
/// codebook against the noise estimate. Zero bands that are noise-like and
/// near their threshold are always filled, to avoid spectral holes.
/// Returns the number of groups switched to noise.
pub fn search_for_pns(params: &PnsParams, ctx: &mut SearchContext<'_>, ch: &mut ChannelData) -> u32 {
    let groups: Vec<(usize, usize)> = ch.window.groups().collect();
    let scaled = abs_pow34_vec(&ch.coeffs);
    let nextband = init_nextband_map(ch);
    let mut prev_noise: Option<i32> = None;
    let mut prev_sf: Option<i32> = None;
    let mut switched = 0;

    ch.band_alt = ch.band_type;
    for &(w, len) in &groups {
        for g in 0..ch.window.num_swb() {
            let b = w * BAND_STRIDE + g;
            let zero = ch.zeroes[b];
            let coded = ch.band_alt[b] != BandType::ZERO;
            let start = ch.window.swb_offset()[g] as usize;
            let (freq, in_range) = params.band_position(start);
            if !in_range {
                if !zero {
                    prev_sf = Some(ch.sf_idx[b]);
                }
                continue;
            }
            let stats = GroupEnergy::gather(ctx.bands, w, len, g);
            let freq_boost = PnsParams::freq_boost(freq);

            let reject = (!zero && !sfdelta_can_remove_band(ch, &nextband, prev_sf, b))
                || ((zero || !coded) && stats.energy < stats.threshold * (1.0 / freq_boost).sqrt())
                || stats.spread < params.spread_threshold
                || (!zero && coded && stats.energy > stats.threshold * params.thr_mult * freq_boost)
                || stats.min_energy < params.transient_ratio * stats.max_energy;
            if reject {
                for w2 in 0..len {
                    ch.pns_ener[b + w2 * BAND_STRIDE] = stats.energy;
                }
                if !zero {
                    prev_sf = Some(ch.sf_idx[b]);
                }
                continue;
            }

            let target = stats.noise_target();
            let noise_sfi = ((target.log2() * 2.0).round() as i32).clamp(-100, 155);
            if let Some(prev) = prev_noise {
                let diff = noise_sfi - prev + SCALE_DIFF_ZERO;
                if !(0..=2 * SCALE_MAX_DIFF).contains(&diff) {
                    if !zero {
                        prev_sf = Some(ch.sf_idx[b]);
                    }
                    continue;
                }
            }
            let noise_amp = pow2sf(noise_sfi);
            // every window is filled with noise of exactly this amplitude
            let noise_energy = len as f32 * noise_amp * noise_amp;

            let coded_rd = ctx.group_rd(ch, &scaled, w, len, g, ch.sf_idx[b], ch.band_alt[b]);
            let continued = g > 0 && ch.band_type[b - 1] == BandType::NOISE;
            let noise_rd = params.noise_rd(ctx.bands, w, len, g, freq, continued);

            let energy_ratio = target / noise_energy;
            let pns_ener = energy_ratio * target;
            for w2 in 0..len {
                ch.pns_ener[b + w2 * BAND_STRIDE] = pns_ener;
            }
            if zero || !coded || (energy_ratio > 0.85 && energy_ratio < 1.25 && noise_rd < coded_rd) {
                for w2 in 0..len {
                    let bb = b + w2 * BAND_STRIDE;
                    ch.band_type[bb] = BandType::NOISE;
                    ch.zeroes[bb] = false;
                }
                prev_noise = Some(noise_sfi);
                switched += 1;
            } else if !zero {
                prev_sf = Some(ch.sf_idx[b]);
            }
        }
    }
    if switched > 0 {
        log::trace!("noise substitution: {} groups", switched);
    }
    switched
}
