//! Scalefactor search: shared interface and helpers
//!
//! Every coder variant implements [`ScalefactorSearch`]. The helpers here
//! maintain the scalefactor delta chain: the sequence of coded spectral bands
//! in encoding order, where consecutive scalefactors may differ by at most
//! [`SCALE_MAX_DIFF`].

use crate::cost_cache::{CostCache, CostKey};
use crate::config::CoderVariant;
use crate::quantization::{
    abs_pow34_vec, find_max_val, find_min_book, sf_from_threshold, BandCost, Rounding,
};
use crate::tables::{SCALEFACTOR_BITS, SCALE_DIFF_ZERO};
use crate::trellis::TrellisSearch;
use crate::twoloop::TwoLoopSearch;
use crate::types::{
    BandType, ChannelData, PsyBand, BAND_STRIDE, MAX_BANDS, SCALE_MAX_DIFF, SCALE_MAX_POS,
};

/// Highest scalefactor the searches assign to a coded band
pub const SF_SEARCH_CEIL: i32 = 218;

/// Bits of the first (absolute) scalefactor
pub const GLOBAL_GAIN_BITS: u32 = 8;

/// Everything a search needs besides the channel itself
pub struct SearchContext<'a> {
    /// Psychoacoustic analysis for every band slot of the channel
    pub bands: &'a [PsyBand],
    pub cache: &'a mut CostCache,
    pub lambda: f32,
    /// Bit target of the two-loop search for this channel and frame
    pub target_bits: u32,
    pub rounding: Rounding,
    pub noise_substitution: bool,
    /// Cap on two-loop refinement passes
    pub outer_iterations: u32,
}

impl SearchContext<'_> {
    /// Cached unit-lambda cost of a band over its window group
    pub(crate) fn group_cost(
        &mut self,
        ch: &ChannelData,
        scaled: &[f32],
        w: usize,
        group_len: usize,
        g: usize,
        sf: i32,
        cb: BandType,
    ) -> BandCost {
        let mut total = BandCost::default();
        for w2 in 0..group_len {
            let range = ch.window.band_range(w + w2, g);
            let key = CostKey {
                band: (w + w2) * BAND_STRIDE + g,
                scalefactor: sf,
                codebook: cb,
                rounding: self.rounding,
            };
            total += self
                .cache
                .get_or_compute(key, &ch.coeffs[range.clone()], &scaled[range]);
        }
        total
    }

    /// Rate-distortion cost of a band over its window group, each window
    /// weighted by its own threshold
    pub(crate) fn group_rd(
        &mut self,
        ch: &ChannelData,
        scaled: &[f32],
        w: usize,
        group_len: usize,
        g: usize,
        sf: i32,
        cb: BandType,
    ) -> f32 {
        let mut rd = 0.0;
        for w2 in 0..group_len {
            let b = (w + w2) * BAND_STRIDE + g;
            let cost = self.group_cost(ch, scaled, w + w2, 1, g, sf, cb);
            rd += cost.rd(self.lambda / self.bands[b].threshold);
        }
        rd
    }
}

/// Outcome of one search, for logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct SearchReport {
    /// Estimated spectral plus scalefactor bits at convergence
    pub bits: u32,
    pub inner_iterations: u32,
    pub outer_iterations: u32,
    /// Bands moved to noise substitution by the search itself
    pub noise_bands: u32,
}

/// Chooses scalefactors, zero flags and provisional codebooks for a channel
pub trait ScalefactorSearch {
    fn search(&self, ctx: &mut SearchContext<'_>, ch: &mut ChannelData) -> SearchReport;
}

/// Search for a coder variant
pub fn searcher(variant: CoderVariant) -> &'static dyn ScalefactorSearch {
    match variant {
        CoderVariant::TwoLoop => &TwoLoopSearch,
        CoderVariant::Trellis => &TrellisSearch,
        CoderVariant::Fast => &FastSearch,
    }
}

/// Threshold-driven search without bit-budget convergence
pub struct FastSearch;

impl ScalefactorSearch for FastSearch {
    fn search(&self, ctx: &mut SearchContext<'_>, ch: &mut ChannelData) -> SearchReport {
        let nz = mark_zero_bands(ctx.bands, ch);
        if nz == 0 {
            return SearchReport::default();
        }
        let groups: Vec<(usize, usize)> = ch.window.groups().collect();
        for &(w, len) in &groups {
            for g in 0..ch.window.max_sfb() {
                let b = w * BAND_STRIDE + g;
                if ch.zeroes[b] {
                    continue;
                }
                let threshold: f32 = (0..len).map(|w2| ctx.bands[b + w2 * BAND_STRIDE].threshold).sum();
                let lines = ch.window.band_width(g) * len;
                ch.sf_idx[b] = sf_from_threshold(threshold, lines).clamp(0, SF_SEARCH_CEIL);
            }
        }
        ch.sync_groups();
        finalize_scalefactors(ch, ctx.rounding);
        let bits = estimate_bits(ctx, ch);
        log::trace!("fast search: {} nonzero groups, {} bits", nz, bits);
        SearchReport {
            bits,
            ..SearchReport::default()
        }
    }
}

/// Mark bands whose energy does not exceed the threshold as zero
///
/// A group is nonzero if any of its windows is audible. Bands at or above
/// `max_sfb` are always zero. Returns the number of nonzero groups.
pub fn mark_zero_bands(bands: &[PsyBand], ch: &mut ChannelData) -> usize {
    let groups: Vec<(usize, usize)> = ch.window.groups().collect();
    let mut count = 0;
    for &(w, len) in &groups {
        for g in 0..ch.window.num_swb() {
            let audible = g < ch.window.max_sfb()
                && (0..len).any(|w2| {
                    let band = &bands[(w + w2) * BAND_STRIDE + g];
                    band.threshold > 0.0 && band.energy > band.threshold
                });
            for w2 in 0..len {
                let b = (w + w2) * BAND_STRIDE + g;
                ch.zeroes[b] = !audible;
                ch.band_type[b] = BandType::ZERO;
            }
            if audible {
                count += 1;
            }
        }
    }
    count
}

/// Map every band slot to the next band in the delta chain
///
/// Slots outside the chain map to themselves; the last chain member maps to
/// itself. Entry 0 additionally points at the first chain member.
pub fn init_nextband_map(ch: &ChannelData) -> [u8; MAX_BANDS] {
    let mut nextband = [0u8; MAX_BANDS];
    for (g, n) in nextband.iter_mut().enumerate() {
        *n = g as u8;
    }
    let mut prevband = 0usize;
    for (w, _) in ch.window.groups() {
        for g in 0..ch.window.num_swb() {
            let b = w * BAND_STRIDE + g;
            if ch.in_sf_chain(b) {
                nextband[prevband] = b as u8;
                prevband = b;
            }
        }
    }
    nextband[prevband] = prevband as u8;
    nextband
}

/// Scalefactor of the first band in the delta chain, in coding order
pub fn first_chain_scalefactor(ch: &ChannelData) -> Option<i32> {
    ch.window
        .groups()
        .flat_map(|(w, _)| (0..ch.window.num_swb()).map(move |g| w * BAND_STRIDE + g))
        .find(|&b| ch.in_sf_chain(b))
        .map(|b| ch.sf_idx[b])
}

/// Whether band `band` can leave the chain without breaking the delta limit
/// between `prev_sf` and the next chain member
pub fn sfdelta_can_remove_band(ch: &ChannelData, nextband: &[u8; MAX_BANDS], prev_sf: Option<i32>, band: usize) -> bool {
    match prev_sf {
        Some(prev) => {
            let next = ch.sf_idx[nextband[band] as usize];
            (prev - SCALE_MAX_DIFF..=prev + SCALE_MAX_DIFF).contains(&next)
        }
        None => false,
    }
}

/// Whether band `band` can take scalefactor `new_sf` without breaking the
/// delta limit on either side
pub fn sfdelta_can_replace(
    ch: &ChannelData,
    nextband: &[u8; MAX_BANDS],
    prev_sf: Option<i32>,
    new_sf: i32,
    band: usize,
) -> bool {
    let next = ch.sf_idx[nextband[band] as usize];
    let prev_ok = prev_sf.map_or(true, |prev| (prev - SCALE_MAX_DIFF..=prev + SCALE_MAX_DIFF).contains(&new_sf));
    prev_ok && (new_sf - SCALE_MAX_DIFF..=new_sf + SCALE_MAX_DIFF).contains(&next)
}

/// Check the delta chain of a channel
pub fn scalefactor_deltas_valid(ch: &ChannelData) -> bool {
    let mut prev: Option<i32> = None;
    for (w, _) in ch.window.groups() {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if !ch.in_sf_chain(b) {
                continue;
            }
            if let Some(p) = prev {
                if (ch.sf_idx[b] - p).abs() > SCALE_MAX_DIFF {
                    return false;
                }
            }
            prev = Some(ch.sf_idx[b]);
        }
    }
    true
}

/// Scalefactor coding bits of the current delta chain
pub fn scalefactor_bits(ch: &ChannelData) -> u32 {
    let mut bits = 0;
    let mut prev: Option<i32> = None;
    for (w, _) in ch.window.groups() {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if !ch.in_sf_chain(b) {
                continue;
            }
            bits += match prev {
                None => GLOBAL_GAIN_BITS,
                Some(p) => {
                    let diff = (ch.sf_idx[b] - p + SCALE_DIFF_ZERO).clamp(0, 2 * SCALE_DIFF_ZERO);
                    SCALEFACTOR_BITS[diff as usize] as u32
                }
            };
            prev = Some(ch.sf_idx[b]);
        }
    }
    bits
}

/// Spectral plus scalefactor bits with every chain band at its smallest codebook
pub(crate) fn estimate_bits(ctx: &mut SearchContext<'_>, ch: &ChannelData) -> u32 {
    let scaled = abs_pow34_vec(&ch.coeffs);
    let groups: Vec<(usize, usize)> = ch.window.groups().collect();
    let mut bits = scalefactor_bits(ch);
    for &(w, len) in &groups {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if !ch.in_sf_chain(b) {
                continue;
            }
            bits += ctx.group_cost(ch, &scaled, w, len, g, ch.sf_idx[b], ch.band_type[b]).bits;
        }
    }
    bits
}

/// Enforce the delta chain and set each coded band's codebook
///
/// Scalefactors are clamped into range of their predecessor. A band whose
/// coefficients all quantize to zero at its final scalefactor becomes a zero
/// band, which changes the chain, so the pass repeats until stable. Existing
/// codebooks are kept when they can still represent the band.
pub fn finalize_scalefactors(ch: &mut ChannelData, rounding: Rounding) {
    let scaled = abs_pow34_vec(&ch.coeffs);
    let groups: Vec<(usize, usize)> = ch.window.groups().collect();
    loop {
        let mut dropped = false;
        let mut prev: Option<i32> = None;
        for &(w, len) in &groups {
            for g in 0..ch.window.max_sfb() {
                let b = w * BAND_STRIDE + g;
                if !ch.in_sf_chain(b) {
                    continue;
                }
                let mut sf = ch.sf_idx[b].clamp(0, SCALE_MAX_POS);
                if let Some(p) = prev {
                    sf = sf.clamp(p - SCALE_MAX_DIFF, p + SCALE_MAX_DIFF);
                }
                let start = ch.window.band_range(w, g).start;
                let maxval = find_max_val(len, ch.window.band_width(g), &scaled[start..]);
                let min_book = find_min_book(maxval, sf, rounding);
                if min_book == BandType::ZERO {
                    ch.zero_band(w, len, g);
                    dropped = true;
                    continue;
                }
                let current = ch.band_type[b];
                let cb = if current != BandType::ZERO && current.max_value() >= min_book.max_value() {
                    current
                } else {
                    min_book
                };
                for w2 in 0..len {
                    let bb = b + w2 * BAND_STRIDE;
                    ch.sf_idx[bb] = sf;
                    ch.band_type[bb] = cb;
                }
                prev = Some(sf);
            }
        }
        if !dropped {
            break;
        }
    }
}

/// Assign scalefactors to noise and intensity bands
///
/// Each kind forms its own chain with its own delta limit. Intensity
/// positions start from zero, noise energies from the first noise band.
pub fn set_special_band_scalefactors(ch: &mut ChannelData) {
    let groups: Vec<(usize, usize)> = ch.window.groups().collect();
    let mut prevscaler_n: Option<i32> = None;
    let mut prevscaler_i = 0;
    let mut bands = 0;

    for &(w, _) in &groups {
        for g in 0..ch.window.num_swb() {
            let b = w * BAND_STRIDE + g;
            if ch.zeroes[b] {
                continue;
            }
            let bt = ch.band_type[b];
            if bt.is_intensity() {
                ch.sf_idx[b] = ((ch.is_ener[b].log2() * 2.0).round() as i32).clamp(-155, 100);
                bands += 1;
            } else if bt.is_noise() {
                ch.sf_idx[b] = (3 + (ch.pns_ener[b].log2() * 2.0).ceil() as i32).clamp(-100, 155);
                if prevscaler_n.is_none() {
                    prevscaler_n = Some(ch.sf_idx[b]);
                }
                bands += 1;
            }
        }
    }
    if bands == 0 {
        return;
    }

    for &(w, _) in &groups {
        for g in 0..ch.window.num_swb() {
            let b = w * BAND_STRIDE + g;
            if ch.zeroes[b] {
                continue;
            }
            let bt = ch.band_type[b];
            if bt.is_intensity() {
                prevscaler_i = ch.sf_idx[b].clamp(prevscaler_i - SCALE_MAX_DIFF, prevscaler_i + SCALE_MAX_DIFF);
                ch.sf_idx[b] = prevscaler_i;
            } else if let (true, Some(prev)) = (bt.is_noise(), prevscaler_n) {
                let sf = ch.sf_idx[b].clamp(prev - SCALE_MAX_DIFF, prev + SCALE_MAX_DIFF);
                ch.sf_idx[b] = sf;
                prevscaler_n = Some(sf);
            }
        }
    }
    ch.sync_groups();
}
