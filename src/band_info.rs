//! Codebook run-length grouping
//!
//! Bands of a window group are coded as sections: runs of consecutive bands
//! sharing one codebook, each costing a 4-bit codebook id plus a run length
//! in escaped 5-bit (long) or 3-bit (short) fields. A dynamic program over
//! `[band][codebook]` picks the section layout with the lowest total of band
//! cost and section overhead.
//!
//! A zero band may also ride inside a spectral section. It is then coded
//! as all-zero codewords and repeats the previous scalefactor, which pays
//! off when it joins two runs that would otherwise need separate sections.

use crate::quantization::{abs_pow34_vec, BandQuantizer};
use crate::search::SearchContext;
use crate::tables::{CB_MAXVAL, RUN_BITS_LONG, RUN_BITS_SHORT, SCALEFACTOR_BITS, SCALE_DIFF_ZERO, SECTION_CB_BITS};
use crate::types::{BandType, ChannelData, BAND_STRIDE, BLOCK_LEN};

/// DP states: the twelve spectral classes, noise and both intensity classes
const SECTION_STATES: usize = 15;

/// Most bands a single window group can have
const MAX_SECTION_BANDS: usize = 64;

static ZERO_BAND: [f32; BLOCK_LEN] = [0.0; BLOCK_LEN];

/// Band type coded by each DP state
const STATE_BAND_TYPE: [BandType; SECTION_STATES] = [
    BandType::spectral(0),
    BandType::spectral(1),
    BandType::spectral(2),
    BandType::spectral(3),
    BandType::spectral(4),
    BandType::spectral(5),
    BandType::spectral(6),
    BandType::spectral(7),
    BandType::spectral(8),
    BandType::spectral(9),
    BandType::spectral(10),
    BandType::spectral(11),
    BandType::NOISE,
    BandType::INTENSITY2,
    BandType::INTENSITY,
];

/// Cost the section search minimizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionMode {
    /// Band bits only
    Rate,
    /// Band distortion weighted by `lambda / threshold`, plus bits
    RateDistortion,
}

/// A run of bands sharing one codebook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct Section {
    pub codebook: BandType,
    /// First band of the run
    pub start: usize,
    /// Number of bands in the run
    pub len: usize,
}

/// Section layout of one window group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct GroupSections {
    pub sections: Vec<Section>,
    /// Signalling bits of the layout (codebook ids and run lengths)
    pub bits: u32,
}

#[derive(Debug, Clone, Copy)]
struct PathNode {
    /// State at the band before this run started
    prev_idx: Option<usize>,
    cost: f32,
    run: usize,
}

const EMPTY_NODE: PathNode = PathNode {
    prev_idx: None,
    cost: 0.0,
    run: 0,
};

/// Section search with a reusable path table
#[derive(Debug, Clone)]
pub struct BandInfoEncoder {
    path: Vec<[PathNode; SECTION_STATES]>,
}

impl BandInfoEncoder {
    pub fn new() -> Self {
        Self {
            path: vec![[EMPTY_NODE; SECTION_STATES]; MAX_SECTION_BANDS + 1],
        }
    }

    /// Choose sections for every window group of a channel
    ///
    /// Rewrites each coded band's codebook to its section's codebook. Zero
    /// bands placed inside a spectral section become coded bands with
    /// zeroed coefficients and the scalefactor of the preceding coded band.
    /// Noise and intensity decisions are left as they are.
    pub fn encode_channel(
        &mut self,
        ctx: &mut SearchContext<'_>,
        mode: SectionMode,
        ch: &mut ChannelData,
    ) -> Vec<GroupSections> {
        let scaled = abs_pow34_vec(&ch.coeffs);
        let groups: Vec<(usize, usize)> = ch.window.groups().collect();
        let mut merged = Vec::new();
        let sections = groups
            .iter()
            .map(|&(w, len)| self.encode_group(ctx, mode, ch, &scaled, w, len, &mut merged))
            .collect();
        if !merged.is_empty() {
            chain_merged_bands(ch, &groups, &merged);
            // merged bands no longer hold the coefficients their costs were cached for
            ctx.cache.invalidate_all();
            log::trace!("{} zero bands coded inside spectral sections", merged.len());
        }
        ch.sync_groups();
        sections
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_group(
        &mut self,
        ctx: &mut SearchContext<'_>,
        mode: SectionMode,
        ch: &mut ChannelData,
        scaled: &[f32],
        w: usize,
        group_len: usize,
        merged: &mut Vec<usize>,
    ) -> GroupSections {
        let max_sfb = ch.window.max_sfb().min(MAX_SECTION_BANDS);
        let run_bits = if ch.window.is_short() { RUN_BITS_SHORT } else { RUN_BITS_LONG };
        let run_esc = (1usize << run_bits) - 1;
        let run_value_bits = |run: usize| run_bits * (run / run_esc + 1) as u32;

        self.path[0] = [EMPTY_NODE; SECTION_STATES];
        let mut minrd = 0.0f32;
        let mut mincb = 0usize;

        for swb in 0..max_sfb {
            let b = w * BAND_STRIDE + swb;
            let band_type = if ch.zeroes[b] { BandType::ZERO } else { ch.band_type[b] };
            let mut next_minrd = f32::INFINITY;
            let mut next_mincb = 0;

            for cb in 0..SECTION_STATES {
                let prev = self.path[swb][cb];
                if !admissible(cb, band_type) {
                    self.path[swb + 1][cb] = PathNode {
                        prev_idx: None,
                        cost: f32::INFINITY,
                        run: prev.run + 1,
                    };
                    continue;
                }
                let rd = if band_type == BandType::ZERO {
                    zero_band_cost(ctx, ch.window.band_width(swb), group_len, STATE_BAND_TYPE[cb])
                } else {
                    band_cost(ctx, mode, ch, scaled, w, group_len, swb, STATE_BAND_TYPE[cb])
                };
                let mut cost_stay = prev.cost + rd;
                let cost_get = minrd + rd + (run_bits + SECTION_CB_BITS) as f32;
                if run_value_bits(prev.run) != run_value_bits(prev.run + 1) {
                    cost_stay += run_bits as f32;
                }
                self.path[swb + 1][cb] = if cost_get < cost_stay {
                    PathNode {
                        prev_idx: Some(mincb),
                        cost: cost_get,
                        run: 1,
                    }
                } else {
                    PathNode {
                        prev_idx: Some(cb),
                        cost: cost_stay,
                        run: prev.run + 1,
                    }
                };
                if self.path[swb + 1][cb].cost < next_minrd {
                    next_minrd = self.path[swb + 1][cb].cost;
                    next_mincb = cb;
                }
            }
            minrd = next_minrd;
            mincb = next_mincb;
        }

        let mut stack: Vec<(usize, usize)> = Vec::new();
        let mut idx = 0;
        for cb in 1..SECTION_STATES {
            if self.path[max_sfb][cb].cost < self.path[max_sfb][idx].cost {
                idx = cb;
            }
        }
        let mut ppos = max_sfb;
        while ppos > 0 {
            let cb = idx;
            let run = self.path[ppos][cb].run.clamp(1, ppos);
            stack.push((cb, run));
            idx = self.path[ppos - run + 1][cb].prev_idx.unwrap_or(0);
            ppos -= run;
        }

        let mut result = GroupSections::default();
        let mut start = 0;
        for &(cb, run) in stack.iter().rev() {
            let codebook = STATE_BAND_TYPE[cb];
            for g in start..start + run {
                let b = w * BAND_STRIDE + g;
                if ch.in_sf_chain(b) {
                    ch.band_type[b] = codebook;
                } else if codebook != BandType::ZERO && codebook.is_spectral() {
                    // a zero band carried by the section
                    for w2 in 0..group_len {
                        let bb = b + w2 * BAND_STRIDE;
                        ch.zeroes[bb] = false;
                        ch.band_type[bb] = codebook;
                        let range = ch.window.band_range(w + w2, g);
                        ch.coeffs[range].fill(0.0);
                    }
                    merged.push(b);
                }
            }
            result.sections.push(Section { codebook, start, len: run });
            result.bits += SECTION_CB_BITS + run_value_bits(run);
            start += run;
        }
        log::trace!(
            "window {}: {} sections, {} signalling bits",
            w,
            result.sections.len(),
            result.bits
        );
        result
    }
}

impl Default for BandInfoEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether DP state `state` may code a band decided as `band_type`
///
/// Zero bands fit the zero state and every spectral state.
fn admissible(state: usize, band_type: BandType) -> bool {
    let coded = STATE_BAND_TYPE[state];
    if band_type == BandType::ZERO {
        coded.is_spectral()
    } else if band_type.is_spectral() {
        coded != BandType::ZERO && coded.is_spectral() && CB_MAXVAL[state] >= CB_MAXVAL[band_type.index()]
    } else {
        coded == band_type
    }
}

/// Cost of carrying a zero band in a section coded with `codebook`
///
/// All-zero codewords in every window plus a repeated scalefactor; free in
/// the zero codebook. Distortion is the same either way and left out.
fn zero_band_cost(ctx: &SearchContext<'_>, width: usize, group_len: usize, codebook: BandType) -> f32 {
    if codebook == BandType::ZERO {
        return 0.0;
    }
    let zeros = &ZERO_BAND[..width];
    let bits = BandQuantizer::new(ctx.rounding).cost(zeros, zeros, 0, codebook).bits;
    (bits * group_len as u32 + SCALEFACTOR_BITS[SCALE_DIFF_ZERO as usize] as u32) as f32
}

/// Give every merged band the scalefactor of the coded band before it
///
/// A merged band ahead of the first coded band takes that band's
/// scalefactor instead, so every delta it introduces is zero.
fn chain_merged_bands(ch: &mut ChannelData, groups: &[(usize, usize)], merged: &[usize]) {
    let mut prev: Option<i32> = None;
    let mut pending: Vec<(usize, usize)> = Vec::new();
    for &(w, len) in groups {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if !ch.in_sf_chain(b) {
                continue;
            }
            if !merged.contains(&b) {
                let sf = ch.sf_idx[b];
                for (pb, plen) in pending.drain(..) {
                    set_group_scalefactor(ch, pb, plen, sf);
                }
                prev = Some(sf);
            } else if let Some(sf) = prev {
                set_group_scalefactor(ch, b, len, sf);
            } else {
                pending.push((b, len));
            }
        }
    }
}

fn set_group_scalefactor(ch: &mut ChannelData, b: usize, group_len: usize, sf: i32) {
    for w2 in 0..group_len {
        ch.sf_idx[b + w2 * BAND_STRIDE] = sf;
    }
}

#[allow(clippy::too_many_arguments)]
fn band_cost(
    ctx: &mut SearchContext<'_>,
    mode: SectionMode,
    ch: &ChannelData,
    scaled: &[f32],
    w: usize,
    group_len: usize,
    g: usize,
    codebook: BandType,
) -> f32 {
    if !codebook.kind().codes_coefficients() {
        return 0.0;
    }
    let sf = ch.sf_idx[w * BAND_STRIDE + g];
    match mode {
        SectionMode::Rate => ctx.group_cost(ch, scaled, w, group_len, g, sf, codebook).bits as f32,
        SectionMode::RateDistortion => ctx.group_rd(ch, scaled, w, group_len, g, sf, codebook),
    }
}
