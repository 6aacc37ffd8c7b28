//! Two-loop scalefactor search
//!
//! The inner loop moves every coded band's scalefactor by a common,
//! halving step until the frame's bits land within an eighth of the target.
//! The outer loop then trades bits between bands one scalefactor step at a
//! time: bands whose distortion exceeds their masking threshold get a finer
//! step, bands far below it get a coarser one. Under bit starvation, the
//! noisiest candidates are handed to noise substitution first.

use crate::pns::{GroupEnergy, PnsParams};
use crate::quantization::{abs_pow34_vec, coef2minsf, find_max_val, find_min_book, sf_from_threshold, BandCost};
use crate::search::{
    init_nextband_map, mark_zero_bands, scalefactor_bits, sfdelta_can_remove_band, sfdelta_can_replace,
    ScalefactorSearch, SearchContext, SearchReport, SF_SEARCH_CEIL,
};
use crate::types::{BandType, ChannelData, BAND_STRIDE, MAX_BANDS};

/// Cap on common-step adjustments of the inner loop
pub const INNER_ITERATION_CAP: u32 = 64;

/// First common step of the inner loop
const INITIAL_QSTEP: i32 = 32;

/// Fraction of the band's energy the reconstruction may drift by
const ENERGY_DRIFT: f32 = 0.3;

/// Bands whose distortion is below this fraction of the threshold may coarsen
const UNDER_DISTORTED: f32 = 0.5;

/// Per-band quantities fixed for the whole search
struct BandLimits {
    /// Allowed distortion (sum of thresholds over the group)
    uplim: [f32; MAX_BANDS],
    /// Coefficient energy over the group
    energy: [f32; MAX_BANDS],
    /// Largest scaled coefficient over the group
    maxval: [f32; MAX_BANDS],
    /// Lowest scalefactor that avoids escape clipping
    minsf: [i32; MAX_BANDS],
}

/// Nested-loop search converging on the frame's bit target
pub struct TwoLoopSearch;

impl ScalefactorSearch for TwoLoopSearch {
    fn search(&self, ctx: &mut SearchContext<'_>, ch: &mut ChannelData) -> SearchReport {
        let mut report = SearchReport::default();
        if mark_zero_bands(ctx.bands, ch) == 0 {
            return report;
        }

        let scaled = abs_pow34_vec(&ch.coeffs);
        let groups: Vec<(usize, usize)> = ch.window.groups().collect();
        let limits = band_limits(ctx, ch, &scaled, &groups);

        let target = ctx.target_bits.max(1);
        let toomany = target + target / 8;
        let toofew = target - target / 8;

        for &(w, len) in &groups {
            for g in 0..ch.window.max_sfb() {
                let b = w * BAND_STRIDE + g;
                if ch.in_sf_chain(b) {
                    let lines = ch.window.band_width(g) * len;
                    let lo = limits.minsf[b].min(SF_SEARCH_CEIL);
                    ch.sf_idx[b] = sf_from_threshold(limits.uplim[b], lines).clamp(lo, SF_SEARCH_CEIL);
                }
            }
        }
        ch.sync_groups();

        let mut bits = inner_loop(ctx, ch, &scaled, &groups, &limits, toomany, toofew, &mut report);

        if ctx.noise_substitution && bits > toomany {
            report.noise_bands = starvation_pns(ctx, ch, &scaled, &groups, &limits, toomany, &mut bits);
        }

        for outer in 0..ctx.outer_iterations {
            report.outer_iterations = outer + 1;
            let changed = refine_bands(ctx, ch, &scaled, &groups, &limits, toomany, &mut bits);
            log::trace!("twoloop outer pass {}: {} bits, changed: {}", outer, bits, changed);
            if !changed {
                break;
            }
        }

        for &(w, len) in &groups {
            for g in 0..ch.window.max_sfb() {
                let b = w * BAND_STRIDE + g;
                if ch.in_sf_chain(b) {
                    let cb = find_min_book(limits.maxval[b], ch.sf_idx[b], ctx.rounding);
                    for w2 in 0..len {
                        ch.band_type[b + w2 * BAND_STRIDE] = cb;
                    }
                }
            }
        }

        report.bits = count_bits(ctx, ch, &scaled, &groups, &limits);
        log::debug!(
            "twoloop: {} bits (target {}), {} inner, {} outer iterations",
            report.bits,
            target,
            report.inner_iterations,
            report.outer_iterations
        );
        report
    }
}

fn band_limits(ctx: &SearchContext<'_>, ch: &ChannelData, scaled: &[f32], groups: &[(usize, usize)]) -> BandLimits {
    let mut limits = BandLimits {
        uplim: [0.0; MAX_BANDS],
        energy: [0.0; MAX_BANDS],
        maxval: [0.0; MAX_BANDS],
        minsf: [0; MAX_BANDS],
    };
    for &(w, len) in groups {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            let start = ch.window.band_range(w, g).start;
            let width = ch.window.band_width(g);
            let mut max_coef = 0.0f32;
            for w2 in 0..len {
                let band = &ctx.bands[b + w2 * BAND_STRIDE];
                limits.uplim[b] += band.threshold;
                limits.energy[b] += band.energy;
                let range = ch.window.band_range(w + w2, g);
                max_coef = ch.coeffs[range].iter().fold(max_coef, |m, c| m.max(c.abs()));
            }
            limits.maxval[b] = find_max_val(len, width, &scaled[start..]);
            limits.minsf[b] = coef2minsf(max_coef);
        }
    }
    limits
}

/// Cost of a group at `sf` with the smallest codebook that represents it
fn band_cost(
    ctx: &mut SearchContext<'_>,
    ch: &ChannelData,
    scaled: &[f32],
    limits: &BandLimits,
    w: usize,
    len: usize,
    g: usize,
    sf: i32,
) -> BandCost {
    let b = w * BAND_STRIDE + g;
    let cb = find_min_book(limits.maxval[b], sf, ctx.rounding);
    ctx.group_cost(ch, scaled, w, len, g, sf, cb)
}

/// Spectral bits at the smallest codebooks plus scalefactor bits
fn count_bits(
    ctx: &mut SearchContext<'_>,
    ch: &ChannelData,
    scaled: &[f32],
    groups: &[(usize, usize)],
    limits: &BandLimits,
) -> u32 {
    let mut bits = scalefactor_bits(ch);
    for &(w, len) in groups {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if ch.in_sf_chain(b) {
                bits += band_cost(ctx, ch, scaled, limits, w, len, g, ch.sf_idx[b]).bits;
            }
        }
    }
    bits
}

/// Shift every coded band by `delta`, each clamped to its legal range
///
/// Returns whether any scalefactor moved.
fn shift_scalefactors(ch: &mut ChannelData, groups: &[(usize, usize)], limits: &BandLimits, delta: i32) -> bool {
    let mut moved = false;
    for &(w, _) in groups {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if !ch.in_sf_chain(b) {
                continue;
            }
            let lo = limits.minsf[b].min(SF_SEARCH_CEIL);
            let sf = (ch.sf_idx[b] + delta).clamp(lo, SF_SEARCH_CEIL);
            if sf != ch.sf_idx[b] {
                ch.sf_idx[b] = sf;
                moved = true;
            }
        }
    }
    ch.sync_groups();
    moved
}

#[allow(clippy::too_many_arguments)]
fn inner_loop(
    ctx: &mut SearchContext<'_>,
    ch: &mut ChannelData,
    scaled: &[f32],
    groups: &[(usize, usize)],
    limits: &BandLimits,
    toomany: u32,
    toofew: u32,
    report: &mut SearchReport,
) -> u32 {
    let mut qstep = INITIAL_QSTEP;
    // doubling step used once the bisection is exhausted while still over budget
    let mut creep = 0;
    loop {
        let bits = count_bits(ctx, ch, scaled, groups, limits);
        report.inner_iterations += 1;
        log::trace!("twoloop inner step {}: {} bits (qstep {})", report.inner_iterations, bits, qstep);

        let direction = if bits > toomany {
            1
        } else if bits < toofew && creep == 0 {
            -1
        } else {
            return bits;
        };
        if report.inner_iterations >= INNER_ITERATION_CAP {
            return bits;
        }
        let step = if qstep > 0 {
            qstep
        } else {
            creep = (creep * 2).max(1);
            creep
        };
        let moved = shift_scalefactors(ch, groups, limits, direction * step);
        if !moved && qstep <= 1 {
            return bits;
        }
        qstep /= 2;
    }
}

/// Scalefactor of the chain member preceding band `band`
fn prev_chain_sf(ch: &ChannelData, groups: &[(usize, usize)], band: usize) -> Option<i32> {
    let mut prev = None;
    for &(w, _) in groups {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if b == band {
                return prev;
            }
            if ch.in_sf_chain(b) {
                prev = Some(ch.sf_idx[b]);
            }
        }
    }
    prev
}

/// Move the noisiest substitutable bands to noise until the budget fits
fn starvation_pns(
    ctx: &mut SearchContext<'_>,
    ch: &mut ChannelData,
    scaled: &[f32],
    groups: &[(usize, usize)],
    limits: &BandLimits,
    toomany: u32,
    bits: &mut u32,
) -> u32 {
    let params = PnsParams::new(
        ctx.lambda,
        ch.window.sample_rate(),
        ch.window.window_len(),
        ch.window.sample_rate() / 2,
    );
    let mut candidates: Vec<(f32, usize, usize, usize)> = Vec::new();
    for &(w, len) in groups {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if ch.in_sf_chain(b) && ch.can_pns[b] && limits.energy[b] > 0.0 {
                let stats = GroupEnergy::gather(ctx.bands, w, len, g);
                candidates.push((stats.spread * stats.threshold / stats.energy, w, len, g));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut replaced = 0;
    for (_, w, len, g) in candidates {
        let b = w * BAND_STRIDE + g;
        let nextband = init_nextband_map(ch);
        let prev = prev_chain_sf(ch, groups, b);
        if !sfdelta_can_remove_band(ch, &nextband, prev, b) {
            continue;
        }
        let sf = ch.sf_idx[b];
        let cb = find_min_book(limits.maxval[b], sf, ctx.rounding);
        let coded_rd = ctx.group_rd(ch, scaled, w, len, g, sf, cb);
        let freq = ch.window.band_start_hz(g);
        let continued = g > 0 && ch.band_type[b - 1] == BandType::NOISE;
        let noise_rd = params.noise_rd(ctx.bands, w, len, g, freq, continued);
        if noise_rd >= coded_rd {
            continue;
        }

        let stats = GroupEnergy::gather(ctx.bands, w, len, g);
        for w2 in 0..len {
            let bb = b + w2 * BAND_STRIDE;
            ch.band_type[bb] = BandType::NOISE;
            ch.pns_ener[bb] = stats.noise_target();
        }
        replaced += 1;
        *bits = count_bits(ctx, ch, scaled, groups, limits);
        if *bits <= toomany {
            break;
        }
    }
    if replaced > 0 {
        log::debug!("twoloop: {} bands substituted by noise under starvation", replaced);
    }
    replaced
}

/// One refinement pass over the coded bands; returns whether anything changed
fn refine_bands(
    ctx: &mut SearchContext<'_>,
    ch: &mut ChannelData,
    scaled: &[f32],
    groups: &[(usize, usize)],
    limits: &BandLimits,
    toomany: u32,
    bits: &mut u32,
) -> bool {
    let nextband = init_nextband_map(ch);
    let mut changed = false;
    let mut prev_sf: Option<i32> = None;

    for &(w, len) in groups {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if !ch.in_sf_chain(b) {
                continue;
            }
            let sf = ch.sf_idx[b];
            let uplim = limits.uplim[b];
            let current = band_cost(ctx, ch, scaled, limits, w, len, g, sf);

            let candidate = if current.distortion > uplim && sf > limits.minsf[b] && sf > 0 {
                Some(sf - 1)
            } else if current.distortion < UNDER_DISTORTED * uplim && sf < SF_SEARCH_CEIL {
                Some(sf + 1)
            } else {
                None
            };

            if let Some(new_sf) = candidate {
                if sfdelta_can_replace(ch, &nextband, prev_sf, new_sf, b) {
                    let next = band_cost(ctx, ch, scaled, limits, w, len, g, new_sf);
                    let new_bits = (*bits + next.bits).saturating_sub(current.bits);
                    let accept = if new_sf < sf {
                        new_bits <= toomany && next.distortion < current.distortion
                    } else {
                        let energy = limits.energy[b];
                        let drift = (energy - next.energy).abs();
                        let allowed = (energy - current.energy).abs().max(ENERGY_DRIFT * energy);
                        next.distortion <= uplim && next.bits < current.bits && drift <= allowed
                    };
                    if accept {
                        for w2 in 0..len {
                            ch.sf_idx[b + w2 * BAND_STRIDE] = new_sf;
                        }
                        *bits = new_bits;
                        changed = true;
                    }
                }
            }
            prev_sf = Some(ch.sf_idx[b]);
        }
    }
    if changed {
        *bits = count_bits(ctx, ch, scaled, groups, limits);
    }
    changed
}
