//! Trellis scalefactor search
//!
//! Viterbi search over `SCALE_MAX_DIFF + 1` scalefactor states above a
//! per-frame base. Each stage is one band in encoding order; a transition
//! costs the band's rate-distortion cost at the destination state plus the
//! code length of the scalefactor delta. The delta limit holds by
//! construction since every state lies within the window.

use crate::quantization::{abs_pow34_vec, coef2maxsf, coef2minsf, find_max_val, find_min_book};
use crate::search::{estimate_bits, finalize_scalefactors, ScalefactorSearch, SearchContext, SearchReport};
use crate::tables::{SCALEFACTOR_BITS, SCALE_DIFF_ZERO};
use crate::types::{BandType, ChannelData, BAND_STRIDE, MAX_BANDS, SCALE_DIV_512, SCALE_MAX_DIFF, SCALE_MAX_POS, SCALE_ONE_POS};

const TRELLIS_STATES: usize = SCALE_MAX_DIFF as usize + 1;

/// One stage per band slot plus the start stage
const TRELLIS_STAGES: usize = MAX_BANDS + 1;

#[derive(Debug, Clone, Copy)]
struct TrellisNode {
    cost: f32,
    /// State of the previous stage, `None` if unreachable
    prev: Option<usize>,
}

const UNREACHED: TrellisNode = TrellisNode {
    cost: f32::INFINITY,
    prev: None,
};

/// Viterbi search over scalefactor states
pub struct TrellisSearch;

impl ScalefactorSearch for TrellisSearch {
    fn search(&self, ctx: &mut SearchContext<'_>, ch: &mut ChannelData) -> SearchReport {
        let Some((q0, q1)) = base_range(&ch.coeffs) else {
            ch.sf_idx = [0; MAX_BANDS];
            ch.zeroes = [true; MAX_BANDS];
            ch.band_type = [BandType::ZERO; MAX_BANDS];
            return SearchReport::default();
        };
        let span = (q1 - q0) as usize;

        let scaled = abs_pow34_vec(&ch.coeffs);
        let groups: Vec<(usize, usize)> = ch.window.groups().collect();
        let mut paths = vec![[UNREACHED; TRELLIS_STATES]; TRELLIS_STAGES];
        let mut bandaddr = [0usize; TRELLIS_STAGES];
        paths[0] = [TrellisNode { cost: 0.0, prev: None }; TRELLIS_STATES];

        let mut idx = 1;
        for &(w, len) in &groups {
            for g in 0..ch.window.num_swb() {
                let b = w * BAND_STRIDE + g;
                bandaddr[idx] = b;
                let mut qmin = f32::INFINITY;
                let mut qmax = 0.0f32;
                let mut nz = false;
                for w2 in 0..len {
                    let bb = b + w2 * BAND_STRIDE;
                    let band = &ctx.bands[bb];
                    let audible = g < ch.window.max_sfb() && band.threshold > 0.0 && band.energy > band.threshold;
                    ch.zeroes[bb] = !audible;
                    ch.band_type[bb] = BandType::ZERO;
                    if !audible {
                        continue;
                    }
                    nz = true;
                    for &c in &ch.coeffs[ch.window.band_range(w + w2, g)] {
                        let t = c.abs();
                        if t > 0.0 {
                            qmin = qmin.min(t);
                        }
                        qmax = qmax.max(t);
                    }
                }

                if nz {
                    let mut minscale = (coef2minsf(qmin) - q0).clamp(0, TRELLIS_STATES as i32 - 1) as usize;
                    let mut maxscale = (coef2maxsf(qmax) - q0).clamp(0, TRELLIS_STATES as i32) as usize;
                    if minscale == maxscale {
                        maxscale = (minscale + 1).clamp(1, TRELLIS_STATES);
                        minscale = maxscale - 1;
                    }
                    let start = ch.window.band_range(w, g).start;
                    let maxval = find_max_val(len, ch.window.band_width(g), &scaled[start..]);
                    for q in minscale..maxscale {
                        let sf = q as i32 + q0;
                        let cb = find_min_book(maxval, sf, ctx.rounding);
                        let dist = ctx.group_rd(ch, &scaled, w, len, g, sf, cb);
                        for i in 0..span {
                            let delta_bits = SCALEFACTOR_BITS[(q as i32 - i as i32 + SCALE_DIFF_ZERO) as usize] as f32;
                            let cost = paths[idx - 1][i].cost + dist + delta_bits;
                            if cost < paths[idx][q].cost {
                                paths[idx][q] = TrellisNode { cost, prev: Some(i) };
                            }
                        }
                    }
                } else {
                    for q in 0..span {
                        paths[idx][q] = TrellisNode {
                            cost: paths[idx - 1][q].cost + 1.0,
                            prev: Some(q),
                        };
                    }
                }
                // a group is coded if any of its windows is audible
                ch.zeroes[b] = !nz;
                idx += 1;
            }
        }
        idx -= 1;

        let mut minq = 0;
        for i in 1..TRELLIS_STATES {
            if paths[idx][i].cost < paths[idx][minq].cost {
                minq = i;
            }
        }
        log::trace!("trellis: base {}..{}, best cost {}", q0, q1, paths[idx][minq].cost);
        while idx > 0 {
            ch.sf_idx[bandaddr[idx]] = minq as i32 + q0;
            minq = paths[idx][minq].prev.unwrap_or(0);
            idx -= 1;
        }

        ch.sync_groups();
        finalize_scalefactors(ch, ctx.rounding);

        let bits = estimate_bits(ctx, ch);
        log::debug!("trellis: {} bits at lambda {}", bits, ctx.lambda);
        SearchReport {
            bits,
            ..SearchReport::default()
        }
    }
}

/// Base scalefactor and upper end of the trellis window for a block
///
/// `None` for a silent block.
fn base_range(coeffs: &[f32]) -> Option<(i32, i32)> {
    let mut q0f = f32::MAX;
    let mut q1f = 0.0f32;
    let mut nrg = 0.0f32;
    let mut count = 0;
    for &c in coeffs {
        let t = c.abs();
        if t > 0.0 {
            q0f = q0f.min(t);
            q1f = q1f.max(t);
            nrg += t * t;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }

    let mut q0 = coef2minsf(q0f).clamp(0, SCALE_MAX_POS - 1);
    let mut q1 = coef2maxsf(q1f).clamp(1, SCALE_MAX_POS);
    if q1 - q0 > SCALE_MAX_DIFF {
        let (q0low, q1high) = (q0, q1);
        let rms = (nrg / count as f32).sqrt();
        let qnrg = ((rms.log2() * 4.0 - 31.0 + (SCALE_ONE_POS - SCALE_DIV_512) as f32) as i32).clamp(0, 255);
        q1 = qnrg + 30;
        q0 = qnrg - 30;
        if q0 < q0low {
            q1 += q0low - q0;
            q0 = q0low;
        } else if q1 > q1high {
            q0 -= q1 - q1high;
            q1 = q1high;
        }
    }
    if q0 >= q1 {
        q1 = (q0 + 1).clamp(1, SCALE_MAX_POS);
        q0 = (q1 - 1).clamp(0, SCALE_MAX_POS - 1);
    }
    Some((q0, q1))
}
