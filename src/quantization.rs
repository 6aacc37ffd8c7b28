//! Band quantization and cost evaluation
//!
//! Quantizes one scalefactor band with a given scalefactor and codebook and
//! reports the bits the entropy coder would spend, the squared reconstruction
//! error, and the energy of the reconstruction. Costs are computed at unit
//! lambda; callers combine them with [`BandCost::rd`].

use std::ops::AddAssign;

use crate::tables::{self, POW2SF, POW34SF, POW_SF2_ZERO};
use crate::types::{BandType, CodebookKind, SCALE_DIV_512, SCALE_ONE_POS};

/// Rounding offset for round-to-nearest in the 3/4-power domain
pub const ROUND_STANDARD: f32 = 0.4054;

/// Rounding offset biased toward zero
pub const ROUND_TO_ZERO: f32 = 0.1054;

/// 8191^(4/3): reconstruction of a saturated escape value at unit step
const CLIPPED_ESCAPE_UNIT: f32 = 165140.0;

/// Rounding applied when mapping scaled coefficients to integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub enum Rounding {
    /// Round to nearest
    #[default]
    Nearest,
    /// Round toward zero
    TowardZero,
}

impl Rounding {
    /// Offset added before truncation
    pub fn bias(self) -> f32 {
        match self {
            Rounding::Nearest => ROUND_STANDARD,
            Rounding::TowardZero => ROUND_TO_ZERO,
        }
    }
}

/// Unit-lambda cost of coding one band
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct BandCost {
    /// Entropy coded bits, including sign and escape bits
    pub bits: u32,
    /// Sum of squared reconstruction errors
    pub distortion: f32,
    /// Sum of squared reconstructed values
    pub energy: f32,
}

impl BandCost {
    /// Rate-distortion cost: `distortion * lambda + bits`
    pub fn rd(&self, lambda: f32) -> f32 {
        self.distortion * lambda + self.bits as f32
    }
}

impl AddAssign for BandCost {
    fn add_assign(&mut self, rhs: Self) {
        self.bits += rhs.bits;
        self.distortion += rhs.distortion;
        self.energy += rhs.energy;
    }
}

/// Quantizer step multiplier in the 3/4-power domain for scalefactor `sf`
pub fn sf_q34(sf: i32) -> f32 {
    let idx = (POW_SF2_ZERO - sf + SCALE_ONE_POS - SCALE_DIV_512).clamp(0, POW34SF.len() as i32 - 1);
    POW34SF[idx as usize]
}

/// Reconstruction step for scalefactor `sf`
pub fn sf_iq(sf: i32) -> f32 {
    let idx = (POW_SF2_ZERO + sf - SCALE_ONE_POS + SCALE_DIV_512).clamp(0, POW2SF.len() as i32 - 1);
    POW2SF[idx as usize]
}

/// 2^(exp/4), the amplitude ladder used for noise and intensity energies
pub fn pow2sf(exp: i32) -> f32 {
    let idx = (exp + POW_SF2_ZERO).clamp(0, POW2SF.len() as i32 - 1);
    POW2SF[idx as usize]
}

/// Write `|x|^(3/4)` of every input value into `out`
pub fn abs_pow34(out: &mut [f32], input: &[f32]) {
    for (o, &x) in out.iter_mut().zip(input) {
        let a = x.abs();
        *o = (a * a.sqrt()).sqrt();
    }
}

/// `|x|^(3/4)` of every input value
pub fn abs_pow34_vec(input: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; input.len()];
    abs_pow34(&mut out, input);
    out
}

/// Largest scaled value over a window group of one band
///
/// `scaled` starts at the band's first coefficient in the group's first window;
/// windows are [`crate::types::SHORT_WINDOW_LEN`] apart.
pub fn find_max_val(group_len: usize, swb_size: usize, scaled: &[f32]) -> f32 {
    let mut maxval = 0.0f32;
    for w2 in 0..group_len {
        let base = w2 * crate::types::SHORT_WINDOW_LEN;
        for &v in &scaled[base..base + swb_size] {
            maxval = maxval.max(v);
        }
    }
    maxval
}

/// Smallest codebook able to represent `maxval` (a scaled value) at scalefactor `sf`
/// when quantized with `rounding`
pub fn find_min_book(maxval: f32, sf: i32, rounding: Rounding) -> BandType {
    let qmaxval = (maxval * sf_q34(sf) + rounding.bias()) as i32;
    let cb = match qmaxval {
        i32::MIN..=0 => 0,
        1 => 1,
        2 => 3,
        3..=4 => 5,
        5..=7 => 7,
        8..=12 => 9,
        _ => 11,
    };
    BandType::spectral(cb)
}

/// Lowest scalefactor at which `coef` still quantizes without clipping
pub fn coef2minsf(coef: f32) -> i32 {
    if coef <= 0.0 {
        return 0;
    }
    ((coef.log2() * 4.0 - 69.0 + (SCALE_ONE_POS - SCALE_DIV_512) as f32) as i32).clamp(0, 255)
}

/// Highest scalefactor at which `coef` does not quantize to zero
pub fn coef2maxsf(coef: f32) -> i32 {
    if coef <= 0.0 {
        return 0;
    }
    ((coef.log2() * 4.0 + 6.0 + (SCALE_ONE_POS - SCALE_DIV_512) as f32) as i32).clamp(0, 255)
}

/// Scalefactor whose quantization noise roughly matches a masking threshold
///
/// `threshold` is the allowed noise energy spread over `lines` coefficients.
pub fn sf_from_threshold(threshold: f32, lines: usize) -> i32 {
    if threshold <= 0.0 || lines == 0 {
        return SCALE_ONE_POS - SCALE_DIV_512;
    }
    let step2 = 12.0 * threshold / lines as f32;
    ((SCALE_ONE_POS - SCALE_DIV_512) as f32 + 2.0 * step2.log2()).round() as i32
}

/// Band quantizer with a fixed rounding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandQuantizer {
    rounding: Rounding,
}

impl BandQuantizer {
    pub fn new(rounding: Rounding) -> Self {
        Self { rounding }
    }

    pub fn rounding(&self) -> Rounding {
        self.rounding
    }

    /// Unit-lambda cost of coding `input` with scalefactor `sf` and band type `cb`
    ///
    /// `scaled` must hold `|input|^(3/4)`. Zero, noise and intensity bands
    /// cost no bits and report the input energy as distortion.
    pub fn cost(&self, input: &[f32], scaled: &[f32], sf: i32, cb: BandType) -> BandCost {
        let kind = cb.kind();
        if !kind.codes_coefficients() {
            return BandCost {
                bits: 0,
                distortion: input.iter().map(|x| x * x).sum(),
                energy: 0.0,
            };
        }
        self.spectral_cost(input, scaled, sf, cb.index(), kind)
    }

    /// Rate-distortion cost at `lambda`
    pub fn rd_cost(&self, input: &[f32], scaled: &[f32], sf: i32, cb: BandType, lambda: f32) -> f32 {
        self.cost(input, scaled, sf, cb).rd(lambda)
    }

    fn spectral_cost(&self, input: &[f32], scaled: &[f32], sf: i32, cb: usize, kind: CodebookKind) -> BandCost {
        let q34 = sf_q34(sf);
        let iq = sf_iq(sf);
        let bias = self.rounding.bias();
        let dim = kind.dimension();
        let signed = kind.is_signed();
        let escape = kind == CodebookKind::Escape;
        let maxval = tables::CB_MAXVAL[cb] as i32;
        let range = tables::CB_RANGE[cb] as usize;
        let offset = if signed { maxval } else { 0 };
        let code_bits = tables::spectral_bits(cb);
        let clipped_escape = CLIPPED_ESCAPE_UNIT * iq;

        let mut cost = BandCost::default();
        let mut quants = [0i32; 4];
        for (chunk_in, chunk_sc) in input.chunks(dim).zip(scaled.chunks(dim)) {
            let mut symbol = 0usize;
            for (q, &s) in quants.iter_mut().zip(chunk_sc) {
                *q = ((s * q34 + bias).min(maxval as f32)) as i32;
            }
            for j in 0..chunk_in.len() {
                let v = if signed && chunk_in[j] < 0.0 { -quants[j] } else { quants[j] };
                symbol = symbol * range + (v + offset) as usize;
            }
            cost.bits += code_bits[symbol] as u32;

            for j in 0..chunk_in.len() {
                let t = chunk_in[j].abs();
                let q = quants[j];
                let quantized = if escape && q == 16 {
                    if t >= clipped_escape {
                        cost.bits += tables::ESCAPE_CLIPPED_BITS;
                        clipped_escape
                    } else {
                        let c = ((chunk_sc[j] * q34 + bias) as i32).min(tables::ESCAPE_MAX);
                        cost.bits += 2 * c.ilog2() - 3;
                        let cf = c as f32;
                        cf * cf.cbrt() * iq
                    }
                } else {
                    let qf = q as f32;
                    qf * qf.cbrt() * iq
                };
                if !signed && q != 0 {
                    cost.bits += 1;
                }
                let di = t - quantized;
                cost.distortion += di * di;
                cost.energy += quantized * quantized;
            }
        }
        cost
    }

    /// Quantize a band to signed integer amplitudes
    ///
    /// Magnitudes never exceed the codebook's range; the escape codebook
    /// saturates at 8191. Non-coding band types produce zeros.
    pub fn quantize(&self, input: &[f32], scaled: &[f32], sf: i32, cb: BandType, out: &mut [i32]) {
        let kind = cb.kind();
        if !kind.codes_coefficients() {
            out.iter_mut().for_each(|v| *v = 0);
            return;
        }
        let q34 = sf_q34(sf);
        let bias = self.rounding.bias();
        let limit = if kind == CodebookKind::Escape {
            tables::ESCAPE_MAX
        } else {
            cb.max_value() as i32
        };
        for ((o, &x), &s) in out.iter_mut().zip(input).zip(scaled) {
            let q = ((s * q34 + bias) as i32).min(limit);
            *o = if x < 0.0 { -q } else { q };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(values: &[f32]) -> (Vec<f32>, Vec<f32>) {
        (values.to_vec(), abs_pow34_vec(values))
    }

    #[test]
    fn test_step_ladder() {
        // sf 104 is the unit step
        assert!((sf_iq(104) - 1.0).abs() < 1e-6);
        assert!((sf_q34(104) - 1.0).abs() < 1e-6);
        assert!((sf_iq(108) - 2.0).abs() < 1e-5);
        assert!(sf_q34(120) < sf_q34(100));
    }

    #[test]
    fn test_zero_book_costs_energy() {
        let q = BandQuantizer::default();
        let (input, scaled) = band(&[1.0, -2.0, 3.0, 0.0]);
        let cost = q.cost(&input, &scaled, 100, BandType::ZERO);
        assert_eq!(cost.bits, 0);
        assert!((cost.distortion - 14.0).abs() < 1e-6);
        assert_eq!(cost.energy, 0.0);
        assert!((q.rd_cost(&input, &scaled, 100, BandType::NOISE, 2.0) - 28.0).abs() < 1e-5);
    }

    #[test]
    fn test_silent_band_costs_cheapest_symbol() {
        let q = BandQuantizer::default();
        let (input, scaled) = band(&[0.0; 8]);
        let cost = q.cost(&input, &scaled, 120, BandType::new(1).unwrap());
        // two all-zero quads of codebook 1 at one bit each
        assert_eq!(cost.bits, 2);
        assert_eq!(cost.distortion, 0.0);
    }

    #[test]
    fn test_exact_values_reconstruct() {
        let q = BandQuantizer::default();
        // at sf 104 the step is 1, so integer^(4/3) values reconstruct exactly
        let vals: Vec<f32> = [1.0f32, 2.0, -3.0, 0.0].iter().map(|v| v.signum() * v.abs().powf(4.0 / 3.0)).collect();
        let (input, scaled) = band(&vals);
        let cost = q.cost(&input, &scaled, 104, BandType::new(5).unwrap());
        assert!(cost.distortion < 1e-6, "distortion {}", cost.distortion);
        let mut out = [0i32; 4];
        q.quantize(&input, &scaled, 104, BandType::new(5).unwrap(), &mut out);
        assert_eq!(out, [1, 2, -3, 0]);
    }

    #[test]
    fn test_unsigned_books_add_sign_bits() {
        let q = BandQuantizer::default();
        let (input, scaled) = band(&[1.0, -1.0, 0.0, 0.0]);
        let unsigned = q.cost(&input, &scaled, 104, BandType::new(3).unwrap());
        let tab = tables::spectral_bits(3);
        // symbol (1,1,0,0) in a range-3 alphabet
        let symbol = 27 + 9;
        assert_eq!(unsigned.bits, tab[symbol] as u32 + 2);
    }

    #[test]
    fn test_escape_bits() {
        let q = BandQuantizer::default();
        let v = 40.0f32.powf(4.0 / 3.0);
        let (input, scaled) = band(&[v, 0.0]);
        let cost = q.cost(&input, &scaled, 104, BandType::ESCAPE);
        let tab = tables::spectral_bits(11);
        // escape symbol 16, one sign bit, and 2*log2(40) - 3 escape bits
        let expected = tab[16 * 17] as u32 + 1 + (2 * 5 - 3);
        assert_eq!(cost.bits, expected);
        let mut out = [0i32; 2];
        q.quantize(&input, &scaled, 104, BandType::ESCAPE, &mut out);
        assert_eq!(out, [40, 0]);
    }

    #[test]
    fn test_clipping_to_codebook_range() {
        let q = BandQuantizer::default();
        let (input, scaled) = band(&[100.0, -100.0, 0.0, 0.0]);
        let mut out = [0i32; 4];
        q.quantize(&input, &scaled, 104, BandType::new(1).unwrap(), &mut out);
        assert_eq!(out, [1, -1, 0, 0]);
    }

    #[test]
    fn test_find_min_book() {
        let scaled = |v: f32| v.powf(0.75);
        let nearest = Rounding::Nearest;
        assert_eq!(find_min_book(0.0, 104, nearest), BandType::ZERO);
        assert_eq!(find_min_book(scaled(1.0), 104, nearest), BandType::new(1).unwrap());
        assert_eq!(find_min_book(scaled(2.0f32.powf(4.0 / 3.0)), 104, nearest), BandType::new(3).unwrap());
        assert_eq!(find_min_book(6.0, 104, nearest), BandType::new(7).unwrap());
        assert_eq!(find_min_book(100.0, 104, nearest), BandType::ESCAPE);
        // coarser steps need smaller books
        assert!(find_min_book(100.0, 140, nearest) < find_min_book(100.0, 104, nearest));
    }

    #[test]
    fn test_min_book_follows_rounding() {
        // 1.7 rounds up to 2 but towards zero to 1
        let maxval = 1.7 / sf_q34(104);
        assert_eq!(find_min_book(maxval, 104, Rounding::Nearest), BandType::new(3).unwrap());
        assert_eq!(find_min_book(maxval, 104, Rounding::TowardZero), BandType::new(1).unwrap());

        // the chosen book holds every value the quantizer produces
        let q = BandQuantizer::new(Rounding::TowardZero);
        let input = [maxval.powf(4.0 / 3.0), 0.0, 0.0, 0.0];
        let scaled: Vec<f32> = input.iter().map(|v| v.powf(0.75)).collect();
        let mut out = [0i32; 4];
        q.quantize(&input, &scaled, 104, find_min_book(scaled[0], 104, Rounding::TowardZero), &mut out);
        assert_eq!(out[0], 1);
    }

    #[test]
    fn test_rounding_modes() {
        let (input, scaled) = band(&[0.7f32.powf(4.0 / 3.0), 0.0]);
        let mut out = [0i32; 2];
        BandQuantizer::new(Rounding::Nearest).quantize(&input, &scaled, 104, BandType::new(5).unwrap(), &mut out);
        assert_eq!(out[0], 1);
        BandQuantizer::new(Rounding::TowardZero).quantize(&input, &scaled, 104, BandType::new(5).unwrap(), &mut out);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn test_scalefactor_bounds() {
        let c = 1000.0f32;
        assert!(coef2minsf(c) < coef2maxsf(c));
        assert_eq!(coef2minsf(0.0), 0);
        // at the max bound the coefficient quantizes to zero or one
        let sf = coef2maxsf(c);
        assert!((c.powf(0.75) * sf_q34(sf)) < 2.0);
    }

    #[test]
    fn test_cost_is_stable() {
        let q = BandQuantizer::new(Rounding::TowardZero);
        let (input, scaled) = band(&[12.5, -3.25, 7.0, 0.5, -0.25, 44.0, 1.0, 2.0]);
        let a = q.cost(&input, &scaled, 110, BandType::new(9).unwrap());
        let b = q.cost(&input, &scaled, 110, BandType::new(9).unwrap());
        assert_eq!(a, b);
    }
}
