//! Lookup tables and constants for AAC spectral coding
//!
//! This module contains the static tables used by the coder core: band
//! partitions for every supported sample rate, per-codebook alphabet
//! parameters, entropy code lengths for the spectral and scalefactor codes,
//! the scalefactor power ladder, and the small parameter tables used by TNS,
//! long-term prediction and backward prediction.

use lazy_static::lazy_static;
use std::f64::consts::PI;

/// Sampling frequencies indexed by the AAC sampling frequency index
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Sampling frequency indices this coder accepts (8 kHz up to 48 kHz)
pub const SUPPORTED_RATE_INDICES: std::ops::RangeInclusive<usize> = 3..=11;

/// Look up the sampling frequency index for a supported sample rate
pub fn sample_rate_index(sample_rate: u32) -> Option<usize> {
    SAMPLE_RATES
        .iter()
        .position(|&sr| sr == sample_rate)
        .filter(|idx| SUPPORTED_RATE_INDICES.contains(idx))
}

#[rustfmt::skip]
const SWB_OFFSET_1024_48: [u16; 50] = [
      0,   4,   8,  12,  16,  20,  24,  28,  32,  36,  40,  48,  56,  64,  72,  80,
     88,  96, 108, 120, 132, 144, 160, 176, 196, 216, 240, 264, 292, 320, 352, 384,
    416, 448, 480, 512, 544, 576, 608, 640, 672, 704, 736, 768, 800, 832, 864, 896,
    928, 1024,
];

#[rustfmt::skip]
const SWB_OFFSET_1024_32: [u16; 52] = [
      0,   4,   8,  12,  16,  20,  24,  28,  32,  36,  40,  48,  56,  64,  72,  80,
     88,  96, 108, 120, 132, 144, 160, 176, 196, 216, 240, 264, 292, 320, 352, 384,
    416, 448, 480, 512, 544, 576, 608, 640, 672, 704, 736, 768, 800, 832, 864, 896,
    928, 960, 992, 1024,
];

#[rustfmt::skip]
const SWB_OFFSET_1024_24: [u16; 48] = [
      0,   4,   8,  12,  16,  20,  24,  28,  32,  36,  40,  44,  52,  60,  68,  76,
     84,  92, 100, 108, 116, 124, 136, 148, 160, 172, 188, 204, 220, 240, 260, 284,
    308, 336, 364, 396, 432, 468, 508, 552, 600, 652, 704, 768, 832, 896, 960, 1024,
];

#[rustfmt::skip]
const SWB_OFFSET_1024_16: [u16; 44] = [
      0,   8,  16,  24,  32,  40,  48,  56,  64,  72,  80,  88, 100, 112, 124, 136,
    148, 160, 172, 184, 196, 212, 228, 244, 260, 280, 300, 320, 344, 368, 396, 424,
    456, 492, 532, 572, 616, 664, 716, 772, 832, 896, 960, 1024,
];

#[rustfmt::skip]
const SWB_OFFSET_1024_8: [u16; 41] = [
      0,  12,  24,  36,  48,  60,  72,  84,  96, 108, 120, 132, 144, 156, 172, 188,
    204, 220, 236, 252, 268, 288, 308, 328, 348, 372, 396, 420, 448, 476, 508, 544,
    580, 620, 664, 712, 764, 820, 880, 944, 1024,
];

const SWB_OFFSET_128_48: [u16; 15] = [0, 4, 8, 12, 16, 20, 28, 36, 44, 56, 68, 80, 96, 112, 128];

const SWB_OFFSET_128_24: [u16; 16] = [0, 4, 8, 12, 16, 20, 24, 28, 36, 44, 52, 64, 76, 92, 108, 128];

const SWB_OFFSET_128_16: [u16; 16] = [0, 4, 8, 12, 16, 20, 24, 28, 32, 40, 48, 60, 72, 88, 108, 128];

const SWB_OFFSET_128_8: [u16; 16] = [0, 4, 8, 12, 16, 20, 24, 28, 36, 44, 52, 60, 72, 88, 108, 128];

/// Long-window band offsets for a sampling frequency index
pub fn swb_offsets_long(sr_index: usize) -> &'static [u16] {
    match sr_index {
        0..=1 | 3..=4 => &SWB_OFFSET_1024_48,
        5 => &SWB_OFFSET_1024_32,
        2 | 6..=7 => &SWB_OFFSET_1024_24,
        8..=10 => &SWB_OFFSET_1024_16,
        _ => &SWB_OFFSET_1024_8,
    }
}

/// Short-window band offsets for a sampling frequency index
pub fn swb_offsets_short(sr_index: usize) -> &'static [u16] {
    match sr_index {
        0..=5 => &SWB_OFFSET_128_48,
        6..=7 => &SWB_OFFSET_128_24,
        8..=10 => &SWB_OFFSET_128_16,
        _ => &SWB_OFFSET_128_8,
    }
}

/// Largest magnitude representable by each spectral codebook (escape book: 16 marks an escape)
pub const CB_MAXVAL: [u8; 12] = [0, 1, 1, 2, 2, 4, 4, 7, 7, 12, 12, 16];

/// Alphabet size per coefficient of each spectral codebook
pub const CB_RANGE: [u8; 12] = [0, 3, 3, 3, 3, 9, 9, 8, 8, 13, 13, 17];

/// Largest magnitude the escape mechanism can carry
pub const ESCAPE_MAX: i32 = 8191;

/// Code length of an escape sequence saturated at [`ESCAPE_MAX`]
pub const ESCAPE_CLIPPED_BITS: u32 = 21;

/// Run-length field width for long and short windows
pub const RUN_BITS_LONG: u32 = 5;
pub const RUN_BITS_SHORT: u32 = 3;

/// Codebook id field width in a section header
pub const SECTION_CB_BITS: u32 = 4;

// Spectral code lengths, indexed by the packed symbol of each codebook.
// Unsigned books do not include sign bits.

#[rustfmt::skip]
pub const CODEBOOK_1_BITS: [u8; 81] = [
    11,  9, 11, 10,  7, 10, 11,  9, 11,
    10,  7, 10,  7,  5,  7,  9,  7, 10,
    11,  9, 11,  9,  7,  9, 11,  9, 11,
     9,  7,  9,  7,  5,  7,  9,  7,  9,
     7,  5,  7,  5,  1,  5,  7,  5,  7,
     9,  7,  9,  7,  5,  7,  9,  7,  9,
    11,  9, 11,  9,  7,  9, 11,  9, 11,
    10,  7,  9,  7,  5,  7,  9,  7, 10,
    11,  9, 11, 10,  7,  9, 11,  9, 11,
];

#[rustfmt::skip]
pub const CODEBOOK_2_BITS: [u8; 81] = [
     9,  7,  9,  8,  6,  8,  9,  8,  9,
     8,  6,  7,  6,  5,  6,  7,  6,  8,
     9,  7,  8,  8,  6,  8,  9,  7,  9,
     8,  6,  7,  6,  5,  6,  7,  6,  8,
     6,  5,  6,  5,  3,  5,  6,  5,  6,
     8,  6,  7,  6,  5,  6,  8,  6,  8,
     9,  7,  9,  8,  6,  8,  8,  7,  9,
     8,  6,  7,  6,  4,  6,  8,  6,  7,
     9,  7,  9,  7,  6,  8,  9,  7,  9,
];

#[rustfmt::skip]
pub const CODEBOOK_3_BITS: [u8; 81] = [
     1,  4,  8,  4,  5,  8,  9,  9, 10,
     4,  6,  9,  6,  6,  9,  9,  9, 10,
     9, 10, 13,  9,  9, 11, 11, 10, 12,
     4,  6, 10,  6,  7, 10, 10, 10, 12,
     5,  7, 11,  6,  7, 10,  9,  9, 11,
     9, 10, 13,  8,  9, 12, 10, 11, 12,
     8, 10, 15,  9, 11, 15, 13, 14, 16,
     8, 10, 14,  9, 10, 14, 12, 12, 15,
    11, 12, 16, 10, 11, 15, 12, 12, 15,
];

#[rustfmt::skip]
pub const CODEBOOK_4_BITS: [u8; 81] = [
     4,  5,  8,  5,  4,  8,  9,  8, 11,
     5,  5,  8,  5,  4,  8,  8,  7, 10,
     9,  8, 11,  8,  8, 10, 11, 10, 11,
     4,  5,  8,  4,  4,  8,  8,  8, 10,
     4,  4,  8,  4,  4,  7,  8,  7,  9,
     8,  8, 10,  7,  7,  9, 10,  9, 10,
     8,  8, 11,  8,  7, 10, 11, 10, 12,
     8,  7, 10,  7,  7,  9, 10,  9, 11,
    11, 10, 12, 10,  9, 11, 11, 10, 11,
];

#[rustfmt::skip]
pub const CODEBOOK_5_BITS: [u8; 81] = [
    13, 12, 11, 11, 10, 11, 11, 12, 13,
    12, 11, 10,  9,  8,  9, 10, 11, 12,
    12, 10,  9,  8,  7,  8,  9, 10, 11,
    11,  9,  8,  5,  4,  5,  8,  9, 11,
    10,  8,  7,  4,  1,  4,  7,  8, 11,
    11,  9,  8,  5,  4,  5,  8,  9, 11,
    11, 10,  9,  8,  7,  8,  9, 10, 11,
    12, 11, 10,  9,  8,  9, 10, 11, 12,
    13, 12, 12, 11, 10, 10, 11, 12, 13,
];

#[rustfmt::skip]
pub const CODEBOOK_6_BITS: [u8; 81] = [
    11, 10,  9,  9,  9,  9,  9, 10, 11,
    10,  9,  8,  7,  7,  7,  8,  9, 10,
     9,  8,  6,  6,  6,  6,  6,  8,  9,
     9,  7,  6,  4,  4,  4,  6,  7,  9,
     9,  7,  6,  4,  4,  4,  6,  7,  9,
     9,  7,  6,  4,  4,  4,  6,  7,  9,
     9,  8,  6,  6,  6,  6,  6,  8,  9,
    10,  9,  8,  7,  7,  7,  7,  8, 10,
    11, 10,  9,  9,  9,  9,  9, 10, 11,
];

#[rustfmt::skip]
pub const CODEBOOK_7_BITS: [u8; 64] = [
     1,  3,  6,  7,  8,  9, 10, 11,
     3,  4,  6,  7,  8,  8,  9,  9,
     6,  6,  7,  8,  8,  9,  9, 10,
     7,  7,  8,  8,  9,  9, 10, 10,
     8,  8,  9,  9, 10, 10, 10, 11,
     9,  8,  9,  9, 10, 10, 11, 11,
    10,  9,  9, 10, 10, 11, 12, 12,
    11, 10, 10, 10, 11, 11, 12, 12,
];

#[rustfmt::skip]
pub const CODEBOOK_8_BITS: [u8; 64] = [
     5,  4,  5,  6,  7,  8,  9, 10,
     4,  3,  4,  5,  6,  7,  7,  8,
     5,  4,  4,  5,  6,  7,  7,  8,
     6,  5,  5,  6,  6,  7,  8,  8,
     7,  6,  6,  6,  7,  7,  8,  9,
     8,  7,  6,  7,  7,  8,  8, 10,
     9,  7,  7,  8,  8,  8,  9,  9,
    10,  8,  8,  8,  9,  9,  9, 10,
];

#[rustfmt::skip]
pub const CODEBOOK_9_BITS: [u8; 169] = [
     1,  3,  6,  8,  9, 10, 10, 11, 11, 12, 12, 13, 13,
     3,  4,  6,  7,  8,  8,  9, 10, 10, 10, 11, 12, 12,
     6,  6,  7,  8,  8,  9, 10, 10, 10, 11, 12, 12, 12,
     8,  7,  8,  9,  9, 10, 10, 11, 11, 11, 12, 12, 13,
     9,  8,  9,  9, 10, 10, 11, 11, 11, 12, 12, 12, 13,
    10,  9,  9, 10, 11, 11, 11, 12, 11, 12, 12, 13, 13,
    11,  9, 10, 11, 11, 11, 12, 12, 12, 12, 13, 13, 13,
    11, 10, 10, 11, 11, 12, 12, 13, 13, 13, 13, 13, 13,
    11, 10, 10, 11, 11, 11, 12, 12, 13, 13, 14, 13, 14,
    11, 10, 11, 11, 12, 12, 12, 12, 13, 13, 14, 14, 14,
    12, 11, 11, 12, 12, 12, 13, 13, 13, 14, 14, 14, 15,
    12, 11, 12, 12, 12, 13, 13, 13, 13, 14, 14, 15, 15,
    13, 12, 12, 12, 13, 13, 13, 13, 14, 14, 14, 14, 15,
];

#[rustfmt::skip]
pub const CODEBOOK_10_BITS: [u8; 169] = [
     6,  5,  6,  6,  7,  8,  9, 10, 10, 10, 11, 11, 12,
     5,  4,  4,  5,  6,  7,  7,  8,  8,  9, 10, 10, 11,
     6,  4,  5,  5,  6,  6,  7,  8,  8,  9,  9, 10, 10,
     6,  5,  5,  5,  6,  7,  7,  8,  8,  9,  9, 10, 10,
     7,  6,  6,  6,  6,  7,  7,  8,  8,  9,  9, 10, 10,
     8,  7,  6,  7,  7,  7,  8,  8,  8,  9, 10, 10, 11,
     9,  7,  7,  7,  7,  8,  8,  9,  9,  9, 10, 10, 11,
     9,  8,  8,  8,  8,  8,  9,  9,  9, 10, 10, 11, 11,
     9,  8,  8,  8,  8,  8,  9,  9, 10, 10, 10, 11, 11,
    10,  9,  9,  9,  9,  9,  9, 10, 10, 10, 11, 11, 12,
    10,  9,  9,  9,  9, 10, 10, 10, 10, 11, 11, 11, 12,
    11, 10,  9, 10, 10, 10, 10, 10, 11, 11, 11, 11, 12,
    11, 10, 10, 10, 10, 10, 10, 11, 11, 12, 12, 12, 12,
];

#[rustfmt::skip]
pub const CODEBOOK_11_BITS: [u8; 289] = [
     4,  5,  6,  7,  8,  8,  9, 10, 10, 10, 11, 11, 12, 11, 12, 12, 10,
     5,  4,  5,  6,  7,  7,  8,  8,  9,  9,  9, 10, 10, 10, 10, 11,  8,
     6,  5,  5,  6,  7,  7,  8,  8,  8,  9,  9,  9, 10, 10, 10, 10,  8,
     7,  6,  6,  6,  7,  7,  8,  8,  8,  9,  9,  9, 10, 10, 10, 10,  8,
     8,  7,  7,  7,  7,  8,  8,  8,  8,  9,  9,  9, 10, 10, 10, 10,  8,
     8,  7,  7,  7,  7,  8,  8,  8,  9,  9,  9,  9, 10, 10, 10, 10,  8,
     9,  8,  8,  8,  8,  8,  8,  8,  9,  9,  9, 10, 10, 10, 10, 10,  8,
     9,  8,  8,  8,  8,  8,  8,  9,  9,  9, 10, 10, 10, 10, 10, 10,  8,
    10,  9,  8,  8,  9,  9,  9,  9,  9, 10, 10, 10, 10, 10, 10, 11,  8,
    10,  9,  9,  9,  9,  9,  9,  9, 10, 10, 10, 10, 10, 10, 11, 11,  8,
    11,  9,  9,  9,  9,  9,  9, 10, 10, 10, 10, 10, 11, 10, 11, 11,  8,
    11, 10,  9,  9, 10,  9, 10, 10, 10, 10, 10, 11, 11, 11, 11, 11,  8,
    11, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 11, 11, 11, 11, 11,  9,
    11, 10,  9,  9, 10, 10, 10, 10, 10, 10, 11, 11, 11, 11, 11, 11,  9,
    11, 10, 10, 10, 10, 10, 10, 10, 10, 10, 11, 11, 11, 11, 11, 11,  9,
    12, 10, 10, 10, 10, 10, 10, 10, 11, 11, 11, 11, 11, 11, 12, 12,  9,
     9,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  9,  5,
];

/// Scalefactor delta code lengths, indexed by delta + 60
#[rustfmt::skip]
pub const SCALEFACTOR_BITS: [u8; 121] = [
    18, 18, 18, 18, 19, 19, 19, 19, 19, 19, 19,
    19, 19, 19, 19, 19, 19, 19, 19, 18, 19, 18,
    17, 17, 16, 17, 16, 16, 16, 16, 15, 15, 14,
    14, 14, 14, 14, 14, 13, 13, 12, 12, 12, 11,
    12, 11, 10, 10, 10,  9,  9,  8,  8,  8,  7,
     6,  6,  5,  4,  3,  1,  4,  4,  5,  6,  6,
     7,  7,  8,  8,  9,  9, 10, 10, 10, 11, 11,
    11, 11, 12, 12, 13, 13, 13, 14, 14, 16, 15,
    16, 15, 18, 19, 19, 19, 19, 19, 19, 19, 19,
    19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19,
    19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19,
];

/// Code length table of spectral codebook `cb` (1..=11)
pub fn spectral_bits(cb: usize) -> &'static [u8] {
    match cb {
        1 => &CODEBOOK_1_BITS,
        2 => &CODEBOOK_2_BITS,
        3 => &CODEBOOK_3_BITS,
        4 => &CODEBOOK_4_BITS,
        5 => &CODEBOOK_5_BITS,
        6 => &CODEBOOK_6_BITS,
        7 => &CODEBOOK_7_BITS,
        8 => &CODEBOOK_8_BITS,
        9 => &CODEBOOK_9_BITS,
        10 => &CODEBOOK_10_BITS,
        _ => &CODEBOOK_11_BITS,
    }
}

/// Offset of the zero difference in [`SCALEFACTOR_BITS`]
pub const SCALE_DIFF_ZERO: i32 = 60;

/// Exponent offset of index 0 in [`POW2SF`]
pub const POW_SF2_ZERO: i32 = 200;

lazy_static! {
    /// 2^((i - 200) / 4): the scalefactor power ladder
    pub static ref POW2SF: [f32; 428] = {
        let mut tab = [0.0f32; 428];
        for (i, v) in tab.iter_mut().enumerate() {
            *v = 2f64.powf((i as f64 - POW_SF2_ZERO as f64) / 4.0) as f32;
        }
        tab
    };

    /// 2^((i - 200) * 3 / 16): the ladder raised to the 3/4 power
    pub static ref POW34SF: [f32; 428] = {
        let mut tab = [0.0f32; 428];
        for (i, v) in tab.iter_mut().enumerate() {
            *v = 2f64.powf((i as f64 - POW_SF2_ZERO as f64) * 3.0 / 16.0) as f32;
        }
        tab
    };

    /// 4-bit TNS coefficient reconstruction values (indices 8..16 are negative)
    pub static ref TNS_COEF_4BIT: [f32; 16] = {
        let iqfac = (8.0 - 0.5) / (PI / 2.0);
        let iqfac_m = (8.0 + 0.5) / (PI / 2.0);
        let mut tab = [0.0f32; 16];
        for (i, v) in tab.iter_mut().enumerate() {
            let idx = if i < 8 { i as f64 } else { i as f64 - 16.0 };
            let fac = if idx >= 0.0 { iqfac } else { iqfac_m };
            *v = (idx / fac).sin() as f32;
        }
        tab
    };
}

/// Quantized long-term prediction gains
pub const LTP_COEF: [f32; 8] = [
    0.570829, 0.696616, 0.813004, 0.911304, 0.984900, 1.067894, 1.194601, 1.369533,
];

/// Highest band that may carry long-term prediction
pub const MAX_LTP_LONG_SFB: usize = 40;

/// Highest band (exclusive) covered by TNS, long then short windows, per sampling index
pub const TNS_MAX_BANDS_1024: [usize; 13] = [31, 31, 34, 40, 42, 51, 46, 46, 42, 42, 42, 39, 39];
pub const TNS_MAX_BANDS_128: [usize; 13] = [9, 9, 10, 14, 14, 14, 14, 14, 14, 14, 14, 14, 14];

/// First band TNS may start from, long then short windows, per sampling index
pub const TNS_MIN_SFB_LONG: [usize; 13] = [12, 13, 15, 16, 17, 20, 25, 26, 24, 28, 30, 31, 31];
pub const TNS_MIN_SFB_SHORT: [usize; 13] = [2, 2, 2, 3, 3, 4, 6, 6, 8, 10, 10, 12, 12];

/// Number of bands covered by backward prediction per sampling index
pub const PRED_SFB_MAX: [usize; 13] = [33, 33, 38, 40, 40, 40, 41, 41, 37, 37, 37, 34, 34];

/// Number of coefficients with a backward predictor
pub const MAX_PREDICTORS: usize = 672;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_index() {
        assert_eq!(sample_rate_index(44100), Some(4));
        assert_eq!(sample_rate_index(48000), Some(3));
        assert_eq!(sample_rate_index(8000), Some(11));
        assert_eq!(sample_rate_index(96000), None, "96 kHz is not supported");
        assert_eq!(sample_rate_index(44000), None);
    }

    #[test]
    fn test_band_tables_are_partitions() {
        for idx in SUPPORTED_RATE_INDICES {
            let long = swb_offsets_long(idx);
            assert_eq!(long[0], 0);
            assert_eq!(*long.last().unwrap(), 1024, "long table for index {}", idx);
            assert!(long.windows(2).all(|w| w[0] < w[1]));
            assert!(long.len() - 1 <= 51);

            let short = swb_offsets_short(idx);
            assert_eq!(short[0], 0);
            assert_eq!(*short.last().unwrap(), 128, "short table for index {}", idx);
            assert!(short.windows(2).all(|w| w[0] < w[1]));
            assert!(short.len() - 1 <= 15);
        }
    }

    #[test]
    fn test_spectral_tables_sizes() {
        for cb in 1..=11 {
            let range = CB_RANGE[cb] as usize;
            let dim = if cb < 5 { 4 } else { 2 };
            assert_eq!(spectral_bits(cb).len(), range.pow(dim), "codebook {}", cb);
        }
        // the all-zero quad is the cheapest symbol of codebook 1
        assert_eq!(CODEBOOK_1_BITS[40], 1);
        assert_eq!(SCALEFACTOR_BITS[SCALE_DIFF_ZERO as usize], 1);
    }

    #[test]
    fn test_power_ladder() {
        assert!((POW2SF[POW_SF2_ZERO as usize] - 1.0).abs() < 1e-6);
        assert!((POW2SF[POW_SF2_ZERO as usize + 4] - 2.0).abs() < 1e-6);
        assert!((POW34SF[POW_SF2_ZERO as usize + 16] - 8.0).abs() < 1e-5);
    }

    #[test]
    fn test_tns_table() {
        assert_eq!(TNS_COEF_4BIT[0], 0.0);
        assert!((TNS_COEF_4BIT[1] - 0.207_911_7).abs() < 1e-6);
        assert!((TNS_COEF_4BIT[8] + 0.995_734_2).abs() < 1e-6);
        assert!((TNS_COEF_4BIT[15] + 0.183_749_5).abs() < 1e-6);
    }
}
