//! Core data types for the AAC coder
//!
//! This module defines the window layouts, band types and per-channel
//! working records that every coding stage reads and writes. Band slots
//! follow the `window * 16 + band` convention, giving 128 slots per channel.

use std::ops::Range;

use crate::error::{ConfigError, ConfigResult};
use crate::ltp::LtpInfo;
use crate::prediction::PredictionInfo;
use crate::tables;
use crate::tns::TnsInfo;

/// Coefficients per channel per frame
pub const BLOCK_LEN: usize = 1024;

/// Coefficients per short window
pub const SHORT_WINDOW_LEN: usize = 128;

/// Windows in an eight-short block
pub const MAX_WINDOWS: usize = 8;

/// Band slot stride between windows
pub const BAND_STRIDE: usize = 16;

/// Band slots per channel
pub const MAX_BANDS: usize = 128;

/// Scalefactor index at which the quantizer step is unity
pub const SCALE_ONE_POS: i32 = 140;

/// Offset between the scalefactor and power-ladder origins
pub const SCALE_DIV_512: i32 = 36;

/// Largest scalefactor index
pub const SCALE_MAX_POS: i32 = 255;

/// Largest legal difference between consecutive coded scalefactors
pub const SCALE_MAX_DIFF: i32 = 60;

/// Window sequence chosen by the upstream transient detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub enum WindowSequence {
    /// One long window
    OnlyLong,
    /// Long window leading into short windows
    LongStart,
    /// Eight short windows
    EightShort,
    /// Long window following short windows
    LongStop,
}

impl WindowSequence {
    /// Whether this sequence carries eight short windows
    pub fn is_short(self) -> bool {
        self == WindowSequence::EightShort
    }
}

/// Band layout of one channel's block
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct WindowInfo {
    sequence: WindowSequence,
    sample_rate: u32,
    sr_index: usize,
    num_windows: usize,
    group_len: Vec<usize>,
    swb_offset: &'static [u16],
    max_sfb: usize,
}

impl WindowInfo {
    /// Create a long-window layout
    pub fn long(sample_rate: u32) -> ConfigResult<Self> {
        Self::new(sample_rate, WindowSequence::OnlyLong, &[])
    }

    /// Create an eight-short layout with the given window grouping
    pub fn eight_short(sample_rate: u32, grouping: &[u8]) -> ConfigResult<Self> {
        Self::new(sample_rate, WindowSequence::EightShort, grouping)
    }

    /// Create a layout for any window sequence
    ///
    /// `grouping` lists the number of windows in each group and must sum to
    /// eight for short blocks. Long blocks ignore it unless it is non-empty,
    /// in which case it must be `[1]`.
    pub fn new(sample_rate: u32, sequence: WindowSequence, grouping: &[u8]) -> ConfigResult<Self> {
        let sr_index = tables::sample_rate_index(sample_rate)
            .ok_or(ConfigError::UnsupportedSampleRate(sample_rate))?;

        let (num_windows, swb_offset, group_len) = if sequence.is_short() {
            let total: u32 = grouping.iter().map(|&g| g as u32).sum();
            if grouping.is_empty() || total != MAX_WINDOWS as u32 || grouping.contains(&0) {
                return Err(ConfigError::InvalidGrouping(grouping.to_vec()));
            }
            let offsets = tables::swb_offsets_short(sr_index);
            (MAX_WINDOWS, offsets, grouping.iter().map(|&g| g as usize).collect())
        } else {
            if !grouping.is_empty() && grouping != [1] {
                return Err(ConfigError::InvalidGrouping(grouping.to_vec()));
            }
            (1, tables::swb_offsets_long(sr_index), vec![1])
        };

        let num_swb = swb_offset.len() - 1;
        let limit = if num_windows == 1 { MAX_BANDS } else { BAND_STRIDE };
        if num_swb > limit {
            return Err(ConfigError::TooManyBands { count: num_swb, max: limit });
        }

        Ok(Self {
            sequence,
            sample_rate,
            sr_index,
            num_windows,
            group_len,
            swb_offset,
            max_sfb: num_swb,
        })
    }

    pub fn sequence(&self) -> WindowSequence {
        self.sequence
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sampling frequency index into the per-rate tables
    pub fn sr_index(&self) -> usize {
        self.sr_index
    }

    pub fn num_windows(&self) -> usize {
        self.num_windows
    }

    pub fn is_short(&self) -> bool {
        self.sequence.is_short()
    }

    /// Coefficients per window
    pub fn window_len(&self) -> usize {
        BLOCK_LEN / self.num_windows
    }

    /// Number of bands in the layout
    pub fn num_swb(&self) -> usize {
        self.swb_offset.len() - 1
    }

    /// Number of coded bands; bands at or above this index are always zero
    pub fn max_sfb(&self) -> usize {
        self.max_sfb
    }

    pub fn swb_offset(&self) -> &'static [u16] {
        self.swb_offset
    }

    /// Window group lengths in order
    pub fn group_lengths(&self) -> &[usize] {
        &self.group_len
    }

    /// Iterate over `(first_window, group_len)` of every window group
    pub fn groups(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.group_len.iter().scan(0usize, |first, &len| {
            let start = *first;
            *first += len;
            Some((start, len))
        })
    }

    /// Width in coefficients of band `g`
    pub fn band_width(&self, g: usize) -> usize {
        (self.swb_offset[g + 1] - self.swb_offset[g]) as usize
    }

    /// Coefficient range of band `g` in window `w`
    pub fn band_range(&self, w: usize, g: usize) -> Range<usize> {
        let base = w * SHORT_WINDOW_LEN;
        base + self.swb_offset[g] as usize..base + self.swb_offset[g + 1] as usize
    }

    /// Lowest frequency in Hz of band `g`
    pub fn band_start_hz(&self, g: usize) -> f32 {
        self.swb_offset[g] as f32 * self.sample_rate as f32 * 0.5 / self.window_len() as f32
    }

    /// Limit the coded bands to those starting below `cutoff_hz`
    pub fn limit_bandwidth(&mut self, cutoff_hz: u32) {
        let num_swb = self.num_swb();
        self.max_sfb = (0..num_swb)
            .find(|&g| self.band_start_hz(g) >= cutoff_hz as f32)
            .unwrap_or(num_swb);
    }

    /// Set the number of coded bands directly
    pub fn set_max_sfb(&mut self, max_sfb: usize) {
        self.max_sfb = max_sfb.min(self.num_swb());
    }
}

/// Coding class of a band (the AAC band type, 0..=15)
///
/// Ids 1..=11 are spectral codebooks, 0 is the zero band, 12 is reserved,
/// 13 marks noise substitution and 14/15 mark intensity stereo with the two
/// phase classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct BandType(u8);

impl BandType {
    pub const ZERO: Self = Self(0);
    pub const ESCAPE: Self = Self(11);
    pub const RESERVED: Self = Self(12);
    pub const NOISE: Self = Self(13);
    /// Intensity stereo, out-of-phase class
    pub const INTENSITY2: Self = Self(14);
    /// Intensity stereo, in-phase class
    pub const INTENSITY: Self = Self(15);

    /// Band type from its numeric id
    pub const fn new(id: u8) -> Option<Self> {
        if id <= 15 {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Spectral codebook (0..=11) from an index known to be in range
    pub(crate) const fn spectral(id: usize) -> Self {
        debug_assert!(id <= 11);
        Self(id as u8)
    }

    pub const fn id(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Zero band or one of the eleven spectral codebooks
    pub const fn is_spectral(self) -> bool {
        self.0 < Self::RESERVED.0
    }

    pub const fn is_intensity(self) -> bool {
        self.0 == Self::INTENSITY.0 || self.0 == Self::INTENSITY2.0
    }

    pub const fn is_noise(self) -> bool {
        self.0 == Self::NOISE.0
    }

    /// Largest representable quantized magnitude (0 for non-spectral types)
    pub fn max_value(self) -> u8 {
        if self.is_spectral() {
            tables::CB_MAXVAL[self.index()]
        } else {
            0
        }
    }

    /// Numeric kernel class of this band type
    pub fn kind(self) -> CodebookKind {
        match self.0 {
            0 => CodebookKind::Zero,
            1 | 2 => CodebookKind::SignedQuad,
            3 | 4 => CodebookKind::UnsignedQuad,
            5 | 6 => CodebookKind::SignedPair,
            7..=10 => CodebookKind::UnsignedPair,
            11 => CodebookKind::Escape,
            12 => CodebookKind::Reserved,
            13 => CodebookKind::Noise,
            _ => CodebookKind::Intensity,
        }
    }
}

/// Closed set of quantizer kernels, one per codebook class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodebookKind {
    Zero,
    SignedQuad,
    UnsignedQuad,
    SignedPair,
    UnsignedPair,
    Escape,
    Reserved,
    Noise,
    Intensity,
}

impl CodebookKind {
    /// Coefficients per entropy symbol
    pub fn dimension(self) -> usize {
        match self {
            CodebookKind::SignedQuad | CodebookKind::UnsignedQuad => 4,
            _ => 2,
        }
    }

    /// Whether the sign is part of the symbol (otherwise sent as raw bits)
    pub fn is_signed(self) -> bool {
        matches!(self, CodebookKind::SignedQuad | CodebookKind::SignedPair)
    }

    /// Whether this kind codes coefficients at all
    pub fn codes_coefficients(self) -> bool {
        !matches!(
            self,
            CodebookKind::Zero | CodebookKind::Reserved | CodebookKind::Noise | CodebookKind::Intensity
        )
    }
}

/// Psychoacoustic analysis of one band slot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct PsyBand {
    /// Sum of squared coefficients
    pub energy: f32,
    /// Masking threshold on the same scale as `energy`
    pub threshold: f32,
    /// Spectral flatness: 0 for a pure tone, about 2 for a flat band
    pub spread: f32,
}

/// Working record of one channel through a frame
#[derive(Debug, Clone)]
pub struct ChannelData {
    pub window: WindowInfo,
    /// Coefficients being coded (the residual after any shaping stage)
    pub coeffs: Vec<f32>,
    /// Coefficients as received, before shaping or joint coding
    pub pcoeffs: Vec<f32>,
    pub sf_idx: [i32; MAX_BANDS],
    pub band_type: [BandType; MAX_BANDS],
    /// Previous band type, kept by stages that may revert a choice
    pub band_alt: [BandType; MAX_BANDS],
    pub zeroes: [bool; MAX_BANDS],
    pub can_pns: [bool; MAX_BANDS],
    pub pns_ener: [f32; MAX_BANDS],
    pub is_ener: [f32; MAX_BANDS],
    pub tns: TnsInfo,
    pub ltp: LtpInfo,
    pub prediction: PredictionInfo,
}

impl ChannelData {
    /// Start a frame from the received coefficients
    pub fn new(window: WindowInfo, coeffs: &[f32]) -> Self {
        Self {
            window,
            coeffs: coeffs.to_vec(),
            pcoeffs: coeffs.to_vec(),
            sf_idx: [0; MAX_BANDS],
            band_type: [BandType::ZERO; MAX_BANDS],
            band_alt: [BandType::ZERO; MAX_BANDS],
            zeroes: [true; MAX_BANDS],
            can_pns: [false; MAX_BANDS],
            pns_ener: [0.0; MAX_BANDS],
            is_ener: [0.0; MAX_BANDS],
            tns: TnsInfo::default(),
            ltp: LtpInfo::default(),
            prediction: PredictionInfo::default(),
        }
    }

    /// Whether band slot `b` takes part in the scalefactor delta chain
    pub fn in_sf_chain(&self, b: usize) -> bool {
        !self.zeroes[b] && self.band_type[b].is_spectral()
    }

    /// Copy the group leader's decisions to every window of each group
    pub fn sync_groups(&mut self) {
        let groups: Vec<(usize, usize)> = self.window.groups().collect();
        for (w, len) in groups {
            for g in 0..self.window.num_swb() {
                let lead = w * BAND_STRIDE + g;
                for w2 in 1..len {
                    let b = (w + w2) * BAND_STRIDE + g;
                    self.sf_idx[b] = self.sf_idx[lead];
                    self.band_type[b] = self.band_type[lead];
                    self.zeroes[b] = self.zeroes[lead];
                    self.pns_ener[b] = self.pns_ener[lead];
                    self.is_ener[b] = self.is_ener[lead];
                }
            }
        }
    }

    /// Mark the whole window group starting at `w` as zero in band `g`
    pub fn zero_band(&mut self, w: usize, group_len: usize, g: usize) {
        for w2 in 0..group_len {
            let b = (w + w2) * BAND_STRIDE + g;
            self.zeroes[b] = true;
            self.band_type[b] = BandType::ZERO;
        }
    }
}

/// Two channels that may be coded jointly
#[derive(Debug, Clone)]
pub struct ChannelPair {
    pub ch: [ChannelData; 2],
    /// Per band: mid/side coding
    pub ms_mask: [bool; MAX_BANDS],
    /// Per band: intensity coding
    pub is_mask: [bool; MAX_BANDS],
    pub ms_mode: bool,
    pub is_mode: bool,
    /// Both channels share a window layout, which joint coding requires
    pub common_window: bool,
}

impl ChannelPair {
    pub fn new(left: ChannelData, right: ChannelData) -> Self {
        let common_window = left.window == right.window;
        Self {
            ch: [left, right],
            ms_mask: [false; MAX_BANDS],
            is_mask: [false; MAX_BANDS],
            ms_mode: false,
            is_mode: false,
            common_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_layout() {
        let info = WindowInfo::long(44100).unwrap();
        assert_eq!(info.num_windows(), 1);
        assert_eq!(info.num_swb(), 49);
        assert_eq!(info.max_sfb(), 49);
        assert_eq!(info.groups().collect::<Vec<_>>(), vec![(0, 1)]);
        assert_eq!(info.band_range(0, 48), 928..1024);
    }

    #[test]
    fn test_short_layout_groups() {
        let info = WindowInfo::eight_short(48000, &[3, 1, 4]).unwrap();
        assert_eq!(info.num_windows(), 8);
        assert_eq!(info.num_swb(), 14);
        assert_eq!(info.groups().collect::<Vec<_>>(), vec![(0, 3), (3, 1), (4, 4)]);
        assert_eq!(info.band_range(2, 0), 256..260);
    }

    #[test]
    fn test_invalid_layouts() {
        assert_eq!(
            WindowInfo::long(44000).unwrap_err(),
            ConfigError::UnsupportedSampleRate(44000)
        );
        assert!(matches!(
            WindowInfo::eight_short(44100, &[3, 3]),
            Err(ConfigError::InvalidGrouping(_))
        ));
        assert!(WindowInfo::eight_short(44100, &[4, 0, 4]).is_err());
        assert!(WindowInfo::new(44100, WindowSequence::OnlyLong, &[2]).is_err());
    }

    #[test]
    fn test_bandwidth_limit() {
        let mut info = WindowInfo::long(44100).unwrap();
        info.limit_bandwidth(16000);
        let g = info.max_sfb();
        assert!(g < info.num_swb());
        assert!(info.band_start_hz(g) >= 16000.0);
        assert!(info.band_start_hz(g - 1) < 16000.0);
    }

    #[test]
    fn test_band_type_kinds() {
        assert_eq!(BandType::ZERO.kind(), CodebookKind::Zero);
        assert_eq!(BandType::new(2).unwrap().kind(), CodebookKind::SignedQuad);
        assert_eq!(BandType::new(9).unwrap().kind(), CodebookKind::UnsignedPair);
        assert_eq!(BandType::ESCAPE.kind(), CodebookKind::Escape);
        assert_eq!(BandType::INTENSITY2.kind(), CodebookKind::Intensity);
        assert!(BandType::new(16).is_none());
        assert!(BandType::ESCAPE.is_spectral());
        assert!(!BandType::NOISE.is_spectral());
        assert_eq!(BandType::new(7).unwrap().max_value(), 7);
    }
}
