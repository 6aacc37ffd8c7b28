//! Configuration for the AAC coder core
//!
//! This module provides the coder configuration, its builder-style setters
//! and the validation run once before any frame is processed.

use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};
use crate::quantization::Rounding;
use crate::tables;

/// Default number of two-loop refinement passes
pub const DEFAULT_OUTER_ITERATIONS: u32 = 30;

/// Upper bound accepted for the refinement pass cap
pub const MAX_OUTER_ITERATIONS: u32 = 1000;

/// Lambda at which bit targets are nominal
pub const NOMINAL_LAMBDA: f32 = 120.0;

/// Largest per-channel bit target of one frame
pub const MAX_CHANNEL_BITS: f32 = 5800.0;

/// Nominal per-channel bit target in quality mode
const QUALITY_CHANNEL_BITS: f32 = 1536.0;

/// Largest lambda accepted or reached by rate control
pub const MAX_LAMBDA: f32 = 65536.0;

/// Lowest cutoff chosen automatically
const MIN_AUTO_CUTOFF: u32 = 3000;

/// Scalefactor search algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub enum CoderVariant {
    /// Nested bit-budget and distortion loops
    #[default]
    TwoLoop,
    /// Viterbi search over scalefactor states
    Trellis,
    /// Scalefactors straight from the masking thresholds
    Fast,
}

impl FromStr for CoderVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twoloop" | "two-loop" => Ok(CoderVariant::TwoLoop),
            "anmr" | "trellis" => Ok(CoderVariant::Trellis),
            "fast" => Ok(CoderVariant::Fast),
            _ => Err(ConfigError::UnknownCoder(s.to_string())),
        }
    }
}

impl fmt::Display for CoderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoderVariant::TwoLoop => "twoloop",
            CoderVariant::Trellis => "trellis",
            CoderVariant::Fast => "fast",
        };
        f.write_str(name)
    }
}

/// How the bit budget is set
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub enum RateMode {
    /// Average bitrate over all channels, lambda adapted between frames
    Bitrate { bits_per_second: u32 },
    /// Fixed rate-distortion weight
    Quality { lambda: f32 },
}

impl Default for RateMode {
    fn default() -> Self {
        RateMode::Bitrate { bits_per_second: 128_000 }
    }
}

/// Optional coding tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct Extensions {
    pub noise_substitution: bool,
    pub tns: bool,
    pub ltp: bool,
    /// Backward-adaptive prediction
    pub prediction: bool,
    pub intensity_stereo: bool,
    pub mid_side: bool,
}

impl Extensions {
    /// Every optional tool off
    pub fn none() -> Self {
        Self {
            noise_substitution: false,
            tns: false,
            ltp: false,
            prediction: false,
            intensity_stereo: false,
            mid_side: false,
        }
    }
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            noise_substitution: true,
            tns: true,
            ltp: false,
            prediction: false,
            intensity_stereo: true,
            mid_side: true,
        }
    }
}

/// Coder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CoderConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channels sharing the bit budget
    pub channels: u8,
    pub variant: CoderVariant,
    pub rate: RateMode,
    pub rounding: Rounding,
    pub extensions: Extensions,
    /// Bandwidth in Hz; derived from the bitrate when unset
    pub cutoff_hz: Option<u32>,
    /// Cap on two-loop refinement passes
    pub outer_iterations: u32,
    /// Lowest band start frequency for mid/side coding
    pub ms_low_limit_hz: f32,
    /// Lowest band start frequency for intensity coding at nominal lambda
    pub is_low_limit_hz: f32,
}

impl CoderConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            variant: CoderVariant::default(),
            rate: RateMode::default(),
            rounding: Rounding::default(),
            extensions: Extensions::default(),
            cutoff_hz: None,
            outer_iterations: DEFAULT_OUTER_ITERATIONS,
            ms_low_limit_hz: 0.0,
            is_low_limit_hz: 6100.0,
        }
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn channels(mut self, channels: u8) -> Self {
        self.channels = channels;
        self
    }

    pub fn variant(mut self, variant: CoderVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn bitrate(mut self, bits_per_second: u32) -> Self {
        self.rate = RateMode::Bitrate { bits_per_second };
        self
    }

    pub fn quality(mut self, lambda: f32) -> Self {
        self.rate = RateMode::Quality { lambda };
        self
    }

    pub fn rounding(mut self, rounding: Rounding) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn cutoff(mut self, cutoff_hz: u32) -> Self {
        self.cutoff_hz = Some(cutoff_hz);
        self
    }

    pub fn outer_iterations(mut self, cap: u32) -> Self {
        self.outer_iterations = cap;
        self
    }

    pub fn ms_low_limit(mut self, hz: f32) -> Self {
        self.ms_low_limit_hz = hz;
        self
    }

    pub fn is_low_limit(mut self, hz: f32) -> Self {
        self.is_low_limit_hz = hz;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if tables::sample_rate_index(self.sample_rate).is_none() {
            return Err(ConfigError::UnsupportedSampleRate(self.sample_rate));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(ConfigError::InvalidChannels(self.channels));
        }
        match self.rate {
            RateMode::Bitrate { bits_per_second } => {
                // 6144 bits per channel per frame is the decoder buffer limit
                let max = 6144 * self.sample_rate / 1024 * self.channels as u32;
                if bits_per_second < 1000 || bits_per_second > max {
                    return Err(ConfigError::InvalidBitrate(bits_per_second));
                }
            }
            RateMode::Quality { lambda } => {
                if !lambda.is_finite() || lambda <= 0.0 || lambda > MAX_LAMBDA {
                    return Err(ConfigError::InvalidQuality(lambda));
                }
            }
        }
        if self.outer_iterations == 0 || self.outer_iterations > MAX_OUTER_ITERATIONS {
            return Err(ConfigError::InvalidIterationCap(self.outer_iterations));
        }
        Ok(())
    }

    /// Lambda of the first frame
    pub fn initial_lambda(&self) -> f32 {
        match self.rate {
            RateMode::Bitrate { .. } => NOMINAL_LAMBDA,
            RateMode::Quality { lambda } => lambda,
        }
    }

    /// Per-channel bit target of one frame at `lambda`
    pub fn channel_bits(&self, lambda: f32) -> u32 {
        let bits = match self.rate {
            RateMode::Bitrate { bits_per_second } => {
                bits_per_second as f32 * 1024.0 / self.sample_rate as f32 / self.channels as f32
                    * (lambda / NOMINAL_LAMBDA)
            }
            RateMode::Quality { lambda } => QUALITY_CHANNEL_BITS * lambda / NOMINAL_LAMBDA,
        };
        bits.clamp(1.0, MAX_CHANNEL_BITS) as u32
    }

    /// Bits per frame over all channels that rate control steers towards
    ///
    /// `None` in quality mode, where lambda never moves.
    pub fn frame_bits(&self) -> Option<u32> {
        match self.rate {
            RateMode::Bitrate { bits_per_second } => {
                let bits = bits_per_second as u64 * 1024 / self.sample_rate as u64;
                let limit = 6144 * self.channels as u64 - 3;
                Some(bits.min(limit) as u32)
            }
            RateMode::Quality { .. } => None,
        }
    }

    /// Effective bandwidth in Hz
    pub fn effective_cutoff(&self) -> u32 {
        if let Some(cutoff) = self.cutoff_hz {
            return cutoff.min(self.sample_rate / 2);
        }
        let bitrate = match self.rate {
            RateMode::Bitrate { bits_per_second } => bits_per_second,
            RateMode::Quality { lambda } => {
                let bits = self.channel_bits(lambda) as u64 * self.sample_rate as u64 / 1024;
                (bits * self.channels as u64).min(u32::MAX as u64) as u32
            }
        };
        cutoff_from_bitrate(bitrate, self.channels as u32, self.sample_rate).max(MIN_AUTO_CUTOFF)
    }
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Bandwidth that a bitrate can afford
fn cutoff_from_bitrate(bitrate: u32, channels: u32, sample_rate: u32) -> u32 {
    if bitrate == 0 {
        return sample_rate / 2;
    }
    let per_channel = bitrate / channels.max(1);
    let cutoff = (per_channel / 5)
        .max((per_channel * 15 / 32).saturating_sub(5500))
        .min(3000 + per_channel / 4)
        .min(12000 + per_channel / 16)
        .min(22000);
    cutoff.min(sample_rate / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.outer_iterations, DEFAULT_OUTER_ITERATIONS);
        assert_eq!(config.initial_lambda(), NOMINAL_LAMBDA);
    }

    #[test]
    fn test_builder() {
        let config = CoderConfig::new()
            .sample_rate(48000)
            .channels(1)
            .variant(CoderVariant::Trellis)
            .quality(80.0)
            .rounding(Rounding::TowardZero)
            .cutoff(15000);
        assert!(config.validate().is_ok());
        assert_eq!(config.variant, CoderVariant::Trellis);
        assert_eq!(config.initial_lambda(), 80.0);
        assert_eq!(config.effective_cutoff(), 15000);
    }

    #[test]
    fn test_invalid_sample_rate() {
        let config = CoderConfig::new().sample_rate(44000);
        assert_eq!(config.validate(), Err(ConfigError::UnsupportedSampleRate(44000)));
        // rates above 48 kHz are not handled by this core
        assert!(CoderConfig::new().sample_rate(96000).validate().is_err());
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            CoderConfig::new().channels(0).validate(),
            Err(ConfigError::InvalidChannels(0))
        );
        assert_eq!(
            CoderConfig::new().bitrate(10_000_000).validate(),
            Err(ConfigError::InvalidBitrate(10_000_000))
        );
        assert!(CoderConfig::new().quality(f32::NAN).validate().is_err());
        assert!(CoderConfig::new().quality(-1.0).validate().is_err());
        assert_eq!(
            CoderConfig::new().outer_iterations(0).validate(),
            Err(ConfigError::InvalidIterationCap(0))
        );
    }

    #[test]
    fn test_variant_names() {
        assert_eq!("twoloop".parse::<CoderVariant>(), Ok(CoderVariant::TwoLoop));
        assert_eq!("ANMR".parse::<CoderVariant>(), Ok(CoderVariant::Trellis));
        assert_eq!("trellis".parse::<CoderVariant>(), Ok(CoderVariant::Trellis));
        assert_eq!("fast".parse::<CoderVariant>(), Ok(CoderVariant::Fast));
        assert_eq!(
            "faac".parse::<CoderVariant>(),
            Err(ConfigError::UnknownCoder("faac".to_string()))
        );
        assert_eq!(CoderVariant::Trellis.to_string(), "trellis");
    }

    #[test]
    fn test_channel_bits() {
        let config = CoderConfig::new().sample_rate(44100).channels(2).bitrate(128_000);
        let bits = config.channel_bits(NOMINAL_LAMBDA);
        assert_eq!(bits, (128_000.0f32 * 1024.0 / 44100.0 / 2.0) as u32);
        assert!(config.channel_bits(NOMINAL_LAMBDA * 2.0) > bits);
        assert_eq!(config.channel_bits(MAX_LAMBDA), MAX_CHANNEL_BITS as u32);

        let quality = CoderConfig::new().quality(NOMINAL_LAMBDA);
        assert_eq!(quality.channel_bits(NOMINAL_LAMBDA), 1536);
    }

    #[test]
    fn test_frame_bits() {
        let config = CoderConfig::new().sample_rate(48000).channels(2).bitrate(96_000);
        assert_eq!(config.frame_bits(), Some(2048));
        let capped = CoderConfig::new().sample_rate(8000).channels(1).bitrate(48_000);
        assert_eq!(capped.frame_bits(), Some(6141));
        assert_eq!(CoderConfig::new().quality(100.0).frame_bits(), None);
    }

    #[test]
    fn test_cutoff_grows_with_bitrate() {
        let low = CoderConfig::new().bitrate(32_000).effective_cutoff();
        let high = CoderConfig::new().bitrate(256_000).effective_cutoff();
        assert!(low >= MIN_AUTO_CUTOFF);
        assert!(high > low);
        assert!(high <= 22050);
        assert_eq!(CoderConfig::new().sample_rate(8000).cutoff(20000).effective_cutoff(), 4000);
    }
}
