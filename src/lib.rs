//! # AAC Coder Core
//!
//! The spectral quantization and rate-distortion engine of an AAC encoder:
//! psychoacoustic thresholds, scalefactor search (two-loop, trellis and
//! fast variants), codebook sectioning, stereo decisions and the optional
//! spectral shaping tools (TNS, long-term and backward prediction).
//! Input is one frame of MDCT coefficients per channel; output is the
//! quantized spectrum with every side decision needed to write it.
//!

pub mod band_info;
pub mod config;
pub mod cost_cache;
pub mod encoder;
pub mod error;
pub mod lpc;
pub mod ltp;
pub mod mdct;
pub mod pns;
pub mod prediction;
pub mod psy;
pub mod quantization;
pub mod search;
pub mod state;
pub mod stereo;
pub mod tables;
pub mod tns;
pub mod trellis;
pub mod twoloop;
pub mod types;

#[cfg(feature = "diagnostics")]
pub mod diagnostics;

#[cfg(feature = "diagnostics")]
pub use diagnostics::{ElementReport, FrameReport};

// Re-export high-level interface (recommended for most users)
pub use config::{CoderConfig, CoderVariant, Extensions, RateMode};
pub use encoder::{BandDecision, ChannelContext, ChannelOutput, FrameInput, PairOutput, SpectralEncoder};
pub use quantization::Rounding;
pub use types::{BandType, WindowInfo, WindowSequence};

// Re-export building blocks (for advanced users)
pub use band_info::{BandInfoEncoder, GroupSections, Section, SectionMode};
pub use cost_cache::{CostCache, CostKey};
pub use psy::{PsyState, PsychoacousticModel};
pub use quantization::{BandCost, BandQuantizer};
pub use search::{searcher, ScalefactorSearch, SearchContext, SearchReport};
pub use types::{ChannelData, ChannelPair, PsyBand};

pub use error::{ConfigError, ConfigResult, EncoderError, EncoderResult, InputDataError, InputResult};
