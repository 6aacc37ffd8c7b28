//! Error types for the AAC coder core
//!
//! Errors only surface at setup (configuration and window layout) or at the
//! per-frame input boundary. Once inputs are accepted every search stage is
//! infallible and always yields a usable, if suboptimal, result.

use thiserror::Error;

/// Main error type for the coder
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input data validation errors
    #[error("Input data error: {0}")]
    InputData(#[from] InputDataError),
}

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Unsupported sample rate
    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    /// Unknown coder variant name
    #[error("Unknown coder variant: {0:?}")]
    UnknownCoder(String),

    /// Invalid channel count
    #[error("Invalid channel count: {0}")]
    InvalidChannels(u8),

    /// Bitrate outside of the usable range
    #[error("Invalid bitrate: {0} bps")]
    InvalidBitrate(u32),

    /// Quality (lambda) outside of the usable range
    #[error("Invalid quality value: {0}")]
    InvalidQuality(f32),

    /// Iteration cap of zero or beyond the hard limit
    #[error("Invalid iteration cap: {0}")]
    InvalidIterationCap(u32),

    /// Short window grouping that does not cover eight windows
    #[error("Invalid window grouping: {0:?}")]
    InvalidGrouping(Vec<u8>),

    /// Band layout larger than the fixed maximum
    #[error("Too many bands: {count} (maximum {max})")]
    TooManyBands { count: usize, max: usize },
}

/// Input data validation errors
#[derive(Debug, Error, PartialEq)]
pub enum InputDataError {
    /// Spectral block of the wrong size
    #[error("Invalid coefficient count: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Time-domain window for long-term prediction of the wrong size
    #[error("Invalid time-domain sample count: expected {expected}, got {actual}")]
    InvalidTimeLength { expected: usize, actual: usize },

    /// Block contains NaN or infinite values
    #[error("Input contains non-finite samples")]
    NonFiniteSamples,

    /// Window layout built for a different sample rate than the encoder's
    #[error("Window layout does not match the encoder sample rate")]
    WindowMismatch,
}

/// Specialized result types for different modules
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type InputResult<T> = std::result::Result<T, InputDataError>;
pub type EncoderResult<T> = std::result::Result<T, EncoderError>;
