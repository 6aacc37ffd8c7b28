//! Psychoacoustic threshold model
//!
//! Per band: integrate coefficient energy, derive a raw masking threshold,
//! spread it across neighbouring bands with asymmetric slopes on the Bark
//! scale, floor it at the absolute threshold of hearing and limit how fast it
//! may rise relative to the previous frame. Also estimates spectral flatness,
//! which the noise substitution stages consume.

use crate::error::{ConfigError, ConfigResult};
use crate::tables;
use crate::types::{PsyBand, WindowInfo, WindowSequence, BAND_STRIDE, MAX_BANDS};

/// Energy to threshold ratio (-29 dB)
const THR_RATIO: f32 = 0.001258925;

/// Slope of low-to-high threshold spreading, in units of 10 dB per Bark
const THR_SPREAD_HI: f32 = 1.5;

/// Slope of high-to-low threshold spreading
const THR_SPREAD_LOW: f32 = 3.0;

/// Lower bound of the pre-echo limited threshold, relative to the raw threshold
const PRE_ECHO_MIN: f32 = 0.01;

/// Maximum threshold rise relative to the previous frame
const PRE_ECHO_LEVEL: f32 = 2.0;

/// Extra high-frequency attenuation of the hearing threshold curve
const ATH_ADD: f32 = 4.0;

/// Absolute threshold of hearing in dB SPL at `freq` Hz
fn ath(freq: f32, add: f32) -> f32 {
    let f = freq.max(10.0) * 0.001;
    3.64 * f.powf(-0.8) - 6.8 * (-0.6 * (f - 3.4) * (f - 3.4)).exp()
        + 6.0 * (-0.15 * (f - 8.7) * (f - 8.7)).exp()
        + (0.6 + 0.04 * add) * 0.001 * f * f * f * f
}

/// Critical band rate of `freq` Hz
fn bark(freq: f32) -> f32 {
    13.0 * (0.00076 * freq).atan() + 3.5 * (freq / 7500.0 * (freq / 7500.0)).atan()
}

#[derive(Debug, Clone, Copy, Default)]
struct BandCoeffs {
    /// Hearing threshold as band energy
    ath: f32,
    /// Spreading factor from this band into the one below
    spread_low: f32,
    /// Spreading factor from the band below into this one
    spread_hi: f32,
}

#[derive(Debug, Clone)]
struct LayoutCoeffs {
    bands: Vec<BandCoeffs>,
}

impl LayoutCoeffs {
    fn new(sample_rate: u32, offsets: &[u16], window_len: usize) -> Self {
        let num_bands = offsets.len() - 1;
        let line_to_freq = sample_rate as f32 * 0.5 / window_len as f32;
        let minath = ath(3410.0 - 0.733 * ATH_ADD, ATH_ADD);

        let mut barks = Vec::with_capacity(num_bands);
        let mut prev = 0.0;
        for g in 0..num_bands {
            let b = bark((offsets[g + 1] as f32 - 1.0) * line_to_freq);
            barks.push((b + prev) * 0.5);
            prev = b;
        }

        let mut bands = vec![BandCoeffs::default(); num_bands];
        for g in 0..num_bands {
            let start = offsets[g] as usize;
            let end = offsets[g + 1] as usize;
            let min_db = (start..end)
                .map(|i| ath(i as f32 * line_to_freq, ATH_ADD))
                .fold(f32::INFINITY, f32::min);
            bands[g].ath = (end - start) as f32 * 10f32.powf((min_db - minath) * 0.1);
            if g > 0 {
                let width = barks[g] - barks[g - 1];
                bands[g].spread_hi = 10f32.powf(-width * THR_SPREAD_HI);
                bands[g - 1].spread_low = 10f32.powf(-width * THR_SPREAD_LOW);
            }
        }
        Self { bands }
    }
}

/// Threshold history carried between frames of one channel
#[derive(Debug, Clone)]
pub struct PsyState {
    prev_thr_quiet: [f32; MAX_BANDS],
    prev_windows: Option<usize>,
}

impl PsyState {
    pub fn new() -> Self {
        Self {
            prev_thr_quiet: [0.0; MAX_BANDS],
            prev_windows: None,
        }
    }

    /// Forget the history, as after a seek
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for PsyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Masking threshold model for one sample rate
#[derive(Debug, Clone)]
pub struct PsychoacousticModel {
    sample_rate: u32,
    long: LayoutCoeffs,
    short: LayoutCoeffs,
}

impl PsychoacousticModel {
    pub fn new(sample_rate: u32) -> ConfigResult<Self> {
        let sr_index =
            tables::sample_rate_index(sample_rate).ok_or(ConfigError::UnsupportedSampleRate(sample_rate))?;
        Ok(Self {
            sample_rate,
            long: LayoutCoeffs::new(sample_rate, tables::swb_offsets_long(sr_index), 1024),
            short: LayoutCoeffs::new(sample_rate, tables::swb_offsets_short(sr_index), 128),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Analyze one block; returns a record for every band slot
    ///
    /// Slots outside the layout are left at zero energy and zero threshold.
    pub fn analyze(&self, coeffs: &[f32], window: &WindowInfo, state: &mut PsyState) -> Vec<PsyBand> {
        let layout = if window.is_short() { &self.short } else { &self.long };
        let num_swb = window.num_swb();
        let mut out = vec![PsyBand::default(); MAX_BANDS];
        let mut thr_quiet = [0.0f32; MAX_BANDS];

        let pre_echo = state.prev_windows == Some(window.num_windows())
            && !window.is_short()
            && window.sequence() != WindowSequence::LongStop;

        for w in 0..window.num_windows() {
            let bands = &mut out[w * BAND_STRIDE..];
            for g in 0..num_swb {
                let range = window.band_range(w, g);
                let size = range.len() as f32;
                let mut energy = 0.0f32;
                let mut form_factor = 0.0f32;
                for &x in &coeffs[range] {
                    energy += x * x;
                    form_factor += x.abs().sqrt();
                }
                let spread = if energy > 0.0 {
                    let nz_lines = form_factor / (energy / size).powf(0.25);
                    nz_lines * 2.0 / size
                } else {
                    0.0
                };
                bands[g] = PsyBand {
                    energy,
                    threshold: energy * THR_RATIO,
                    spread,
                };
            }

            for g in 1..num_swb {
                let lower = bands[g - 1].threshold * layout.bands[g].spread_hi;
                bands[g].threshold = bands[g].threshold.max(lower);
            }
            for g in (0..num_swb.saturating_sub(1)).rev() {
                let upper = bands[g + 1].threshold * layout.bands[g].spread_low;
                bands[g].threshold = bands[g].threshold.max(upper);
            }

            for g in 0..num_swb {
                let b = w * BAND_STRIDE + g;
                let band = &mut bands[g];
                band.threshold = band.threshold.max(layout.bands[g].ath);
                thr_quiet[b] = band.threshold;
                if pre_echo {
                    let limited = band.threshold.min(PRE_ECHO_LEVEL * state.prev_thr_quiet[b]);
                    band.threshold = (PRE_ECHO_MIN * band.threshold).max(limited).max(layout.bands[g].ath);
                }
            }
        }

        state.prev_thr_quiet = thr_quiet;
        state.prev_windows = Some(window.num_windows());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(bin: usize, amp: f32) -> Vec<f32> {
        let mut c = vec![0.0; 1024];
        c[bin] = amp;
        c
    }

    #[test]
    fn test_silence_gives_floor_thresholds() {
        let model = PsychoacousticModel::new(44100).unwrap();
        let window = WindowInfo::long(44100).unwrap();
        let mut state = PsyState::new();
        let bands = model.analyze(&vec![0.0; 1024], &window, &mut state);
        for g in 0..window.num_swb() {
            assert_eq!(bands[g].energy, 0.0);
            assert!(bands[g].threshold > 0.0, "band {} must keep the hearing floor", g);
            assert_eq!(bands[g].spread, 0.0);
        }
    }

    #[test]
    fn test_spreading_is_asymmetric() {
        let model = PsychoacousticModel::new(44100).unwrap();
        let window = WindowInfo::long(44100).unwrap();
        let mut state = PsyState::new();
        // band 20 starts at line 132
        let bands = model.analyze(&tone(134, 1.0e6), &window, &mut state);
        let above = bands[21].threshold;
        let below = bands[19].threshold;
        assert!(above > below, "masking must spread further upward ({} vs {})", above, below);
        assert!(bands[20].threshold < bands[20].energy);
    }

    #[test]
    fn test_tone_is_not_flat() {
        let model = PsychoacousticModel::new(48000).unwrap();
        let window = WindowInfo::long(48000).unwrap();
        let mut state = PsyState::new();
        let bands = model.analyze(&tone(600, 5000.0), &window, &mut state);
        let g = (0..window.num_swb()).find(|&g| window.band_range(0, g).contains(&600)).unwrap();
        assert!(bands[g].spread < 0.2, "tone spread {}", bands[g].spread);

        let flat: Vec<f32> = (0..1024).map(|i| if i % 2 == 0 { 300.0 } else { -300.0 }).collect();
        let bands = model.analyze(&flat, &window, &mut PsyState::new());
        assert!((bands[g].spread - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_pre_echo_limits_threshold_rise() {
        let model = PsychoacousticModel::new(44100).unwrap();
        let window = WindowInfo::long(44100).unwrap();
        let mut state = PsyState::new();
        let quiet: Vec<f32> = (0..1024).map(|i| if i % 3 == 0 { 10.0 } else { -10.0 }).collect();
        let loud: Vec<f32> = quiet.iter().map(|v| v * 1000.0).collect();
        let first = model.analyze(&quiet, &window, &mut state);
        let second = model.analyze(&loud, &window, &mut state);
        let unlimited = model.analyze(&loud, &window, &mut PsyState::new());
        assert!(second[10].threshold <= 2.0 * first[10].threshold.max(unlimited[10].threshold * 0.01) + 1e-3);
        assert!(second[10].threshold < unlimited[10].threshold);
    }

    #[test]
    fn test_short_windows() {
        let model = PsychoacousticModel::new(44100).unwrap();
        let window = WindowInfo::eight_short(44100, &[2, 2, 4]).unwrap();
        let mut coeffs = vec![0.0; 1024];
        coeffs[5 * 128 + 10] = 1000.0;
        let bands = model.analyze(&coeffs, &window, &mut PsyState::new());
        let g = 2; // lines 8..12
        assert!(bands[5 * BAND_STRIDE + g].energy > 0.0);
        assert_eq!(bands[4 * BAND_STRIDE + g].energy, 0.0);
    }
}
