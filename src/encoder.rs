//! Frame-level coding of single channels and channel pairs
//!
//! `SpectralEncoder` holds what every channel of a stream shares: the
//! configuration, the psychoacoustic model and the current lambda. Each
//! frame runs through analysis, spectral shaping, scalefactor search, stereo
//! decisions and sectioning. What a channel carries between frames lives in
//! its [`ChannelContext`].

use crate::band_info::{BandInfoEncoder, GroupSections, SectionMode};
use crate::config::{CoderConfig, CoderVariant, MAX_LAMBDA};
use crate::cost_cache::CostCache;
use crate::error::{EncoderResult, InputDataError, InputResult};
use crate::ltp::{search_for_ltp, LtpInfo, LTP_LAMBDA_LIMIT};
use crate::mdct::MDCT_INPUT_LEN;
use crate::pns::{mark_pns, search_for_pns, PnsParams};
use crate::prediction::{apply_prediction, search_for_pred, PredictionInfo};
use crate::psy::PsychoacousticModel;
use crate::quantization::{abs_pow34_vec, find_max_val, find_min_book, BandQuantizer, Rounding};
use crate::search::{
    estimate_bits, finalize_scalefactors, searcher, set_special_band_scalefactors, SearchContext, SearchReport,
};
use crate::state::ChannelState;
use crate::stereo::{apply_joint_stereo, search_for_is, search_for_ms, StereoParams};
use crate::tables::CB_MAXVAL;
use crate::tns::{apply_tns, search_for_tns, TnsInfo};
use crate::types::{BandType, ChannelData, ChannelPair, PsyBand, WindowInfo, BAND_STRIDE, BLOCK_LEN};

/// Largest lambda change of one frame outside the tolerance band
const MAX_LAMBDA_STEP: f32 = 2.0;

/// Largest lambda change of one frame inside the tolerance band
const STEADY_LAMBDA_STEP: f32 = 1.1;

/// Long-lived context of one channel: its frame history and working caches
#[derive(Debug, Clone, Default)]
pub struct ChannelContext {
    pub state: ChannelState,
    cache: CostCache,
    band_info: BandInfoEncoder,
}

impl ChannelContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cost cache `(hits, misses)` since creation
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Forget all history, as at the start of a new stream
    pub fn reset(&mut self) {
        self.state.reset();
        self.cache.invalidate_all();
    }
}

/// One channel's block for the current frame
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub window: &'a WindowInfo,
    /// 1024 MDCT coefficients, short windows laid out 128 apart
    pub coeffs: &'a [f32],
    /// The 2048 time samples of the long transform, for long-term prediction
    pub time: Option<&'a [f32]>,
}

impl<'a> FrameInput<'a> {
    pub fn new(window: &'a WindowInfo, coeffs: &'a [f32]) -> Self {
        Self {
            window,
            coeffs,
            time: None,
        }
    }

    pub fn with_time(mut self, time: &'a [f32]) -> Self {
        self.time = Some(time);
        self
    }
}

/// Final decision for one band slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct BandDecision {
    pub scalefactor: i32,
    pub codebook: BandType,
    pub zero: bool,
}

/// Everything decided for one channel in one frame
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct ChannelOutput {
    /// Layout as coded, with `max_sfb` limited to the bandwidth
    pub window: WindowInfo,
    /// Indexed by band slot `w * 16 + g`, up to the last band of the last window
    pub bands: Vec<BandDecision>,
    /// Signed quantized amplitudes, 1024 per channel
    pub quantized: Vec<i32>,
    /// Section layout of each window group
    pub sections: Vec<GroupSections>,
    pub tns: TnsInfo,
    pub ltp: LtpInfo,
    pub prediction: PredictionInfo,
    pub search: SearchReport,
    /// Spectral and scalefactor bits; section signalling is counted per group
    pub bits: u32,
}

impl ChannelOutput {
    pub fn section_bits(&self) -> u32 {
        self.sections.iter().map(|s| s.bits).sum()
    }

    /// Everything this channel adds to the frame
    pub fn total_bits(&self) -> u32 {
        self.bits + self.section_bits()
    }

    /// Decision for band `g` of window `w`
    pub fn band(&self, w: usize, g: usize) -> &BandDecision {
        &self.bands[w * BAND_STRIDE + g]
    }
}

/// Everything decided for a channel pair in one frame
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize))]
pub struct PairOutput {
    pub channels: [ChannelOutput; 2],
    pub ms_mask: Vec<bool>,
    pub is_mask: Vec<bool>,
    pub ms_mode: bool,
    pub is_mode: bool,
    pub common_window: bool,
}

impl PairOutput {
    pub fn total_bits(&self) -> u32 {
        self.channels.iter().map(ChannelOutput::total_bits).sum()
    }
}

/// Quantization and rate-distortion core shared by all channels of a stream
#[derive(Debug, Clone)]
pub struct SpectralEncoder {
    config: CoderConfig,
    model: PsychoacousticModel,
    quantizer: BandQuantizer,
    cutoff_hz: u32,
    lambda: f32,
    frames: u64,
}

impl SpectralEncoder {
    /// Create an encoder with the specified configuration
    pub fn new(config: CoderConfig) -> EncoderResult<Self> {
        config.validate()?;

        let model = PsychoacousticModel::new(config.sample_rate)?;
        let cutoff_hz = config.effective_cutoff();
        let lambda = config.initial_lambda();
        log::debug!(
            "{} coder at {} Hz, {} channels, cutoff {} Hz, lambda {:.1}",
            config.variant,
            config.sample_rate,
            config.channels,
            cutoff_hz,
            lambda
        );

        Ok(Self {
            quantizer: BandQuantizer::new(config.rounding),
            config,
            model,
            cutoff_hz,
            lambda,
            frames: 0,
        })
    }

    pub fn config(&self) -> &CoderConfig {
        &self.config
    }

    /// Rate-distortion weight of the current frame
    pub fn lambda(&self) -> f32 {
        self.lambda
    }

    pub fn cutoff_hz(&self) -> u32 {
        self.cutoff_hz
    }

    /// Frames closed with [`end_frame`](Self::end_frame)
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Code one channel on its own
    pub fn encode_single(&self, ctx: &mut ChannelContext, input: FrameInput<'_>) -> EncoderResult<ChannelOutput> {
        self.validate_input(&input)?;
        let (ch, bands, report) = self.analyze_channel(ctx, &input);
        Ok(self.finish_channel(ctx, ch, &bands, report))
    }

    /// Code two channels that may share intensity and mid/side coding
    ///
    /// Joint coding is only tried when both blocks use the same window
    /// layout; otherwise each channel is coded as if alone.
    pub fn encode_pair(
        &self,
        ctx: [&mut ChannelContext; 2],
        input: [FrameInput<'_>; 2],
    ) -> EncoderResult<PairOutput> {
        let [ctx0, ctx1] = ctx;
        let [input0, input1] = input;
        self.validate_input(&input0)?;
        self.validate_input(&input1)?;

        let (ch0, bands0, report0) = self.analyze_channel(ctx0, &input0);
        let (ch1, bands1, report1) = self.analyze_channel(ctx1, &input1);

        let mut pair = ChannelPair::new(ch0, ch1);
        if pair.common_window {
            let extensions = self.config.extensions;
            let params = self.stereo_params();
            let bands = [bands0.as_slice(), bands1.as_slice()];
            if extensions.intensity_stereo {
                search_for_is(&mut pair, bands, &params);
            }
            if extensions.mid_side {
                search_for_ms(&mut pair, bands, &params);
            }
            if pair.is_mode || pair.ms_mode {
                apply_joint_stereo(&mut pair);
                for ch in pair.ch.iter_mut() {
                    refit_codebooks(ch, self.config.rounding);
                    finalize_scalefactors(ch, self.config.rounding);
                }
                // costs were cached for the left/right coefficients
                ctx0.cache.invalidate_all();
                ctx1.cache.invalidate_all();
            }
        } else {
            log::debug!("pair coded independently: window layouts differ");
        }

        let ChannelPair {
            ch: [ch0, ch1],
            ms_mask,
            is_mask,
            ms_mode,
            is_mode,
            common_window,
        } = pair;
        let out0 = self.finish_channel(ctx0, ch0, &bands0, report0);
        let out1 = self.finish_channel(ctx1, ch1, &bands1, report1);

        Ok(PairOutput {
            channels: [out0, out1],
            ms_mask: ms_mask.to_vec(),
            is_mask: is_mask.to_vec(),
            ms_mode,
            is_mode,
            common_window,
        })
    }

    /// Close a frame and steer lambda towards the bitrate
    ///
    /// `used_bits` is the total over every channel of the frame. Inside an
    /// eighth of the target lambda moves by at most 10%, outside by at most a
    /// factor of two. Quality mode keeps lambda fixed.
    pub fn end_frame(&mut self, used_bits: u32) {
        self.frames += 1;
        let Some(target) = self.config.frame_bits() else {
            return;
        };

        let target = target as f32;
        let used = used_bits.max(1) as f32;
        let ratio = target / used;
        let step = if (used - target).abs() <= target / 8.0 {
            ratio.sqrt().sqrt().clamp(1.0 / STEADY_LAMBDA_STEP, STEADY_LAMBDA_STEP)
        } else {
            ratio.sqrt().clamp(1.0 / MAX_LAMBDA_STEP, MAX_LAMBDA_STEP)
        };

        let wanted = self.lambda * step;
        let lambda = wanted.clamp(f32::EPSILON, MAX_LAMBDA);
        if lambda != wanted && lambda != self.lambda {
            log::warn!("lambda {:.3} clamped to {:.3} after a {} bit frame", wanted, lambda, used_bits);
        }
        log::debug!(
            "frame {}: {} of {} bits, lambda {:.2} -> {:.2}",
            self.frames,
            used_bits,
            target,
            self.lambda,
            lambda
        );
        self.lambda = lambda;
    }

    fn validate_input(&self, input: &FrameInput<'_>) -> InputResult<()> {
        if input.coeffs.len() != BLOCK_LEN {
            return Err(InputDataError::InvalidLength {
                expected: BLOCK_LEN,
                actual: input.coeffs.len(),
            });
        }
        if input.window.sample_rate() != self.config.sample_rate {
            return Err(InputDataError::WindowMismatch);
        }
        if input.coeffs.iter().any(|c| !c.is_finite()) {
            return Err(InputDataError::NonFiniteSamples);
        }
        if let Some(time) = input.time {
            if time.len() != MDCT_INPUT_LEN {
                return Err(InputDataError::InvalidTimeLength {
                    expected: MDCT_INPUT_LEN,
                    actual: time.len(),
                });
            }
            if time.iter().any(|s| !s.is_finite()) {
                return Err(InputDataError::NonFiniteSamples);
            }
        }
        Ok(())
    }

    fn search_context<'a>(&self, bands: &'a [PsyBand], cache: &'a mut CostCache) -> SearchContext<'a> {
        SearchContext {
            bands,
            cache,
            lambda: self.lambda,
            target_bits: self.config.channel_bits(self.lambda),
            rounding: self.config.rounding,
            noise_substitution: self.config.extensions.noise_substitution,
            outer_iterations: self.config.outer_iterations,
        }
    }

    fn stereo_params(&self) -> StereoParams {
        StereoParams {
            lambda: self.lambda,
            ms_low_limit_hz: self.config.ms_low_limit_hz,
            is_low_limit_hz: self.config.is_low_limit_hz,
            quantizer: self.quantizer,
        }
    }

    /// Everything up to the stereo decisions
    fn analyze_channel(
        &self,
        ctx: &mut ChannelContext,
        input: &FrameInput<'_>,
    ) -> (ChannelData, Vec<PsyBand>, SearchReport) {
        let extensions = self.config.extensions;
        let mut window = input.window.clone();
        window.limit_bandwidth(self.cutoff_hz);
        window.set_max_sfb(window.max_sfb().min(input.window.max_sfb()));

        let bands = self.model.analyze(input.coeffs, &window, &mut ctx.state.psy);
        let mut ch = ChannelData::new(window, input.coeffs);
        let pns = PnsParams::new(self.lambda, self.config.sample_rate, ch.window.window_len(), self.cutoff_hz);
        if extensions.noise_substitution {
            mark_pns(&pns, &bands, &mut ch);
        }
        if extensions.tns && search_for_tns(&mut ch, &bands) {
            apply_tns(&mut ch);
        }

        ctx.cache.invalidate_all();
        let search = searcher(self.config.variant);
        let mut report = search.search(&mut self.search_context(&bands, &mut ctx.cache), &mut ch);

        if self.predict(ctx, &mut ch, &bands, input.time) {
            ctx.cache.invalidate_all();
            report = search.search(&mut self.search_context(&bands, &mut ctx.cache), &mut ch);
        }
        finalize_scalefactors(&mut ch, self.config.rounding);

        if extensions.noise_substitution && self.config.variant != CoderVariant::TwoLoop {
            report.noise_bands += search_for_pns(&pns, &mut self.search_context(&bands, &mut ctx.cache), &mut ch);
        }
        (ch, bands, report)
    }

    /// Long-term or backward-adaptive prediction
    ///
    /// Returns whether the coefficients were replaced by a residual.
    fn predict(&self, ctx: &mut ChannelContext, ch: &mut ChannelData, bands: &[PsyBand], time: Option<&[f32]>) -> bool {
        let extensions = self.config.extensions;
        if extensions.ltp {
            let Some(time) = time else {
                return false;
            };
            let ltp = &mut ctx.state.ltp;
            let mut kept = false;
            if ch.window.is_short() {
                if ltp.lag() != 0 {
                    log::warn!("ltp: lag {} dropped on a switch to short windows", ltp.lag());
                    ltp.clear_lag();
                }
            } else if self.lambda <= LTP_LAMBDA_LIMIT {
                if let Some(prediction) = ltp.predict(time) {
                    kept = search_for_ltp(ch, bands, &prediction, self.lambda, self.quantizer);
                }
            }
            ltp.push_frame(time);
            kept
        } else if extensions.prediction {
            search_for_pred(ch, bands, &mut ctx.state.predictors, self.lambda, self.quantizer);
            apply_prediction(ch, &mut ctx.state.predictors);
            ch.prediction.present
        } else {
            false
        }
    }

    /// Special scalefactors, sectioning and quantization
    fn finish_channel(
        &self,
        ctx: &mut ChannelContext,
        mut ch: ChannelData,
        bands: &[PsyBand],
        search: SearchReport,
    ) -> ChannelOutput {
        set_special_band_scalefactors(&mut ch);
        finalize_scalefactors(&mut ch, self.config.rounding);

        let mode = match self.config.variant {
            CoderVariant::TwoLoop => SectionMode::Rate,
            CoderVariant::Trellis | CoderVariant::Fast => SectionMode::RateDistortion,
        };
        let mut sctx = self.search_context(bands, &mut ctx.cache);
        let sections = ctx.band_info.encode_channel(&mut sctx, mode, &mut ch);
        let bits = estimate_bits(&mut sctx, &ch);

        let quantized = self.quantize_channel(&ch);
        let decisions = band_decisions(&ch);
        ctx.state.advance(ch.window.sequence());

        log::debug!(
            "{} channel: {} bits (target {}), lambda {:.2}, {} inner / {} outer iterations, {} noise bands",
            self.config.variant,
            bits,
            self.config.channel_bits(self.lambda),
            self.lambda,
            search.inner_iterations,
            search.outer_iterations,
            search.noise_bands
        );

        ChannelOutput {
            window: ch.window,
            bands: decisions,
            quantized,
            sections,
            tns: ch.tns,
            ltp: ch.ltp,
            prediction: ch.prediction,
            search,
            bits,
        }
    }

    fn quantize_channel(&self, ch: &ChannelData) -> Vec<i32> {
        let scaled = abs_pow34_vec(&ch.coeffs);
        let mut out = vec![0i32; BLOCK_LEN];
        for w in 0..ch.window.num_windows() {
            for g in 0..ch.window.max_sfb() {
                let b = w * BAND_STRIDE + g;
                if !ch.in_sf_chain(b) {
                    continue;
                }
                let range = ch.window.band_range(w, g);
                self.quantizer.quantize(
                    &ch.coeffs[range.clone()],
                    &scaled[range.clone()],
                    ch.sf_idx[b],
                    ch.band_type[b],
                    &mut out[range],
                );
            }
        }
        out
    }
}

fn band_decisions(ch: &ChannelData) -> Vec<BandDecision> {
    let slots = (ch.window.num_windows() - 1) * BAND_STRIDE + ch.window.num_swb();
    let mut decisions = vec![BandDecision::default(); slots];
    for w in 0..ch.window.num_windows() {
        for g in 0..ch.window.num_swb() {
            let b = w * BAND_STRIDE + g;
            decisions[b] = BandDecision {
                scalefactor: ch.sf_idx[b],
                codebook: if ch.zeroes[b] { BandType::ZERO } else { ch.band_type[b] },
                zero: ch.zeroes[b],
            };
        }
    }
    decisions
}

/// Widen codebooks that no longer hold their band after joint coding
fn refit_codebooks(ch: &mut ChannelData, rounding: Rounding) {
    let scaled = abs_pow34_vec(&ch.coeffs);
    let groups: Vec<(usize, usize)> = ch.window.groups().collect();
    for &(w, len) in &groups {
        for g in 0..ch.window.max_sfb() {
            let b = w * BAND_STRIDE + g;
            if !ch.in_sf_chain(b) || ch.band_type[b] == BandType::ZERO {
                continue;
            }
            let start = ch.window.band_range(w, g).start;
            let maxval = find_max_val(len, ch.window.band_width(g), &scaled[start..]);
            let needed = find_min_book(maxval, ch.sf_idx[b], rounding);
            if CB_MAXVAL[needed.index()] > CB_MAXVAL[ch.band_type[b].index()] {
                for w2 in 0..len {
                    ch.band_type[b + w2 * BAND_STRIDE] = needed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Extensions, NOMINAL_LAMBDA};
    use crate::error::{ConfigError, EncoderError};
    use crate::types::SCALE_MAX_DIFF;

    fn tone(bin: usize, amplitude: f32) -> Vec<f32> {
        let mut coeffs = vec![0.0f32; BLOCK_LEN];
        for (i, c) in coeffs.iter_mut().enumerate() {
            // a little noise floor so the masking model has something to spread
            *c = ((i * 7919) % 17) as f32 - 8.0;
        }
        coeffs[bin] = amplitude;
        coeffs[bin + 1] = -amplitude * 0.5;
        coeffs
    }

    fn encoder(config: CoderConfig) -> SpectralEncoder {
        SpectralEncoder::new(config).unwrap()
    }

    #[test]
    fn test_new_validates_config() {
        match SpectralEncoder::new(CoderConfig::new().sample_rate(44000)) {
            Err(EncoderError::Config(ConfigError::UnsupportedSampleRate(44000))) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        let enc = encoder(CoderConfig::new().quality(80.0));
        assert_eq!(enc.lambda(), 80.0);
        assert_eq!(enc.frames(), 0);
    }

    #[test]
    fn test_input_validation() {
        let enc = encoder(CoderConfig::new());
        let mut ctx = ChannelContext::new();
        let window = WindowInfo::long(44100).unwrap();

        let short = vec![0.0f32; 1000];
        let err = enc.encode_single(&mut ctx, FrameInput::new(&window, &short)).unwrap_err();
        assert!(matches!(
            err,
            EncoderError::InputData(InputDataError::InvalidLength {
                expected: 1024,
                actual: 1000
            })
        ));

        let mut bad = vec![0.0f32; BLOCK_LEN];
        bad[3] = f32::NAN;
        let err = enc.encode_single(&mut ctx, FrameInput::new(&window, &bad)).unwrap_err();
        assert!(matches!(err, EncoderError::InputData(InputDataError::NonFiniteSamples)));

        let other_rate = WindowInfo::long(48000).unwrap();
        let coeffs = vec![0.0f32; BLOCK_LEN];
        let err = enc.encode_single(&mut ctx, FrameInput::new(&other_rate, &coeffs)).unwrap_err();
        assert!(matches!(err, EncoderError::InputData(InputDataError::WindowMismatch)));

        let time = vec![0.0f32; 1024];
        let err = enc
            .encode_single(&mut ctx, FrameInput::new(&window, &coeffs).with_time(&time))
            .unwrap_err();
        assert!(matches!(
            err,
            EncoderError::InputData(InputDataError::InvalidTimeLength {
                expected: 2048,
                actual: 1024
            })
        ));
        assert_eq!(ctx.state.frames(), 0);
    }

    #[test]
    fn test_silence_codes_nothing() {
        for variant in [CoderVariant::TwoLoop, CoderVariant::Trellis, CoderVariant::Fast] {
            let enc = encoder(CoderConfig::new().variant(variant));
            let mut ctx = ChannelContext::new();
            let window = WindowInfo::long(44100).unwrap();
            let coeffs = vec![0.0f32; BLOCK_LEN];
            let out = enc.encode_single(&mut ctx, FrameInput::new(&window, &coeffs)).unwrap();

            assert!(out.quantized.iter().all(|&q| q == 0), "{}", variant);
            assert!(out.bands.iter().all(|b| b.zero && b.codebook == BandType::ZERO));
            assert_eq!(out.bits, 0);
            assert_eq!(out.total_bits(), out.section_bits());
            assert_eq!(ctx.state.frames(), 1);
        }
    }

    #[test]
    fn test_tone_is_coded() {
        let enc = encoder(CoderConfig::new().channels(1).extensions(Extensions::none()));
        let mut ctx = ChannelContext::new();
        let window = WindowInfo::long(44100).unwrap();
        let coeffs = tone(40, 20000.0);
        let out = enc.encode_single(&mut ctx, FrameInput::new(&window, &coeffs)).unwrap();

        assert!(out.quantized[40] > 0);
        assert!(out.quantized[41] < 0);
        assert!(out.bits > 0);
        assert!(out.window.max_sfb() <= window.num_swb());

        // coded scalefactors respect the delta limit in coding order
        let mut prev: Option<i32> = None;
        for g in 0..out.window.max_sfb() {
            let band = out.band(0, g);
            if band.zero || !band.codebook.is_spectral() {
                continue;
            }
            if let Some(p) = prev {
                assert!((band.scalefactor - p).abs() <= SCALE_MAX_DIFF);
            }
            prev = Some(band.scalefactor);
        }
    }

    #[test]
    fn test_rate_control_follows_usage() {
        let config = CoderConfig::new().sample_rate(48000).channels(2).bitrate(96_000);
        let mut enc = encoder(config);
        assert_eq!(enc.lambda(), NOMINAL_LAMBDA);

        // far too many bits: lambda halves at most
        enc.end_frame(100_000);
        assert!((enc.lambda() - NOMINAL_LAMBDA / 2.0).abs() < 1e-3);

        // slightly under target: small step up
        let before = enc.lambda();
        enc.end_frame(1900);
        assert!(enc.lambda() > before);
        assert!(enc.lambda() <= before * STEADY_LAMBDA_STEP + 1e-3);
        assert_eq!(enc.frames(), 2);
    }

    #[test]
    fn test_rate_control_limits() {
        let mut enc = encoder(CoderConfig::new().bitrate(128_000));
        for _ in 0..40 {
            enc.end_frame(0);
        }
        assert_eq!(enc.lambda(), MAX_LAMBDA);

        let mut quality = encoder(CoderConfig::new().quality(90.0));
        quality.end_frame(50_000);
        assert_eq!(quality.lambda(), 90.0);
    }

    #[test]
    fn test_pair_with_different_windows() {
        let enc = encoder(CoderConfig::new());
        let mut ctx0 = ChannelContext::new();
        let mut ctx1 = ChannelContext::new();
        let long = WindowInfo::long(44100).unwrap();
        let short = WindowInfo::eight_short(44100, &[4, 4]).unwrap();
        let coeffs = tone(40, 20000.0);

        let out = enc
            .encode_pair(
                [&mut ctx0, &mut ctx1],
                [FrameInput::new(&long, &coeffs), FrameInput::new(&short, &coeffs)],
            )
            .unwrap();
        assert!(!out.common_window);
        assert!(!out.ms_mode && !out.is_mode);
        assert!(out.ms_mask.iter().chain(&out.is_mask).all(|&m| !m));
        assert_eq!(out.channels[1].sections.len(), 2);
        assert_eq!(out.total_bits(), out.channels[0].total_bits() + out.channels[1].total_bits());
    }

    #[test]
    fn test_refit_widens_codebook() {
        let window = WindowInfo::long(44100).unwrap();
        let mut coeffs = vec![0.0f32; BLOCK_LEN];
        coeffs[0] = 500.0;
        let mut ch = ChannelData::new(window, &coeffs);
        ch.zeroes[0] = false;
        ch.sf_idx[0] = 100;
        ch.band_type[0] = BandType::new(1).unwrap();
        refit_codebooks(&mut ch, Rounding::Nearest);
        assert!(CB_MAXVAL[ch.band_type[0].index()] > 1);
        assert!(ch.band_type[0].is_spectral());
    }
}
