//! Scalefactor search validation tests
//!
//! This module checks the delta chain limit on every coder variant and the
//! behaviour of the two-loop search under bit starvation.

use aac_coder_rs::config::DEFAULT_OUTER_ITERATIONS;
use aac_coder_rs::twoloop::INNER_ITERATION_CAP;
use aac_coder_rs::types::SCALE_MAX_DIFF;
use aac_coder_rs::{
    ChannelContext, ChannelOutput, CoderConfig, CoderVariant, Extensions, FrameInput, SpectralEncoder, WindowInfo,
};
use proptest::prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn setup_logging() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }

    /// Noise with a falling spectral envelope
    fn spectrum(seed: u32, amplitude: f32) -> Vec<f32> {
        let mut state = seed | 1;
        (0..1024)
            .map(|i| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let noise = (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5;
                noise * amplitude / (1.0 + (i % 128) as f32 / 32.0)
            })
            .collect()
    }

    /// Whether consecutive coded scalefactors stay within the delta limit
    fn deltas_valid(out: &ChannelOutput) -> bool {
        let mut prev: Option<i32> = None;
        for (w, _) in out.window.groups() {
            for g in 0..out.window.max_sfb() {
                let band = out.band(w, g);
                if band.zero || !band.codebook.is_spectral() {
                    continue;
                }
                if let Some(p) = prev {
                    if (band.scalefactor - p).abs() > SCALE_MAX_DIFF {
                        return false;
                    }
                }
                prev = Some(band.scalefactor);
            }
        }
        true
    }

    fn variant_strategy() -> impl Strategy<Value = CoderVariant> {
        prop_oneof![
            Just(CoderVariant::TwoLoop),
            Just(CoderVariant::Trellis),
            Just(CoderVariant::Fast),
        ]
    }

    fn window_strategy() -> impl Strategy<Value = WindowInfo> {
        prop_oneof![
            Just(WindowInfo::long(44100).unwrap()),
            Just(WindowInfo::eight_short(44100, &[8]).unwrap()),
            Just(WindowInfo::eight_short(44100, &[1, 3, 4]).unwrap()),
            Just(WindowInfo::long(22050).unwrap()),
        ]
    }

    #[test]
    fn test_starved_budget_terminates() {
        setup_logging();
        let window = WindowInfo::long(44100).unwrap();
        let coeffs = spectrum(7, 40000.0);

        let starving = SpectralEncoder::new(
            CoderConfig::new()
                .channels(1)
                .bitrate(1000)
                .extensions(Extensions::none()),
        )
        .unwrap();
        let mut ctx = ChannelContext::new();
        let out = starving.encode_single(&mut ctx, FrameInput::new(&window, &coeffs)).unwrap();

        assert!(out.search.inner_iterations <= INNER_ITERATION_CAP);
        assert!(out.search.outer_iterations <= DEFAULT_OUTER_ITERATIONS);
        assert!(deltas_valid(&out));

        let generous = SpectralEncoder::new(
            CoderConfig::new()
                .channels(1)
                .bitrate(256_000)
                .extensions(Extensions::none()),
        )
        .unwrap();
        let mut ctx = ChannelContext::new();
        let rich = generous.encode_single(&mut ctx, FrameInput::new(&window, &coeffs)).unwrap();
        assert!(out.bits <= rich.bits, "starved {} bits, generous {} bits", out.bits, rich.bits);
    }

    #[test]
    fn test_starved_budget_with_noise_substitution() {
        setup_logging();
        let window = WindowInfo::long(44100).unwrap();
        let coeffs = spectrum(11, 40000.0);
        let encoder = SpectralEncoder::new(CoderConfig::new().channels(1).bitrate(1000)).unwrap();
        let mut ctx = ChannelContext::new();
        let out = encoder.encode_single(&mut ctx, FrameInput::new(&window, &coeffs)).unwrap();
        assert!(deltas_valid(&out));
        assert!(out.search.inner_iterations <= INNER_ITERATION_CAP);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 20,
            verbose: 0,
            max_shrink_iters: 0,
            failure_persistence: None,
            ..ProptestConfig::default()
        })]

        #[test]
        fn test_scalefactor_delta_invariant(
            variant in variant_strategy(),
            window in window_strategy(),
            seed in any::<u32>(),
            amplitude in 10.0f32..50000.0,
            bitrate in 8_000u32..128_000,
        ) {
            setup_logging();
            let config = CoderConfig::new()
                .sample_rate(window.sample_rate())
                .channels(1)
                .variant(variant)
                .bitrate(bitrate);
            let encoder = SpectralEncoder::new(config).unwrap();
            let mut ctx = ChannelContext::new();
            let coeffs = spectrum(seed, amplitude);
            let out = encoder.encode_single(&mut ctx, FrameInput::new(&window, &coeffs)).unwrap();

            prop_assert!(deltas_valid(&out), "{} broke the delta limit", variant);
            prop_assert_eq!(out.quantized.len(), 1024);
            for (w, _) in out.window.groups() {
                for g in out.window.max_sfb()..out.window.num_swb() {
                    prop_assert!(out.band(w, g).zero);
                }
            }
        }
    }
}
