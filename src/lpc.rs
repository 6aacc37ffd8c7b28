//! Linear prediction over spectral coefficients
//!
//! Levinson-Durbin recursion on the autocorrelation of a raised-cosine
//! windowed block, yielding reflection coefficients and a prediction gain.

use std::f64::consts::PI;

/// Reflection coefficients of a block and the gain of predicting it
#[derive(Debug, Clone, PartialEq)]
pub struct LpcAnalysis {
    pub reflection: Vec<f64>,
    /// Block energy over the running average of the per-stage prediction errors
    pub gain: f64,
}

fn autocorrelation(samples: &[f64], lag: usize) -> f64 {
    samples[lag..].iter().zip(samples).map(|(a, b)| a * b).sum()
}

/// Analyse `samples` with a predictor of `order` taps
///
/// `None` when the block is too short or carries no energy.
pub fn analyze(samples: &[f32], order: usize) -> Option<LpcAnalysis> {
    let len = samples.len();
    if order == 0 || len <= order + 1 {
        return None;
    }

    let windowed: Vec<f64> = samples
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let weight = 0.5 - 0.5 * (2.0 * PI * i as f64 / (len - 1) as f64).cos();
            weight * x as f64
        })
        .collect();
    let r: Vec<f64> = (0..=order).map(|k| autocorrelation(&windowed, k)).collect();
    if r[0] <= f64::EPSILON {
        return None;
    }

    let mut a = vec![0.0f64; order];
    let mut prev = vec![0.0f64; order];
    let mut reflection = vec![0.0f64; order];
    let mut err = r[0];
    let mut avg_err = 0.0f64;

    for i in 0..order {
        let mut acc = r[i + 1];
        for j in 0..i {
            acc -= a[j] * r[i - j];
        }
        let k = if err > 0.0 { acc / err } else { 0.0 };
        reflection[i] = k;

        prev.copy_from_slice(&a);
        a[i] = k;
        for j in 0..i {
            a[j] = prev[j] - k * prev[i - 1 - j];
        }
        err *= 1.0 - k * k;
        avg_err = (avg_err + err) / 2.0;
    }

    if avg_err <= 0.0 || !avg_err.is_finite() {
        return None;
    }
    Some(LpcAnalysis {
        reflection,
        gain: r[0] / avg_err,
    })
}

/// Direct-form predictor taps from reflection coefficients
///
/// The predictor estimates `x[n]` as `sum(a[j] * x[n - 1 - j])`.
pub fn step_up(reflection: &[f32]) -> Vec<f32> {
    let mut a = vec![0.0f32; reflection.len()];
    let mut prev = a.clone();
    for (i, &k) in reflection.iter().enumerate() {
        prev.copy_from_slice(&a);
        a[i] = k;
        for j in 0..i {
            a[j] = prev[j] - k * prev[i - 1 - j];
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    /// First-order autoregressive sequence driven by a fixed pseudo-random source
    fn ar1(rho: f32, len: usize) -> Vec<f32> {
        let mut seed = 0x1234_5678u32;
        let mut prev = 0.0f32;
        (0..len)
            .map(|_| {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let noise = (seed >> 8) as f32 / (1u32 << 24) as f32 - 0.5;
                prev = rho * prev + noise;
                prev
            })
            .collect()
    }

    #[test]
    fn test_silence_has_no_predictor() {
        assert_eq!(analyze(&[0.0; 256], 8), None);
        assert_eq!(analyze(&[1.0; 4], 8), None);
    }

    #[test]
    fn test_ar1_first_reflection() {
        let analysis = analyze(&ar1(0.8, 4096), 4).unwrap();
        assert!((analysis.reflection[0] - 0.8).abs() < 0.1, "{:?}", analysis.reflection);
        assert!(analysis.reflection[1].abs() < 0.15);
        assert!(analysis.gain > 2.0);
    }

    #[test]
    fn test_step_up() {
        assert_eq!(step_up(&[0.5]), vec![0.5]);
        let a = step_up(&[0.5, 0.25]);
        assert!((a[0] - 0.375).abs() < 1e-6);
        assert!((a[1] - 0.25).abs() < 1e-6);
    }
}
