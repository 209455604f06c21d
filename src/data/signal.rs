//! Signal-processing primitives used by the reconstruction pipeline.

use num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// Subtract the arithmetic mean in place.
pub fn remove_dc(samples: &mut [f64]) {
    if samples.is_empty() {
        return;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    for sample in samples.iter_mut() {
        *sample -= mean;
    }
}

/// Analytic signal of a real sequence via the FFT.
///
/// Positive frequencies are doubled and negative frequencies zeroed, so the
/// imaginary part of the result is the Hilbert transform of the input.
pub fn analytic_signal(planner: &mut FftPlanner<f64>, samples: &[f64]) -> Vec<Complex<f64>> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }

    let mut buffer: Vec<Complex<f64>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buffer);

    let half = n / 2;
    for (k, bin) in buffer.iter_mut().enumerate() {
        let gain = if k == 0 || (n % 2 == 0 && k == half) {
            1.0
        } else if k <= (n - 1) / 2 {
            2.0
        } else {
            0.0
        };
        *bin *= gain;
    }

    planner.plan_fft_inverse(n).process(&mut buffer);
    // rustfft does not normalize the inverse transform.
    let scale = 1.0 / n as f64;
    for value in buffer.iter_mut() {
        *value *= scale;
    }
    buffer
}

/// Instantaneous phase of an analytic signal, unwrapped to a continuous curve.
pub fn unwrapped_phase(analytic: &[Complex<f64>]) -> Vec<f64> {
    let mut phase: Vec<f64> = analytic.iter().map(|z| z.arg()).collect();
    unwrap_phase(&mut phase);
    phase
}

/// Remove 2π discontinuities between consecutive samples.
pub fn unwrap_phase(phase: &mut [f64]) {
    let mut offset = 0.0;
    let mut previous = match phase.first() {
        Some(&p) => p,
        None => return,
    };
    for value in phase.iter_mut().skip(1) {
        let raw = *value;
        let delta = raw - previous;
        if delta > PI {
            offset -= 2.0 * PI * ((delta + PI) / (2.0 * PI)).floor();
        } else if delta < -PI {
            offset += 2.0 * PI * ((-delta + PI) / (2.0 * PI)).floor();
        }
        previous = raw;
        *value = raw + offset;
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            let mut values: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            values[n - 1] = end;
            values
        }
    }
}

/// Piecewise-linear interpolation of `(xp, fp)` at every point of `x`.
///
/// `xp` must be ascending. Points outside `[xp[0], xp[last]]` take the edge
/// values and a NaN point yields NaN. Returns an empty vector when `xp` is empty.
pub fn interp(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return Vec::new();
    }
    let (xp, fp) = (&xp[..n], &fp[..n]);

    x.iter()
        .map(|&xi| {
            if xi.is_nan() {
                return f64::NAN;
            }
            if n == 1 || xi <= xp[0] {
                return fp[0];
            }
            if xi >= xp[n - 1] {
                return fp[n - 1];
            }
            // First index with xp[hi] > xi; 1 <= hi <= n - 1 for ascending xp.
            let hi = xp.partition_point(|&v| v <= xi).clamp(1, n - 1);
            let lo = hi - 1;
            let dx = xp[hi] - xp[lo];
            if dx <= 0.0 {
                fp[lo]
            } else {
                fp[lo] + (fp[hi] - fp[lo]) * (xi - xp[lo]) / dx
            }
        })
        .collect()
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, best_v)) if best_v >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_dc() {
        let mut samples = vec![1.0, 2.0, 3.0, 6.0];
        remove_dc(&mut samples);
        assert_eq!(samples, vec![-2.0, -1.0, 0.0, 3.0]);
        let mut empty: Vec<f64> = Vec::new();
        remove_dc(&mut empty);
    }

    #[test]
    fn test_analytic_signal_of_cosine_is_complex_exponential() {
        let mut planner = FftPlanner::new();
        let n = 256;
        let cycles = 8.0;
        let samples: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * cycles * i as f64 / n as f64).cos())
            .collect();
        let analytic = analytic_signal(&mut planner, &samples);
        for (i, z) in analytic.iter().enumerate() {
            let expected = (2.0 * PI * cycles * i as f64 / n as f64).sin();
            assert!((z.re - samples[i]).abs() < 1e-9);
            assert!((z.im - expected).abs() < 1e-9, "sample {i}");
        }
    }

    #[test]
    fn test_unwrapped_phase_is_linear_for_tone() {
        let mut planner = FftPlanner::new();
        let n = 512;
        let cycles = 16.0;
        let samples: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * cycles * i as f64 / n as f64).cos())
            .collect();
        let phase = unwrapped_phase(&analytic_signal(&mut planner, &samples));
        let span = phase[n - 1] - phase[0];
        let expected = 2.0 * PI * cycles * (n - 1) as f64 / n as f64;
        assert!((span - expected).abs() < 1e-6);
        assert!(phase.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_unwrap_phase_handles_descending_wraps() {
        let mut phase = vec![0.0, -3.0, 3.0, 0.5];
        unwrap_phase(&mut phase);
        assert!((phase[2] - (3.0 - 2.0 * PI)).abs() < 1e-12);
        assert!((phase[3] - (0.5 - 2.0 * PI)).abs() < 1e-12);
    }

    #[test]
    fn test_linspace_endpoints() {
        let values = linspace(0.1, 300.0, 7);
        assert_eq!(values.len(), 7);
        assert_eq!(values[0], 0.1);
        assert_eq!(values[6], 300.0);
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(2.0, 5.0, 1), vec![2.0]);
    }

    #[test]
    fn test_interp_inside_and_clamped() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 30.0];
        let y = interp(&[-1.0, 0.5, 1.0, 1.5, 5.0], &xp, &fp);
        assert_eq!(y, vec![0.0, 5.0, 10.0, 20.0, 30.0]);
        assert!(interp(&[1.0], &[], &[]).is_empty());
    }

    #[test]
    fn test_interp_tolerates_non_finite_points() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 30.0];
        let y = interp(&[f64::NAN, f64::INFINITY, f64::NEG_INFINITY], &xp, &fp);
        assert!(y[0].is_nan());
        assert_eq!(&y[1..], &[30.0, 0.0]);

        let grid = linspace(1.0, f64::NAN, 4);
        assert_eq!(interp(&grid, &xp, &fp).len(), 4);
        assert_eq!(interp(&[f64::NAN], &[f64::NAN], &[7.0]), vec![7.0]);
        assert_eq!(interp(&[0.5, 2.0], &[f64::NAN, f64::NAN], &[1.0, 2.0]).len(), 2);
    }

    #[test]
    fn test_argmax_prefers_first() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
