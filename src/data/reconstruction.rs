//! Spectral reconstruction: raw interferogram + reference trace to a calibrated spectrum.
//!
//! The mirror does not move at constant speed, so the detector samples are not
//! evenly spaced in optical path. The reference laser's instantaneous phase gives
//! the true mirror position of every sample; the detector signal is resampled onto
//! a uniform position axis before the FFT.
//!
//! # Pipeline
//!
//! 1. remove DC from both channels
//! 2. reference phase (Hilbert transform, unwrapped) to mirror position; the
//!    derived travel must reach [`SpectralReconstructor::required_travel_um`]
//! 3. linear resampling of the detector signal onto a uniform position axis
//! 4. asymmetric apodization centred on the ZPD sample
//! 5. zero padding by `K` and real-input FFT magnitude
//! 6. V to W to dBm
//! 7. bin-to-wavelength mapping and resampling onto the common output grid
//!
//! # Example
//!
//! ```
//! use rust_fts::config::ProcessingConfig;
//! use rust_fts::data::apodization::ApodizationWindow;
//! use rust_fts::data::reconstruction::SpectralReconstructor;
//! use rust_fts::hardware::mock::SyntheticInterferometer;
//!
//! let mut config = ProcessingConfig::default();
//! config.output_grid.min_um = 1.0;
//! config.output_grid.max_um = 20.0;
//! config.output_grid.points = 10_000;
//!
//! let (primary, reference) = SyntheticInterferometer::default().generate(4_096, 7);
//! let mut reconstructor = SpectralReconstructor::new(config);
//! let result = reconstructor
//!     .reconstruct(&reference, &primary, ApodizationWindow::Hanning)
//!     .unwrap();
//! assert_eq!(result.spectrum_x.len(), result.spectrum_y.len());
//! ```

use crate::config::ProcessingConfig;
use crate::core::{RawAcquisition, ReconstructedResult};
use crate::data::apodization::ApodizationWindow;
use crate::data::signal::{analytic_signal, argmax, interp, linspace, remove_dc, unwrapped_phase};
use crate::error::ReconstructionError;
use realfft::RealFftPlanner;
use rustfft::FftPlanner;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::debug;

/// Power floor (W) applied before the dBm conversion.
pub const MIN_POWER_W: f64 = 1e-20;

/// Turns raw acquisitions into spectra on a fixed wavelength grid.
///
/// Holds the FFT planners so repeated acquisitions of the same length reuse their
/// plans, and the common output grid so every result shares one allocation.
pub struct SpectralReconstructor {
    config: ProcessingConfig,
    /// Complex transforms for the reference-channel Hilbert transform
    planner: FftPlanner<f64>,
    /// Real-input transforms for the interferogram spectrum
    real_planner: RealFftPlanner<f64>,
    grid: Arc<[f64]>,
    expected_travel_um: Option<f64>,
}

impl SpectralReconstructor {
    /// Build a reconstructor and its output grid from `config`.
    pub fn new(config: ProcessingConfig) -> Self {
        let grid = &config.output_grid;
        let grid: Arc<[f64]> = linspace(grid.min_um, grid.max_um, grid.points).into();
        Self {
            config,
            planner: FftPlanner::new(),
            real_planner: RealFftPlanner::new(),
            grid,
            expected_travel_um: None,
        }
    }

    /// Mirror travel every record is expected to cover.
    ///
    /// Raises the degeneracy threshold to `min_travel_fraction` of this travel
    /// when that is stricter than `min_mirror_travel_um`.
    pub fn with_expected_travel(mut self, travel_um: f64) -> Self {
        self.expected_travel_um = Some(travel_um).filter(|t| t.is_finite() && *t > 0.0);
        self
    }

    /// Smallest phase-derived travel a record must span to be reconstructed.
    pub fn required_travel_um(&self) -> f64 {
        let floor = self.config.min_mirror_travel_um;
        match self.expected_travel_um {
            Some(expected) => floor.max(expected * self.config.min_travel_fraction),
            None => floor,
        }
    }

    /// Constants the reconstructor was built with.
    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// The common output grid (µm, ascending).
    pub fn output_grid(&self) -> Arc<[f64]> {
        Arc::clone(&self.grid)
    }

    /// Reconstruct one raw acquisition.
    pub fn reconstruct_acquisition(
        &mut self,
        raw: &RawAcquisition,
        window: ApodizationWindow,
    ) -> Result<ReconstructedResult, ReconstructionError> {
        self.reconstruct(&raw.reference, &raw.primary, window)
    }

    /// Run the full pipeline on one pair of waveforms.
    ///
    /// # Errors
    ///
    /// - [`ReconstructionError::EmptyInput`] if both signals are empty
    /// - [`ReconstructionError::LengthMismatch`] if the channels differ in length
    /// - [`ReconstructionError::NonFiniteSample`] on NaN or infinite input
    /// - [`ReconstructionError::InsufficientReferenceSignal`] if the reference phase
    ///   covers less than [`required_travel_um`](Self::required_travel_um)
    pub fn reconstruct(
        &mut self,
        reference: &[f64],
        primary: &[f64],
        window: ApodizationWindow,
    ) -> Result<ReconstructedResult, ReconstructionError> {
        if primary.is_empty() && reference.is_empty() {
            return Err(ReconstructionError::EmptyInput);
        }
        if primary.len() != reference.len() {
            return Err(ReconstructionError::LengthMismatch {
                primary: primary.len(),
                reference: reference.len(),
            });
        }
        if primary.iter().chain(reference).any(|v| !v.is_finite()) {
            return Err(ReconstructionError::NonFiniteSample);
        }

        let n = primary.len();
        let mut primary = primary.to_vec();
        let mut reference = reference.to_vec();
        remove_dc(&mut primary);
        remove_dc(&mut reference);

        // Mirror position of every raw sample from the reference phase.
        let half_wavelength = self.config.reference_wavelength_um / 2.0;
        let phase = unwrapped_phase(&analytic_signal(&mut self.planner, &reference));
        let mut samples: Vec<(f64, f64)> = phase
            .iter()
            .map(|p| p / (2.0 * PI) * half_wavelength)
            .zip(primary)
            .collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (min_pos, max_pos) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (first.0, last.0),
            _ => return Err(ReconstructionError::EmptyInput),
        };
        let travel = max_pos - min_pos;
        debug!(samples = n, travel_um = travel, "Derived mirror travel from reference phase");
        let required = self.required_travel_um();
        if !travel.is_finite() || travel < required {
            return Err(ReconstructionError::InsufficientReferenceSignal {
                span_um: travel,
                required_um: required,
            });
        }

        let (positions, values): (Vec<f64>, Vec<f64>) = samples.into_iter().unzip();
        let interferogram_x = linspace(min_pos, max_pos, n);
        let interferogram_y_raw = interp(&interferogram_x, &positions, &values);

        let zpd_index = argmax(&interferogram_y_raw).unwrap_or(0);
        let apodization_window = window.build(n, zpd_index);
        let interferogram_y: Vec<f64> = interferogram_y_raw
            .iter()
            .zip(&apodization_window)
            .map(|(y, w)| y * w)
            .collect();

        let spectrum_y = self.spectrum_on_grid(&interferogram_y, travel)?;

        Ok(ReconstructedResult {
            interferogram_x,
            interferogram_y_raw,
            interferogram_y,
            apodization_window,
            zpd_index,
            spectrum_x: Arc::clone(&self.grid),
            spectrum_y,
        })
    }

    /// Zero-padded FFT power spectrum in dBm, resampled onto the output grid.
    fn spectrum_on_grid(
        &mut self,
        interferogram: &[f64],
        travel_um: f64,
    ) -> Result<Vec<f64>, ReconstructionError> {
        let k = self.config.zero_padding_factor.max(1);
        let padded_len = interferogram.len() * k;

        let fft = self.real_planner.plan_fft_forward(padded_len);
        let mut input = fft.make_input_vec();
        input[..interferogram.len()].copy_from_slice(interferogram);
        let mut spectrum = fft.make_output_vec();
        fft.process(&mut input, &mut spectrum)
            .map_err(|e| ReconstructionError::Transform(e.to_string()))?;

        // One-sided spectrum: padded_len / 2 + 1 bins.
        let bins = spectrum.len();
        let norm = bins as f64 / 2.0;
        let responsivity = self.config.responsivity_v_per_w;
        let power_dbm: Vec<f64> = spectrum
            .iter()
            .map(|z| {
                let power_w = z.norm() / norm / responsivity;
                10.0 * (1000.0 * power_w.max(MIN_POWER_W)).log10()
            })
            .collect();

        // Drop DC and the last bin; what remains is descending in wavelength.
        if bins < 3 {
            return Err(ReconstructionError::NoSpectralBins);
        }
        let scale = 2.0 * travel_um * k as f64;
        let (wavelengths, dbm): (Vec<f64>, Vec<f64>) = (1..bins - 1)
            .rev()
            .map(|i| (scale / i as f64, power_dbm[i]))
            .unzip();

        Ok(interp(&self.grid, &wavelengths, &dbm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputGrid;
    use crate::hardware::mock::SyntheticInterferometer;

    fn small_config() -> ProcessingConfig {
        ProcessingConfig {
            output_grid: OutputGrid {
                min_um: 1.0,
                max_um: 20.0,
                points: 20_000,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_empty_and_mismatched_input() {
        let mut reconstructor = SpectralReconstructor::new(small_config());
        assert_eq!(
            reconstructor
                .reconstruct(&[], &[], ApodizationWindow::Boxcar)
                .unwrap_err(),
            ReconstructionError::EmptyInput
        );
        assert_eq!(
            reconstructor
                .reconstruct(&[0.0; 4], &[0.0; 5], ApodizationWindow::Boxcar)
                .unwrap_err(),
            ReconstructionError::LengthMismatch {
                primary: 5,
                reference: 4
            }
        );
        assert_eq!(
            reconstructor
                .reconstruct(&[0.0, f64::NAN], &[0.0, 1.0], ApodizationWindow::Boxcar)
                .unwrap_err(),
            ReconstructionError::NonFiniteSample
        );
    }

    #[test]
    fn test_flat_reference_is_insufficient() {
        let mut reconstructor = SpectralReconstructor::new(small_config());
        let (primary, _) = SyntheticInterferometer::default().generate(2_048, 1);
        let flat = vec![0.7; primary.len()];
        let err = reconstructor
            .reconstruct(&flat, &primary, ApodizationWindow::Hanning)
            .unwrap_err();
        assert!(matches!(
            err,
            ReconstructionError::InsufficientReferenceSignal { span_um, .. } if span_um < 10.0
        ));
    }

    #[test]
    fn test_expected_travel_raises_threshold() {
        let (primary, reference) = SyntheticInterferometer::default().generate(4_096, 2);

        let mut strict = SpectralReconstructor::new(small_config()).with_expected_travel(5_000.0);
        assert_eq!(strict.required_travel_um(), 2_500.0);
        let err = strict
            .reconstruct(&reference, &primary, ApodizationWindow::Hanning)
            .unwrap_err();
        assert!(matches!(
            err,
            ReconstructionError::InsufficientReferenceSignal { span_um, required_um }
                if span_um < 101.0 && required_um == 2_500.0
        ));

        let mut matching = SpectralReconstructor::new(small_config()).with_expected_travel(100.0);
        assert_eq!(matching.required_travel_um(), 50.0);
        assert!(matching
            .reconstruct(&reference, &primary, ApodizationWindow::Hanning)
            .is_ok());

        let short_scan = SpectralReconstructor::new(small_config()).with_expected_travel(4.0);
        assert_eq!(short_scan.required_travel_um(), 10.0);
    }

    #[test]
    fn test_lengths_and_travel() {
        let mut reconstructor = SpectralReconstructor::new(small_config());
        let source = SyntheticInterferometer::default();
        let (primary, reference) = source.generate(4_096, 3);
        let result = reconstructor
            .reconstruct(&reference, &primary, ApodizationWindow::BlackmanHarris)
            .unwrap();

        assert_eq!(result.interferogram_x.len(), 4_096);
        assert_eq!(result.interferogram_y_raw.len(), 4_096);
        assert_eq!(result.interferogram_y.len(), 4_096);
        assert_eq!(result.apodization_window.len(), 4_096);
        assert_eq!(result.spectrum_x.len(), 20_000);
        assert_eq!(result.spectrum_y.len(), 20_000);
        assert_eq!(result.apodization_window[result.zpd_index], 1.0);

        let travel = result.interferogram_x[4_095] - result.interferogram_x[0];
        assert!((travel - source.travel_um).abs() < 1.0, "travel {travel}");
        assert!(result.interferogram_x.windows(2).all(|w| w[1] >= w[0]));
        assert!(result.spectrum_y.iter().all(|y| y.is_finite()));
    }

    #[test]
    fn test_zpd_near_source_position() {
        let mut reconstructor = SpectralReconstructor::new(small_config());
        let source = SyntheticInterferometer::default();
        let (primary, reference) = source.generate(8_192, 11);
        let result = reconstructor
            .reconstruct(&reference, &primary, ApodizationWindow::Boxcar)
            .unwrap();
        let zpd_um = result.interferogram_x[result.zpd_index] - result.interferogram_x[0];
        let expected = source.travel_um * source.zpd_fraction;
        assert!((zpd_um - expected).abs() < 1.0, "zpd at {zpd_um}");
    }
}
