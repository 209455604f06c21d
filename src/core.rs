//! Core data types of the spectrometer.
//!
//! # Data Flow
//!
//! ```text
//! Digitizer --[RawAcquisition]--> SpectralReconstructor --[ReconstructedResult]--> AverageState
//!                                                                                      |
//!                                            AcquisitionListener <--[CycleReport]------+
//! ```
//!
//! Results travel as `Arc`s: the worker hands the same immutable value to the
//! accumulator and to every listener, so a consumer on another thread never sees
//! a buffer the worker is still writing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Acquisition
// =============================================================================

/// One record of both digitizer channels, sampled at a fixed rate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAcquisition {
    /// Detector channel (interferogram)
    pub primary: Vec<f64>,
    /// Reference-laser channel
    pub reference: Vec<f64>,
}

impl RawAcquisition {
    /// Pair the two channels of one record.
    pub fn new(primary: Vec<f64>, reference: Vec<f64>) -> Self {
        Self { primary, reference }
    }

    /// Number of samples in the primary channel.
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// True when neither channel holds samples.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.reference.is_empty()
    }
}

// =============================================================================
// Reconstruction
// =============================================================================

/// Output of one pass through the reconstruction pipeline.
///
/// `interferogram_x`, `interferogram_y_raw`, `interferogram_y` and
/// `apodization_window` always have the same length, as do `spectrum_x` and
/// `spectrum_y`. `spectrum_x` is the shared common output grid, identical for
/// every result produced by the same reconstructor.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconstructedResult {
    /// Uniform mirror-position axis (µm)
    pub interferogram_x: Vec<f64>,
    /// Resampled detector signal before apodization (V)
    pub interferogram_y_raw: Vec<f64>,
    /// Resampled detector signal after apodization (V)
    pub interferogram_y: Vec<f64>,
    /// Window applied to `interferogram_y_raw`
    pub apodization_window: Vec<f64>,
    /// Index of the zero-path-difference sample
    pub zpd_index: usize,
    /// Common wavelength grid (µm, ascending)
    pub spectrum_x: Arc<[f64]>,
    /// Optical power (dBm)
    pub spectrum_y: Vec<f64>,
}

impl ReconstructedResult {
    /// The spectrum as a standalone value.
    pub fn spectrum(&self) -> Spectrum {
        Spectrum::new(self.spectrum_x.to_vec(), self.spectrum_y.clone())
    }

    /// Wavelength and power of the strongest spectral sample.
    pub fn spectrum_peak(&self) -> Option<(f64, f64)> {
        peak(&self.spectrum_x, &self.spectrum_y)
    }
}

// =============================================================================
// Spectra
// =============================================================================

/// A spectrum: wavelength axis (µm) and values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Wavelength (µm)
    pub x: Vec<f64>,
    /// Value at each wavelength
    pub y: Vec<f64>,
}

impl Spectrum {
    /// Build a spectrum from its axis and values.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        Self { x, y }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// True when the spectrum holds no samples.
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Wavelength and value of the largest sample.
    pub fn peak(&self) -> Option<(f64, f64)> {
        peak(&self.x, &self.y)
    }
}

/// Running average of all spectra of the current run.
#[derive(Clone, Debug, PartialEq)]
pub struct AverageSpectrum {
    /// Wavelength grid (µm)
    pub x: Arc<[f64]>,
    /// Elementwise mean of the per-cycle spectra (dBm)
    pub y: Vec<f64>,
    /// Number of spectra in the mean
    pub count: usize,
}

impl Default for AverageSpectrum {
    fn default() -> Self {
        Self {
            x: Arc::from(Vec::new()),
            y: Vec::new(),
            count: 0,
        }
    }
}

impl AverageSpectrum {
    /// True before the first spectrum was added.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Copy out as a standalone spectrum.
    pub fn to_spectrum(&self) -> Spectrum {
        Spectrum::new(self.x.to_vec(), self.y.clone())
    }

    /// Wavelength and power of the strongest averaged sample.
    pub fn peak(&self) -> Option<(f64, f64)> {
        peak(&self.x, &self.y)
    }
}

/// Largest finite value of `y` and its `x`; the first one wins on ties.
fn peak(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    x.iter()
        .zip(y)
        .filter(|(_, y)| y.is_finite())
        .fold(None, |best: Option<(f64, f64)>, (&x, &y)| match best {
            Some((_, best_y)) if best_y >= y => best,
            _ => Some((x, y)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_peak_skips_non_finite() {
        let spectrum = Spectrum::new(
            vec![1.0, 2.0, 3.0, 4.0],
            vec![-50.0, f64::NAN, -10.0, -30.0],
        );
        assert_eq!(spectrum.peak(), Some((3.0, -10.0)));
        assert_eq!(Spectrum::default().peak(), None);
    }

    #[test]
    fn test_raw_acquisition_len() {
        let raw = RawAcquisition::new(vec![0.0; 16], vec![0.0; 16]);
        assert_eq!(raw.len(), 16);
        assert!(!raw.is_empty());
        assert!(RawAcquisition::default().is_empty());
    }
}
