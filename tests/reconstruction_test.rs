//! End-to-end reconstruction of synthetic interferograms.

use rust_fts::config::{OutputGrid, ProcessingConfig};
use rust_fts::core::RawAcquisition;
use rust_fts::data::absorbance::absorbance;
use rust_fts::data::reconstruction::SpectralReconstructor;
use rust_fts::data::{ApodizationWindow, AverageState};
use rust_fts::error::ReconstructionError;
use rust_fts::hardware::mock::SyntheticInterferometer;
use std::sync::Arc;

fn processing() -> ProcessingConfig {
    ProcessingConfig {
        output_grid: OutputGrid {
            min_um: 1.0,
            max_um: 20.0,
            points: 20_000,
        },
        ..Default::default()
    }
}

fn acquisition(samples: usize, seed: u64) -> RawAcquisition {
    let (primary, reference) = SyntheticInterferometer::default().generate(samples, seed);
    RawAcquisition::new(primary, reference)
}

#[test]
fn test_reconstruction_is_deterministic() {
    let raw = acquisition(6_000, 3);

    let mut first = SpectralReconstructor::new(processing());
    let a = first
        .reconstruct_acquisition(&raw, ApodizationWindow::BlackmanHarris)
        .unwrap();
    let b = first
        .reconstruct_acquisition(&raw, ApodizationWindow::BlackmanHarris)
        .unwrap();
    let c = SpectralReconstructor::new(processing())
        .reconstruct_acquisition(&raw, ApodizationWindow::BlackmanHarris)
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(a, c);
}

#[test]
fn test_spectral_line_is_recovered() {
    let raw = acquisition(8_192, 11);
    let result = SpectralReconstructor::new(processing())
        .reconstruct_acquisition(&raw, ApodizationWindow::Hanning)
        .unwrap();

    let (wavelength, power_dbm) = result.spectrum_peak().unwrap();
    assert!(
        (wavelength - 4.0).abs() < 0.2,
        "peak at {wavelength} um, expected near 4 um"
    );
    assert!(power_dbm.is_finite());
}

#[test]
fn test_record_length_does_not_change_the_grid() {
    let mut reconstructor = SpectralReconstructor::new(processing());
    let short = reconstructor
        .reconstruct_acquisition(&acquisition(4_096, 1), ApodizationWindow::Boxcar)
        .unwrap();
    let long = reconstructor
        .reconstruct_acquisition(&acquisition(6_000, 2), ApodizationWindow::Boxcar)
        .unwrap();

    assert_eq!(short.spectrum_x, long.spectrum_x);
    assert_eq!(short.spectrum_y.len(), long.spectrum_y.len());
    assert_eq!(short.interferogram_x.len(), 4_096);
    assert_eq!(long.interferogram_x.len(), 6_000);
}

#[test]
fn test_interferogram_outputs_are_consistent() {
    let result = SpectralReconstructor::new(processing())
        .reconstruct_acquisition(&acquisition(5_000, 5), ApodizationWindow::Tukey20)
        .unwrap();

    let n = result.interferogram_x.len();
    assert_eq!(result.interferogram_y_raw.len(), n);
    assert_eq!(result.interferogram_y.len(), n);
    assert_eq!(result.apodization_window.len(), n);
    assert!(result.interferogram_x.windows(2).all(|w| w[1] > w[0]));
    assert_eq!(result.apodization_window[result.zpd_index], 1.0);
    for i in 0..n {
        let expected = result.interferogram_y_raw[i] * result.apodization_window[i];
        assert!((result.interferogram_y[i] - expected).abs() < 1e-12);
    }
}

#[test]
fn test_boxcar_leaves_interferogram_untouched() {
    let result = SpectralReconstructor::new(processing())
        .reconstruct_acquisition(&acquisition(3_000, 9), ApodizationWindow::Boxcar)
        .unwrap();
    assert!(result.apodization_window.iter().all(|&w| w == 1.0));
    assert_eq!(result.interferogram_y, result.interferogram_y_raw);
}

#[test]
fn test_flat_reference_is_rejected() {
    let raw = acquisition(4_096, 4);
    let flat = vec![0.3; raw.len()];
    let err = SpectralReconstructor::new(processing())
        .reconstruct(&flat, &raw.primary, ApodizationWindow::Hanning)
        .unwrap_err();
    assert!(matches!(
        err,
        ReconstructionError::InsufficientReferenceSignal { .. }
    ));
}

#[test]
fn test_average_is_the_elementwise_mean() {
    let mut reconstructor = SpectralReconstructor::new(processing());
    let mut state = AverageState::default();
    let mut results = Vec::new();
    for seed in 0..4 {
        let result = Arc::new(
            reconstructor
                .reconstruct_acquisition(&acquisition(4_096, seed), ApodizationWindow::Hanning)
                .unwrap(),
        );
        state.append(Arc::clone(&result), None);
        results.push(result);
    }

    let average = state.current_average();
    assert_eq!(average.count, 4);
    assert_eq!(&*average.x, &*results[0].spectrum_x);
    for i in (0..average.y.len()).step_by(997) {
        let mean = results.iter().map(|r| r.spectrum_y[i]).sum::<f64>() / 4.0;
        assert!((average.y[i] - mean).abs() < 1e-9);
    }
}

#[test]
fn test_absorbance_of_identical_spectra_is_zero() {
    let result = SpectralReconstructor::new(processing())
        .reconstruct_acquisition(&acquisition(4_096, 8), ApodizationWindow::Hanning)
        .unwrap();
    let spectrum = result.spectrum();
    let absorbance = absorbance(&spectrum, &spectrum).unwrap();
    assert_eq!(absorbance.x, spectrum.x);
    assert!(absorbance.y.iter().all(|&a| a == 0.0));
}
