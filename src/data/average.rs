//! Running average over the cycles of one measurement run.
//!
//! Spectra from one [`SpectralReconstructor`](crate::data::reconstruction::SpectralReconstructor)
//! share the common output grid, so the average is a plain elementwise mean.
//! Spectra of differing lengths (results that did not go through the common grid)
//! are truncated to the shortest stored one before summation.

use crate::core::{AverageSpectrum, RawAcquisition, ReconstructedResult};
use std::sync::Arc;
use tracing::warn;

/// Per-cycle results of the current run and their average.
#[derive(Debug, Default)]
pub struct AverageState {
    results: Vec<Arc<ReconstructedResult>>,
    raw: Vec<RawAcquisition>,
    average: Arc<AverageSpectrum>,
}

impl AverageState {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one cycle and recompute the average.
    ///
    /// `raw` is kept only when given; runs that do not retain raw data pass `None`.
    pub fn append(&mut self, result: Arc<ReconstructedResult>, raw: Option<RawAcquisition>) {
        self.results.push(result);
        if let Some(raw) = raw {
            self.raw.push(raw);
        }
        self.average = Arc::new(self.compute_average());
    }

    /// Snapshot of the current average. Empty before the first append.
    pub fn current_average(&self) -> Arc<AverageSpectrum> {
        Arc::clone(&self.average)
    }

    /// Clear all stored cycles and the average.
    pub fn reset(&mut self) {
        self.results.clear();
        self.raw.clear();
        self.average = Arc::new(AverageSpectrum::default());
    }

    /// Number of stored cycles.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True before the first result was appended.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Stored per-cycle results, oldest first.
    pub fn results(&self) -> &[Arc<ReconstructedResult>] {
        &self.results
    }

    /// Stored raw acquisitions, oldest first.
    pub fn raw_acquisitions(&self) -> &[RawAcquisition] {
        &self.raw
    }

    fn compute_average(&self) -> AverageSpectrum {
        let Some(first) = self.results.first() else {
            return AverageSpectrum::default();
        };

        let len = self
            .results
            .iter()
            .map(|r| r.spectrum_y.len().min(r.spectrum_x.len()))
            .min()
            .unwrap_or(0);
        let shared_grid = self
            .results
            .iter()
            .all(|r| Arc::ptr_eq(&r.spectrum_x, &first.spectrum_x) || r.spectrum_x == first.spectrum_x);
        if !shared_grid {
            warn!(
                cycles = self.results.len(),
                len, "Averaging spectra with differing wavelength axes, truncating to the shortest"
            );
        }

        let mut sum = vec![0.0; len];
        for result in &self.results {
            for (acc, y) in sum.iter_mut().zip(&result.spectrum_y[..len]) {
                *acc += y;
            }
        }
        let count = self.results.len();
        let y = sum.into_iter().map(|s| s / count as f64).collect();

        let x = if first.spectrum_x.len() == len {
            Arc::clone(&first.spectrum_x)
        } else {
            first.spectrum_x[..len].into()
        };

        AverageSpectrum { x, y, count }
    }
}
