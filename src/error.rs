//! Custom error types for the application.
//!
//! This module defines the primary error type, `FtsError`, together with the narrower
//! error enums it wraps. Using the `thiserror` crate, it provides a centralized and
//! consistent way to describe what can go wrong between connecting to the hardware and
//! producing an averaged spectrum.
//!
//! ## Error Hierarchy
//!
//! `FtsError` consolidates the run-level error sources:
//!
//! - **`DeviceConnection`**: the stage or the digitizer is not reachable. Fatal to
//!   starting a run.
//! - **`AcquisitionTimeout`** / **`AcquisitionFailed`**: a single cycle went wrong. Inside
//!   a run these never reach the caller directly; they are carried as an
//!   [`AcquisitionFailure`] and retried until the failure budget is exhausted.
//! - **`Reconstruction`**: the reconstructor could not turn the raw waveforms into a
//!   spectrum (see [`ReconstructionError`]).
//! - **`TooManyFailures`**: the run-level abort once the failure budget is spent.
//! - **`Config`**: invalid settings, surfaced before any device is touched
//!   (see [`ConfigError`]).
//!
//! By using `#[from]`, `FtsError` can be created from the narrower types with the `?`
//! operator.

use crate::hardware::capabilities::MeasurementStatus;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type FtsResult<T> = std::result::Result<T, FtsError>;

/// Run-level error type.
#[derive(Error, Debug)]
pub enum FtsError {
    /// The stage or the digitizer is unreachable
    #[error("Device connection error: {0}")]
    DeviceConnection(String),

    /// The digitizer did not finish in time
    #[error("Acquisition timed out after {0:?}")]
    AcquisitionTimeout(Duration),

    /// A single acquisition went wrong
    #[error("Acquisition failed: {0}")]
    AcquisitionFailed(String),

    /// Raw waveforms could not be reconstructed
    #[error("Reconstruction error: {0}")]
    Reconstruction(#[from] ReconstructionError),

    /// The failure budget of the run is spent
    #[error(
        "More than 20% of the ordered measurements failed ({failed} failed, {allowed} allowed, {requested} requested)"
    )]
    TooManyFailures {
        /// Failed attempts so far
        failed: usize,
        /// Failures the budget tolerates
        allowed: usize,
        /// Cycles requested for the run
        requested: usize,
    },

    /// Invalid settings
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A second run was requested while one is in flight
    #[error("A measurement run is already in progress")]
    AlreadyRunning,

    /// The worker task panicked or was cancelled
    #[error("Measurement worker terminated unexpectedly: {0}")]
    WorkerPanicked(String),
}

/// Errors raised while turning one raw acquisition into a spectrum.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconstructionError {
    /// Both channels are empty
    #[error("Primary and reference signals are empty")]
    EmptyInput,

    /// The channels differ in length
    #[error("Signal length mismatch: primary has {primary} samples, reference has {reference}")]
    LengthMismatch {
        /// Samples in the detector channel
        primary: usize,
        /// Samples in the reference channel
        reference: usize,
    },

    /// A channel holds NaN or infinite samples
    #[error("Input signal contains non-finite samples")]
    NonFiniteSample,

    /// The reference phase covers too little mirror travel
    #[error(
        "Reference signal spans only {span_um:.3} um of mirror travel (at least {required_um:.3} um required)"
    )]
    InsufficientReferenceSignal {
        /// Travel derived from the reference phase
        span_um: f64,
        /// Smallest travel accepted
        required_um: f64,
    },

    /// The record is too short for a spectrum
    #[error("Interferogram is too short to produce any spectral bins")]
    NoSpectralBins,

    /// The FFT rejected its buffers
    #[error("FFT failed: {0}")]
    Transform(String),
}

/// Configuration errors: loading, validation and unknown names.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration source could not be read or parsed
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),

    /// A value failed validation
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// Unrecognized apodization window name
    #[error("Unknown apodization window '{0}'")]
    UnknownWindow(String),

    /// A value does not fit the connected hardware
    #[error("Setting out of range: {0}")]
    OutOfRange(String),
}

/// Errors from post-processing of finished spectra.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    /// A spectrum has no samples
    #[error("Spectrum is empty")]
    EmptySpectrum,

    /// The two spectra have different axes
    #[error("Spectra do not share the same wavelength grid")]
    GridMismatch,
}

/// Why a single acquisition cycle did not produce a result.
///
/// Every variant is retryable; the orchestrator decides whether the run
/// survives it by consulting its [`FailureBudget`](crate::error_recovery::FailureBudget).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionFailure {
    /// The measurement timed out
    #[error("digitizer did not finish within {0:?}")]
    Timeout(Duration),

    /// The digitizer reported a non-ok status
    #[error("digitizer reported status '{0}'")]
    DeviceStatus(MeasurementStatus),

    /// A device call returned an error
    #[error("device error: {0}")]
    Device(String),

    /// The record could not be reconstructed
    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),
}

impl From<AcquisitionFailure> for FtsError {
    fn from(failure: AcquisitionFailure) -> Self {
        match failure {
            AcquisitionFailure::Timeout(after) => FtsError::AcquisitionTimeout(after),
            AcquisitionFailure::Reconstruction(err) => FtsError::Reconstruction(err),
            other => FtsError::AcquisitionFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FtsError::DeviceConnection("stage on /dev/ttyUSB0".to_string());
        assert_eq!(
            err.to_string(),
            "Device connection error: stage on /dev/ttyUSB0"
        );
    }

    #[test]
    fn test_too_many_failures_message() {
        let err = FtsError::TooManyFailures {
            failed: 3,
            allowed: 2,
            requested: 10,
        };
        assert!(err
            .to_string()
            .starts_with("More than 20% of the ordered measurements failed"));
    }

    #[test]
    fn test_acquisition_failure_conversion() {
        let timeout: FtsError = AcquisitionFailure::Timeout(Duration::from_millis(250)).into();
        assert!(matches!(timeout, FtsError::AcquisitionTimeout(_)));

        let status: FtsError = AcquisitionFailure::DeviceStatus(MeasurementStatus::Fail).into();
        assert_eq!(
            status.to_string(),
            "Acquisition failed: digitizer reported status 'fail'"
        );

        let recon: FtsError =
            AcquisitionFailure::Reconstruction(ReconstructionError::EmptyInput).into();
        assert!(matches!(
            recon,
            FtsError::Reconstruction(ReconstructionError::EmptyInput)
        ));
    }
}
