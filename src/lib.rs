//! Core library for the rust_fts application.
//!
//! Acquisition and spectral reconstruction for a scanning Fourier-transform
//! spectrometer: a motorized delay line sweeps the mirror while a two-channel
//! digitizer records the detector and a reference laser. The reference phase gives
//! the true mirror position of every sample; the detector signal is resampled,
//! apodized and Fourier transformed into a spectrum on a fixed wavelength grid, and
//! repeated cycles are averaged.
//!
//! # Modules
//!
//! - [`acquisition`]: the multi-cycle measurement run and the alignment preview
//! - [`data`]: apodization, reconstruction, averaging and absorbance
//! - [`hardware`]: device capability traits and simulated devices
//! - [`messages`]: listener interface between the acquisition worker and its consumer
//! - [`config`]: figment-based settings
//! - [`error`] / [`error_recovery`]: error taxonomy and the retry budget

pub mod acquisition;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod messages;
