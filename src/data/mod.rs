//! Signal processing: apodization, reconstruction, averaging and absorbance.

pub mod absorbance;
pub mod apodization;
pub mod average;
pub mod reconstruction;
pub mod signal;

pub use apodization::ApodizationWindow;
pub use average::AverageState;
pub use reconstruction::SpectralReconstructor;
