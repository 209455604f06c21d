//! Hardware abstraction: device capability traits and simulated devices.

pub mod capabilities;
pub mod mock;

pub use capabilities::{DigitizerDevice, MeasurementSetup, MeasurementStatus, StageDevice};
