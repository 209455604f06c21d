//! Device capability traits consumed by the acquisition core.
//!
//! The concrete transports (serial protocol to the delay line, vendor API of the
//! lock-in digitizer) live behind these traits. All operations are async and are
//! awaited sequentially by the acquisition worker, never from a UI context.
//!
//! # Position units
//!
//! Stage positions are in micrometres and speeds in micrometres per second.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Motorized delay line moving the scanning mirror.
#[async_trait]
pub trait StageDevice: Send + Sync {
    /// Open the connection to the controller.
    async fn connect(&self) -> Result<()>;

    /// Whether `connect` has succeeded.
    fn is_connected(&self) -> bool;

    /// Run the controller's homing sequence. Returns once the command is accepted.
    async fn home(&self) -> Result<()>;

    /// Block until the stage reports no motion in progress.
    async fn wait_until_idle(&self) -> Result<()>;

    /// Command a move to `position_um` at `speed_um_per_s`.
    ///
    /// Returns as soon as the command is accepted; motion continues in the
    /// background. Use [`wait_until_idle`](Self::wait_until_idle) to block.
    async fn set_position(&self, position_um: f64, speed_um_per_s: f64) -> Result<()>;

    /// Abort any motion in progress.
    async fn stop(&self) -> Result<()>;

    /// Current position.
    async fn position(&self) -> Result<f64>;

    /// Usable travel of the delay line, starting at 0.
    fn nominal_length_um(&self) -> f64;

    /// Fastest supported speed.
    fn max_speed_um_per_s(&self) -> f64;
}

/// Two-channel digitizer recording the detector and the reference laser.
#[async_trait]
pub trait DigitizerDevice: Send + Sync {
    /// Open the connection to the instrument.
    async fn connect(&self) -> Result<()>;

    /// Whether `connect` has succeeded.
    fn is_connected(&self) -> bool;

    /// Sample rate in Hz for a rate index, `None` if the index is unknown.
    fn sample_rate(&self, index: usize) -> Option<f64>;

    /// Prepare the next acquisitions.
    async fn configure_for_measurement(&self, setup: &MeasurementSetup) -> Result<()>;

    /// Arm the hardware trigger. Must precede the stage motion it is meant to catch.
    async fn arm_trigger(&self) -> Result<()>;

    /// Acquire one record immediately.
    async fn measure_data_standalone(&self) -> Result<MeasurementStatus>;

    /// Acquire one record once the previously armed trigger fires.
    async fn measure_data_with_prearmed_trigger(&self) -> Result<MeasurementStatus>;

    /// Detector channel of the last successful measurement.
    async fn last_primary_data(&self) -> Vec<f64>;

    /// Reference-laser channel of the last successful measurement.
    async fn last_reference_data(&self) -> Vec<f64>;
}

/// Digitizer acquisition settings for a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSetup {
    /// Digitizer sample-rate index
    pub sample_rate_index: usize,
    /// Samples per record
    pub sample_length: usize,
    /// Wait for the hardware trigger
    pub trigger_enabled: bool,
    /// Trigger level
    pub trigger_level: f64,
    /// Trigger hysteresis
    pub trigger_hysteresis: f64,
    /// Trigger reference position within the record, in percent.
    pub trigger_reference: f64,
}

/// Completion status reported by the digitizer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementStatus {
    /// Record complete
    Ok,
    /// The digitizer gave up waiting
    Timeout,
    /// The record failed
    Fail,
    /// Any other status text
    Other(String),
}

impl MeasurementStatus {
    /// Whether the record is usable.
    pub fn is_ok(&self) -> bool {
        matches!(self, MeasurementStatus::Ok)
    }
}

impl fmt::Display for MeasurementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementStatus::Ok => f.write_str("ok"),
            MeasurementStatus::Timeout => f.write_str("timeout"),
            MeasurementStatus::Fail => f.write_str("fail"),
            MeasurementStatus::Other(text) => f.write_str(text),
        }
    }
}

impl FromStr for MeasurementStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "ok" => MeasurementStatus::Ok,
            "timeout" => MeasurementStatus::Timeout,
            "fail" => MeasurementStatus::Fail,
            other => MeasurementStatus::Other(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_text() {
        for text in ["ok", "timeout", "fail", "overflow"] {
            let status: MeasurementStatus = text.parse().unwrap();
            assert_eq!(status.to_string(), text);
        }
        assert!("OK ".parse::<MeasurementStatus>().unwrap().is_ok());
        assert!(!MeasurementStatus::Timeout.is_ok());
    }
}
