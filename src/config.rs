//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading. Configuration is loaded from:
//! 1. `config/rust_fts.toml` (base configuration)
//! 2. Environment variables (prefixed with `RUSTFTS_`, nested keys separated by `__`)
//!
//! Every section has defaults, so a missing file yields a usable configuration.
//!
//! # Environment Variable Overrides
//!
//! ```text
//! RUSTFTS_APPLICATION__LOG_LEVEL=debug
//! RUSTFTS_ACQUISITION__CYCLES=20
//! RUSTFTS_ACQUISITION__APODIZATION=blackman-harris
//! RUSTFTS_PROCESSING__OUTPUT_GRID__POINTS=500000
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_fts::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("Cycles per run: {}", settings.acquisition.cycles);
//!     println!("Window: {}", settings.acquisition.apodization);
//!     Ok(())
//! }
//! ```

use crate::data::apodization::ApodizationWindow;
use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/rust_fts.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Scan and digitizer settings for a measurement run
    pub acquisition: AcquisitionConfig,
    /// Spectral reconstruction constants
    pub processing: ProcessingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "FTS".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Settings for one `perform_measurements` call.
///
/// Immutable for the duration of a run; the orchestrator takes it by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Stage position where the sweep proper begins
    pub scan_start_um: f64,
    /// Mirror travel covered by one record
    pub scan_length_um: f64,
    /// Stage speed during the sweep
    pub scan_speed_um_per_s: f64,
    /// Extra travel before `scan_start_um` so the stage is at speed when the sweep begins
    pub run_up_um: f64,
    /// Digitizer sample-rate index
    pub sample_rate_index: usize,
    /// Hardware trigger settings
    pub trigger: TriggerConfig,
    /// Apodization window applied before the FFT
    pub apodization: ApodizationWindow,
    /// Number of successful cycles to average
    pub cycles: usize,
    /// Added to the record duration to form the per-cycle measurement timeout
    pub timeout_margin_ms: u64,
    /// Keep raw waveforms of every cycle in the average state
    pub retain_raw_data: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            scan_start_um: 149_000.0,
            scan_length_um: 5_000.0,
            scan_speed_um_per_s: 5_000.0,
            run_up_um: 500.0,
            sample_rate_index: 7,
            trigger: TriggerConfig::default(),
            apodization: ApodizationWindow::Boxcar,
            cycles: 5,
            timeout_margin_ms: 2_000,
            retain_raw_data: true,
        }
    }
}

/// Digitizer trigger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Wait for the hardware trigger instead of measuring free-running
    pub enabled: bool,
    /// Trigger level
    pub level: f64,
    /// Trigger hysteresis
    pub hysteresis: f64,
    /// Position of the trigger point within the record, in percent
    pub reference_percent: f64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 100.0,
            hysteresis: 10.0,
            reference_percent: 50.0,
        }
    }
}

/// Constants of the reconstruction pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Wavelength of the stabilized reference laser
    pub reference_wavelength_um: f64,
    /// Zero-padding factor K
    pub zero_padding_factor: usize,
    /// Detector responsivity used for the V to W conversion
    pub responsivity_v_per_w: f64,
    /// Smallest phase-derived mirror travel accepted as a usable reference
    pub min_mirror_travel_um: f64,
    /// Smallest fraction of the requested scan length the reference phase must cover
    pub min_travel_fraction: f64,
    /// Common wavelength axis every spectrum is resampled onto
    pub output_grid: OutputGrid,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            reference_wavelength_um: 1.547_718,
            zero_padding_factor: 8,
            responsivity_v_per_w: 7.0e4,
            min_mirror_travel_um: 10.0,
            min_travel_fraction: 0.5,
            output_grid: OutputGrid::default(),
        }
    }
}

/// Bounds and density of the common output grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputGrid {
    /// Shortest wavelength (µm)
    pub min_um: f64,
    /// Longest wavelength (µm)
    pub max_um: f64,
    /// Number of grid points
    pub points: usize,
}

impl Default for OutputGrid {
    fn default() -> Self {
        Self {
            min_um: 0.1,
            max_um: 300.0,
            points: 2_000_000,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from `config/rust_fts.toml` and environment variables
    ///
    /// Configuration is loaded in this order of precedence (highest to lowest):
    /// 1. Environment variables (`RUSTFTS_` prefix)
    /// 2. `config/rust_fts.toml`
    /// 3. Built-in defaults
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUSTFTS_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        self.acquisition.validate()?;
        self.processing.validate()
    }
}

fn require_finite(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{name} must be a finite number (got {value})"
        )))
    }
}

/// Rejects NaN and infinity as well as values at or below zero.
fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{name} must be > 0 (got {value})"
        )))
    }
}

fn require_non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{name} must be >= 0 (got {value})"
        )))
    }
}

impl AcquisitionConfig {
    /// Check the values that do not depend on the connected hardware.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_finite("scan_start_um", self.scan_start_um)?;
        require_positive("scan_length_um", self.scan_length_um)?;
        require_positive("scan_speed_um_per_s", self.scan_speed_um_per_s)?;
        require_non_negative("run_up_um", self.run_up_um)?;
        require_non_negative("trigger.hysteresis", self.trigger.hysteresis)?;
        require_finite("trigger.level", self.trigger.level)?;
        if self.cycles == 0 {
            return Err(ConfigError::Validation(
                "cycles must be at least 1".to_string(),
            ));
        }
        if self.timeout_margin_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_margin_ms must be > 0".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.trigger.reference_percent) {
            return Err(ConfigError::Validation(format!(
                "trigger.reference_percent must be within 0-100 (got {})",
                self.trigger.reference_percent
            )));
        }
        Ok(())
    }

    /// Number of samples in one record at `sample_rate_hz`.
    pub fn sample_count(&self, sample_rate_hz: f64) -> usize {
        (self.scan_length_um / self.scan_speed_um_per_s * sample_rate_hz).round() as usize
    }

    /// Per-cycle measurement timeout: record duration plus the configured margin.
    pub fn measurement_timeout(&self, sample_rate_hz: f64) -> Duration {
        let record = self.sample_count(sample_rate_hz) as f64 / sample_rate_hz;
        Duration::from_secs_f64(record) + Duration::from_millis(self.timeout_margin_ms)
    }
}

impl ProcessingConfig {
    /// Check the reconstruction constants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("reference_wavelength_um", self.reference_wavelength_um)?;
        require_positive("responsivity_v_per_w", self.responsivity_v_per_w)?;
        require_positive("min_mirror_travel_um", self.min_mirror_travel_um)?;
        if !(self.min_travel_fraction > 0.0 && self.min_travel_fraction <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "min_travel_fraction must be within (0, 1] (got {})",
                self.min_travel_fraction
            )));
        }
        if self.zero_padding_factor == 0 {
            return Err(ConfigError::Validation(
                "zero_padding_factor must be at least 1".to_string(),
            ));
        }
        let grid = &self.output_grid;
        require_positive("output_grid.min_um", grid.min_um)?;
        require_positive("output_grid.max_um", grid.max_um)?;
        if grid.min_um >= grid.max_um {
            return Err(ConfigError::Validation(format!(
                "output_grid.min_um must be below max_um (got {} .. {})",
                grid.min_um, grid.max_um
            )));
        }
        if grid.points < 2 {
            return Err(ConfigError::Validation(
                "output_grid.points must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}
