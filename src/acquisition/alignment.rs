//! Alignment preview: a free-running back-and-forth sweep for adjusting the optics.
//!
//! The preview repeatedly sweeps the mirror around a centre position and sends the
//! raw trace of one channel to the consumer after every sweep. Settings and the
//! displayed channel can be changed while it runs through `watch` channels; the
//! digitizer is only reconfigured when the record geometry actually changes.

use crate::acquisition::StopHandle;
use crate::error::{ConfigError, FtsError, FtsResult};
use crate::hardware::{DigitizerDevice, MeasurementSetup, StageDevice};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Digitizer rate index used for previews.
pub const PREVIEW_SAMPLE_RATE_INDEX: usize = 11;

/// Shortest sweep period.
pub const MIN_PERIOD_MS: u64 = 500;
/// Longest sweep period.
pub const MAX_PERIOD_MS: u64 = 60_000;
/// Smallest sweep half-length.
pub const MIN_AMPLITUDE_UM: f64 = 250.0;
/// Largest sweep half-length.
pub const MAX_AMPLITUDE_UM: f64 = 75_000.0;

/// Extra time granted to a preview record beyond the sweep period.
const RECORD_MARGIN: Duration = Duration::from_secs(2);

/// Sweep parameters of the preview.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSettings {
    /// Centre of the sweep
    pub center_um: f64,
    /// Half the sweep length
    pub amplitude_um: f64,
    /// Duration of one sweep
    pub period_ms: u64,
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            center_um: 75_000.0,
            amplitude_um: 5_000.0,
            period_ms: 2_000,
        }
    }
}

impl AlignmentSettings {
    /// Settings with every value forced into its allowed range.
    pub fn clamped(&self, nominal_length_um: f64) -> Self {
        let center_max = (nominal_length_um - 1.0).max(1.0);
        let center_um = if self.center_um.is_nan() {
            1.0
        } else {
            self.center_um.clamp(1.0, center_max)
        };
        let amplitude_um = if self.amplitude_um.is_nan() {
            MIN_AMPLITUDE_UM
        } else {
            self.amplitude_um.clamp(MIN_AMPLITUDE_UM, MAX_AMPLITUDE_UM)
        };
        Self {
            center_um,
            amplitude_um,
            period_ms: self.period_ms.clamp(MIN_PERIOD_MS, MAX_PERIOD_MS),
        }
    }
}

/// Which digitizer channel the preview shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreviewChannel {
    /// Detector channel
    #[default]
    Primary,
    /// Reference-laser channel
    Reference,
}

/// One preview sweep.
#[derive(Clone, Debug)]
pub struct PreviewFrame {
    /// Channel the samples were taken from
    pub channel: PreviewChannel,
    /// Raw record (V)
    pub samples: Vec<f64>,
    /// Sample rate of the record
    pub sample_rate_hz: f64,
    /// Settings the sweep ran with
    pub settings: AlignmentSettings,
    /// When the record was fetched
    pub timestamp: DateTime<Utc>,
}

/// Record geometry the digitizer is currently configured for.
#[derive(Clone, Copy, Debug, PartialEq)]
struct RecordGeometry {
    sample_count: usize,
    period_ms: u64,
    start_um: f64,
}

/// Alignment preview loop.
pub struct AlignmentPreview;

impl AlignmentPreview {
    /// Sweep until `stop` is requested or the frame receiver is dropped.
    ///
    /// Returns the number of frames delivered. The stage is stopped on exit,
    /// including when a device error ends the loop.
    pub async fn run(
        stage: Arc<dyn StageDevice>,
        digitizer: Arc<dyn DigitizerDevice>,
        settings: watch::Receiver<AlignmentSettings>,
        channel: watch::Receiver<PreviewChannel>,
        frames: mpsc::Sender<PreviewFrame>,
        stop: StopHandle,
    ) -> FtsResult<usize> {
        let sample_rate_hz = digitizer
            .sample_rate(PREVIEW_SAMPLE_RATE_INDEX)
            .ok_or_else(|| {
                ConfigError::OutOfRange(format!(
                    "digitizer has no sample rate index {PREVIEW_SAMPLE_RATE_INDEX}"
                ))
            })?;

        info!("Alignment preview started");
        let result = sweep_loop(
            stage.as_ref(),
            digitizer.as_ref(),
            sample_rate_hz,
            &settings,
            &channel,
            &frames,
            &stop,
        )
        .await;

        if let Err(e) = stage.stop().await {
            warn!("Failed to stop the stage after preview: {:#}", e);
        }
        info!("Alignment preview stopped");
        result
    }
}

async fn sweep_loop(
    stage: &dyn StageDevice,
    digitizer: &dyn DigitizerDevice,
    sample_rate_hz: f64,
    settings: &watch::Receiver<AlignmentSettings>,
    channel: &watch::Receiver<PreviewChannel>,
    frames: &mpsc::Sender<PreviewFrame>,
    stop: &StopHandle,
) -> FtsResult<usize> {
    let nominal = stage.nominal_length_um();
    let max_speed = stage.max_speed_um_per_s();
    let mut configured: Option<RecordGeometry> = None;
    let mut delivered = 0;

    while !stop.is_stop_requested() {
        let current = settings.borrow().clamped(nominal);
        let start_um = (current.center_um - current.amplitude_um).clamp(0.0, nominal);
        let end_um = (current.center_um + current.amplitude_um).clamp(0.0, nominal);
        let period = Duration::from_millis(current.period_ms);
        let geometry = RecordGeometry {
            sample_count: ((period.as_secs_f64() * sample_rate_hz).round() as usize).max(1),
            period_ms: current.period_ms,
            start_um,
        };

        if configured != Some(geometry) {
            debug!(?geometry, "Reconfiguring digitizer for preview");
            let setup = MeasurementSetup {
                sample_rate_index: PREVIEW_SAMPLE_RATE_INDEX,
                sample_length: geometry.sample_count,
                trigger_enabled: false,
                trigger_level: 0.0,
                trigger_hysteresis: 0.0,
                trigger_reference: 0.0,
            };
            digitizer
                .configure_for_measurement(&setup)
                .await
                .map_err(preview_error)?;
            configured = Some(geometry);
        }

        stage.stop().await.map_err(preview_error)?;
        stage.wait_until_idle().await.map_err(preview_error)?;
        stage
            .set_position(start_um, max_speed)
            .await
            .map_err(preview_error)?;
        stage.wait_until_idle().await.map_err(preview_error)?;

        let sweep_speed =
            ((end_um - start_um) / period.as_secs_f64()).clamp(f64::MIN_POSITIVE, max_speed);
        stage
            .set_position(end_um, sweep_speed)
            .await
            .map_err(preview_error)?;

        let status =
            tokio::time::timeout(period + RECORD_MARGIN, digitizer.measure_data_standalone())
                .await;

        stage.wait_until_idle().await.map_err(preview_error)?;
        stage
            .set_position(start_um, max_speed)
            .await
            .map_err(preview_error)?;

        match status {
            Err(_) => warn!("Preview measurement timed out"),
            Ok(Err(e)) => warn!("Preview measurement failed: {:#}", e),
            Ok(Ok(status)) if !status.is_ok() => {
                warn!("Preview measurement failed due to: {}", status)
            }
            Ok(Ok(_)) => {
                let selected = *channel.borrow();
                let samples = match selected {
                    PreviewChannel::Primary => digitizer.last_primary_data().await,
                    PreviewChannel::Reference => digitizer.last_reference_data().await,
                };
                let frame = PreviewFrame {
                    channel: selected,
                    samples,
                    sample_rate_hz,
                    settings: current,
                    timestamp: Utc::now(),
                };
                if frames.send(frame).await.is_err() {
                    debug!("Preview consumer went away");
                    break;
                }
                delivered += 1;
            }
        }
    }

    Ok(delivered)
}

fn preview_error(e: anyhow::Error) -> FtsError {
    FtsError::AcquisitionFailed(format!("alignment preview: {e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{Journal, MockDigitizer, MockEvent, MockStage};

    #[test]
    fn test_settings_are_clamped() {
        let wild = AlignmentSettings {
            center_um: 200_000.0,
            amplitude_um: 10.0,
            period_ms: 100,
        };
        let clamped = wild.clamped(150_000.0);
        assert_eq!(clamped.center_um, 149_999.0);
        assert_eq!(clamped.amplitude_um, MIN_AMPLITUDE_UM);
        assert_eq!(clamped.period_ms, MIN_PERIOD_MS);

        let clamped = AlignmentSettings {
            center_um: -5.0,
            amplitude_um: 1.0e6,
            period_ms: 1_000_000,
        }
        .clamped(150_000.0);
        assert_eq!(clamped.center_um, 1.0);
        assert_eq!(clamped.amplitude_um, MAX_AMPLITUDE_UM);
        assert_eq!(clamped.period_ms, MAX_PERIOD_MS);
    }

    #[tokio::test]
    async fn test_preview_sweeps_and_delivers_selected_channel() {
        let journal = Journal::new();
        let stage = Arc::new(MockStage::new().with_journal(journal.clone()).connected());
        let digitizer = Arc::new(MockDigitizer::new().with_journal(journal.clone()).connected());

        let (_settings_tx, settings_rx) = watch::channel(AlignmentSettings {
            center_um: 10_000.0,
            amplitude_um: 1_000.0,
            period_ms: 500,
        });
        let (_channel_tx, channel_rx) = watch::channel(PreviewChannel::Reference);
        let (frames_tx, mut frames_rx) = mpsc::channel(4);
        let stop = StopHandle::new();

        let preview = tokio::spawn(AlignmentPreview::run(
            stage,
            digitizer,
            settings_rx,
            channel_rx,
            frames_tx,
            stop.clone(),
        ));

        let frame = frames_rx.recv().await.unwrap();
        assert_eq!(frame.channel, PreviewChannel::Reference);
        assert_eq!(frame.samples.len(), (0.5 * frame.sample_rate_hz).round() as usize);
        let _ = frames_rx.recv().await.unwrap();

        stop.request_stop();
        drop(frames_rx);
        let delivered = preview.await.unwrap().unwrap();
        assert!(delivered >= 2);

        let events = journal.events();
        let configures = events
            .iter()
            .filter(|e| matches!(e, MockEvent::DigitizerConfigure(_)))
            .count();
        assert_eq!(configures, 1);
        assert!(events.contains(&MockEvent::StageMove {
            target_um: 11_000.0,
            speed_um_per_s: 4_000.0
        }));
        assert_eq!(events.last(), Some(&MockEvent::StageStop));
    }
}
