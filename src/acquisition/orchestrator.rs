//! Multi-cycle measurement run.
//!
//! The orchestrator drives the delay line and the digitizer through repeated
//! scan cycles on a dedicated tokio task, reconstructs every record, keeps the
//! running average and reports through an [`AcquisitionListener`].
//!
//! # State Machine
//!
//! ```text
//! Idle -> Preparing -> ( Positioning -> [TriggerArm] -> Acquiring -> Reconstructing )* -> Done | Stopped | Failed -> Idle
//! ```
//!
//! The current state is published on a `watch` channel. Whatever way a run ends,
//! including a panicking worker, the orchestrator is back in `Idle` afterwards.
//!
//! # Failure Handling
//!
//! A cycle that times out, reports a non-ok status, hits a device error or fails
//! to reconstruct does not consume a cycle slot: the same cycle is retried until
//! the [`FailureBudget`] is exhausted, at which point the run aborts with
//! [`FtsError::TooManyFailures`].
//!
//! # Example
//!
//! ```rust,ignore
//! let orchestrator = AcquisitionOrchestrator::new(stage, digitizer, listener, settings.processing);
//! orchestrator.initialize_hardware().await?;
//! let run = orchestrator.perform_measurements(settings.acquisition)?;
//! let stop = orchestrator.stop_handle();
//! // ... stop.request_stop() from anywhere ...
//! let report = AcquisitionOrchestrator::wait(run).await?;
//! ```

use crate::acquisition::StopHandle;
use crate::config::{AcquisitionConfig, ProcessingConfig};
use crate::core::{AverageSpectrum, RawAcquisition, ReconstructedResult};
use crate::data::{ApodizationWindow, AverageState, SpectralReconstructor};
use crate::error::{AcquisitionFailure, ConfigError, FtsError, FtsResult};
use crate::error_recovery::FailureBudget;
use crate::hardware::{DigitizerDevice, MeasurementSetup, MeasurementStatus, StageDevice};
use crate::messages::{AcquisitionListener, CycleReport};
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Status text of a run that completed every requested cycle.
pub const STATUS_DONE: &str = "Done";
/// Status text of a cancelled run.
pub const STATUS_STOPPED: &str = "Measurement stopped";

/// Where the orchestrator is in its state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcquisitionState {
    /// No run in flight
    Idle,
    /// Configuring the digitizer
    Preparing,
    /// Moving the stage to the scan start
    Positioning,
    /// Arming the hardware trigger
    TriggerArm,
    /// Sweeping and recording
    Acquiring,
    /// Turning the record into a spectrum
    Reconstructing,
    /// All cycles completed
    Done,
    /// Cancelled by a stop request
    Stopped,
    /// Aborted
    Failed,
}

impl AcquisitionState {
    /// Whether a run is in progress.
    pub fn is_busy(&self) -> bool {
        !matches!(
            self,
            AcquisitionState::Idle
                | AcquisitionState::Done
                | AcquisitionState::Stopped
                | AcquisitionState::Failed
        )
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Preparing => "preparing",
            AcquisitionState::Positioning => "positioning",
            AcquisitionState::TriggerArm => "arming trigger",
            AcquisitionState::Acquiring => "acquiring",
            AcquisitionState::Reconstructing => "reconstructing",
            AcquisitionState::Done => "done",
            AcquisitionState::Stopped => "stopped",
            AcquisitionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every requested cycle completed
    Done,
    /// A stop was requested
    Stopped,
    /// Human-readable reason
    Failed(String),
}

/// Summary returned by the worker task.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Successful cycles
    pub completed_cycles: usize,
    /// Cycles that failed and were retried
    pub failed_attempts: usize,
    /// Average over all successful cycles
    pub average: Arc<AverageSpectrum>,
}

/// Stage and digitizer parameters derived from an [`AcquisitionConfig`].
#[derive(Clone, Debug, PartialEq)]
pub struct ScanPlan {
    /// Positioning target, including the run-up
    pub start_um: f64,
    /// Sweep target
    pub end_um: f64,
    /// Stage speed for moves outside the sweep
    pub positioning_speed_um_per_s: f64,
    /// Digitizer sample rate (Hz)
    pub sample_rate_hz: f64,
    /// Samples per record
    pub sample_count: usize,
    /// Per-cycle measurement timeout
    pub timeout: Duration,
}

/// Drives measurement runs against one stage and one digitizer.
pub struct AcquisitionOrchestrator {
    stage: Arc<dyn StageDevice>,
    digitizer: Arc<dyn DigitizerDevice>,
    listener: Arc<dyn AcquisitionListener>,
    processing: ProcessingConfig,
    state: Arc<watch::Sender<AcquisitionState>>,
    stop: StopHandle,
    running: Arc<AtomicBool>,
}

impl AcquisitionOrchestrator {
    /// Create an idle orchestrator for one stage and one digitizer.
    pub fn new(
        stage: Arc<dyn StageDevice>,
        digitizer: Arc<dyn DigitizerDevice>,
        listener: Arc<dyn AcquisitionListener>,
        processing: ProcessingConfig,
    ) -> Self {
        let (state, _) = watch::channel(AcquisitionState::Idle);
        Self {
            stage,
            digitizer,
            listener,
            processing,
            state: Arc::new(state),
            stop: StopHandle::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current state.
    pub fn state(&self) -> AcquisitionState {
        *self.state.borrow()
    }

    /// Receiver for state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<AcquisitionState> {
        self.state.subscribe()
    }

    /// Handle for cancelling the current run from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Request a cooperative stop of the current run.
    ///
    /// Checked before every cycle and after positioning; device I/O in flight
    /// completes first.
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.stop.request_stop();
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Connect both devices and home the stage.
    pub async fn initialize_hardware(&self) -> FtsResult<()> {
        self.listener.on_status("Connecting to hardware...");

        let result: anyhow::Result<()> = async {
            self.stage.connect().await?;
            self.digitizer.connect().await?;
            self.stage.home().await?;
            self.stage.wait_until_idle().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                info!("Stage and digitizer connected");
                self.listener.on_status("Connected to hardware");
                Ok(())
            }
            Err(e) => {
                error!("Hardware initialization failed: {:#}", e);
                self.listener
                    .on_status("One or more hardware components failed to connect");
                Err(FtsError::DeviceConnection(format!("{e:#}")))
            }
        }
    }

    /// Derive the stage and digitizer parameters of a run, validating everything
    /// that can be checked before touching the hardware.
    pub fn plan(&self, config: &AcquisitionConfig) -> FtsResult<ScanPlan> {
        config.validate()?;
        self.processing.validate()?;

        let sample_rate_hz = self
            .digitizer
            .sample_rate(config.sample_rate_index)
            .ok_or_else(|| {
                ConfigError::OutOfRange(format!(
                    "sample rate index {} is not supported by the digitizer",
                    config.sample_rate_index
                ))
            })?;

        let nominal = self.stage.nominal_length_um();
        let max_speed = self.stage.max_speed_um_per_s();
        let sweep_end = config.scan_start_um - config.scan_length_um;
        if config.scan_start_um > nominal || sweep_end < 0.0 {
            return Err(ConfigError::OutOfRange(format!(
                "scan from {:.1} um down to {:.1} um does not fit the stage travel (0 - {:.1} um)",
                config.scan_start_um, sweep_end, nominal
            ))
            .into());
        }
        if config.scan_speed_um_per_s > max_speed {
            return Err(ConfigError::OutOfRange(format!(
                "scan speed {:.1} um/s exceeds the stage maximum of {:.1} um/s",
                config.scan_speed_um_per_s, max_speed
            ))
            .into());
        }

        let sample_count = config.sample_count(sample_rate_hz);
        if sample_count == 0 {
            return Err(ConfigError::OutOfRange(
                "scan is too short to record any samples".to_string(),
            )
            .into());
        }

        Ok(ScanPlan {
            start_um: (config.scan_start_um + config.run_up_um).clamp(0.0, nominal),
            end_um: sweep_end.clamp(0.0, nominal),
            positioning_speed_um_per_s: max_speed,
            sample_rate_hz,
            sample_count,
            timeout: config.measurement_timeout(sample_rate_hz),
        })
    }

    /// Start a run of `config.cycles` cycles on a background task.
    ///
    /// Returns immediately; progress arrives through the listener and the
    /// returned handle resolves to the [`RunReport`].
    ///
    /// # Errors
    ///
    /// Nothing is started when a device is not connected, a run is already in
    /// flight, or the configuration is invalid for the connected hardware.
    pub fn perform_measurements(
        &self,
        config: AcquisitionConfig,
    ) -> FtsResult<JoinHandle<RunReport>> {
        if !self.stage.is_connected() || !self.digitizer.is_connected() {
            return Err(FtsError::DeviceConnection(
                "stage and digitizer must be connected before measuring".to_string(),
            ));
        }
        let plan = self.plan(&config)?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FtsError::AlreadyRunning);
        }
        self.stop.clear();

        info!(
            cycles = config.cycles,
            samples = plan.sample_count,
            sample_rate_hz = plan.sample_rate_hz,
            window = %config.apodization,
            triggered = config.trigger.enabled,
            "Starting measurement run"
        );

        let span = info_span!("measurement_run", cycles = config.cycles);
        let worker = RunWorker {
            stage: Arc::clone(&self.stage),
            digitizer: Arc::clone(&self.digitizer),
            listener: Arc::clone(&self.listener),
            stop: self.stop.clone(),
            state: Arc::clone(&self.state),
            processing: self.processing.clone(),
            reconstructor: None,
            config,
            plan,
            _guard: RunGuard {
                running: Arc::clone(&self.running),
                state: Arc::clone(&self.state),
            },
        };
        Ok(tokio::spawn(worker.run().instrument(span)))
    }

    /// Await a run handle, turning a worker panic into an error.
    pub async fn wait(handle: JoinHandle<RunReport>) -> FtsResult<RunReport> {
        handle
            .await
            .map_err(|e| FtsError::WorkerPanicked(e.to_string()))
    }
}

/// Returns the orchestrator to `Idle` and frees the run slot however the worker ends.
struct RunGuard {
    running: Arc<AtomicBool>,
    state: Arc<watch::Sender<AcquisitionState>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.send_replace(AcquisitionState::Idle);
        self.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Progress {
    completed: usize,
    failed: usize,
    average: AverageState,
}

struct RunWorker {
    stage: Arc<dyn StageDevice>,
    digitizer: Arc<dyn DigitizerDevice>,
    listener: Arc<dyn AcquisitionListener>,
    stop: StopHandle,
    state: Arc<watch::Sender<AcquisitionState>>,
    processing: ProcessingConfig,
    /// Taken while a reconstruction runs on the blocking pool
    reconstructor: Option<SpectralReconstructor>,
    config: AcquisitionConfig,
    plan: ScanPlan,
    _guard: RunGuard,
}

type CycleOutput = (Arc<ReconstructedResult>, RawAcquisition);

impl RunWorker {
    async fn run(mut self) -> RunReport {
        let mut progress = Progress::default();
        let outcome = match self.execute(&mut progress).await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(e.to_string()),
        };

        match &outcome {
            RunOutcome::Done => {
                self.set_state(AcquisitionState::Done);
                info!(cycles = progress.completed, failed = progress.failed, "Measurement run done");
                self.listener.on_status(STATUS_DONE);
                self.listener.on_done();
            }
            RunOutcome::Stopped => {
                self.set_state(AcquisitionState::Stopped);
                info!(cycles = progress.completed, "Measurement run stopped");
                self.listener.on_status(STATUS_STOPPED);
            }
            RunOutcome::Failed(message) => {
                self.set_state(AcquisitionState::Failed);
                error!("Measurement run failed: {}", message);
                self.listener.on_status(message);
                self.listener.on_failure(message);
            }
        }

        RunReport {
            outcome,
            completed_cycles: progress.completed,
            failed_attempts: progress.failed,
            average: progress.average.current_average(),
        }
    }

    fn set_state(&self, state: AcquisitionState) {
        self.state.send_replace(state);
    }

    /// Records must cover a share of the configured scan length.
    fn new_reconstructor(&self) -> SpectralReconstructor {
        SpectralReconstructor::new(self.processing.clone())
            .with_expected_travel(self.config.scan_length_um)
    }

    async fn execute(&mut self, progress: &mut Progress) -> FtsResult<RunOutcome> {
        self.set_state(AcquisitionState::Preparing);
        self.listener.on_status("Preparing measurement");

        let trigger = &self.config.trigger;
        let setup = MeasurementSetup {
            sample_rate_index: self.config.sample_rate_index,
            sample_length: self.plan.sample_count,
            trigger_enabled: trigger.enabled,
            trigger_level: trigger.level,
            trigger_hysteresis: trigger.hysteresis,
            trigger_reference: trigger.reference_percent,
        };
        self.digitizer
            .configure_for_measurement(&setup)
            .await
            .map_err(|e| FtsError::AcquisitionFailed(format!("digitizer setup failed: {e:#}")))?;
        self.reconstructor = Some(self.new_reconstructor());

        let requested = self.config.cycles;
        let budget = FailureBudget::for_cycles(requested);

        while progress.completed < requested {
            if self.stop.is_stop_requested() {
                return Ok(RunOutcome::Stopped);
            }
            let cycle = progress.completed + 1;
            self.listener
                .on_status(&format!("Measurement {cycle}/{requested}"));

            match self.run_cycle().await {
                Ok(None) => return Ok(RunOutcome::Stopped),
                Ok(Some((result, raw))) => {
                    progress.completed += 1;
                    let raw = self.config.retain_raw_data.then_some(raw);
                    progress.average.append(Arc::clone(&result), raw);

                    let report = CycleReport {
                        completed_cycles: progress.completed,
                        requested_cycles: requested,
                        failed_attempts: progress.failed,
                        result,
                        average: progress.average.current_average(),
                        timestamp: Utc::now(),
                    };
                    info!(cycle, requested, "Cycle complete");
                    self.listener.on_cycle_result(&report);
                }
                Err(failure) => {
                    progress.failed += 1;
                    warn!(
                        cycle,
                        failed = progress.failed,
                        allowed = budget.allowed(),
                        "Measurement failed: {}",
                        failure
                    );
                    self.listener
                        .on_status(&format!("Measurement {cycle} failed: {failure}"));
                    budget.check(progress.failed)?;
                }
            }
        }

        Ok(RunOutcome::Done)
    }

    /// One scan cycle. `Ok(None)` means a stop was requested after positioning.
    async fn run_cycle(&mut self) -> Result<Option<CycleOutput>, AcquisitionFailure> {
        let plan = self.plan.clone();
        let triggered = self.config.trigger.enabled;

        self.set_state(AcquisitionState::Positioning);
        self.stage
            .set_position(plan.start_um, plan.positioning_speed_um_per_s)
            .await
            .map_err(device_failure)?;
        self.stage.wait_until_idle().await.map_err(device_failure)?;

        if self.stop.is_stop_requested() {
            return Ok(None);
        }

        // Arming must precede the sweep so the trigger window covers it.
        if triggered {
            self.set_state(AcquisitionState::TriggerArm);
            self.digitizer.arm_trigger().await.map_err(device_failure)?;
        }

        self.set_state(AcquisitionState::Acquiring);
        self.stage
            .set_position(plan.end_um, self.config.scan_speed_um_per_s)
            .await
            .map_err(device_failure)?;

        let status = self.measure(triggered, plan.timeout).await?;
        if !status.is_ok() {
            return Err(AcquisitionFailure::DeviceStatus(status));
        }
        let raw = RawAcquisition::new(
            self.digitizer.last_primary_data().await,
            self.digitizer.last_reference_data().await,
        );

        self.stage.wait_until_idle().await.map_err(device_failure)?;
        // Send the carriage back without waiting; it travels while we reconstruct.
        self.stage
            .set_position(plan.start_um, plan.positioning_speed_um_per_s)
            .await
            .map_err(device_failure)?;

        self.set_state(AcquisitionState::Reconstructing);
        let (result, raw) = self.reconstruct(raw, self.config.apodization).await?;
        Ok(Some((Arc::new(result), raw)))
    }

    async fn measure(
        &self,
        triggered: bool,
        timeout: Duration,
    ) -> Result<MeasurementStatus, AcquisitionFailure> {
        let measurement = async {
            if triggered {
                self.digitizer.measure_data_with_prearmed_trigger().await
            } else {
                self.digitizer.measure_data_standalone().await
            }
        };
        match tokio::time::timeout(timeout, measurement).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(device_failure(e)),
            Err(_) => Err(AcquisitionFailure::Timeout(timeout)),
        }
    }

    /// Reconstruct on the blocking pool; the reconstructor travels with the job.
    async fn reconstruct(
        &mut self,
        raw: RawAcquisition,
        window: ApodizationWindow,
    ) -> Result<(ReconstructedResult, RawAcquisition), AcquisitionFailure> {
        let mut reconstructor = match self.reconstructor.take() {
            Some(reconstructor) => reconstructor,
            None => self.new_reconstructor(),
        };

        let job = tokio::task::spawn_blocking(move || {
            let result = reconstructor.reconstruct_acquisition(&raw, window);
            (reconstructor, raw, result)
        });
        let (reconstructor, raw, result) = job.await.map_err(|e| {
            AcquisitionFailure::Device(format!("reconstruction task aborted: {e}"))
        })?;
        self.reconstructor = Some(reconstructor);

        let result = result?;
        debug!(zpd = result.zpd_index, "Reconstructed spectrum");
        Ok((result, raw))
    }
}

fn device_failure(e: anyhow::Error) -> AcquisitionFailure {
    AcquisitionFailure::Device(format!("{e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputGrid;
    use crate::hardware::mock::{
        MockDigitizer, MockStage, ScriptedOutcome, DELAY_LINE_NOMINAL_LENGTH_UM,
    };
    use crate::messages::LoggingListener;
    use tracing_test::traced_test;

    fn orchestrator() -> AcquisitionOrchestrator {
        AcquisitionOrchestrator::new(
            Arc::new(MockStage::new().connected()),
            Arc::new(MockDigitizer::new().connected()),
            Arc::new(LoggingListener),
            ProcessingConfig::default(),
        )
    }

    #[test]
    fn test_plan_geometry() {
        let config = AcquisitionConfig {
            scan_start_um: 149_800.0,
            scan_length_um: 100.0,
            scan_speed_um_per_s: 2_000.0,
            run_up_um: 500.0,
            sample_rate_index: 9,
            ..Default::default()
        };
        let plan = orchestrator().plan(&config).unwrap();
        assert_eq!(plan.start_um, DELAY_LINE_NOMINAL_LENGTH_UM);
        assert_eq!(plan.end_um, 149_700.0);
        assert_eq!(plan.sample_count, 5_859);
        assert!(plan.timeout > Duration::from_millis(2_000));
    }

    #[test]
    fn test_plan_rejects_scan_outside_travel() {
        let orchestrator = orchestrator();
        let config = AcquisitionConfig {
            scan_start_um: 1_000.0,
            scan_length_um: 5_000.0,
            ..Default::default()
        };
        assert!(matches!(
            orchestrator.plan(&config),
            Err(FtsError::Config(ConfigError::OutOfRange(_)))
        ));

        let config = AcquisitionConfig {
            sample_rate_index: 42,
            ..Default::default()
        };
        assert!(matches!(
            orchestrator.plan(&config),
            Err(FtsError::Config(ConfigError::OutOfRange(_)))
        ));

        let config = AcquisitionConfig {
            scan_speed_um_per_s: 1.0e6,
            ..Default::default()
        };
        assert!(orchestrator.plan(&config).is_err());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(AcquisitionState::TriggerArm.to_string(), "arming trigger");
        assert!(AcquisitionState::Acquiring.is_busy());
        assert!(!AcquisitionState::Idle.is_busy());
    }

    #[tokio::test]
    async fn test_disconnected_devices_are_rejected() {
        let orchestrator = AcquisitionOrchestrator::new(
            Arc::new(MockStage::new()),
            Arc::new(MockDigitizer::new()),
            Arc::new(LoggingListener),
            ProcessingConfig::default(),
        );
        assert!(matches!(
            orchestrator.perform_measurements(AcquisitionConfig::default()),
            Err(FtsError::DeviceConnection(_))
        ));
        assert_eq!(orchestrator.state(), AcquisitionState::Idle);
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_absorbed_failure_is_logged_and_retried() {
        let processing = ProcessingConfig {
            output_grid: OutputGrid {
                min_um: 1.0,
                max_um: 20.0,
                points: 20_000,
            },
            ..Default::default()
        };
        let digitizer = MockDigitizer::new()
            .script(1, ScriptedOutcome::Status(MeasurementStatus::Fail))
            .connected();
        let orchestrator = AcquisitionOrchestrator::new(
            Arc::new(MockStage::new().connected()),
            Arc::new(digitizer),
            Arc::new(LoggingListener),
            processing,
        );
        let config = AcquisitionConfig {
            scan_start_um: 10_000.0,
            scan_length_um: 100.0,
            scan_speed_um_per_s: 2_000.0,
            sample_rate_index: 9,
            cycles: 2,
            timeout_margin_ms: 200,
            ..Default::default()
        };

        let handle = orchestrator.perform_measurements(config).unwrap();
        let report = AcquisitionOrchestrator::wait(handle).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Done);
        assert_eq!(report.completed_cycles, 2);
        assert_eq!(report.failed_attempts, 1);
        assert_eq!(report.average.count, 2);
        assert_eq!(orchestrator.state(), AcquisitionState::Idle);
        assert!(!orchestrator.is_running());
        assert!(logs_contain("Measurement failed"));
    }
}
