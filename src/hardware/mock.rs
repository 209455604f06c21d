//! Mock Hardware Implementations
//!
//! Provides simulated devices for testing and for running the application without
//! the delay line or the lock-in attached.
//!
//! # Available Mocks
//!
//! - `MockStage` - Simulated delay line with optional realistic motion timing
//! - `MockDigitizer` - Simulated two-channel digitizer producing synthetic FTS
//!   waveforms, with scripted failures and hangs per measurement call
//! - `Journal` - Shared, ordered log of every device call, for sequencing assertions
//!
//! All mock devices use async-safe operations (`tokio::time::sleep`, not
//! `std::thread::sleep`).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::hardware::capabilities::{
    DigitizerDevice, MeasurementSetup, MeasurementStatus, StageDevice,
};

/// Travel of the X-LSQ150D delay line.
pub const DELAY_LINE_NOMINAL_LENGTH_UM: f64 = 150_000.0;

/// Top speed of the delay line.
pub const DELAY_LINE_MAX_SPEED_UM_PER_S: f64 = 50_000.0;

/// Sample rates of the lock-in's data acquisition module, indexed by rate index.
pub const MOCK_SAMPLE_RATES_HZ: [f64; 16] = [
    60.0e6,
    30.0e6,
    15.0e6,
    7.5e6,
    3.75e6,
    1.875e6,
    937_500.0,
    468_750.0,
    234_375.0,
    117_187.5,
    58_593.75,
    29_296.875,
    14_648.437_5,
    7_324.218_75,
    3_662.109_375,
    1_831.054_687_5,
];

// =============================================================================
// Journal - shared call log
// =============================================================================

/// One recorded device call.
#[derive(Clone, Debug, PartialEq)]
pub enum MockEvent {
    /// `home`
    StageHome,
    /// `set_position`
    StageMove {
        /// Requested position
        target_um: f64,
        /// Requested speed
        speed_um_per_s: f64,
    },
    /// `wait_until_idle`
    StageWaitIdle,
    /// `stop`
    StageStop,
    /// `configure_for_measurement`
    DigitizerConfigure(MeasurementSetup),
    /// `arm_trigger`
    DigitizerArm,
    /// A measurement call
    DigitizerMeasure {
        /// Whether the call waited for a pre-armed trigger
        triggered: bool,
        /// 1-based call number
        call: usize,
    },
}

/// Ordered record of device calls, shareable between mocks.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<MockEvent>>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: MockEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<MockEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of digitizer measurement calls recorded.
    pub fn measurement_calls(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, MockEvent::DigitizerMeasure { .. }))
            .count()
    }
}

// =============================================================================
// MockStage - Simulated Delay Line
// =============================================================================

/// Mock delay line.
///
/// Motion is instantaneous by default. With [`MockStage::with_time_scale`] each
/// move takes `distance / speed * scale` seconds and `wait_until_idle` blocks until
/// the move is over.
///
/// # Example
///
/// ```
/// use rust_fts::hardware::mock::MockStage;
/// use rust_fts::hardware::StageDevice;
///
/// # tokio_test::block_on(async {
/// let stage = MockStage::new().connected();
/// stage.set_position(1_000.0, 5_000.0).await?;
/// stage.wait_until_idle().await?;
/// assert_eq!(stage.position().await?, 1_000.0);
/// # Ok::<(), anyhow::Error>(())
/// # }).unwrap();
/// ```
pub struct MockStage {
    position: Arc<RwLock<f64>>,
    motion_done_at: Arc<RwLock<Option<Instant>>>,
    time_scale: f64,
    connected: AtomicBool,
    refuse_connection: bool,
    journal: Journal,
}

impl MockStage {
    /// Create a mock stage at position 0 with instantaneous motion.
    pub fn new() -> Self {
        Self {
            position: Arc::new(RwLock::new(0.0)),
            motion_done_at: Arc::new(RwLock::new(None)),
            time_scale: 0.0,
            connected: AtomicBool::new(false),
            refuse_connection: false,
            journal: Journal::new(),
        }
    }

    /// Scale simulated motion time; 1.0 is real time.
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    /// Record calls into a shared journal.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Make `connect` fail.
    pub fn unreachable(mut self) -> Self {
        self.refuse_connection = true;
        self
    }

    /// Create an already-connected stage.
    pub fn connected(self) -> Self {
        self.connected.store(!self.refuse_connection, Ordering::SeqCst);
        self
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageDevice for MockStage {
    async fn connect(&self) -> Result<()> {
        if self.refuse_connection {
            bail!("MockStage: no controller answering on the configured port");
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn home(&self) -> Result<()> {
        self.journal.record(MockEvent::StageHome);
        self.set_position(0.0, DELAY_LINE_MAX_SPEED_UM_PER_S).await
    }

    async fn wait_until_idle(&self) -> Result<()> {
        self.journal.record(MockEvent::StageWaitIdle);
        let deadline = *self.motion_done_at.read().await;
        if let Some(deadline) = deadline {
            tokio::time::sleep_until(deadline).await;
        }
        *self.motion_done_at.write().await = None;
        Ok(())
    }

    async fn set_position(&self, position_um: f64, speed_um_per_s: f64) -> Result<()> {
        if !self.is_connected() {
            bail!("MockStage: not connected");
        }
        if !(0.0..=DELAY_LINE_NOMINAL_LENGTH_UM).contains(&position_um) {
            bail!("MockStage: target {position_um:.1} um outside travel");
        }
        if speed_um_per_s <= 0.0 {
            bail!("MockStage: speed must be positive");
        }
        self.journal.record(MockEvent::StageMove {
            target_um: position_um,
            speed_um_per_s,
        });

        let current = *self.position.read().await;
        let seconds = (position_um - current).abs() / speed_um_per_s * self.time_scale;
        debug!(
            "MockStage: moving {:.1} um -> {:.1} um ({:.3} s)",
            current, position_um, seconds
        );
        *self.motion_done_at.write().await =
            Some(Instant::now() + Duration::from_secs_f64(seconds));
        *self.position.write().await = position_um;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.journal.record(MockEvent::StageStop);
        *self.motion_done_at.write().await = None;
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.read().await)
    }

    fn nominal_length_um(&self) -> f64 {
        DELAY_LINE_NOMINAL_LENGTH_UM
    }

    fn max_speed_um_per_s(&self) -> f64 {
        DELAY_LINE_MAX_SPEED_UM_PER_S
    }
}

// =============================================================================
// SyntheticInterferometer - waveform generator
// =============================================================================

/// Generates detector and reference-laser traces for a mirror sweep with
/// non-uniform velocity.
///
/// The source is a single spectral line with a Gaussian coherence envelope,
/// so the reconstructed spectrum peaks at `line_wavelength_um`.
#[derive(Clone, Debug)]
pub struct SyntheticInterferometer {
    /// Mirror travel covered by one record.
    pub travel_um: f64,
    /// Where the zero-path-difference point sits, as a fraction of the travel.
    pub zpd_fraction: f64,
    /// Wavelength of the spectral line
    pub line_wavelength_um: f64,
    /// Width of the Gaussian coherence envelope
    pub coherence_length_um: f64,
    /// Wavelength of the reference laser
    pub reference_wavelength_um: f64,
    /// Peak relative velocity deviation (0.1 = +/-10%).
    pub velocity_ripple: f64,
    /// Number of velocity ripple periods over the record.
    pub ripple_periods: f64,
    /// Fringe amplitude of the detector
    pub detector_amplitude_v: f64,
    /// DC level of the detector
    pub detector_offset_v: f64,
    /// Fringe amplitude of the reference
    pub reference_amplitude_v: f64,
    /// DC level of the reference
    pub reference_offset_v: f64,
    /// RMS of the uniform detector noise
    pub noise_rms_v: f64,
}

impl Default for SyntheticInterferometer {
    fn default() -> Self {
        Self {
            travel_um: 100.0,
            zpd_fraction: 0.4,
            line_wavelength_um: 4.0,
            coherence_length_um: 20.0,
            reference_wavelength_um: 1.547_718,
            velocity_ripple: 0.1,
            ripple_periods: 3.0,
            detector_amplitude_v: 0.5,
            detector_offset_v: 1.2,
            reference_amplitude_v: 0.8,
            reference_offset_v: 0.3,
            noise_rms_v: 0.001,
        }
    }
}

impl SyntheticInterferometer {
    /// Mirror position of every sample of an `n`-sample record.
    pub fn mirror_positions(&self, n: usize) -> Vec<f64> {
        if n < 2 {
            return vec![0.0; n];
        }
        let omega = 2.0 * PI * self.ripple_periods;
        (0..n)
            .map(|i| {
                let u = i as f64 / (n - 1) as f64;
                let ripple = if omega > 0.0 {
                    self.velocity_ripple * (omega * u).sin() / omega
                } else {
                    0.0
                };
                self.travel_um * (u + ripple)
            })
            .collect()
    }

    /// Returns `(primary, reference)` traces of `n` samples.
    pub fn generate(&self, n: usize, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let zpd = self.travel_um * self.zpd_fraction;
        let noise = self.noise_rms_v * 3.0_f64.sqrt();
        let positions = self.mirror_positions(n);

        let primary = positions
            .iter()
            .map(|&x| {
                let opd = x - zpd;
                let envelope = (-(opd / self.coherence_length_um).powi(2)).exp();
                let fringe = (4.0 * PI * opd / self.line_wavelength_um).cos();
                self.detector_offset_v
                    + self.detector_amplitude_v * envelope * fringe
                    + noise * rng.gen_range(-1.0..1.0)
            })
            .collect();

        let reference = positions
            .iter()
            .map(|&x| {
                self.reference_offset_v
                    + self.reference_amplitude_v
                        * (4.0 * PI * x / self.reference_wavelength_um).cos()
            })
            .collect();

        (primary, reference)
    }
}

// =============================================================================
// MockDigitizer - Simulated lock-in digitizer
// =============================================================================

/// Scripted behaviour for a specific measurement call.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptedOutcome {
    /// Return this status without producing data.
    Status(MeasurementStatus),
    /// Never complete (exercises the caller's timeout).
    Hang,
    /// Return a transport error.
    Error(String),
    /// Produce a record whose reference channel is flat.
    FlatReference,
}

/// Mock two-channel digitizer producing [`SyntheticInterferometer`] records.
///
/// Measurement calls are numbered from 1; [`MockDigitizer::script`] overrides the
/// outcome of individual calls.
pub struct MockDigitizer {
    source: SyntheticInterferometer,
    setup: RwLock<Option<MeasurementSetup>>,
    armed: AtomicBool,
    calls: AtomicUsize,
    script: HashMap<usize, ScriptedOutcome>,
    last_primary: RwLock<Vec<f64>>,
    last_reference: RwLock<Vec<f64>>,
    time_scale: f64,
    connected: AtomicBool,
    refuse_connection: bool,
    journal: Journal,
}

impl MockDigitizer {
    /// Create a digitizer with the default synthetic source.
    pub fn new() -> Self {
        Self::with_source(SyntheticInterferometer::default())
    }

    /// Create a digitizer with a custom synthetic source.
    pub fn with_source(source: SyntheticInterferometer) -> Self {
        Self {
            source,
            setup: RwLock::new(None),
            armed: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            script: HashMap::new(),
            last_primary: RwLock::new(Vec::new()),
            last_reference: RwLock::new(Vec::new()),
            time_scale: 0.0,
            connected: AtomicBool::new(false),
            refuse_connection: false,
            journal: Journal::new(),
        }
    }

    /// Override the outcome of measurement call number `call` (1-based).
    pub fn script(mut self, call: usize, outcome: ScriptedOutcome) -> Self {
        self.script.insert(call, outcome);
        self
    }

    /// Scale simulated record time; 1.0 is real time.
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    /// Record calls into a shared journal.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Make `connect` fail.
    pub fn unreachable(mut self) -> Self {
        self.refuse_connection = true;
        self
    }

    /// Create an already-connected digitizer.
    pub fn connected(self) -> Self {
        self.connected.store(!self.refuse_connection, Ordering::SeqCst);
        self
    }

    /// Number of measurement calls so far.
    pub fn measurement_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether the trigger is currently armed.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    async fn acquire(&self, triggered: bool) -> Result<MeasurementStatus> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal
            .record(MockEvent::DigitizerMeasure { triggered, call });

        let setup = self
            .setup
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("MockDigitizer: measurement requested before configuration"))?;
        let rate = self
            .sample_rate(setup.sample_rate_index)
            .ok_or_else(|| anyhow!("MockDigitizer: unknown rate index"))?;

        let record_time = setup.sample_length as f64 / rate * self.time_scale;
        if record_time > 0.0 {
            sleep(Duration::from_secs_f64(record_time)).await;
        }

        let (primary, reference) = match self.script.get(&call) {
            Some(ScriptedOutcome::Status(status)) => {
                debug!("MockDigitizer: call {} scripted to report '{}'", call, status);
                return Ok(status.clone());
            }
            Some(ScriptedOutcome::Hang) => {
                debug!("MockDigitizer: call {} scripted to hang", call);
                std::future::pending().await
            }
            Some(ScriptedOutcome::Error(message)) => bail!("MockDigitizer: {message}"),
            Some(ScriptedOutcome::FlatReference) => {
                let (primary, reference) = self.source.generate(setup.sample_length, call as u64);
                let level = reference.first().copied().unwrap_or_default();
                (primary, vec![level; reference.len()])
            }
            None => self.source.generate(setup.sample_length, call as u64),
        };

        *self.last_primary.write().await = primary;
        *self.last_reference.write().await = reference;
        Ok(MeasurementStatus::Ok)
    }
}

impl Default for MockDigitizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DigitizerDevice for MockDigitizer {
    async fn connect(&self) -> Result<()> {
        if self.refuse_connection {
            bail!("MockDigitizer: data server refused the session");
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn sample_rate(&self, index: usize) -> Option<f64> {
        MOCK_SAMPLE_RATES_HZ.get(index).copied()
    }

    async fn configure_for_measurement(&self, setup: &MeasurementSetup) -> Result<()> {
        if self.sample_rate(setup.sample_rate_index).is_none() {
            bail!(
                "MockDigitizer: sample rate index {} not supported",
                setup.sample_rate_index
            );
        }
        self.journal
            .record(MockEvent::DigitizerConfigure(setup.clone()));
        *self.setup.write().await = Some(setup.clone());
        Ok(())
    }

    async fn arm_trigger(&self) -> Result<()> {
        self.journal.record(MockEvent::DigitizerArm);
        self.armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn measure_data_standalone(&self) -> Result<MeasurementStatus> {
        self.acquire(false).await
    }

    async fn measure_data_with_prearmed_trigger(&self) -> Result<MeasurementStatus> {
        if !self.armed.swap(false, Ordering::SeqCst) {
            bail!("MockDigitizer: cannot wait for trigger - not armed");
        }
        self.acquire(true).await
    }

    async fn last_primary_data(&self) -> Vec<f64> {
        self.last_primary.read().await.clone()
    }

    async fn last_reference_data(&self) -> Vec<f64> {
        self.last_reference.read().await.clone()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(sample_length: usize) -> MeasurementSetup {
        MeasurementSetup {
            sample_rate_index: 9,
            sample_length,
            trigger_enabled: false,
            trigger_level: 0.0,
            trigger_hysteresis: 0.0,
            trigger_reference: 50.0,
        }
    }

    #[tokio::test]
    async fn test_mock_stage_moves_and_settles() {
        let stage = MockStage::new().connected();
        stage.set_position(10_000.0, 5_000.0).await.unwrap();
        stage.wait_until_idle().await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 10_000.0);
    }

    #[tokio::test]
    async fn test_mock_stage_rejects_out_of_travel() {
        let stage = MockStage::new().connected();
        assert!(stage.set_position(-1.0, 100.0).await.is_err());
        assert!(stage
            .set_position(DELAY_LINE_NOMINAL_LENGTH_UM + 1.0, 100.0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mock_stage_requires_connection() {
        let stage = MockStage::new();
        assert!(stage.set_position(1.0, 1.0).await.is_err());
        stage.connect().await.unwrap();
        assert!(stage.set_position(1.0, 1.0).await.is_ok());

        let dead = MockStage::new().unreachable();
        assert!(dead.connect().await.is_err());
        assert!(!dead.is_connected());
    }

    #[tokio::test]
    async fn test_mock_digitizer_produces_equal_length_channels() {
        let digitizer = MockDigitizer::new().connected();
        digitizer.configure_for_measurement(&setup(2_000)).await.unwrap();

        let status = digitizer.measure_data_standalone().await.unwrap();
        assert!(status.is_ok());
        assert_eq!(digitizer.last_primary_data().await.len(), 2_000);
        assert_eq!(digitizer.last_reference_data().await.len(), 2_000);
    }

    #[tokio::test]
    async fn test_mock_digitizer_scripted_status() {
        let digitizer = MockDigitizer::new()
            .script(2, ScriptedOutcome::Status(MeasurementStatus::Timeout))
            .connected();
        digitizer.configure_for_measurement(&setup(100)).await.unwrap();

        assert!(digitizer.measure_data_standalone().await.unwrap().is_ok());
        assert_eq!(
            digitizer.measure_data_standalone().await.unwrap(),
            MeasurementStatus::Timeout
        );
        assert!(digitizer.measure_data_standalone().await.unwrap().is_ok());
        assert_eq!(digitizer.measurement_calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_digitizer_trigger_requires_arming() {
        let digitizer = MockDigitizer::new().connected();
        digitizer.configure_for_measurement(&setup(100)).await.unwrap();

        assert!(digitizer.measure_data_with_prearmed_trigger().await.is_err());

        digitizer.arm_trigger().await.unwrap();
        assert!(digitizer.is_armed());
        assert!(digitizer
            .measure_data_with_prearmed_trigger()
            .await
            .unwrap()
            .is_ok());
        assert!(!digitizer.is_armed());
    }

    #[tokio::test]
    async fn test_journal_orders_calls_across_devices() {
        let journal = Journal::new();
        let stage = MockStage::new().with_journal(journal.clone()).connected();
        let digitizer = MockDigitizer::new()
            .with_journal(journal.clone())
            .connected();

        digitizer.configure_for_measurement(&setup(10)).await.unwrap();
        digitizer.arm_trigger().await.unwrap();
        stage.set_position(5.0, 1.0).await.unwrap();

        let events = journal.events();
        assert!(matches!(events[0], MockEvent::DigitizerConfigure(_)));
        assert_eq!(events[1], MockEvent::DigitizerArm);
        assert!(matches!(events[2], MockEvent::StageMove { .. }));
    }

    #[test]
    fn test_synthetic_positions_are_monotonic() {
        let source = SyntheticInterferometer::default();
        let positions = source.mirror_positions(10_000);
        assert!(positions.windows(2).all(|pair| pair[1] > pair[0]));
        assert!((positions[9_999] - source.travel_um).abs() < 1e-9);
    }
}
