//! Command-line front end driving the spectrometer against simulated hardware.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rust_fts::acquisition::{
    AcquisitionOrchestrator, AlignmentPreview, AlignmentSettings, PreviewChannel, RunOutcome,
    StopHandle,
};
use rust_fts::config::{Settings, DEFAULT_CONFIG_PATH};
use rust_fts::data::ApodizationWindow;
use rust_fts::hardware::mock::{MockDigitizer, MockStage, SyntheticInterferometer};
use rust_fts::hardware::{DigitizerDevice, StageDevice};
use rust_fts::messages::{AcquisitionEvent, ChannelListener};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Fourier-transform spectrometer acquisition and reconstruction
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a multi-cycle measurement and print the progress
    Run {
        /// Number of cycles to average (overrides the configuration)
        #[arg(long)]
        cycles: Option<usize>,

        /// Apodization window, e.g. hanning or blackman-harris
        #[arg(long)]
        window: Option<String>,

        /// Use the hardware trigger
        #[arg(long)]
        triggered: bool,
    },
    /// Sweep back and forth and print statistics of every preview trace
    Preview {
        /// How long to run
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,

        /// Show the reference channel instead of the detector
        #[arg(long)]
        reference: bool,
    },
}

/// Final line printed by `run`.
#[derive(Serialize, Debug)]
struct RunSummary {
    outcome: String,
    completed_cycles: usize,
    failed_attempts: usize,
    peak_wavelength_um: Option<f64>,
    peak_dbm: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    init_tracing(&settings.application.log_level, cli.json_logs);
    info!("{} starting", settings.application.name);

    match cli.command {
        Command::Run {
            cycles,
            window,
            triggered,
        } => run(settings, cycles, window, triggered).await,
        Command::Preview { seconds, reference } => preview(seconds, reference).await,
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(
    settings: Settings,
    cycles: Option<usize>,
    window: Option<String>,
    triggered: bool,
) -> Result<()> {
    let mut acquisition = settings.acquisition.clone();
    if let Some(cycles) = cycles {
        acquisition.cycles = cycles;
    }
    if let Some(window) = window {
        acquisition.apodization = window.parse::<ApodizationWindow>()?;
    }
    acquisition.trigger.enabled |= triggered;

    let source = SyntheticInterferometer {
        travel_um: acquisition.scan_length_um,
        ..Default::default()
    };
    let stage = Arc::new(MockStage::new().with_time_scale(1.0));
    let digitizer = Arc::new(MockDigitizer::with_source(source).with_time_scale(1.0));
    let (listener, mut events) = ChannelListener::new();
    let orchestrator =
        AcquisitionOrchestrator::new(stage, digitizer, Arc::new(listener), settings.processing);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AcquisitionEvent::Status(message) => println!("{message}"),
                AcquisitionEvent::CycleResult(report) => {
                    let (wavelength, power) = report.result.spectrum_peak().unwrap_or_default();
                    println!(
                        "cycle {}/{}: peak {:.3} um at {:.1} dBm, zpd sample {}, {} failed attempts",
                        report.completed_cycles,
                        report.requested_cycles,
                        wavelength,
                        power,
                        report.result.zpd_index,
                        report.failed_attempts
                    );
                }
                AcquisitionEvent::Done => println!("All measurements done"),
                AcquisitionEvent::Failure(message) => eprintln!("Measurement failed: {message}"),
            }
        }
    });

    orchestrator.initialize_hardware().await?;
    let handle = orchestrator.perform_measurements(acquisition)?;

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current cycle");
            stop.request_stop();
        }
    });

    let report = AcquisitionOrchestrator::wait(handle).await?;
    // Dropping the orchestrator releases the listener and ends the printer.
    drop(orchestrator);
    printer.await?;

    let peak = report.average.peak();
    let summary = RunSummary {
        outcome: match &report.outcome {
            RunOutcome::Done => "done".to_string(),
            RunOutcome::Stopped => "stopped".to_string(),
            RunOutcome::Failed(message) => format!("failed: {message}"),
        },
        completed_cycles: report.completed_cycles,
        failed_attempts: report.failed_attempts,
        peak_wavelength_um: peak.map(|(x, _)| x),
        peak_dbm: peak.map(|(_, y)| y),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match report.outcome {
        RunOutcome::Failed(message) => Err(anyhow!(message)),
        _ => Ok(()),
    }
}

async fn preview(seconds: f64, reference: bool) -> Result<()> {
    let stage = Arc::new(MockStage::new().with_time_scale(1.0));
    let digitizer = Arc::new(MockDigitizer::new().with_time_scale(1.0));
    stage.connect().await?;
    digitizer.connect().await?;
    stage.home().await?;
    stage.wait_until_idle().await?;

    let (_settings_tx, settings_rx) = watch::channel(AlignmentSettings::default());
    let channel = if reference {
        PreviewChannel::Reference
    } else {
        PreviewChannel::Primary
    };
    let (_channel_tx, channel_rx) = watch::channel(channel);
    let (frames_tx, mut frames_rx) = mpsc::channel(8);
    let stop = StopHandle::new();

    let task = tokio::spawn(AlignmentPreview::run(
        stage,
        digitizer,
        settings_rx,
        channel_rx,
        frames_tx,
        stop.clone(),
    ));

    let deadline = tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0)));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            frame = frames_rx.recv() => {
                let Some(frame) = frame else { break };
                let (min, max) = frame
                    .samples
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                println!(
                    "{:?}: {} samples, {:.4} V .. {:.4} V (peak-to-peak {:.4} V)",
                    frame.channel,
                    frame.samples.len(),
                    min,
                    max,
                    max - min
                );
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    stop.request_stop();
    drop(frames_rx);
    let delivered = task.await??;
    println!("{delivered} preview frames");
    Ok(())
}
