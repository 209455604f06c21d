//! Messages from the acquisition worker to its consumer
//!
//! The orchestrator reports through an [`AcquisitionListener`] injected at
//! construction. Listener methods are called from the worker task, so they must
//! not block; [`ChannelListener`] forwards every notification as an
//! [`AcquisitionEvent`] over an unbounded channel for consumers that live on
//! another task or thread (a GUI, the CLI progress printer).
//!
//! Every payload is an immutable snapshot; the worker never hands out a reference
//! to state it will mutate later.

use crate::core::{AverageSpectrum, ReconstructedResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Progress of one completed cycle.
#[derive(Clone, Debug)]
pub struct CycleReport {
    /// Successful cycles so far, including this one
    pub completed_cycles: usize,
    /// Cycles requested for the run
    pub requested_cycles: usize,
    /// Failed attempts so far
    pub failed_attempts: usize,
    /// This cycle's reconstruction
    pub result: Arc<ReconstructedResult>,
    /// Running average including this cycle
    pub average: Arc<AverageSpectrum>,
    /// When the cycle finished
    pub timestamp: DateTime<Utc>,
}

/// Observer of a measurement run.
pub trait AcquisitionListener: Send + Sync {
    /// Human-readable progress text.
    fn on_status(&self, message: &str);

    /// A cycle finished and the average was updated.
    fn on_cycle_result(&self, report: &CycleReport);

    /// All requested cycles completed.
    fn on_done(&self);

    /// The run aborted.
    fn on_failure(&self, message: &str);
}

/// Notifications as values, for channel transport.
#[derive(Clone, Debug)]
pub enum AcquisitionEvent {
    /// Progress text
    Status(String),
    /// A completed cycle
    CycleResult(CycleReport),
    /// All cycles completed
    Done,
    /// The run aborted with this reason
    Failure(String),
}

/// Listener that forwards every notification into an unbounded channel.
///
/// Sends to a dropped receiver are ignored; a consumer that goes away must not
/// break the run.
#[derive(Clone, Debug)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<AcquisitionEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AcquisitionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: AcquisitionEvent) {
        let _ = self.tx.send(event);
    }
}

impl AcquisitionListener for ChannelListener {
    fn on_status(&self, message: &str) {
        self.send(AcquisitionEvent::Status(message.to_string()));
    }

    fn on_cycle_result(&self, report: &CycleReport) {
        self.send(AcquisitionEvent::CycleResult(report.clone()));
    }

    fn on_done(&self) {
        self.send(AcquisitionEvent::Done);
    }

    fn on_failure(&self, message: &str) {
        self.send(AcquisitionEvent::Failure(message.to_string()));
    }
}

/// Listener that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingListener;

impl AcquisitionListener for LoggingListener {
    fn on_status(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn on_cycle_result(&self, report: &CycleReport) {
        tracing::info!(
            "Cycle {}/{} complete ({} failed attempts)",
            report.completed_cycles,
            report.requested_cycles,
            report.failed_attempts
        );
    }

    fn on_done(&self) {
        tracing::info!("All measurements done");
    }

    fn on_failure(&self, message: &str) {
        tracing::error!("{}", message);
    }
}
