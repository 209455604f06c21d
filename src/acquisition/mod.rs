//! Hardware-driven acquisition: the multi-cycle measurement run and the alignment preview.

pub mod alignment;
pub mod orchestrator;

pub use alignment::{AlignmentPreview, AlignmentSettings, PreviewChannel, PreviewFrame};
pub use orchestrator::{AcquisitionOrchestrator, AcquisitionState, RunOutcome, RunReport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a worker and its controllers.
///
/// Workers poll it at well-defined points; nothing is interrupted mid-operation.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Create a cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop at its next poll point.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
