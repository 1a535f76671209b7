use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{info, warn};

use crate::dispatcher::GenerationMode;

/// Phase of a single generation call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Phase {
    Preparing,
    Generating(GenerationMode),
    Saving,
    Done,
}

impl Phase {
    /// Completed fraction in [0, 1]; increases monotonically through a call
    pub fn fraction(&self) -> f32 {
        match self {
            Phase::Preparing => 0.0,
            Phase::Generating(_) => 0.1,
            Phase::Saving => 0.9,
            Phase::Done => 1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Preparing => "Preparing",
            Phase::Generating(GenerationMode::Text) => "Generating video from text",
            Phase::Generating(GenerationMode::Image) => "Generating video from image",
            Phase::Generating(GenerationMode::Video) => "Generating video from video",
            Phase::Saving => "Saving",
            Phase::Done => "Done",
        }
    }
}

/// Receives advisory progress notifications.
///
/// Observers cannot influence the generation: they are notified and their
/// outcome is ignored.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, phase: Phase);
}

/// Reports progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, phase: Phase) {
        info!("⏳ [{:>3.0}%] {}", phase.fraction() * 100.0, phase.label());
    }
}

/// Fan-out over any number of observers
#[derive(Clone, Default)]
pub struct ProgressReporter {
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Notify every observer; a panicking observer is logged and skipped
    pub fn report(&self, phase: Phase) {
        for observer in &self.observers {
            let notified = panic::catch_unwind(AssertUnwindSafe(|| observer.on_progress(phase)));
            if notified.is_err() {
                warn!("Progress observer panicked on {:?}, ignoring", phase);
            }
        }
    }
}
