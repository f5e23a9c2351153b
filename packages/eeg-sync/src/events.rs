// Operator-facing notifications emitted while a session runs

use crate::protocol::ProtocolPhase;
use crate::types::{MarkerCode, MarkerEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Live counters of a running session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub samples_received: u64,
    pub tail_index: Option<u64>,
    pub markers_recorded: usize,
    pub native_marker_failures: u64,
    pub acquisition_ticks: u64,
    pub uptime_seconds: f64,
    pub data_rate_samples_per_sec: f64,
}

/// Events emitted by the controller and its components
#[derive(Debug, Clone)]
pub enum ExperimentEvent {
    PhaseEntered {
        position: usize,
        phase: ProtocolPhase,
    },
    MarkerInserted(MarkerEvent),
    NativeMarkerFailed {
        code: MarkerCode,
        error: String,
    },
    AcquisitionFailed {
        error: String,
    },
    Stats(SessionStats),
}

type Callback = Box<dyn Fn(ExperimentEvent) + Send + Sync>;

/// Shared, replaceable event callback
#[derive(Clone, Default)]
pub struct EventEmitter {
    callback: Arc<RwLock<Option<Callback>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(ExperimentEvent) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Box::new(callback));
    }

    pub fn emit(&self, event: ExperimentEvent) {
        if let Some(callback) = self.callback.read().as_ref() {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_without_callback_is_noop() {
        EventEmitter::new().emit(ExperimentEvent::AcquisitionFailed {
            error: "x".to_string(),
        });
    }

    #[test]
    fn test_clones_share_callback() {
        let emitter = EventEmitter::new();
        let clone = emitter.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        emitter.set_callback(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        });

        clone.emit(ExperimentEvent::Stats(SessionStats::default()));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
