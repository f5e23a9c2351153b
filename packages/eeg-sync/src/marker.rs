// Marker synchronization
//
// Stamps protocol events onto the sample stream along two redundant paths:
// - the software marker log inside the SampleBuffer (authoritative, exported)
// - the device's native marker channel (best effort cross-check)
//
// The software path correlates the marker with whatever sample is the buffer's
// tail at the instant of the call. Acquisition appends in batches once per poll,
// so the correlated sample can precede the true event by up to one polling
// interval; each MarkerEvent records the measured lag.

use crate::buffer::SampleBuffer;
use crate::device::EegDevice;
use crate::events::{EventEmitter, ExperimentEvent};
use crate::types::{MarkerCode, MarkerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct MarkerSynchronizer {
    buffer: Arc<SampleBuffer>,
    device: Option<Arc<dyn EegDevice>>,
    native_failures: AtomicU64,
    max_lag_micros: AtomicU64,
    events: EventEmitter,
}

impl MarkerSynchronizer {
    pub fn new(buffer: Arc<SampleBuffer>, device: Option<Arc<dyn EegDevice>>) -> Self {
        Self {
            buffer,
            device,
            native_failures: AtomicU64::new(0),
            max_lag_micros: AtomicU64::new(0),
            events: EventEmitter::new(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Record `code` against the current tail sample, then tag the device
    ///
    /// Never fails: the software log always accepts the marker, and a rejected
    /// native tag is only logged and counted.
    pub fn insert_marker(&self, code: MarkerCode) -> MarkerEvent {
        let event = self.buffer.record_marker_at_tail(code);
        self.max_lag_micros
            .fetch_max(event.lag.as_micros() as u64, Ordering::Relaxed);

        log::debug!(
            "Marker {} ({}) at sample {} (lag {:?})",
            code,
            code.label(),
            event.sample_index,
            event.lag
        );

        if let Some(device) = &self.device {
            if let Err(e) = device.insert_native_marker(code) {
                self.native_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Native marker {} not written to device: {}", code, e);
                self.events.emit(ExperimentEvent::NativeMarkerFailed {
                    code,
                    error: e.to_string(),
                });
            }
        }

        self.events
            .emit(ExperimentEvent::MarkerInserted(event.clone()));
        event
    }

    pub fn native_failures(&self) -> u64 {
        self.native_failures.load(Ordering::Relaxed)
    }

    /// Largest lag observed between a marker and its correlated sample
    pub fn max_observed_lag(&self) -> Duration {
        Duration::from_micros(self.max_lag_micros.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{StreamConfig, SyntheticDevice, SyntheticOptions};
    use crate::types::RawSample;

    #[test]
    fn test_marker_logged_without_device() {
        let buffer = Arc::new(SampleBuffer::new(1));
        buffer.append(RawSample::new(vec![0.0], 0.0)).unwrap();
        let sync = MarkerSynchronizer::new(Arc::clone(&buffer), None);

        let event = sync.insert_marker(MarkerCode::RestStart);
        assert_eq!(event.sample_index, 0);
        assert_eq!(buffer.markers().len(), 1);
        assert_eq!(sync.native_failures(), 0);
    }

    #[test]
    fn test_native_failure_is_not_fatal() {
        let device = Arc::new(SyntheticDevice::new(SyntheticOptions {
            reject_markers: true,
            ..Default::default()
        }));
        let buffer = Arc::new(SampleBuffer::new(4));
        let sync = MarkerSynchronizer::new(Arc::clone(&buffer), Some(device));

        sync.insert_marker(MarkerCode::TrialStart);
        sync.insert_marker(MarkerCode::TrialEnd);

        assert_eq!(sync.native_failures(), 2);
        let codes: Vec<_> = buffer.markers().iter().map(|m| m.code).collect();
        assert_eq!(codes, vec![MarkerCode::TrialStart, MarkerCode::TrialEnd]);
    }

    #[test]
    fn test_native_tag_mirrors_software_log() {
        let device = Arc::new(SyntheticDevice::new(SyntheticOptions::default()));
        device.start_stream(&StreamConfig::default()).unwrap();
        let buffer = Arc::new(SampleBuffer::new(4));
        let sync = MarkerSynchronizer::new(
            Arc::clone(&buffer),
            Some(Arc::clone(&device) as Arc<dyn EegDevice>),
        );

        sync.insert_marker(MarkerCode::RestStart);
        sync.insert_marker(MarkerCode::RestEnd);

        let native: Vec<_> = device.native_markers().into_iter().map(|(_, c)| c).collect();
        assert_eq!(native, vec![MarkerCode::RestStart, MarkerCode::RestEnd]);
        assert_eq!(sync.native_failures(), 0);
    }
}
