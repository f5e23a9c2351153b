// Session state
//
// A Session is created when the experiment starts and passed by reference to
// every component that needs it. `finalize` seals the buffer, drains it once and
// freezes everything into SessionData, which is all persistence ever sees.

use crate::buffer::SampleBuffer;
use crate::error::BufferResult;
use crate::protocol::PhaseRecord;
use crate::types::{ChannelLayout, MarkerCode, MarkerEvent, Sample};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// A recording in progress
pub struct Session {
    session_id: Uuid,
    subject_id: String,
    started_at: DateTime<Utc>,
    layout: ChannelLayout,
    buffer: Arc<SampleBuffer>,
    phases: Mutex<Vec<PhaseRecord>>,
}

impl Session {
    pub fn new(subject_id: impl Into<String>, layout: ChannelLayout, buffer: Arc<SampleBuffer>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            started_at: Utc::now(),
            layout,
            buffer,
            phases: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// Append executed phases to the audit trail
    pub fn record_phases(&self, phases: impl IntoIterator<Item = PhaseRecord>) {
        self.phases.lock().extend(phases);
    }

    /// Seal and drain the buffer into an immutable snapshot
    ///
    /// Only call once acquisition has stopped; the buffer refuses appends from
    /// here on and can be drained a single time.
    pub fn finalize(&self) -> BufferResult<SessionData> {
        self.buffer.seal();
        let contents = self.buffer.drain_all()?;
        Ok(SessionData {
            session_id: self.session_id,
            subject_id: self.subject_id.clone(),
            started_at: self.started_at,
            layout: self.layout.clone(),
            samples: contents.samples,
            markers: contents.markers,
            phases: std::mem::take(&mut *self.phases.lock()),
        })
    }
}

/// A frozen session, ready to be persisted
#[derive(Debug, Clone)]
pub struct SessionData {
    pub session_id: Uuid,
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
    pub layout: ChannelLayout,
    pub samples: Vec<Sample>,
    pub markers: Vec<MarkerEvent>,
    pub phases: Vec<PhaseRecord>,
}

impl SessionData {
    /// Common prefix of both exported files
    pub fn file_stem(&self) -> String {
        format!("{}_eeg_data", self.subject_id)
    }

    pub fn marker_codes(&self) -> Vec<MarkerCode> {
        self.markers.iter().map(|m| m.code).collect()
    }

    /// Recorded signal length in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.layout.sample_rate > 0.0 {
            self.samples.len() as f64 / self.layout.sample_rate
        } else {
            0.0
        }
    }
}
