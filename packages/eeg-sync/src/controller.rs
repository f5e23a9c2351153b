// Experiment controller
//
// Orchestrates one recording session:
//
//   validate config + songs → start device → spawn acquisition → run protocol
//   → stop acquisition (join) → stop device → seal + drain → persist → report
//
// A single quit token is shared by every unit. The operator cancels it to end
// the session early, and the acquisition loop cancels it on a fatal device
// error. Either way the protocol winds down with a well-formed marker sequence
// and whatever was captured is persisted.

use crate::acquisition::AcquisitionLoop;
use crate::buffer::SampleBuffer;
use crate::config::ExperimentConfig;
use crate::device::EegDevice;
use crate::error::{AcquisitionError, ConfigError, ExperimentError};
use crate::events::{EventEmitter, ExperimentEvent, SessionStats};
use crate::marker::MarkerSynchronizer;
use crate::persist::{PersistReport, SessionPersister};
use crate::protocol::{PhaseRecord, PhaseTable, ProtocolOutcome, ProtocolSequencer};
use crate::session::Session;
use crate::stimulus::{AudioPlayer, MessageDisplay, SongLibrary};
use crate::types::MarkerCode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;

/// Final report of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub subject_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub outcome: ProtocolOutcome,
    pub phases: Vec<PhaseRecord>,
    pub samples_recorded: usize,
    pub recorded_seconds: f64,
    pub markers: Vec<MarkerCode>,
    pub native_marker_failures: u64,

    /// Largest measured lag between a marker and its correlated sample
    pub max_marker_lag_ms: f64,

    /// Documented bound on that lag: the effective polling interval
    pub marker_lag_bound_ms: f64,

    /// Set when acquisition ended the session
    pub acquisition_error: Option<String>,

    pub persist: PersistReport,
}

impl SessionReport {
    /// Protocol completed, no acquisition failure and every file written
    pub fn is_clean(&self) -> bool {
        self.outcome.is_completed() && self.acquisition_error.is_none() && self.persist.is_success()
    }
}

pub struct ExperimentController {
    config: ExperimentConfig,
    device: Arc<dyn EegDevice>,
    display: Arc<dyn MessageDisplay>,
    audio: Arc<dyn AudioPlayer>,
    persister: SessionPersister,
    quit: CancellationToken,
    events: EventEmitter,
    ran: AtomicBool,
}

impl ExperimentController {
    pub fn new(
        config: ExperimentConfig,
        device: Arc<dyn EegDevice>,
        display: Arc<dyn MessageDisplay>,
        audio: Arc<dyn AudioPlayer>,
    ) -> Self {
        Self {
            config,
            device,
            display,
            audio,
            persister: SessionPersister::default(),
            quit: CancellationToken::new(),
            events: EventEmitter::new(),
            ran: AtomicBool::new(false),
        }
    }

    pub fn with_persister(mut self, persister: SessionPersister) -> Self {
        self.persister = persister;
        self
    }

    /// Token that ends the session early when cancelled
    pub fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }

    /// Set callback for session events
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(ExperimentEvent) + Send + Sync + 'static,
    {
        self.events.set_callback(callback);
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Run the whole session; a controller runs at most once
    ///
    /// Configuration problems and a device that cannot start are returned as
    /// errors before anything is recorded. Once recording has begun, failures
    /// are reported in the SessionReport and the captured data is persisted.
    pub async fn run(&self) -> Result<SessionReport, ExperimentError> {
        if self.ran.swap(true, Ordering::SeqCst) {
            return Err(ExperimentError::AlreadyRan);
        }

        self.config.validate()?;
        let protocol = &self.config.protocol;
        SongLibrary::new(protocol.song_directory.clone()).verify(protocol.num_trials)?;

        let info = self.device.info();
        if info.layout.num_channels() == 0 {
            return Err(ConfigError::Invalid(format!("device '{}' reports no channels", info.name)).into());
        }

        self.device
            .start_stream(&self.config.stream)
            .map_err(AcquisitionError::from)?;
        log::info!(
            "Session for subject {} on device '{}' ({} channels @ {} Hz)",
            self.config.subject_id,
            info.name,
            info.layout.num_channels(),
            info.layout.sample_rate
        );

        let buffer = Arc::new(SampleBuffer::with_capacity(
            info.layout.num_channels(),
            self.config.acquisition.buffer_capacity,
        ));
        let session = Session::new(&self.config.subject_id, info.layout.clone(), Arc::clone(&buffer));
        let markers = Arc::new(
            MarkerSynchronizer::new(Arc::clone(&buffer), Some(Arc::clone(&self.device)))
                .with_events(self.events.clone()),
        );
        let acquisition = Arc::new(
            AcquisitionLoop::new(Arc::clone(&self.device), Arc::clone(&buffer), &self.config.acquisition)
                .with_events(self.events.clone()),
        );

        if let Err(e) = acquisition.start(&self.quit) {
            self.stop_device();
            return Err(e.into());
        }

        let stats_stop = CancellationToken::new();
        let stats = self.spawn_stats(
            Arc::clone(&buffer),
            Arc::clone(&markers),
            Arc::clone(&acquisition),
            stats_stop.clone(),
        );

        let sequencer = ProtocolSequencer::new(
            PhaseTable::from_config(protocol),
            Arc::clone(&markers),
            Arc::clone(&self.display),
            Arc::clone(&self.audio),
        )
        .with_events(self.events.clone());
        let run = sequencer.run(&self.quit).await;

        // Join barrier: nothing is persisted while samples can still arrive
        let acquisition_error = match acquisition.stop().await {
            Some(Err(e)) => Some(e.to_string()),
            _ => None,
        };
        stats_stop.cancel();
        if let Err(e) = stats.await {
            log::warn!("Stats task ended abnormally: {}", e);
        }
        self.stop_device();

        session.record_phases(run.phases);
        let data = session
            .finalize()
            .map_err(|e| ExperimentError::Acquisition(AcquisitionError::Buffer(e)))?;
        let persist = self.persister.persist(&data, self.config.output_dir());

        let report = SessionReport {
            session_id: data.session_id.to_string(),
            subject_id: data.subject_id.clone(),
            started_at: data.started_at,
            outcome: run.outcome,
            phases: data.phases.clone(),
            samples_recorded: data.samples.len(),
            recorded_seconds: data.duration_secs(),
            markers: data.marker_codes(),
            native_marker_failures: markers.native_failures(),
            max_marker_lag_ms: markers.max_observed_lag().as_secs_f64() * 1000.0,
            marker_lag_bound_ms: acquisition.marker_lag_bound().as_secs_f64() * 1000.0,
            acquisition_error,
            persist,
        };
        log::info!(
            "Session {} finished: {} samples, {} markers, outcome {:?}",
            report.session_id,
            report.samples_recorded,
            report.markers.len(),
            report.outcome
        );
        Ok(report)
    }

    fn stop_device(&self) {
        if let Err(e) = self.device.stop_stream() {
            log::warn!("Failed to stop device stream: {}", e);
        }
    }

    /// Periodic stats events until `stop` fires
    fn spawn_stats(
        &self,
        buffer: Arc<SampleBuffer>,
        markers: Arc<MarkerSynchronizer>,
        acquisition: Arc<AcquisitionLoop>,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let events = self.events.clone();
        let period = Duration::from_millis(self.config.acquisition.stats_interval_ms);

        tokio::spawn(async move {
            let started = Instant::now();
            let mut tick = interval(period);
            // First tick completes immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = stop.cancelled() => break,
                    _ = tick.tick() => {
                        let uptime = started.elapsed().as_secs_f64();
                        let samples = buffer.len();
                        events.emit(ExperimentEvent::Stats(SessionStats {
                            samples_received: samples,
                            tail_index: buffer.tail_index(),
                            markers_recorded: buffer.marker_count(),
                            native_marker_failures: markers.native_failures(),
                            acquisition_ticks: acquisition.heartbeat().ticks,
                            uptime_seconds: uptime,
                            data_rate_samples_per_sec: if uptime > 0.0 {
                                samples as f64 / uptime
                            } else {
                                0.0
                            },
                        }));
                    }
                }
            }
        })
    }
}

impl Drop for ExperimentController {
    fn drop(&mut self) {
        // Ends a session still running in a detached task
        self.quit.cancel();
    }
}
