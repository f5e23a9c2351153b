// Acquisition loop
//
// One tokio task per session polls the device on a fixed interval:
// - pull every sample that arrived since the last tick
// - append them to the SampleBuffer in arrival order, under one lock acquisition
// - update the liveness heartbeat
//
// Transient read errors are retried inside the same tick up to a bounded count;
// anything else (disconnect, exhausted retries, a full buffer) ends the loop,
// emits AcquisitionFailed once and cancels the session quit token so the
// protocol winds down and the captured data is persisted.

use crate::buffer::SampleBuffer;
use crate::config::AcquisitionConfig;
use crate::device::EegDevice;
use crate::error::AcquisitionError;
use crate::events::{EventEmitter, ExperimentEvent};
use crate::types::RawSample;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Liveness snapshot of the loop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    pub ticks: u64,
    pub samples_appended: u64,

    /// Time since the last completed tick; None before the first one
    #[serde(skip)]
    pub since_last_tick: Option<Duration>,
}

#[derive(Default)]
struct Liveness {
    ticks: AtomicU64,
    samples: AtomicU64,
    last_tick: Mutex<Option<Instant>>,
}

impl Liveness {
    fn beat(&self, appended: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(appended as u64, Ordering::Relaxed);
        *self.last_tick.lock() = Some(Instant::now());
    }
}

enum LoopState {
    Idle,
    Running {
        stop: CancellationToken,
        handle: JoinHandle<Result<(), AcquisitionError>>,
    },
    Finished,
}

/// Everything the polling task needs, moved into it on start
struct Poller {
    device: Arc<dyn EegDevice>,
    buffer: Arc<SampleBuffer>,
    max_read_retries: u32,
    liveness: Arc<Liveness>,
}

impl Poller {
    fn poll_once(&self) -> Result<usize, AcquisitionError> {
        let samples = self.pull_with_retry()?;
        let appended = self.buffer.append_batch(samples)?;
        self.liveness.beat(appended);
        Ok(appended)
    }

    fn pull_with_retry(&self) -> Result<Vec<RawSample>, AcquisitionError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.device.pull_new_samples() {
                Ok(samples) => return Ok(samples),
                Err(e) if e.is_transient() && attempts <= self.max_read_retries => {
                    log::warn!("Read attempt {} failed, retrying: {}", attempts, e);
                }
                Err(e) if e.is_transient() => {
                    return Err(AcquisitionError::RetriesExhausted { attempts, last: e });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn run(
        self,
        poll_interval: Duration,
        stop: CancellationToken,
        quit: CancellationToken,
        events: EventEmitter,
    ) -> Result<(), AcquisitionError> {
        let mut tick = interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    self.flush();
                    break Ok(());
                }
                _ = tick.tick() => {
                    if let Err(e) = self.poll_once() {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = &result {
            log::error!("{}", e);
            events.emit(ExperimentEvent::AcquisitionFailed {
                error: e.to_string(),
            });
            quit.cancel();
        }
        log::info!(
            "Acquisition loop ended after {} ticks, {} samples",
            self.liveness.ticks.load(Ordering::Relaxed),
            self.buffer.len()
        );
        result
    }

    /// Last pull on a clean stop so samples that arrived since the final tick
    /// are not lost
    fn flush(&self) {
        if let Err(e) = self.poll_once() {
            log::debug!("Final pull skipped: {}", e);
        }
    }
}

/// Owns the polling task that feeds the SampleBuffer
pub struct AcquisitionLoop {
    device: Arc<dyn EegDevice>,
    buffer: Arc<SampleBuffer>,
    max_read_retries: u32,
    poll_interval: Duration,
    liveness: Arc<Liveness>,
    state: Mutex<LoopState>,
    events: EventEmitter,
}

impl AcquisitionLoop {
    /// Poll interval is derived from the device's rate and onboard buffer size
    pub fn new(
        device: Arc<dyn EegDevice>,
        buffer: Arc<SampleBuffer>,
        config: &AcquisitionConfig,
    ) -> Self {
        let info = device.info();
        let poll_interval =
            config.effective_poll_interval(info.layout.sample_rate, info.onboard_buffer_samples);
        Self {
            device,
            buffer,
            max_read_retries: config.max_read_retries,
            poll_interval,
            liveness: Arc::new(Liveness::default()),
            state: Mutex::new(LoopState::Idle),
            events: EventEmitter::new(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Upper bound on how far a marker can trail the event it stamps
    pub fn marker_lag_bound(&self) -> Duration {
        self.poll_interval
    }

    /// Spawn the polling task on the current tokio runtime
    ///
    /// The loop stops when `quit` fires or `stop` is called, and cancels `quit`
    /// itself on a fatal error. A loop runs at most once.
    pub fn start(&self, quit: &CancellationToken) -> Result<(), AcquisitionError> {
        let mut state = self.state.lock();
        if !matches!(*state, LoopState::Idle) {
            return Err(AcquisitionError::AlreadyStarted);
        }

        let stop = quit.child_token();
        let poller = Poller {
            device: Arc::clone(&self.device),
            buffer: Arc::clone(&self.buffer),
            max_read_retries: self.max_read_retries,
            liveness: Arc::clone(&self.liveness),
        };
        let handle = tokio::spawn(poller.run(
            self.poll_interval,
            stop.clone(),
            quit.clone(),
            self.events.clone(),
        ));

        log::info!(
            "Acquisition started, polling every {:?} (marker lag bound)",
            self.poll_interval
        );
        *state = LoopState::Running { stop, handle };
        Ok(())
    }

    /// Stop the loop and wait for its task to end
    ///
    /// Returns the loop's result the first time a running loop is stopped and
    /// None otherwise, so stopping twice or stopping an idle loop is a no-op.
    pub async fn stop(&self) -> Option<Result<(), AcquisitionError>> {
        let previous = std::mem::replace(&mut *self.state.lock(), LoopState::Finished);
        match previous {
            LoopState::Running { stop, handle } => {
                stop.cancel();
                Some(match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(AcquisitionError::Task(e.to_string())),
                })
            }
            LoopState::Idle => {
                *self.state.lock() = LoopState::Idle;
                None
            }
            LoopState::Finished => None,
        }
    }

    pub fn is_running(&self) -> bool {
        match &*self.state.lock() {
            LoopState::Running { handle, .. } => !handle.is_finished(),
            _ => false,
        }
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            ticks: self.liveness.ticks.load(Ordering::Relaxed),
            samples_appended: self.liveness.samples.load(Ordering::Relaxed),
            since_last_tick: self.liveness.last_tick.lock().map(|at| at.elapsed()),
        }
    }
}
