// Protocol sequencer
//
// The listening protocol is a data-described phase table:
//
//   RelaxClosedEyes -> TrialListening(1) -> InterTrialRest -> TrialListening(2)
//   -> ... -> TrialListening(N) -> Finished
//
// Every phase but Finished has a start and an end marker; Finished only emits
// the terminal marker. One cooperative loop walks the table, suspending on
// `tokio::time::sleep` until a phase's duration elapses or the quit token fires.
// On quit the current phase still gets its end marker and the session still
// gets its terminal marker, so the marker stream is always well formed.

use crate::config::ProtocolConfig;
use crate::events::{EventEmitter, ExperimentEvent};
use crate::marker::MarkerSynchronizer;
use crate::stimulus::{AudioPlayer, MessageDisplay, Song, SongLibrary};
use crate::types::MarkerCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A named, timed stage of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "song", rename_all = "snake_case")]
pub enum ProtocolPhase {
    RelaxClosedEyes,
    /// Carries the 1-based song number
    TrialListening(usize),
    InterTrialRest,
    Finished,
}

impl ProtocolPhase {
    /// Marker inserted when the phase is entered
    pub fn start_marker(self) -> MarkerCode {
        match self {
            ProtocolPhase::RelaxClosedEyes | ProtocolPhase::InterTrialRest => {
                MarkerCode::RestStart
            }
            ProtocolPhase::TrialListening(_) => MarkerCode::TrialStart,
            ProtocolPhase::Finished => MarkerCode::ExperimentEnd,
        }
    }

    /// Marker inserted when the phase is left; Finished has none
    pub fn end_marker(self) -> Option<MarkerCode> {
        match self {
            ProtocolPhase::RelaxClosedEyes | ProtocolPhase::InterTrialRest => {
                Some(MarkerCode::RestEnd)
            }
            ProtocolPhase::TrialListening(_) => Some(MarkerCode::TrialEnd),
            ProtocolPhase::Finished => None,
        }
    }
}

impl fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolPhase::RelaxClosedEyes => write!(f, "relax (eyes closed)"),
            ProtocolPhase::TrialListening(n) => write!(f, "trial {}", n),
            ProtocolPhase::InterTrialRest => write!(f, "inter-trial rest"),
            ProtocolPhase::Finished => write!(f, "finished"),
        }
    }
}

/// One row of the phase table
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    pub phase: ProtocolPhase,
    pub duration: Duration,
    pub message: String,
    pub song: Option<Song>,
}

/// Ordered phases of a protocol run, ending with Finished
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTable {
    phases: Vec<PhaseSpec>,
    transition_gap: Duration,
}

impl PhaseTable {
    /// Build the table for a validated configuration
    pub fn from_config(config: &ProtocolConfig) -> Self {
        let library = SongLibrary::new(config.song_directory.clone());
        let mut phases = Vec::new();

        phases.push(PhaseSpec {
            phase: ProtocolPhase::RelaxClosedEyes,
            duration: config.relax_duration(),
            message: config.relax_message.clone(),
            song: None,
        });
        for number in 1..=config.num_trials {
            phases.push(PhaseSpec {
                phase: ProtocolPhase::TrialListening(number),
                duration: config.trial_duration(),
                message: config.trial_text(number),
                song: Some(library.song(number)),
            });
            if number < config.num_trials {
                phases.push(PhaseSpec {
                    phase: ProtocolPhase::InterTrialRest,
                    duration: config.rest_duration(),
                    message: config.rest_message.clone(),
                    song: None,
                });
            }
        }
        phases.push(PhaseSpec {
            phase: ProtocolPhase::Finished,
            duration: Duration::ZERO,
            message: config.finished_message.clone(),
            song: None,
        });

        Self {
            phases,
            transition_gap: config.transition_gap(),
        }
    }

    pub fn phases(&self) -> &[PhaseSpec] {
        &self.phases
    }

    pub fn transition_gap(&self) -> Duration {
        self.transition_gap
    }

    /// Markers an uninterrupted run emits, in order
    pub fn expected_markers(&self) -> Vec<MarkerCode> {
        let mut codes = Vec::with_capacity(self.phases.len() * 2);
        for spec in &self.phases {
            codes.push(spec.phase.start_marker());
            codes.extend(spec.phase.end_marker());
        }
        codes
    }

    /// Nominal duration of an uninterrupted run
    pub fn nominal_duration(&self) -> Duration {
        // One gap before every phase but the first
        let timed = u32::try_from(self.phases.len().saturating_sub(1)).unwrap_or(u32::MAX);
        self.phases
            .iter()
            .fold(Duration::ZERO, |total, spec| total.saturating_add(spec.duration))
            .saturating_add(self.transition_gap.saturating_mul(timed))
    }
}

/// Audit entry for one executed phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: ProtocolPhase,

    /// Offsets from the start of the protocol, in seconds
    pub started_at: f64,
    pub ended_at: f64,

    /// False when the quit signal cut the phase short
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProtocolOutcome {
    Completed,
    /// `during` is None when the quit arrived between two phases
    Aborted { during: Option<ProtocolPhase> },
}

impl ProtocolOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ProtocolOutcome::Completed)
    }
}

/// Result of driving the phase table once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRun {
    pub outcome: ProtocolOutcome,
    pub phases: Vec<PhaseRecord>,
}

/// Walks a phase table, driving display, audio and markers
pub struct ProtocolSequencer {
    table: PhaseTable,
    markers: Arc<MarkerSynchronizer>,
    display: Arc<dyn MessageDisplay>,
    audio: Arc<dyn AudioPlayer>,
    events: EventEmitter,
}

impl ProtocolSequencer {
    pub fn new(
        table: PhaseTable,
        markers: Arc<MarkerSynchronizer>,
        display: Arc<dyn MessageDisplay>,
        audio: Arc<dyn AudioPlayer>,
    ) -> Self {
        Self {
            table,
            markers,
            display,
            audio,
            events: EventEmitter::new(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn table(&self) -> &PhaseTable {
        &self.table
    }

    /// Run the protocol until Finished or until `quit` fires
    pub async fn run(&self, quit: &CancellationToken) -> ProtocolRun {
        let origin = Instant::now();
        let offset = || origin.elapsed().as_secs_f64();
        let mut records = Vec::with_capacity(self.table.phases.len());
        let mut outcome = ProtocolOutcome::Completed;

        let (finish, timed) = match self.table.phases.split_last() {
            Some(split) => split,
            None => return ProtocolRun { outcome, phases: records },
        };

        for (position, spec) in timed.iter().enumerate() {
            if position > 0 && !wait(self.table.transition_gap, quit).await {
                outcome = ProtocolOutcome::Aborted { during: None };
                break;
            }
            if quit.is_cancelled() {
                outcome = ProtocolOutcome::Aborted { during: None };
                break;
            }

            let started_at = offset();
            self.enter(position, spec);
            let completed = wait(spec.duration, quit).await;
            self.leave(spec);

            records.push(PhaseRecord {
                phase: spec.phase,
                started_at,
                ended_at: offset(),
                completed,
            });

            if !completed {
                log::info!("Protocol aborted during {}", spec.phase);
                outcome = ProtocolOutcome::Aborted {
                    during: Some(spec.phase),
                };
                break;
            }
        }

        if outcome.is_completed()
            && !timed.is_empty()
            && !wait(self.table.transition_gap, quit).await
        {
            outcome = ProtocolOutcome::Aborted { during: None };
        }

        // The terminal marker is emitted whether or not the run completed
        let at = offset();
        self.enter(timed.len(), finish);
        records.push(PhaseRecord {
            phase: finish.phase,
            started_at: at,
            ended_at: at,
            completed: true,
        });

        if outcome.is_completed() {
            log::info!("Protocol completed in {:.1}s", offset());
        }
        ProtocolRun {
            outcome,
            phases: records,
        }
    }

    fn enter(&self, position: usize, spec: &PhaseSpec) {
        log::debug!("Entering phase {}: {}", position, spec.phase);
        self.display.show_message(&spec.message);
        if let Some(song) = &spec.song {
            if let Err(e) = self.audio.play(song) {
                // Timing is owned by the phase timer; a silent trial still runs
                log::warn!("Could not play song {}: {}", song.number, e);
            }
        }
        self.markers.insert_marker(spec.phase.start_marker());
        self.events.emit(ExperimentEvent::PhaseEntered {
            position,
            phase: spec.phase,
        });
    }

    fn leave(&self, spec: &PhaseSpec) {
        if spec.song.is_some() {
            self.audio.stop();
        }
        if let Some(code) = spec.phase.end_marker() {
            self.markers.insert_marker(code);
        }
    }
}

/// Sleep for `duration`; false if `quit` fired first
async fn wait(duration: Duration, quit: &CancellationToken) -> bool {
    tokio::select! {
        biased;

        _ = quit.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
