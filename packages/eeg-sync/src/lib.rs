//! Real-time EEG acquisition with protocol-synchronized event markers
//!
//! A session records a multichannel EEG stream while a timed listening protocol
//! runs (eyes-closed relaxation, song trials, inter-trial rests). Each phase
//! boundary stamps a marker onto the sample stream, and the finished session is
//! written as a CSV table and as EDF+ with embedded annotations.
//!
//! ```no_run
//! use eeg_sync::{create_device, ExperimentConfig, ExperimentController};
//! # use eeg_sync::{AudioPlayer, MessageDisplay, Song};
//! # use std::sync::Arc;
//! # struct Console;
//! # impl MessageDisplay for Console { fn show_message(&self, _: &str) {} }
//! # impl AudioPlayer for Console {
//! #     fn play(&self, _: &Song) -> Result<(), String> { Ok(()) }
//! #     fn stop(&self) {}
//! # }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExperimentConfig {
//!     subject_id: "S01".to_string(),
//!     ..Default::default()
//! };
//! let device = create_device(config.device.clone());
//! let controller = ExperimentController::new(config, device, Arc::new(Console), Arc::new(Console));
//! let report = controller.run().await?;
//! println!("{} samples, markers {:?}", report.samples_recorded, report.markers);
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod events;
pub mod marker;
pub mod persist;
pub mod protocol;
pub mod session;
pub mod stimulus;
pub mod types;

pub use acquisition::{AcquisitionLoop, Heartbeat};
pub use buffer::{BufferContents, SampleBuffer};
pub use config::{AcquisitionConfig, ExperimentConfig, ProtocolConfig};
pub use controller::{ExperimentController, SessionReport};
pub use device::{create_device, DeviceConfig, DeviceInfo, EegDevice, StreamConfig};
pub use device::{SyntheticDevice, SyntheticOptions};
pub use error::{
    AcquisitionError, BufferError, ConfigError, DeviceError, ExperimentError, PersistError,
};
pub use events::{EventEmitter, ExperimentEvent, SessionStats};
pub use marker::MarkerSynchronizer;
pub use persist::{
    read_edf, read_tabular, LoadedSession, PersistReport, SessionPersister, SessionWriter,
};
pub use protocol::{
    PhaseRecord, PhaseSpec, PhaseTable, ProtocolOutcome, ProtocolPhase, ProtocolRun,
    ProtocolSequencer,
};
pub use session::{Session, SessionData};
pub use stimulus::{AudioPlayer, MessageDisplay, Song, SongLibrary};
pub use types::{ChannelLayout, MarkerCode, MarkerEvent, RawSample, Sample};
