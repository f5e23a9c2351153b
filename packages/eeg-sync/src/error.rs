// Error types for acquisition, buffering, protocol and persistence
//
// Every failure the session can meet maps onto one of these enums. Device and
// acquisition errors end the session (whatever was captured is still saved),
// native marker failures are only logged, and persistence errors are collected
// per export format so one failing file never prevents the other.

use thiserror::Error;

/// Errors raised by an EEG device driver
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    /// The device is gone (disconnect, power loss, session released)
    #[error("Device connection error: {0}")]
    Connection(String),

    /// A read failed but the link is still up; worth retrying
    #[error("Transient device read error: {0}")]
    Transient(String),

    /// The driver refused to tag its native marker channel
    #[error("Device rejected marker {code}: {reason}")]
    MarkerRejected { code: u8, reason: String },

    #[error("Device stream is not running")]
    NotStreaming,
}

impl DeviceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Transient(_))
    }
}

/// Errors reported by the sample buffer on capacity or consistency violations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BufferError {
    #[error("Buffer full: capacity of {capacity} samples reached")]
    Full { capacity: usize },

    #[error("Sample has {got} channels, buffer expects {expected}")]
    ChannelMismatch { expected: usize, got: usize },

    #[error("Marker index {index} is beyond the next sample index {next}")]
    MarkerOutOfRange { index: u64, next: u64 },

    #[error("Buffer is sealed, no further samples accepted")]
    Sealed,

    #[error("Buffer must be sealed before it can be drained")]
    NotSealed,

    #[error("Buffer has already been drained")]
    AlreadyDrained,
}

/// Errors that end the acquisition loop
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AcquisitionError {
    #[error("Acquisition failed: {0}")]
    Device(#[from] DeviceError),

    #[error("Acquisition failed after {attempts} read attempts: {last}")]
    RetriesExhausted { attempts: u32, last: DeviceError },

    #[error("Acquisition failed: {0}")]
    Buffer(#[from] BufferError),

    #[error("Acquisition loop already started")]
    AlreadyStarted,

    #[error("Acquisition task ended abnormally: {0}")]
    Task(String),
}

/// Errors produced while writing or reading a persisted session
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),
}

/// Invalid experiment configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Song file not found: {0}")]
    SongMissing(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level errors that prevent an experiment from running at all
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error("Experiment already ran for this controller")]
    AlreadyRan,
}

pub type DeviceResult<T> = Result<T, DeviceError>;
pub type BufferResult<T> = Result<T, BufferError>;
pub type PersistResult<T> = Result<T, PersistError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
