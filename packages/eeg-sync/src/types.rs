// Core data types shared by acquisition, markers and persistence

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A reading as delivered by the device driver, before the buffer numbers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// One value per EEG channel, in microvolts
    pub channels: Vec<f64>,

    /// Device clock timestamp in seconds
    pub timestamp: f64,
}

impl RawSample {
    pub fn new(channels: Vec<f64>, timestamp: f64) -> Self {
        Self {
            channels,
            timestamp,
        }
    }
}

/// One timestamped multichannel reading, immutable once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Sequence index assigned by the buffer, strictly increasing from 0
    pub index: u64,

    /// Device clock timestamp in seconds
    pub timestamp: f64,

    /// One value per channel, shared with snapshots
    pub channels: Arc<[f64]>,
}

impl Sample {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}

/// Wire-level marker vocabulary
///
/// Code 5 sits inside the used range but is never emitted; it stays reserved.
/// Rest periods before the first trial and between trials share codes 1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum MarkerCode {
    RestStart = 1,
    RestEnd = 2,
    TrialStart = 3,
    TrialEnd = 4,
    ExperimentEnd = 6,
}

impl MarkerCode {
    pub const RESERVED: u8 = 5;

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            MarkerCode::RestStart => "rest-start",
            MarkerCode::RestEnd => "rest-end",
            MarkerCode::TrialStart => "trial-start",
            MarkerCode::TrialEnd => "trial-end",
            MarkerCode::ExperimentEnd => "experiment-end",
        }
    }
}

impl TryFrom<u8> for MarkerCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MarkerCode::RestStart),
            2 => Ok(MarkerCode::RestEnd),
            3 => Ok(MarkerCode::TrialStart),
            4 => Ok(MarkerCode::TrialEnd),
            6 => Ok(MarkerCode::ExperimentEnd),
            MarkerCode::RESERVED => Err("marker code 5 is reserved".to_string()),
            other => Err(format!("unknown marker code {}", other)),
        }
    }
}

impl From<MarkerCode> for u8 {
    fn from(code: MarkerCode) -> Self {
        code.as_u8()
    }
}

impl fmt::Display for MarkerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// A protocol event correlated to a position in the sample stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerEvent {
    pub code: MarkerCode,

    /// Tail index at insertion time, or the next index if no sample exists yet
    pub sample_index: u64,

    /// Timestamp of the correlated sample; None if the buffer was still empty
    pub timestamp: Option<f64>,

    /// Time since the correlated sample was appended (measured marker lag)
    #[serde(with = "duration_micros")]
    pub lag: Duration,

    /// Wall-clock time of insertion
    pub inserted_at: chrono::DateTime<chrono::Utc>,
}

/// Channel layout and rate of the stream being recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLayout {
    pub names: Vec<String>,
    pub sample_rate: f64,
    pub unit: String,
}

impl ChannelLayout {
    pub fn new(names: Vec<String>, sample_rate: f64) -> Self {
        Self {
            names,
            sample_rate,
            unit: "uV".to_string(),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.names.len()
    }
}

mod duration_micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(d)?))
    }
}
