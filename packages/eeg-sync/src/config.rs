// Experiment configuration
//
// Loaded from JSON (every field optional, defaults match the standard listening
// protocol) and then adjusted by command-line overrides before `validate()`.

use crate::device::{DeviceConfig, StreamConfig};
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted phase or gap, in seconds (one day)
pub const MAX_PHASE_SECS: f64 = 86_400.0;

/// Song files are numbered with three digits
pub const MAX_TRIALS: usize = 999;

/// Non-negative seconds to a Duration, saturating instead of panicking
fn seconds(value: f64) -> Duration {
    if value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Timing and messages of the listening protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Initial eyes-closed relaxation
    pub relax_secs: f64,

    /// Listening time per song
    pub trial_secs: f64,

    /// Rest after each trial except the last
    pub rest_secs: f64,

    pub num_trials: usize,

    /// Settle delay between the end of one phase and the start of the next
    pub transition_gap_secs: f64,

    /// Directory holding song001.mp3, song002.mp3, ...
    pub song_directory: Option<PathBuf>,

    pub relax_message: String,
    pub rest_message: String,

    /// `{n}` is replaced by the 1-based song number
    pub trial_message: String,
    pub finished_message: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            relax_secs: 60.0,
            trial_secs: 30.0,
            rest_secs: 10.0,
            num_trials: 5,
            transition_gap_secs: 0.5,
            song_directory: None,
            relax_message: "Relax with eyes closed".to_string(),
            rest_message: "Relax".to_string(),
            trial_message: "Song {n}".to_string(),
            finished_message: "Experiment complete".to_string(),
        }
    }
}

impl ProtocolConfig {
    pub fn relax_duration(&self) -> Duration {
        seconds(self.relax_secs)
    }

    pub fn trial_duration(&self) -> Duration {
        seconds(self.trial_secs)
    }

    pub fn rest_duration(&self) -> Duration {
        seconds(self.rest_secs)
    }

    pub fn transition_gap(&self) -> Duration {
        seconds(self.transition_gap_secs)
    }

    pub fn trial_text(&self, song_number: usize) -> String {
        self.trial_message.replace("{n}", &song_number.to_string())
    }

    /// Nominal wall time of the whole protocol
    pub fn total_duration(&self) -> Duration {
        let rests = self.num_trials.saturating_sub(1) as f64;
        let phases = 1 + self.num_trials + self.num_trials.saturating_sub(1);
        seconds(
            self.relax_secs
                + self.trial_secs * self.num_trials as f64
                + self.rest_secs * rests
                + self.transition_gap_secs * phases as f64,
        )
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (name, value) in [
            ("relax_secs", self.relax_secs),
            ("trial_secs", self.trial_secs),
            ("rest_secs", self.rest_secs),
            ("transition_gap_secs", self.transition_gap_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
            if value > MAX_PHASE_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be at most {} seconds, got {}",
                    name, MAX_PHASE_SECS, value
                )));
            }
        }
        if self.num_trials > MAX_TRIALS {
            return Err(ConfigError::Invalid(format!(
                "num_trials must be at most {}, got {}",
                MAX_TRIALS, self.num_trials
            )));
        }
        Ok(())
    }
}

/// Acquisition loop tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Upper bound on the polling interval; also the marker lag bound
    pub poll_interval_ms: u64,

    /// Extra read attempts within one tick after a transient error
    pub max_read_retries: u32,

    /// Hard ceiling on buffered samples (None = unbounded)
    pub buffer_capacity: Option<usize>,

    /// How often stats events are emitted
    pub stats_interval_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            max_read_retries: 3,
            buffer_capacity: None,
            stats_interval_ms: 1000,
        }
    }
}

impl AcquisitionConfig {
    /// Polling interval short enough that the device's onboard buffer, filled at
    /// `sample_rate`, is drained at least twice before it can wrap
    pub fn effective_poll_interval(
        &self,
        sample_rate: f64,
        onboard_buffer_samples: Option<usize>,
    ) -> Duration {
        let configured = Duration::from_millis(self.poll_interval_ms.max(1));
        match onboard_buffer_samples {
            Some(samples) if sample_rate > 0.0 && samples > 0 => {
                let half_fill = Duration::from_secs_f64(samples as f64 / sample_rate / 2.0);
                configured.min(half_fill.max(Duration::from_millis(1)))
            }
            _ => configured,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.buffer_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "buffer_capacity must be positive when set".to_string(),
            ));
        }
        if self.stats_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "stats_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete configuration of one recording session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub subject_id: String,
    pub output_dir: PathBuf,
    pub protocol: ProtocolConfig,
    pub acquisition: AcquisitionConfig,
    pub device: DeviceConfig,
    pub stream: StreamConfig,
}

impl ExperimentConfig {
    /// Read a JSON configuration file
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn output_dir(&self) -> &Path {
        if self.output_dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            &self.output_dir
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validate_subject_id(&self.subject_id)?;
        self.protocol.validate()?;
        self.acquisition.validate()?;
        Ok(())
    }
}

/// Subject ids become file name prefixes, so only a safe alphabet is accepted
pub fn validate_subject_id(subject_id: &str) -> ConfigResult<()> {
    if subject_id.trim().is_empty() {
        return Err(ConfigError::Invalid("subject id is required".to_string()));
    }
    if !subject_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || subject_id.starts_with('.')
    {
        return Err(ConfigError::Invalid(format!(
            "subject id '{}' may only contain letters, digits, '-', '_' and '.'",
            subject_id
        )));
    }
    Ok(())
}
