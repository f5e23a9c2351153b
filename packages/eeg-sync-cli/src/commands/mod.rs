pub mod inspect;
pub mod protocol;
pub mod run;

use crate::cli::ProtocolOverrides;
use eeg_sync::{ExperimentConfig, ProtocolConfig};
use std::path::Path;

/// Load the JSON configuration, or defaults when no file is given
pub fn load_config(path: Option<&Path>) -> Result<ExperimentConfig, String> {
    match path {
        Some(path) => ExperimentConfig::from_json_file(path)
            .map_err(|e| format!("{}: {}", path.display(), e)),
        None => Ok(ExperimentConfig::default()),
    }
}

impl ProtocolOverrides {
    pub fn apply(&self, protocol: &mut ProtocolConfig) {
        if let Some(secs) = self.relax_secs {
            protocol.relax_secs = secs;
        }
        if let Some(secs) = self.trial_secs {
            protocol.trial_secs = secs;
        }
        if let Some(secs) = self.rest_secs {
            protocol.rest_secs = secs;
        }
        if let Some(trials) = self.trials {
            protocol.num_trials = trials;
        }
        if let Some(secs) = self.gap_secs {
            protocol.transition_gap_secs = secs;
        }
        if let Some(dir) = &self.songs {
            protocol.song_directory = Some(dir.clone());
        }
    }
}

/// Marker codes as a comma-separated list
pub fn format_markers<T: std::fmt::Display>(codes: &[T]) -> String {
    codes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
