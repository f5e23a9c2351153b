// Session persistence
//
// A finalized session is written in two formats from the same SessionData, so
// both files are consistent by construction:
//
// SessionData → SessionWriter → <subject>_eeg_data.csv / <subject>_eeg_data.raw.edf
//
// Writers are attempted independently. A failing format is reported in the
// PersistReport and never prevents the other from being written.

pub mod csv_export;
pub mod edf_export;

pub use csv_export::{read_tabular, CsvSessionWriter};
pub use edf_export::{read_edf, EdfSessionWriter};

use crate::error::{PersistError, PersistResult};
use crate::session::SessionData;
use crate::types::MarkerCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One export format
pub trait SessionWriter: Send + Sync {
    /// Write `data` to `output_path`, replacing any existing file
    fn write(&self, data: &SessionData, output_path: &Path) -> PersistResult<()>;

    fn format_name(&self) -> &str;

    /// File name this format uses for a session
    fn file_name(&self, data: &SessionData) -> String;

    /// Validate that the session can be written in this format
    fn validate_data(&self, data: &SessionData) -> PersistResult<()> {
        if data.layout.num_channels() == 0 {
            return Err(PersistError::InvalidData(
                "No channels in session".to_string(),
            ));
        }
        let expected = data.layout.num_channels();
        if let Some(sample) = data.samples.iter().find(|s| s.num_channels() != expected) {
            return Err(PersistError::InvalidData(format!(
                "Sample {} has {} channels, layout has {}",
                sample.index,
                sample.num_channels(),
                expected
            )));
        }
        Ok(())
    }
}

/// Result of one format's export attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOutcome {
    pub format: String,
    pub path: PathBuf,
    pub error: Option<String>,
}

impl ExportOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate of every export attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistReport {
    pub exports: Vec<ExportOutcome>,
}

impl PersistReport {
    pub fn is_success(&self) -> bool {
        self.exports.iter().all(ExportOutcome::is_ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExportOutcome> {
        self.exports.iter().filter(|e| !e.is_ok())
    }
}

/// Writes a session in every configured format
pub struct SessionPersister {
    writers: Vec<Box<dyn SessionWriter>>,
}

impl Default for SessionPersister {
    fn default() -> Self {
        Self::new(vec![
            Box::new(CsvSessionWriter::new()),
            Box::new(EdfSessionWriter::new()),
        ])
    }
}

impl SessionPersister {
    pub fn new(writers: Vec<Box<dyn SessionWriter>>) -> Self {
        Self { writers }
    }

    /// Write every format into `output_dir`, collecting per-format results
    pub fn persist(&self, data: &SessionData, output_dir: &Path) -> PersistReport {
        let mut report = PersistReport::default();
        let dir_error = std::fs::create_dir_all(output_dir).err();

        for writer in &self.writers {
            let path = output_dir.join(writer.file_name(data));
            let result = match &dir_error {
                Some(e) => Err(PersistError::Io(std::io::Error::new(
                    e.kind(),
                    format!("cannot create {}: {}", output_dir.display(), e),
                ))),
                None => writer.write(data, &path),
            };

            match &result {
                Ok(()) => log::info!("{} export written to {}", writer.format_name(), path.display()),
                Err(e) => log::error!("{} export to {} failed: {}", writer.format_name(), path.display(), e),
            }
            report.exports.push(ExportOutcome {
                format: writer.format_name().to_string(),
                path,
                error: result.err().map(|e| e.to_string()),
            });
        }
        report
    }
}

/// A marker as recovered from a persisted file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedMarker {
    pub code: MarkerCode,
    pub sample_index: u64,

    /// Seconds from the first sample
    pub onset: f64,
}

/// A session read back from one of the export formats
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    pub format: String,
    pub channel_names: Vec<String>,
    pub sample_rate: Option<f64>,

    /// One row of channel values per sample
    pub rows: Vec<Vec<f64>>,

    /// Largest representation error per channel (0 for lossless formats)
    pub resolution: Vec<f64>,

    pub markers: Vec<LoadedMarker>,
}

impl LoadedSession {
    pub fn num_samples(&self) -> usize {
        self.rows.len()
    }

    pub fn marker_codes(&self) -> Vec<MarkerCode> {
        self.markers.iter().map(|m| m.code).collect()
    }

    /// Differences between two readings of the same session, empty if they agree
    pub fn compare(&self, other: &LoadedSession) -> Vec<String> {
        let mut issues = Vec::new();
        if self.channel_names != other.channel_names {
            issues.push(format!(
                "channel names differ: {:?} ({}) vs {:?} ({})",
                self.channel_names, self.format, other.channel_names, other.format
            ));
        }
        if self.num_samples() != other.num_samples() {
            issues.push(format!(
                "sample count differs: {} ({}) vs {} ({})",
                self.num_samples(),
                self.format,
                other.num_samples(),
                other.format
            ));
        }
        if self.marker_codes() != other.marker_codes() {
            issues.push(format!(
                "marker sequence differs: {:?} ({}) vs {:?} ({})",
                self.marker_codes(),
                self.format,
                other.marker_codes(),
                other.format
            ));
        }
        for (a, b) in self.markers.iter().zip(&other.markers) {
            if a.sample_index != b.sample_index {
                issues.push(format!(
                    "marker {} at sample {} ({}) vs {} ({})",
                    a.code, a.sample_index, self.format, b.sample_index, other.format
                ));
                break;
            }
        }

        let mismatch = self.rows.iter().zip(&other.rows).enumerate().find_map(|(i, (a, b))| {
            a.iter().zip(b).enumerate().find_map(|(ch, (x, y))| {
                let tolerance = self.resolution.get(ch).copied().unwrap_or(0.0)
                    + other.resolution.get(ch).copied().unwrap_or(0.0)
                    + 1e-9;
                let differs = if x.is_finite() && y.is_finite() {
                    (x - y).abs() > tolerance
                } else {
                    x.to_bits() != y.to_bits() && !(x.is_nan() && y.is_nan())
                };
                differs.then(|| (i, ch, *x, *y))
            })
        });
        if let Some((i, ch, x, y)) = mismatch {
            issues.push(format!("sample {} channel {} differs: {} vs {}", i, ch, x, y));
        }
        issues
    }
}
