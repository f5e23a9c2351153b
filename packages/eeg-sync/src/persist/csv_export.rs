// Tabular export
//
// One row per sample: channel values, device timestamp, the same timestamp as
// UTC date-time, sequence index and marker column. The marker column holds 0
// when no marker is attached to the sample, the code otherwise, and codes
// joined with ';' in insertion order when several markers share a sample.
//
// A session without samples still carries its marker log: each marker becomes a
// row with empty channel, timestamp and datetime cells.

use super::{LoadedMarker, LoadedSession, SessionWriter};
use crate::error::{PersistError, PersistResult};
use crate::session::SessionData;
use crate::types::MarkerCode;
use chrono::DateTime;
use std::collections::HashMap;
use std::path::Path;

const TRAILING_COLUMNS: [&str; 4] = ["timestamp", "datetime", "sequence_index", "marker"];

pub struct CsvSessionWriter;

impl CsvSessionWriter {
    pub fn new() -> Self {
        Self
    }

    /// Marker cell per sample index
    ///
    /// Markers pointing past the last sample (inserted before it arrived) are
    /// attached to the last row.
    fn marker_cells(data: &SessionData) -> HashMap<u64, String> {
        let mut cells: HashMap<u64, String> = HashMap::new();
        let Some(last) = data.samples.len().checked_sub(1) else {
            return cells;
        };

        for marker in &data.markers {
            let index = marker.sample_index.min(last as u64);
            cells
                .entry(index)
                .and_modify(|cell| {
                    cell.push(';');
                    cell.push_str(&marker.code.to_string());
                })
                .or_insert_with(|| marker.code.to_string());
        }
        cells
    }
}

fn format_datetime(timestamp: f64) -> String {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        .unwrap_or_default()
}

impl SessionWriter for CsvSessionWriter {
    fn write(&self, data: &SessionData, output_path: &Path) -> PersistResult<()> {
        self.validate_data(data)?;

        let mut writer = csv::Writer::from_path(output_path)?;
        let header = data
            .layout
            .names
            .iter()
            .map(String::as_str)
            .chain(TRAILING_COLUMNS);
        writer.write_record(header)?;

        let markers = Self::marker_cells(data);
        let mut record = Vec::with_capacity(data.layout.num_channels() + TRAILING_COLUMNS.len());
        for sample in &data.samples {
            record.clear();
            record.extend(sample.channels.iter().map(|v| v.to_string()));
            record.push(sample.timestamp.to_string());
            record.push(format_datetime(sample.timestamp));
            record.push(sample.index.to_string());
            record.push(
                markers
                    .get(&sample.index)
                    .cloned()
                    .unwrap_or_else(|| "0".to_string()),
            );
            writer.write_record(&record)?;
        }

        if data.samples.is_empty() && !data.markers.is_empty() {
            log::warn!(
                "No samples recorded, writing {} marker-only rows",
                data.markers.len()
            );
            for marker in &data.markers {
                record.clear();
                record.extend(std::iter::repeat(String::new()).take(data.layout.num_channels() + 2));
                record.push(marker.sample_index.to_string());
                record.push(marker.code.to_string());
                writer.write_record(&record)?;
            }
        }

        writer.flush()?;
        Ok(())
    }

    fn format_name(&self) -> &str {
        "CSV"
    }

    fn file_name(&self, data: &SessionData) -> String {
        format!("{}.csv", data.file_stem())
    }
}

impl Default for CsvSessionWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_field<T: std::str::FromStr>(value: &str, column: &str, row: usize) -> PersistResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        PersistError::InvalidData(format!("row {}: invalid {} '{}': {}", row, column, value, e))
    })
}

fn parse_marker(cell: &str, row: usize) -> PersistResult<MarkerCode> {
    let raw: u8 = parse_field(cell, "marker", row)?;
    MarkerCode::try_from(raw).map_err(|e| PersistError::InvalidData(format!("row {}: {}", row, e)))
}

/// Read a tabular export back into memory
pub fn read_tabular(path: &Path) -> PersistResult<LoadedSession> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let channel_count = headers
        .len()
        .checked_sub(TRAILING_COLUMNS.len())
        .filter(|_| {
            headers
                .iter()
                .skip(headers.len() - TRAILING_COLUMNS.len())
                .eq(TRAILING_COLUMNS)
        })
        .ok_or_else(|| {
            PersistError::Format(format!(
                "expected trailing columns {:?} in {}",
                TRAILING_COLUMNS,
                path.display()
            ))
        })?;
    let channel_names = headers
        .iter()
        .take(channel_count)
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    let mut markers = Vec::new();
    let mut first_timestamp = None;

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let sample_index: u64 = parse_field(&record[channel_count + 2], "sequence_index", row)?;

        if record[channel_count].trim().is_empty() {
            // Marker-only row of a session without samples
            let cell = record[channel_count + 3].trim();
            for code in cell.split(';') {
                markers.push(LoadedMarker {
                    code: parse_marker(code, row)?,
                    sample_index,
                    onset: 0.0,
                });
            }
            continue;
        }

        let values = (0..channel_count)
            .map(|ch| parse_field::<f64>(&record[ch], "channel value", row))
            .collect::<PersistResult<Vec<_>>>()?;
        let timestamp: f64 = parse_field(&record[channel_count], "timestamp", row)?;
        let origin = *first_timestamp.get_or_insert(timestamp);

        let cell = record[channel_count + 3].trim();
        if cell != "0" {
            for code in cell.split(';') {
                markers.push(LoadedMarker {
                    code: parse_marker(code, row)?,
                    sample_index,
                    onset: timestamp - origin,
                });
            }
        }
        rows.push(values);
    }

    Ok(LoadedSession {
        format: "CSV".to_string(),
        resolution: vec![0.0; channel_count],
        channel_names,
        sample_rate: None,
        rows,
        markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::tests::session;
    use tempfile::TempDir;

    #[test]
    fn test_columns_and_marker_cells() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let data = session(
            4,
            &[
                (MarkerCode::RestEnd, 1),
                (MarkerCode::TrialStart, 1),
                (MarkerCode::ExperimentEnd, 3),
            ],
        );

        CsvSessionWriter::new().write(&data, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "C3,C4,timestamp,datetime,sequence_index,marker");
        assert_eq!(lines.len(), 5);
        assert!(lines[1].ends_with(",0,0"));
        assert!(lines[2].ends_with(",1,2;3"));
        assert!(lines[4].ends_with(",3,6"));
        assert!(lines[1].contains("2023-11-14 22:13:20.000000"));
    }

    #[test]
    fn test_late_marker_attached_to_last_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let data = session(3, &[(MarkerCode::ExperimentEnd, 3)]);

        CsvSessionWriter::new().write(&data, &path).unwrap();
        let loaded = read_tabular(&path).unwrap();
        assert_eq!(loaded.markers.len(), 1);
        assert_eq!(loaded.markers[0].sample_index, 2);
    }

    #[test]
    fn test_empty_session_keeps_marker_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let data = session(0, &[(MarkerCode::ExperimentEnd, 0)]);

        CsvSessionWriter::new().write(&data, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().nth(1), Some(",,,,0,6"));

        let loaded = read_tabular(&path).unwrap();
        assert_eq!(loaded.num_samples(), 0);
        assert_eq!(loaded.channel_names, vec!["C3", "C4"]);
        assert_eq!(loaded.marker_codes(), vec![MarkerCode::ExperimentEnd]);
        assert_eq!(loaded.markers[0].sample_index, 0);
    }

    #[test]
    fn test_empty_session_without_markers_writes_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");

        CsvSessionWriter::new().write(&session(0, &[]), &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_rejects_unknown_marker_code() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "C3,timestamp,datetime,sequence_index,marker\n1.0,0.0,x,0,5\n",
        )
        .unwrap();

        assert!(matches!(read_tabular(&path), Err(PersistError::InvalidData(_))));
    }

    #[test]
    fn test_rejects_foreign_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        assert!(matches!(read_tabular(&path), Err(PersistError::Format(_))));
    }
}
