// EDF+ export with embedded marker annotations
// Specification: https://www.edfplus.info/specs/edfplus.html
//
// Layout written here:
// - one-second data records, samples per record = sample rate (integer rates only)
// - one 16-bit signal per EEG channel, physical range from the data plus 10% margin
// - a trailing "EDF Annotations" signal; each record starts with its timekeeping
//   TAL followed by one TAL per marker whose onset falls in that record
//
// The last record is zero padded. The recording field carries a `samples=<N>`
// subfield so the reader can drop the padding again.

use super::{LoadedMarker, LoadedSession, SessionWriter};
use crate::error::{PersistError, PersistResult};
use crate::session::SessionData;
use crate::types::MarkerCode;
use chrono::{Datelike, Timelike};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Minimum samples to use parallel processing
const PARALLEL_THRESHOLD: usize = 10_000;

const ANNOTATION_LABEL: &str = "EDF Annotations";
const DIGITAL_MIN: i64 = -32768;
const DIGITAL_MAX: i64 = 32767;
const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Physical range of one channel, as written into the header
#[derive(Debug, Clone)]
struct Calibration {
    physical_min: f64,
    physical_max: f64,
    min_text: String,
    max_text: String,
}

impl Calibration {
    fn gain(&self) -> f64 {
        (self.physical_max - self.physical_min) / (DIGITAL_MAX - DIGITAL_MIN) as f64
    }

    fn offset(&self) -> f64 {
        self.physical_max - self.gain() * DIGITAL_MAX as f64
    }

    fn to_digital(&self, value: f64) -> i16 {
        let raw = ((value - self.offset()) / self.gain()).round() as i64;
        raw.clamp(DIGITAL_MIN, DIGITAL_MAX) as i16
    }
}

pub struct EdfSessionWriter;

impl EdfSessionWriter {
    pub fn new() -> Self {
        Self
    }

    fn write_fixed_string<W: Write>(writer: &mut W, s: &str, size: usize) -> PersistResult<()> {
        let mut buffer = vec![b' '; size];
        let bytes = s.as_bytes();
        let copy_len = bytes.len().min(size);
        buffer[..copy_len].copy_from_slice(&bytes[..copy_len]);
        writer.write_all(&buffer)?;
        Ok(())
    }

    fn samples_per_record(data: &SessionData) -> PersistResult<usize> {
        let rate = data.layout.sample_rate;
        if !(rate >= 1.0) || (rate - rate.round()).abs() > 1e-9 {
            return Err(PersistError::Format(format!(
                "EDF export needs a positive integer sample rate, got {}",
                rate
            )));
        }
        Ok(rate.round() as usize)
    }

    fn write_header<W: Write>(
        writer: &mut W,
        data: &SessionData,
        num_data_records: usize,
    ) -> PersistResult<()> {
        let num_signals = data.layout.num_channels() + 1;
        let started = data.started_at;

        Self::write_fixed_string(writer, "0", 8)?;
        // EDF+ patient field: code sex birthdate name
        Self::write_fixed_string(writer, &format!("{} X X X", data.subject_id), 80)?;

        let recording_id = format!(
            "Startdate {:02}-{}-{} {} X eeg-sync samples={}",
            started.day(),
            MONTHS[started.month0() as usize],
            started.year(),
            &data.session_id.simple().to_string()[..8],
            data.samples.len()
        );
        Self::write_fixed_string(writer, &recording_id, 80)?;

        let date = format!(
            "{:02}.{:02}.{:02}",
            started.day(),
            started.month(),
            started.year() % 100
        );
        let time = format!(
            "{:02}.{:02}.{:02}",
            started.hour(),
            started.minute(),
            started.second()
        );
        Self::write_fixed_string(writer, &date, 8)?;
        Self::write_fixed_string(writer, &time, 8)?;

        Self::write_fixed_string(writer, &(256 * (num_signals + 1)).to_string(), 8)?;
        Self::write_fixed_string(writer, "EDF+C", 44)?;
        Self::write_fixed_string(writer, &num_data_records.to_string(), 8)?;
        Self::write_fixed_string(writer, "1", 8)?;
        Self::write_fixed_string(writer, &num_signals.to_string(), 4)?;
        Ok(())
    }

    /// Min/max of every channel (parallelized for large sessions)
    fn compute_channel_bounds(data: &SessionData) -> Vec<(f64, f64)> {
        let bounds = |ch: usize| {
            data.samples.iter().fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(min, max), sample| (min.min(sample.channels[ch]), max.max(sample.channels[ch])),
            )
        };
        let channels = data.layout.num_channels();
        if data.samples.len() >= PARALLEL_THRESHOLD {
            (0..channels).into_par_iter().map(bounds).collect()
        } else {
            (0..channels).map(bounds).collect()
        }
    }

    fn calibrations(data: &SessionData) -> PersistResult<Vec<Calibration>> {
        Self::compute_channel_bounds(data)
            .into_iter()
            .map(|(min, max)| {
                if !min.is_finite() || !max.is_finite() {
                    return Err(PersistError::InvalidData(
                        "EDF export needs finite channel values".to_string(),
                    ));
                }
                let margin = (max - min).abs() * 0.1;
                let (mut low, mut high) = (min - margin, max + margin);
                if high - low < f64::EPSILON {
                    low -= 1.0;
                    high += 1.0;
                }
                // Calibrate with the values as they will read back from the header
                let (min_text, physical_min) = fit_header_number(low, Rounding::Down)?;
                let (max_text, physical_max) = fit_header_number(high, Rounding::Up)?;
                Ok(Calibration {
                    physical_min,
                    physical_max,
                    min_text,
                    max_text,
                })
            })
            .collect()
    }

    fn write_signal_headers<W: Write>(
        writer: &mut W,
        data: &SessionData,
        calibrations: &[Calibration],
        samples_per_record: usize,
        annotation_samples: usize,
    ) -> PersistResult<()> {
        let channels = data.layout.num_channels();

        for name in &data.layout.names {
            Self::write_fixed_string(writer, name, 16)?;
        }
        Self::write_fixed_string(writer, ANNOTATION_LABEL, 16)?;

        for _ in 0..=channels {
            Self::write_fixed_string(writer, "", 80)?;
        }

        for _ in 0..channels {
            Self::write_fixed_string(writer, &data.layout.unit, 8)?;
        }
        Self::write_fixed_string(writer, "", 8)?;

        for calibration in calibrations {
            Self::write_fixed_string(writer, &calibration.min_text, 8)?;
        }
        Self::write_fixed_string(writer, "-1", 8)?;

        for calibration in calibrations {
            Self::write_fixed_string(writer, &calibration.max_text, 8)?;
        }
        Self::write_fixed_string(writer, "1", 8)?;

        for _ in 0..=channels {
            Self::write_fixed_string(writer, &DIGITAL_MIN.to_string(), 8)?;
        }
        for _ in 0..=channels {
            Self::write_fixed_string(writer, &DIGITAL_MAX.to_string(), 8)?;
        }

        for _ in 0..=channels {
            Self::write_fixed_string(writer, "", 80)?;
        }

        for _ in 0..channels {
            Self::write_fixed_string(writer, &samples_per_record.to_string(), 8)?;
        }
        Self::write_fixed_string(writer, &annotation_samples.to_string(), 8)?;

        for _ in 0..=channels {
            Self::write_fixed_string(writer, "", 32)?;
        }
        Ok(())
    }

    /// TAL bytes of every data record
    fn annotation_records(
        data: &SessionData,
        samples_per_record: usize,
        num_data_records: usize,
    ) -> Vec<Vec<u8>> {
        let mut records: Vec<Vec<u8>> = (0..num_data_records)
            .map(|r| format!("+{}\x14\x14\0", r).into_bytes())
            .collect();

        let last_sample = data.samples.len().saturating_sub(1) as u64;
        for marker in &data.markers {
            let index = marker.sample_index.min(last_sample);
            let record = (index as usize / samples_per_record).min(num_data_records - 1);
            let onset = index as f64 / samples_per_record as f64;
            records[record]
                .extend_from_slice(format!("+{}\x14{}\x14\0", onset, marker.code).as_bytes());
        }
        records
    }

    fn digital_values(data: &SessionData, calibrations: &[Calibration], total: usize) -> Vec<Vec<i16>> {
        let convert = |(ch, calibration): (usize, &Calibration)| {
            let mut values: Vec<i16> = data
                .samples
                .iter()
                .map(|sample| calibration.to_digital(sample.channels[ch]))
                .collect();
            // Padding for the incomplete last record
            values.resize(total, 0);
            values
        };
        if data.samples.len() >= PARALLEL_THRESHOLD {
            calibrations.par_iter().enumerate().map(convert).collect()
        } else {
            calibrations.iter().enumerate().map(convert).collect()
        }
    }
}

impl SessionWriter for EdfSessionWriter {
    fn write(&self, data: &SessionData, output_path: &Path) -> PersistResult<()> {
        self.validate_data(data)?;
        let samples_per_record = Self::samples_per_record(data)?;

        let num_data_records = data.samples.len().div_ceil(samples_per_record);
        let calibrations = Self::calibrations(data)?;
        let annotations = Self::annotation_records(data, samples_per_record, num_data_records);
        let annotation_bytes = annotations.iter().map(Vec::len).max().unwrap_or(0);
        let annotation_samples = annotation_bytes.div_ceil(2);

        let digital =
            Self::digital_values(data, &calibrations, num_data_records * samples_per_record);

        let file = File::create(output_path)?;
        let mut writer = BufWriter::new(file);

        Self::write_header(&mut writer, data, num_data_records)?;
        Self::write_signal_headers(
            &mut writer,
            data,
            &calibrations,
            samples_per_record,
            annotation_samples,
        )?;

        // Data records are written sequentially
        for (record, tals) in annotations.iter().enumerate() {
            let start = record * samples_per_record;
            for channel in &digital {
                for value in &channel[start..start + samples_per_record] {
                    writer.write_all(&value.to_le_bytes())?;
                }
            }
            let mut block = vec![0u8; annotation_samples * 2];
            block[..tals.len()].copy_from_slice(tals);
            writer.write_all(&block)?;
        }

        writer.flush()?;
        log::debug!(
            "EDF+ export: {} records of {} samples, {} annotations",
            num_data_records,
            samples_per_record,
            data.markers.len()
        );
        Ok(())
    }

    fn format_name(&self) -> &str {
        "EDF+"
    }

    fn file_name(&self, data: &SessionData) -> String {
        format!("{}.raw.edf", data.file_stem())
    }

    fn validate_data(&self, data: &SessionData) -> PersistResult<()> {
        if data.layout.num_channels() == 0 {
            return Err(PersistError::InvalidData(
                "No channels in session".to_string(),
            ));
        }
        if data.samples.is_empty() {
            return Err(PersistError::InvalidData(
                "No samples in session".to_string(),
            ));
        }
        let expected = data.layout.num_channels();
        if data.samples.iter().any(|s| s.num_channels() != expected) {
            return Err(PersistError::InvalidData(
                "All samples must have the layout's channel count for EDF format".to_string(),
            ));
        }
        if let Some(sample) = data
            .samples
            .iter()
            .find(|s| s.channels.iter().any(|v| !v.is_finite()))
        {
            return Err(PersistError::InvalidData(format!(
                "Sample {} has a non-finite channel value, EDF cannot represent it",
                sample.index
            )));
        }
        Ok(())
    }
}

impl Default for EdfSessionWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
enum Rounding {
    Down,
    Up,
}

/// Format `value` into the 8 characters of a header field, rounding outward
///
/// Returns the text and the value it parses back to.
fn fit_header_number(value: f64, rounding: Rounding) -> PersistResult<(String, f64)> {
    for decimals in (0..=6).rev() {
        let scale = 10f64.powi(decimals);
        let scaled = match rounding {
            Rounding::Down => (value * scale).floor(),
            Rounding::Up => (value * scale).ceil(),
        } / scale;
        let text = format!("{:.*}", decimals as usize, scaled);
        if text.len() <= 8 {
            let parsed = text
                .parse::<f64>()
                .map_err(|e| PersistError::Format(format!("bad header number {}: {}", text, e)))?;
            return Ok((text, parsed));
        }
    }
    Err(PersistError::Format(format!(
        "physical value {} does not fit an EDF header field",
        value
    )))
}

fn read_fixed_string<R: Read>(reader: &mut R, size: usize) -> PersistResult<String> {
    let mut buffer = vec![0u8; size];
    reader.read_exact(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).trim().to_string())
}

fn read_number<R: Read, T: std::str::FromStr>(
    reader: &mut R,
    size: usize,
    field: &str,
) -> PersistResult<T>
where
    T::Err: std::fmt::Display,
{
    let s = read_fixed_string(reader, size)?;
    s.parse::<T>()
        .map_err(|e| PersistError::Format(format!("Invalid {} '{}': {}", field, s, e)))
}

fn read_fields<R: Read, T: std::str::FromStr>(
    reader: &mut R,
    count: usize,
    size: usize,
    field: &str,
) -> PersistResult<Vec<T>>
where
    T::Err: std::fmt::Display,
{
    (0..count)
        .map(|_| read_number(&mut *reader, size, field))
        .collect()
}

/// Parse the TALs of one record, skipping the timekeeping entry
fn parse_annotations(bytes: &[u8], sample_rate: f64, out: &mut Vec<LoadedMarker>) -> PersistResult<()> {
    for tal in bytes.split(|&b| b == 0).filter(|tal| !tal.is_empty()) {
        let text = String::from_utf8_lossy(tal);
        let mut parts = text.split('\x14');
        let onset_field = parts.next().unwrap_or_default();
        // Duration, when present, follows the onset after 0x15
        let onset_text = onset_field.split('\x15').next().unwrap_or_default();
        let onset: f64 = onset_text
            .parse()
            .map_err(|e| PersistError::Format(format!("Invalid TAL onset '{}': {}", onset_text, e)))?;

        for description in parts.filter(|d| !d.is_empty()) {
            let raw: u8 = description.parse().map_err(|e| {
                PersistError::InvalidData(format!("Non-numeric annotation '{}': {}", description, e))
            })?;
            let code = MarkerCode::try_from(raw).map_err(PersistError::InvalidData)?;
            out.push(LoadedMarker {
                code,
                sample_index: (onset * sample_rate).round() as u64,
                onset,
            });
        }
    }
    Ok(())
}

/// Read an EDF+ export back into memory
pub fn read_edf(path: &Path) -> PersistResult<LoadedSession> {
    let mut reader = BufReader::new(File::open(path)?);

    let _version = read_fixed_string(&mut reader, 8)?;
    let _patient = read_fixed_string(&mut reader, 80)?;
    let recording = read_fixed_string(&mut reader, 80)?;
    let _start_date = read_fixed_string(&mut reader, 8)?;
    let _start_time = read_fixed_string(&mut reader, 8)?;
    let _header_bytes: usize = read_number(&mut reader, 8, "header bytes")?;
    let reserved = read_fixed_string(&mut reader, 44)?;
    let num_data_records: usize = read_number(&mut reader, 8, "number of data records")?;
    let record_duration: f64 = read_number(&mut reader, 8, "record duration")?;
    let num_signals: usize = read_number(&mut reader, 4, "number of signals")?;

    if !reserved.starts_with("EDF+") {
        return Err(PersistError::Format(format!(
            "{} is not an EDF+ file",
            path.display()
        )));
    }

    let labels: Vec<String> = (0..num_signals)
        .map(|_| read_fixed_string(&mut reader, 16))
        .collect::<PersistResult<_>>()?;
    for _ in 0..num_signals {
        read_fixed_string(&mut reader, 80)?;
    }
    for _ in 0..num_signals {
        read_fixed_string(&mut reader, 8)?;
    }
    let physical_min: Vec<f64> = read_fields(&mut reader, num_signals, 8, "physical minimum")?;
    let physical_max: Vec<f64> = read_fields(&mut reader, num_signals, 8, "physical maximum")?;
    let digital_min: Vec<i64> = read_fields(&mut reader, num_signals, 8, "digital minimum")?;
    let digital_max: Vec<i64> = read_fields(&mut reader, num_signals, 8, "digital maximum")?;
    for _ in 0..num_signals {
        read_fixed_string(&mut reader, 80)?;
    }
    let samples_per_record: Vec<usize> =
        read_fields(&mut reader, num_signals, 8, "number of samples")?;
    for _ in 0..num_signals {
        read_fixed_string(&mut reader, 32)?;
    }

    let annotation_signal = labels
        .iter()
        .position(|l| l == ANNOTATION_LABEL)
        .ok_or_else(|| PersistError::Format("no EDF Annotations signal".to_string()))?;
    let eeg: Vec<usize> = (0..num_signals).filter(|&s| s != annotation_signal).collect();
    let eeg_rate = eeg
        .first()
        .map(|&s| samples_per_record[s])
        .ok_or_else(|| PersistError::Format("no data signals".to_string()))?;
    if eeg.iter().any(|&s| samples_per_record[s] != eeg_rate) {
        return Err(PersistError::Format(
            "signals with differing sample rates are not supported".to_string(),
        ));
    }
    let sample_rate = eeg_rate as f64 / record_duration;

    let calibrations: Vec<(f64, f64)> = eeg
        .iter()
        .map(|&s| {
            let gain = (physical_max[s] - physical_min[s]) / (digital_max[s] - digital_min[s]) as f64;
            (gain, physical_max[s] - gain * digital_max[s] as f64)
        })
        .collect();

    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(num_data_records * eeg_rate);
    let mut markers = Vec::new();
    for _ in 0..num_data_records {
        let mut record_channels: Vec<Vec<f64>> = Vec::with_capacity(eeg.len());
        for signal in 0..num_signals {
            let mut bytes = vec![0u8; samples_per_record[signal] * 2];
            reader.read_exact(&mut bytes)?;
            if signal == annotation_signal {
                parse_annotations(&bytes, sample_rate, &mut markers)?;
            } else {
                let (gain, offset) = calibrations[record_channels.len()];
                record_channels.push(
                    bytes
                        .chunks_exact(2)
                        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f64 * gain + offset)
                        .collect(),
                );
            }
        }
        for i in 0..eeg_rate {
            rows.push(record_channels.iter().map(|ch| ch[i]).collect());
        }
    }

    // Drop the padding of the last record
    if let Some(count) = recording
        .split_whitespace()
        .find_map(|field| field.strip_prefix("samples="))
        .and_then(|n| n.parse::<usize>().ok())
    {
        rows.truncate(count);
    }

    Ok(LoadedSession {
        format: "EDF+".to_string(),
        channel_names: eeg.iter().map(|&s| labels[s].clone()).collect(),
        sample_rate: Some(sample_rate),
        rows,
        resolution: calibrations.iter().map(|&(gain, _)| gain / 2.0).collect(),
        markers,
    })
}
