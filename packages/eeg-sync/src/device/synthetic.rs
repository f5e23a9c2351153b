// Synthetic headset that produces samples in real time
//
// Emits one sample per channel every 1/sample_rate seconds of elapsed time: a
// channel-specific alpha-band sinusoid plus uniform noise. Useful for:
// - Running the full protocol without hardware
// - Exercising disconnects and flaky reads (fault injection options)
// - Deterministic tests (seeded noise, tokio's paused clock drives elapsed time)

use super::{DeviceInfo, EegDevice, StreamConfig};
use crate::error::{DeviceError, DeviceResult};
use crate::types::{ChannelLayout, MarkerCode, RawSample};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tokio::time::Instant;

/// Options for the synthetic device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticOptions {
    pub channels: usize,

    /// Channel labels; generated as "EEG 1".. when absent or mismatched
    pub channel_names: Option<Vec<String>>,

    pub sample_rate: f64,
    pub amplitude_uv: f64,
    pub noise_uv: f64,

    /// Report a disconnect once this many samples have been produced
    pub disconnect_after: Option<u64>,

    /// Every n-th pull fails with a transient read error
    pub transient_every: Option<u64>,

    /// Refuse native marker tags
    pub reject_markers: bool,

    pub seed: Option<u64>,
    pub onboard_buffer_samples: Option<usize>,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            channels: 4,
            channel_names: Some(vec![
                "A2".to_string(),
                "A1".to_string(),
                "C4".to_string(),
                "C3".to_string(),
            ]),
            sample_rate: 250.0,
            amplitude_uv: 20.0,
            noise_uv: 2.0,
            disconnect_after: None,
            transient_every: None,
            reject_markers: false,
            seed: None,
            onboard_buffer_samples: Some(45_000),
        }
    }
}

struct StreamState {
    started_at: Instant,
    base_timestamp: f64,
}

struct Inner {
    stream: Option<StreamState>,
    emitted: u64,
    pulls: u64,
    disconnected: bool,
    native_markers: Vec<(u64, MarkerCode)>,
    rng: StdRng,
}

pub struct SyntheticDevice {
    options: SyntheticOptions,
    layout: ChannelLayout,
    inner: Mutex<Inner>,
}

impl SyntheticDevice {
    pub fn new(options: SyntheticOptions) -> Self {
        let names = match &options.channel_names {
            Some(names) if names.len() == options.channels => names.clone(),
            _ => (1..=options.channels).map(|i| format!("EEG {}", i)).collect(),
        };
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            layout: ChannelLayout::new(names, options.sample_rate),
            options,
            inner: Mutex::new(Inner {
                stream: None,
                emitted: 0,
                pulls: 0,
                disconnected: false,
                native_markers: Vec::new(),
                rng,
            }),
        }
    }

    /// Native marker tags received so far, with the sample count at tag time
    pub fn native_markers(&self) -> Vec<(u64, MarkerCode)> {
        self.inner.lock().native_markers.clone()
    }

    pub fn samples_emitted(&self) -> u64 {
        self.inner.lock().emitted
    }

    fn sample_value(&self, channel: usize, n: u64, rng: &mut StdRng) -> f64 {
        let t = n as f64 / self.options.sample_rate;
        // Alpha band, each channel slightly detuned and phase shifted
        let freq = 10.0 + channel as f64 * 0.5;
        let phase = channel as f64 * TAU / 8.0;
        let noise = if self.options.noise_uv > 0.0 {
            rng.random_range(-self.options.noise_uv..self.options.noise_uv)
        } else {
            0.0
        };
        self.options.amplitude_uv * (TAU * freq * t + phase).sin() + noise
    }
}

impl EegDevice for SyntheticDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "synthetic".to_string(),
            layout: self.layout.clone(),
            onboard_buffer_samples: self.options.onboard_buffer_samples,
        }
    }

    fn start_stream(&self, config: &StreamConfig) -> DeviceResult<()> {
        let mut inner = self.inner.lock();
        if inner.disconnected {
            return Err(DeviceError::Connection("device disconnected".to_string()));
        }
        if inner.stream.is_some() {
            return Ok(());
        }
        if self.options.sample_rate <= 0.0 {
            return Err(DeviceError::Connection(
                "sample rate must be positive".to_string(),
            ));
        }

        let now = chrono::Utc::now();
        inner.stream = Some(StreamState {
            started_at: Instant::now(),
            base_timestamp: now.timestamp() as f64
                + now.timestamp_subsec_micros() as f64 / 1_000_000.0,
        });
        log::info!(
            "Synthetic device streaming {} channels @ {} Hz (mac address: {})",
            self.layout.num_channels(),
            self.options.sample_rate,
            config.mac_address.as_deref().unwrap_or("n/a")
        );
        Ok(())
    }

    fn stop_stream(&self) -> DeviceResult<()> {
        self.inner.lock().stream = None;
        Ok(())
    }

    fn pull_new_samples(&self) -> DeviceResult<Vec<RawSample>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.disconnected {
            return Err(DeviceError::Connection("headset disconnected".to_string()));
        }
        let (started_at, base_timestamp) = match &inner.stream {
            Some(stream) => (stream.started_at, stream.base_timestamp),
            None => return Err(DeviceError::NotStreaming),
        };

        inner.pulls += 1;
        if let Some(every) = self.options.transient_every {
            if every > 0 && inner.pulls % every == 0 {
                return Err(DeviceError::Transient(format!(
                    "simulated read timeout on pull {}",
                    inner.pulls
                )));
            }
        }

        // Epsilon keeps exact multiples of the sample period from rounding down
        let mut due =
            (started_at.elapsed().as_secs_f64() * self.options.sample_rate + 1e-6) as u64;
        if let Some(limit) = self.options.disconnect_after {
            if inner.emitted >= limit {
                inner.disconnected = true;
                inner.stream = None;
                return Err(DeviceError::Connection("headset disconnected".to_string()));
            }
            due = due.min(limit);
        }

        let mut samples = Vec::with_capacity(due.saturating_sub(inner.emitted) as usize);
        while inner.emitted < due {
            let n = inner.emitted;
            let channels = (0..self.layout.num_channels())
                .map(|ch| self.sample_value(ch, n, &mut inner.rng))
                .collect();
            samples.push(RawSample::new(
                channels,
                base_timestamp + n as f64 / self.options.sample_rate,
            ));
            inner.emitted += 1;
        }
        Ok(samples)
    }

    fn insert_native_marker(&self, code: MarkerCode) -> DeviceResult<()> {
        let mut inner = self.inner.lock();
        if self.options.reject_markers {
            return Err(DeviceError::MarkerRejected {
                code: code.as_u8(),
                reason: "marker channel disabled".to_string(),
            });
        }
        if inner.stream.is_none() {
            return Err(DeviceError::NotStreaming);
        }
        let at = inner.emitted;
        inner.native_markers.push((at, code));
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.inner.lock().stream.is_some()
    }
}
