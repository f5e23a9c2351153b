// Device driver contract
//
// The acquisition hardware is reached through a vendor SDK. This module defines
// the capability contract the session relies on: start/stop streaming, pull every
// sample that arrived since the last pull, and tag the device's own marker channel.
// Drivers are expected to buffer samples onboard between pulls; `DeviceInfo`
// reports how many so the acquisition loop can poll often enough to never
// overflow that buffer.
//
// New devices are added by:
// 1. Implementing the EegDevice trait
// 2. Adding a variant to DeviceConfig
// 3. Registering it in `create_device`

mod synthetic;

use crate::error::DeviceResult;
use crate::types::{ChannelLayout, MarkerCode, RawSample};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use synthetic::{SyntheticDevice, SyntheticOptions};

/// Parameters handed to the driver when streaming starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bluetooth address of the headset, when the driver needs one
    #[serde(default)]
    pub mac_address: Option<String>,

    /// Requested onboard ring size in samples (driver default when None)
    #[serde(default)]
    pub buffer_samples: Option<usize>,
}

/// Static description of a connected device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub layout: ChannelLayout,

    /// Samples the device can hold between pulls before it starts dropping
    #[serde(default)]
    pub onboard_buffer_samples: Option<usize>,
}

/// Capability contract of an EEG acquisition driver
///
/// All methods take `&self`: acquisition pulls and protocol marker tags arrive
/// from different tasks, and drivers do their own internal locking. Calls are
/// assumed to return promptly (a pull copies out of the driver's ring, a marker
/// tag enqueues a value), so they are made directly from async tasks.
pub trait EegDevice: Send + Sync {
    fn info(&self) -> DeviceInfo;

    fn start_stream(&self, config: &StreamConfig) -> DeviceResult<()>;

    /// Stop streaming; stopping an idle device is not an error
    fn stop_stream(&self) -> DeviceResult<()>;

    /// Every sample that arrived since the previous pull, oldest first
    fn pull_new_samples(&self) -> DeviceResult<Vec<RawSample>>;

    /// Write `code` into the device's native marker channel
    fn insert_native_marker(&self, code: MarkerCode) -> DeviceResult<()>;

    fn is_streaming(&self) -> bool;
}

/// Configuration of the device a session records from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceConfig {
    /// Simulated headset producing sinusoids plus noise in real time
    #[serde(rename = "synthetic")]
    Synthetic {
        #[serde(default)]
        options: SyntheticOptions,
    },
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::Synthetic {
            options: SyntheticOptions::default(),
        }
    }
}

/// Build a driver from configuration
pub fn create_device(config: DeviceConfig) -> Arc<dyn EegDevice> {
    match config {
        DeviceConfig::Synthetic { options } => Arc::new(SyntheticDevice::new(options)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_config_from_json() {
        let config: DeviceConfig = serde_json::from_str(
            r#"{"type": "synthetic", "options": {"channels": 2, "sample_rate": 128.0}}"#,
        )
        .unwrap();
        let device = create_device(config);
        let info = device.info();
        assert_eq!(info.layout.num_channels(), 2);
        assert_eq!(info.layout.sample_rate, 128.0);
        assert!(!device.is_streaming());
    }
}
