//! Session configuration.
//!
//! A session is described once by a TOML file and is read-only afterwards:
//! serial settings, the measurement setup pushed to the instrument, the
//! output-config flags and the acquisition/display settings.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyACM0"
//!
//! [setup]
//! burst_count = 100
//! frame_rate = 50.0
//! amplitude = 0.001
//! excitation_sequence = [[2, 4], [5, 6]]
//!
//! [setup.frequencies]
//! fmin = 50000.0
//! fmax = 50000.0
//! ftype = 0
//!
//! [acquisition]
//! dataset_name = "phantom"
//! output_dir = "out"
//! display_channels = [0, 1]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{DriverError, Result};
use crate::frame::ElectrodePair;

/// Default serial baud rate of the instrument
pub const DEFAULT_BAUD_RATE: u32 = 921_600;

/// Default read timeout; a read that times out ends the acquisition stream
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default excitation frequency (Hz) used when fmin/fmax are not given
pub const DEFAULT_FREQUENCY_HZ: f32 = 100_000.0;

/// Default number of frequencies in the sweep
pub const DEFAULT_FREQUENCY_COUNT: u16 = 1;

/// Default frequency scale byte (1 = logarithmic)
pub const DEFAULT_FREQUENCY_TYPE: u8 = 1;

/// Default number of measurement nodes shown per display channel
pub const DEFAULT_NODE_COUNT: usize = 8;

/// Default bounded wait of the processor on an empty queue
pub const DEFAULT_QUEUE_WAIT_MS: u64 = 1000;

/// Default polling interval for live consumers
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Complete description of one acquisition session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub serial: SerialSettings,
    #[serde(default)]
    pub setup: MeasurementSetup,
    #[serde(default)]
    pub output: OutputConfig,
    pub acquisition: AcquisitionSettings,
}

impl SessionConfig {
    /// Load and validate a session file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml(&text)
            .map_err(|e| DriverError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Parse and validate a session from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: SessionConfig =
            toml::from_str(text).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let n = self.setup.excitation_sequence.len();
        if let Some(&bad) = self
            .acquisition
            .display_channels
            .iter()
            .find(|&&idx| idx >= n)
        {
            return Err(DriverError::Config(format!(
                "display channel {bad} is outside the excitation sequence (length {n})"
            )));
        }
        if self.acquisition.node_count == 0 {
            return Err(DriverError::Config("node_count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Serial transport settings. Framing is always 8 data bits, no parity, one stop bit.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialSettings {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl SerialSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Instrument parameters applied at setup. Absent fields are not sent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasurementSetup {
    pub burst_count: Option<u16>,
    pub frame_rate: Option<f32>,
    pub frequencies: Option<ExcitationFrequencies>,
    pub amplitude: Option<f64>,
    pub measure_mode: Option<MeasureMode>,
    #[serde(default)]
    pub excitation_sequence: Vec<ElectrodePair>,
    pub switch_type: Option<u8>,
    pub adc_range: Option<u8>,
}

/// Frequency sweep settings; missing members fall back to the device defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ExcitationFrequencies {
    pub fmin: Option<f32>,
    pub fmax: Option<f32>,
    pub fcount: Option<u16>,
    pub ftype: Option<u8>,
}

/// Single-ended / differential measure mode with its boundary selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MeasureMode {
    pub mode: u8,
    pub boundary: u8,
}

/// Output-config flags controlling what the device adds to each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    pub excitation_setting: Option<u8>,
    pub frequency_row: Option<u8>,
    pub timestamp: Option<u8>,
}

/// Where and how acquired data is persisted and displayed.
#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionSettings {
    pub dataset_name: String,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub display_channels: Vec<usize>,
    #[serde(default = "default_node_count")]
    pub node_count: usize,
    #[serde(default = "default_queue_wait_ms")]
    pub queue_wait_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl AcquisitionSettings {
    pub fn queue_wait(&self) -> Duration {
        Duration::from_millis(self.queue_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_node_count() -> usize {
    DEFAULT_NODE_COUNT
}

fn default_queue_wait_ms() -> u64 {
    DEFAULT_QUEUE_WAIT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = r#"
        [serial]
        port = "/dev/ttyACM0"

        [setup]
        burst_count = 100
        frame_rate = 50.0
        amplitude = 0.001
        switch_type = 2
        adc_range = 2
        excitation_sequence = [[2, 4], [5, 6], [1, 3]]

        [setup.frequencies]
        fmin = 50000.0
        fmax = 50000.0
        ftype = 0

        [setup.measure_mode]
        mode = 1
        boundary = 1

        [output]
        excitation_setting = 1
        timestamp = 1

        [acquisition]
        dataset_name = "phantom"
        output_dir = "out"
        display_channels = [0, 1]
    "#;

    #[test]
    fn parses_full_session_with_defaults() {
        let cfg = SessionConfig::from_toml(SESSION).unwrap();
        assert_eq!(cfg.serial.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(cfg.serial.timeout(), Duration::from_millis(2000));
        assert_eq!(cfg.setup.burst_count, Some(100));
        assert_eq!(
            cfg.setup.excitation_sequence[0],
            ElectrodePair::new(2, 4)
        );
        let freqs = cfg.setup.frequencies.unwrap();
        assert_eq!(freqs.fcount, None);
        assert_eq!(freqs.ftype, Some(0));
        assert_eq!(cfg.output.frequency_row, None);
        assert_eq!(cfg.acquisition.node_count, DEFAULT_NODE_COUNT);
        assert_eq!(cfg.acquisition.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn bundled_session_file_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/sessions/eit32.toml");
        let cfg = SessionConfig::load(path).unwrap();
        assert_eq!(cfg.setup.excitation_sequence.len(), 8);
        assert_eq!(cfg.setup.amplitude, Some(0.001));
        assert_eq!(cfg.acquisition.display_channels, vec![0, 1]);
    }

    #[test]
    fn rejects_display_channel_outside_sequence() {
        let text = SESSION.replace("display_channels = [0, 1]", "display_channels = [0, 3]");
        let err = SessionConfig::from_toml(&text).unwrap_err();
        assert!(matches!(err, DriverError::Config(msg) if msg.contains("display channel 3")));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            SessionConfig::from_toml("[serial"),
            Err(DriverError::Config(_))
        ));
    }
}
