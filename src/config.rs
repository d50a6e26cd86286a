//! Configuration using Figment
//!
//! Strongly-typed configuration for acquisition streams, cross-stream sync
//! and the simulator. Values are merged from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `RUST_AIQ_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use rust_aiq::config::AiqConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AiqConfig::load_from("config/aiq.toml")?;
//! config.validate()?;
//! println!("Streams: {}", config.streams.len());
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::data::queue::DEFAULT_BLOCK_MAX_SCANS;
use crate::error::{AiqError, AiqResult};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/aiq.toml";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiqConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Acquisition streams, one queue each
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamConfig>,
    /// Cross-stream sync settings
    #[serde(default)]
    pub sync: SyncConfig,
    /// Synthetic producer settings
    #[serde(default)]
    pub simulation: SimConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// One acquisition stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Unique stream name
    pub name: String,
    /// Nominal sample rate in Hz
    pub sample_rate_hz: f64,
    /// Channels per scan
    pub n_chans: usize,
    /// Seconds of history the queue retains
    pub capacity_secs: f64,
    /// Largest block one enqueue may build
    #[serde(default = "default_block_max_scans")]
    pub block_max_scans: usize,
    /// Where this stream carries the shared sync signal
    pub sync: SyncChannel,
}

/// How a stream records the sync signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SyncChannel {
    /// One bit of a digital word channel.
    Bit {
        /// Word channel index
        chan: usize,
        /// Bit within the word (0-15)
        bit: u32,
    },
    /// An analog channel compared against a voltage threshold.
    Analog {
        /// Channel index
        chan: usize,
        /// Threshold in volts
        thresh_volts: f64,
        /// Full-scale input range in volts
        v_range: f64,
    },
}

impl SyncChannel {
    /// Channel carrying the sync signal.
    pub fn chan(&self) -> usize {
        match *self {
            SyncChannel::Bit { chan, .. } | SyncChannel::Analog { chan, .. } => chan,
        }
    }
}

/// Cross-stream alignment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Use sync edges to align streams; naive clock mapping otherwise
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Period of the shared sync square wave in seconds
    #[serde(default = "default_source_period")]
    pub source_period_secs: f64,
    /// Consecutive on-scans required to accept an edge
    #[serde(default = "default_inarow")]
    pub inarow: usize,
}

/// Synthetic producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Scans per producer buffer
    #[serde(default = "default_buffer_scans")]
    pub buffer_scans: usize,
    /// Reader polling period
    #[serde(default = "default_poll_period", with = "humantime_serde")]
    pub poll_period: Duration,
    /// How long a simulation runs
    #[serde(default = "default_duration", with = "humantime_serde")]
    pub duration: Duration,
    /// Number of concurrent reader tasks
    #[serde(default = "default_readers")]
    pub readers: usize,
    /// Clock skew per stream index, in parts per million
    #[serde(default)]
    pub clock_skew_ppm: f64,
    /// Seed for the noise generator
    #[serde(default = "default_seed")]
    pub seed: u64,
}

// Default value functions
fn default_app_name() -> String {
    "rust-aiq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_block_max_scans() -> usize {
    DEFAULT_BLOCK_MAX_SCANS
}

fn default_enabled() -> bool {
    true
}

fn default_source_period() -> f64 {
    1.0
}

fn default_inarow() -> usize {
    5
}

fn default_buffer_scans() -> usize {
    1000
}

fn default_poll_period() -> Duration {
    Duration::from_millis(10)
}

fn default_duration() -> Duration {
    Duration::from_secs(5)
}

fn default_readers() -> usize {
    2
}

fn default_seed() -> u64 {
    0x5EED
}

fn default_streams() -> Vec<StreamConfig> {
    vec![
        StreamConfig {
            name: "imec0".to_string(),
            sample_rate_hz: 30_000.0,
            n_chans: 4,
            capacity_secs: 4.0,
            block_max_scans: DEFAULT_BLOCK_MAX_SCANS,
            sync: SyncChannel::Bit { chan: 3, bit: 6 },
        },
        StreamConfig {
            name: "nidq".to_string(),
            sample_rate_hz: 10_000.0,
            n_chans: 3,
            capacity_secs: 4.0,
            block_max_scans: DEFAULT_BLOCK_MAX_SCANS,
            sync: SyncChannel::Analog {
                chan: 2,
                thresh_volts: 1.1,
                v_range: 5.0,
            },
        },
    ]
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            source_period_secs: default_source_period(),
            inarow: default_inarow(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            buffer_scans: default_buffer_scans(),
            poll_period: default_poll_period(),
            duration: default_duration(),
            readers: default_readers(),
            clock_skew_ppm: 0.0,
            seed: default_seed(),
        }
    }
}

impl Default for AiqConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            streams: default_streams(),
            sync: SyncConfig::default(),
            simulation: SimConfig::default(),
        }
    }
}

impl AiqConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and environment variables
    pub fn load() -> AiqResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables override the file, e.g.
    /// `RUST_AIQ_APPLICATION__LOG_LEVEL=debug` or `RUST_AIQ_SYNC__INAROW=3`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AiqResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_AIQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Load from the built-in defaults plus environment overrides only
    pub fn from_env() -> AiqResult<Self> {
        let config = Figment::from(Serialized::defaults(AiqConfig::default()))
            .merge(Env::prefixed("RUST_AIQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AiqResult<()> {
        let app = &self.application;
        if !VALID_LEVELS.contains(&app.log_level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                app.log_level,
                VALID_LEVELS.join(", ")
            )));
        }
        if !VALID_FORMATS.contains(&app.log_format.as_str()) {
            return Err(invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                app.log_format,
                VALID_FORMATS.join(", ")
            )));
        }

        let mut names = HashSet::new();
        for stream in &self.streams {
            if !names.insert(stream.name.as_str()) {
                return Err(invalid(format!("Duplicate stream name: {}", stream.name)));
            }
            stream.validate()?;
        }

        if !(self.sync.source_period_secs.is_finite() && self.sync.source_period_secs > 0.0) {
            return Err(invalid(format!(
                "Invalid sync.source_period_secs {}. Must be positive",
                self.sync.source_period_secs
            )));
        }

        if self.simulation.buffer_scans == 0 {
            return Err(invalid("simulation.buffer_scans must be at least 1".to_string()));
        }
        if self.simulation.poll_period.is_zero() {
            return Err(invalid("simulation.poll_period must be non-zero".to_string()));
        }

        Ok(())
    }

    /// Look up a stream by name.
    pub fn stream(&self, name: &str) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.name == name)
    }
}

impl StreamConfig {
    /// Capacity in scans, as the queue will compute it.
    pub fn capacity_scans(&self) -> u64 {
        (self.capacity_secs * self.sample_rate_hz).round() as u64
    }

    fn validate(&self) -> AiqResult<()> {
        let name = &self.name;
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(invalid(format!(
                "Stream '{name}': sample_rate_hz must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        if self.n_chans == 0 {
            return Err(invalid(format!("Stream '{name}': n_chans must be at least 1")));
        }
        if !(self.capacity_secs.is_finite() && self.capacity_secs > 0.0) {
            return Err(invalid(format!(
                "Stream '{name}': capacity_secs must be positive, got {}",
                self.capacity_secs
            )));
        }
        let capacity = self.capacity_scans();
        if self.block_max_scans == 0 || self.block_max_scans as u64 > capacity {
            return Err(invalid(format!(
                "Stream '{name}': block_max_scans must be in 1..={capacity}, got {}",
                self.block_max_scans
            )));
        }
        if self.sync.chan() >= self.n_chans {
            return Err(invalid(format!(
                "Stream '{name}': sync channel {} outside {} channels",
                self.sync.chan(),
                self.n_chans
            )));
        }
        match self.sync {
            SyncChannel::Bit { bit, .. } if bit > 15 => {
                return Err(invalid(format!(
                    "Stream '{name}': sync bit {bit} outside 0-15"
                )));
            }
            SyncChannel::Analog { v_range, .. } if !(v_range.is_finite() && v_range > 0.0) => {
                return Err(invalid(format!(
                    "Stream '{name}': v_range must be positive, got {v_range}"
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

fn invalid(msg: String) -> AiqError {
    AiqError::Configuration(msg)
}
