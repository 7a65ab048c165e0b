//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the capture
//! pipeline. Configuration is loaded from:
//! 1. `config/scope.toml` (base configuration, optional)
//! 2. Environment variables (prefixed with `SCOPE_`)
//!
//! Any key absent from both falls back to its serde default, so an empty
//! environment with no file yields a usable configuration for the stock device
//! at `192.168.4.1:4210`.
//!
//! # Environment Variable Overrides
//!
//! ```text
//! SCOPE_DEVICE_ADDRESS=10.0.0.7
//! SCOPE_RECEIVE_TIMEOUT_SECONDS=3
//! SCOPE_DELIVERY_GRANULARITY=per-sample
//! ```
//!
//! # Example
//!
//! ```no_run
//! use scope_daq::config::ScopeConfig;
//!
//! let config = ScopeConfig::load().unwrap();
//! println!("Device: {}", config.device_socket_addr());
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/scope.toml";

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// How decoded samples are handed to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryGranularity {
    /// One event per decoded value.
    PerSample,
    /// One event per batch of values.
    #[default]
    PerBatch,
}

/// Top-level configuration for the capture pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Device IP address that receives the control codes.
    #[serde(default = "default_device_address")]
    pub device_address: IpAddr,
    /// Device UDP port.
    #[serde(default = "default_device_port")]
    pub device_port: u16,
    /// Receive buffer size for a single datagram.
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
    /// Byte count at which a capture is considered complete.
    #[serde(default = "default_target_capture_bytes")]
    pub target_capture_bytes: usize,
    /// Deadline covering the whole receive phase.
    #[serde(default = "default_receive_timeout_seconds")]
    pub receive_timeout_seconds: u64,
    /// Send a reset code and wait before triggering.
    #[serde(default = "default_true")]
    pub reset_phase: bool,
    /// Settle delay between reset and trigger.
    #[serde(default = "default_reset_settle_delay_ms")]
    pub reset_settle_delay_ms: u64,
    /// Bytes consumed per dispatched batch.
    #[serde(default = "default_batch_stride_bytes")]
    pub batch_stride_bytes: usize,
    /// Pause between consecutive batches.
    #[serde(default = "default_batch_pacing_delay_ms")]
    pub batch_pacing_delay_ms: u64,
    /// Per-sample or per-batch delivery.
    #[serde(default)]
    pub delivery_granularity: DeliveryGranularity,
    /// Drop datagrams that do not come from the device address.
    #[serde(default)]
    pub filter_device_source: bool,
    /// Stream batches while datagrams are still arriving.
    #[serde(default)]
    pub live_dispatch: bool,
    /// Keep a zero-length capture as the last capture.
    #[serde(default)]
    pub store_empty_captures: bool,
    /// Buffered events per viewer before it starts lagging.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_device_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1))
}

fn default_device_port() -> u16 {
    4210
}

fn default_max_datagram_size() -> usize {
    1500
}

fn default_target_capture_bytes() -> usize {
    6_000_000
}

fn default_receive_timeout_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_reset_settle_delay_ms() -> u64 {
    200
}

fn default_batch_stride_bytes() -> usize {
    200
}

fn default_batch_pacing_delay_ms() -> u64 {
    5
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            device_address: default_device_address(),
            device_port: default_device_port(),
            max_datagram_size: default_max_datagram_size(),
            target_capture_bytes: default_target_capture_bytes(),
            receive_timeout_seconds: default_receive_timeout_seconds(),
            reset_phase: true,
            reset_settle_delay_ms: default_reset_settle_delay_ms(),
            batch_stride_bytes: default_batch_stride_bytes(),
            batch_pacing_delay_ms: default_batch_pacing_delay_ms(),
            delivery_granularity: DeliveryGranularity::default(),
            filter_device_source: false,
            live_dispatch: false,
            store_empty_captures: false,
            event_channel_capacity: default_event_channel_capacity(),
            log_level: default_log_level(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl ScopeConfig {
    /// Load configuration from `config/scope.toml` and environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `DaqError` if the sources cannot be extracted or validation fails.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; environment variables and defaults still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCOPE_"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Datagram size fits a UDP payload
    /// - Target size, timeout and channel capacity are non-zero
    /// - Batch stride is a non-zero whole number of samples
    /// - In per-sample mode, one stride fits in the event channel
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(DaqError::Configuration(format!(
                "Invalid max_datagram_size {}. Must be 1-{}",
                self.max_datagram_size, MAX_UDP_PAYLOAD
            )));
        }

        if self.target_capture_bytes == 0 {
            return Err(DaqError::Configuration(
                "target_capture_bytes must be > 0".to_string(),
            ));
        }

        if self.receive_timeout_seconds == 0 {
            return Err(DaqError::Configuration(
                "receive_timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.batch_stride_bytes == 0 || self.batch_stride_bytes % 2 != 0 {
            return Err(DaqError::Configuration(format!(
                "Invalid batch_stride_bytes {}. Must be a positive even number",
                self.batch_stride_bytes
            )));
        }

        if self.event_channel_capacity == 0 {
            return Err(DaqError::Configuration(
                "event_channel_capacity must be > 0".to_string(),
            ));
        }

        let samples_per_stride = self.batch_stride_bytes / 2;
        if self.delivery_granularity == DeliveryGranularity::PerSample
            && samples_per_stride > self.event_channel_capacity
        {
            return Err(DaqError::Configuration(format!(
                "Per-sample delivery of {} samples per stride exceeds event_channel_capacity {}",
                samples_per_stride, self.event_channel_capacity
            )));
        }

        Ok(())
    }

    /// Socket address the control codes are sent to.
    pub fn device_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.device_address, self.device_port)
    }

    /// Deadline for the whole receive phase.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_seconds)
    }

    /// Delay between the reset and trigger codes.
    pub fn reset_settle_delay(&self) -> Duration {
        Duration::from_millis(self.reset_settle_delay_ms)
    }

    /// Pause inserted after every dispatched batch.
    pub fn batch_pacing_delay(&self) -> Duration {
        Duration::from_millis(self.batch_pacing_delay_ms)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DaqError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ScopeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.device_socket_addr(),
            "192.168.4.1:4210".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.target_capture_bytes, 6_000_000);
        assert_eq!(config.delivery_granularity, DeliveryGranularity::PerBatch);
    }

    #[test]
    fn test_invalid_log_level() {
        let config = ScopeConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_odd_stride_rejected() {
        let config = ScopeConfig {
            batch_stride_bytes: 201,
            ..Default::default()
        };
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("batch_stride_bytes"));
    }

    #[test]
    fn test_oversized_datagram_rejected() {
        let config = ScopeConfig {
            max_datagram_size: 70_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_per_sample_stride_must_fit_channel() {
        let config = ScopeConfig {
            delivery_granularity: DeliveryGranularity::PerSample,
            batch_stride_bytes: 4000,
            event_channel_capacity: 1024,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("event_channel_capacity"));

        // a batch is a single event, so the same stride is fine per batch
        let per_batch = ScopeConfig {
            delivery_granularity: DeliveryGranularity::PerBatch,
            ..config.clone()
        };
        assert!(per_batch.validate().is_ok());

        let fits = ScopeConfig {
            event_channel_capacity: 2000,
            ..config
        };
        assert!(fits.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ScopeConfig {
            receive_timeout_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
device_address = "10.0.0.7"
device_port = 5000
target_capture_bytes = 1000
delivery_granularity = "per-sample"
reset_phase = false
"#
        )
        .unwrap();

        let config = ScopeConfig::load_from(file.path()).unwrap();
        assert_eq!(
            config.device_socket_addr(),
            "10.0.0.7:5000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.target_capture_bytes, 1000);
        assert_eq!(config.delivery_granularity, DeliveryGranularity::PerSample);
        assert!(!config.reset_phase);
        // untouched keys keep their defaults
        assert_eq!(config.batch_stride_bytes, 200);
    }

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        let config = ScopeConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, ScopeConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "receive_timeout_seconds = 10").unwrap();

        std::env::set_var("SCOPE_RECEIVE_TIMEOUT_SECONDS", "3");
        let result = ScopeConfig::load_from(file.path());
        std::env::remove_var("SCOPE_RECEIVE_TIMEOUT_SECONDS");

        assert_eq!(result.unwrap().receive_timeout(), Duration::from_secs(3));
    }

    #[test]
    #[serial]
    fn test_invalid_file_value_is_validation_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batch_stride_bytes = 0").unwrap();
        let err = ScopeConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn test_to_toml_round_trips_through_figment() {
        let config = ScopeConfig {
            live_dispatch: true,
            ..Default::default()
        };
        let rendered = config.to_toml().unwrap();
        let parsed: ScopeConfig = Figment::new()
            .merge(Toml::string(&rendered))
            .extract()
            .unwrap();
        assert_eq!(parsed, config);
    }
}
