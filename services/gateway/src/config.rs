//! Configuration management for the gateway.
//!
//! Configuration is loaded from files and environment variables and
//! validated before the service starts.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gateway service.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Sensor link configuration
    pub serial: SerialConfig,

    /// Byte-stream framing configuration
    #[serde(default)]
    pub framing: FramingConfig,

    /// Batch aggregation configuration
    #[serde(default)]
    pub batch: BatchConfig,

    /// MQTT broker configuration
    pub mqtt: MqttConfig,

    /// Outbound document configuration
    #[serde(default)]
    pub document: DocumentConfig,

    /// Static location for fixed installations; omit when a location
    /// source pushes updates at runtime
    #[serde(default)]
    pub location: Option<LocationConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Static location configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

/// Sensor link connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Address of the bridged sensor board (`host:port`)
    pub addr: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Delay between read polls when no bytes are available, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Size of the read buffer handed to the source per poll
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

/// Byte-stream framing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FramingConfig {
    /// Frame delimiter byte
    #[serde(default = "default_delimiter")]
    pub delimiter: u8,

    /// Maximum frame size before the decoder discards and resyncs
    #[serde(default = "default_frame_capacity")]
    pub frame_capacity: usize,
}

/// Batch aggregation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Number of readings aggregated into one published mean
    #[serde(default = "default_batch_capacity")]
    pub capacity: usize,
}

/// MQTT broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname or address
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client identifier. Fixed so the broker resumes the session state
    /// across reconnects.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Topic aggregated observations are published to
    #[serde(default = "default_topic")]
    pub publish_topic: String,

    /// Inbound topic subscribed to on every (re)connect
    #[serde(default = "default_topic")]
    pub subscribe_topic: String,

    /// Quality of service level (0, 1 or 2)
    #[serde(default)]
    pub qos: u8,

    /// Capacity of the offline publish buffer; when full, new publishes
    /// are rejected rather than evicting the oldest entry
    #[serde(default = "default_offline_buffer_size")]
    pub offline_buffer_size: usize,

    /// Base delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Maximum delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

/// Outbound observation document configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentConfig {
    /// Base URL used to derive observation self-links
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Feature-of-interest description placed in every document
    #[serde(default = "default_description")]
    pub description: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_connect_timeout() -> u64 {
    10
}
fn default_poll_interval_ms() -> u64 {
    20
}
fn default_read_chunk_size() -> usize {
    1024
}
fn default_delimiter() -> u8 {
    33
}
fn default_frame_capacity() -> usize {
    1024
}
fn default_batch_capacity() -> usize {
    10
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "airq-gateway".to_string()
}
fn default_keep_alive() -> u64 {
    30
}
fn default_topic() -> String {
    "test".to_string()
}
fn default_offline_buffer_size() -> usize {
    100
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30000
}
fn default_base_url() -> String {
    "http://storagemanager.linksmartcnet.se".to_string()
}
fn default_description() -> String {
    "description".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            frame_capacity: default_frame_capacity(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: default_batch_capacity(),
        }
    }
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            description: default_description(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources
    /// override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{RUN_MODE}.toml)
    /// 3. Environment variables (prefixed with GATEWAY_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // e.g. GATEWAY_MQTT__HOST
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.serial.addr.is_empty() {
            return Err(ConfigValidationError::MissingField("serial.addr".to_string()));
        }

        if self.mqtt.host.is_empty() {
            return Err(ConfigValidationError::MissingField("mqtt.host".to_string()));
        }

        if self.mqtt.qos > 2 {
            return Err(ConfigValidationError::InvalidValue {
                field: "mqtt.qos".to_string(),
                message: "QoS level must be 0, 1 or 2".to_string(),
            });
        }

        if self.batch.capacity == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "batch.capacity".to_string(),
                message: "batch capacity must be greater than 0".to_string(),
            });
        }

        if self.framing.frame_capacity == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "framing.frame_capacity".to_string(),
                message: "frame capacity must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl SerialConfig {
    /// Get connection timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get read poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl MqttConfig {
    /// Get keep-alive interval as Duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Get base reconnection delay as Duration.
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Get maximum reconnection delay as Duration.
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> GatewayConfig {
        GatewayConfig {
            serial: SerialConfig {
                addr: "sensor-bridge:7777".to_string(),
                connect_timeout_secs: 10,
                poll_interval_ms: 20,
                read_chunk_size: 1024,
            },
            framing: FramingConfig::default(),
            batch: BatchConfig::default(),
            mqtt: MqttConfig {
                host: "broker.example.net".to_string(),
                port: 1883,
                client_id: "airq-gateway".to_string(),
                keep_alive_secs: 30,
                publish_topic: "test".to_string(),
                subscribe_topic: "test".to_string(),
                qos: 0,
                offline_buffer_size: 100,
                reconnect_base_delay_ms: 1000,
                reconnect_max_delay_ms: 30000,
            },
            document: DocumentConfig::default(),
            location: None,
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = create_test_config();
        assert_eq!(config.framing.delimiter, 33);
        assert_eq!(config.framing.frame_capacity, 1024);
        assert_eq!(config.batch.capacity, 10);
        assert_eq!(config.mqtt.offline_buffer_size, 100);
        assert_eq!(
            config.document.base_url,
            "http://storagemanager.linksmartcnet.se"
        );
    }

    #[test]
    fn test_missing_serial_addr() {
        let mut config = create_test_config();
        config.serial.addr = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_missing_mqtt_host() {
        let mut config = create_test_config();
        config.mqtt.host = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_invalid_qos() {
        let mut config = create_test_config();
        config.mqtt.qos = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_batch_capacity() {
        let mut config = create_test_config();
        config.batch.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_duration_accessors() {
        let config = create_test_config();
        assert_eq!(config.serial.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.serial.poll_interval(), Duration::from_millis(20));
        assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(30));
        assert_eq!(
            config.mqtt.reconnect_base_delay(),
            Duration::from_millis(1000)
        );
    }
}
