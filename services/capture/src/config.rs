use crate::frame::PixelFormat;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest archive directory the frame table can record.
pub const MAX_ARCHIVE_PATH_LEN: usize = 100;

/// Main configuration for the capture service.
///
/// Built once at startup and handed to the pipeline; nothing mutates it
/// afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Message broker configuration
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// File archive configuration
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Per-frame processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Frame source configuration
    #[serde(default)]
    pub camera: CameraConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port; exporter is off when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Message broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker bootstrap address
    #[serde(default = "default_broker_host")]
    pub host: String,
    /// Queue (topic) that receives frame metadata
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Upper bound for one connect-declare-publish-close cycle
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Publish metadata at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Database name
    pub name: String,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-statement timeout in seconds
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

/// File archive configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Directory receiving full-resolution and scaled images
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Directory holding the JSON metadata log
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// File name of the JSON metadata log inside `log_dir`
    #[serde(default = "default_metadata_log_file")]
    pub metadata_log_file: String,
}

/// Per-frame processing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Scale factor for the archived secondary copy, in (0, 1]
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
}

/// Frame source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Directory the emulated camera reads frames from
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Pixel format for the whole run
    #[serde(default)]
    pub pixel_format: PixelFormat,
    /// Bounded wait for each retrieve
    #[serde(default = "default_retrieve_timeout_ms")]
    pub retrieve_timeout_ms: u64,
    /// Fill the staging directory with a test pattern before grabbing
    #[serde(default = "default_true")]
    pub generate_test_pattern: bool,
    #[serde(default = "default_test_pattern_count")]
    pub test_pattern_count: u32,
    #[serde(default = "default_test_pattern_width")]
    pub test_pattern_width: u32,
    #[serde(default = "default_test_pattern_height")]
    pub test_pattern_height: u32,
}

// Default value functions
fn default_service_name() -> String {
    "capture-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_broker_host() -> String {
    "localhost:9092".to_string()
}

fn default_queue_name() -> String {
    "logger".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_statement_timeout_secs() -> u64 {
    10
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./logger")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./json")
}

fn default_metadata_log_file() -> String {
    "logger.json".to_string()
}

fn default_scale_factor() -> f64 {
    0.6
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

fn default_retrieve_timeout_ms() -> u64 {
    1000
}

fn default_test_pattern_count() -> u32 {
    100
}

fn default_test_pattern_width() -> u32 {
    800
}

fn default_test_pattern_height() -> u32 {
    600
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/capture").required(false))
            .add_source(config::File::with_name("/etc/capture/capture").required(false))
            // Override with environment variables
            // CAPTURE__DATABASE__HOST -> database.host
            .add_source(
                config::Environment::with_prefix("CAPTURE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let factor = self.processing.scale_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(ConfigValidationError::InvalidValue {
                field: "processing.scale_factor".to_string(),
                message: format!("{factor} is outside (0, 1]"),
            });
        }

        if self.broker.enabled && self.broker.queue_name.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "broker.queue_name".to_string(),
            ));
        }

        if self.database.host.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "database.host".to_string(),
            ));
        }
        if self.database.name.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "database.name".to_string(),
            ));
        }
        if self.database.user.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "database.user".to_string(),
            ));
        }

        for (field, value) in [
            ("camera.retrieve_timeout_ms", self.camera.retrieve_timeout_ms),
            ("broker.publish_timeout_ms", self.broker.publish_timeout_ms),
            ("database.connect_timeout_secs", self.database.connect_timeout_secs),
            ("database.statement_timeout_secs", self.database.statement_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.to_string(),
                    message: "Timeout must be greater than 0".to_string(),
                });
            }
        }

        // Stored in the VARCHAR(100) image_path column.
        let archive_len = self.archive.archive_dir.display().to_string().chars().count();
        if archive_len > MAX_ARCHIVE_PATH_LEN {
            return Err(ConfigValidationError::InvalidValue {
                field: "archive.archive_dir".to_string(),
                message: format!(
                    "{archive_len} characters, at most {MAX_ARCHIVE_PATH_LEN} allowed"
                ),
            });
        }

        if self.camera.generate_test_pattern
            && (self.camera.test_pattern_width == 0 || self.camera.test_pattern_height == 0)
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "camera.test_pattern_width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl BrokerConfig {
    /// Get publish timeout as Duration
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get statement timeout as Duration
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

impl ArchiveConfig {
    /// Full path of the JSON metadata log
    pub fn metadata_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.metadata_log_file)
    }
}

impl CameraConfig {
    /// Get retrieve timeout as Duration
    pub fn retrieve_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieve_timeout_ms)
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            queue_name: default_queue_name(),
            publish_timeout_ms: default_publish_timeout_ms(),
            enabled: true,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            log_dir: default_log_dir(),
            metadata_log_file: default_metadata_log_file(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            scale_factor: default_scale_factor(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            pixel_format: PixelFormat::default(),
            retrieve_timeout_ms: default_retrieve_timeout_ms(),
            generate_test_pattern: true,
            test_pattern_count: default_test_pattern_count(),
            test_pattern_width: default_test_pattern_width(),
            test_pattern_height: default_test_pattern_height(),
        }
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
