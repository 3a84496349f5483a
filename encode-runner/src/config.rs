use crate::error::RetryPolicy;
use crate::framerate::DEFAULT_BASE_PTS_OFFSET_US;
use crate::test_definition::{ConfigureSettings, InputSettings, RuntimeSettings, TestDefinition};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file: {0}")]
    Write(#[source] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where encoded files and reports go
    #[serde(default)]
    pub output: OutputConfig,

    /// Encode loop tuning
    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Test cases, run in order
    #[serde(default)]
    pub tests: Vec<TestDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

/// Encode loop settings shared by every session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Upper bound for one input or output slot poll
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub poll_timeout: Duration,

    /// Give up after this long without codec progress
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub idle_timeout: Duration,

    /// Presentation time of the first kept frame, in microseconds
    pub base_pts_offset_us: i64,

    /// Consult the event schedule for dropped input frames as well
    pub events_on_dropped_frames: bool,

    /// Retry policy for transient input queue errors
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            driver: DriverConfig::default(),
            logging: LoggingConfig::default(),
            tests: vec![TestDefinition {
                description: "720p avc cbr with bitrate step".to_string(),
                input: InputSettings::default(),
                configure: ConfigureSettings {
                    codec: "avc".to_string(),
                    bitrate: Some("1 Mbps".to_string()),
                    bitrate_mode: Some(common::BitrateMode::Cbr),
                    ..ConfigureSettings::default()
                },
                runtime: RuntimeSettings {
                    dynamic: "bit-150-500:key-200".to_string(),
                },
            }],
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("encode-output"),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            idle_timeout: Duration::from_secs(2),
            base_pts_offset_us: DEFAULT_BASE_PTS_OFFSET_US,
            events_on_dropped_frames: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration manager for loading, saving, and validating configurations
pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            config: AppConfig::default(),
        }
    }

    /// Load configuration from file, creating a default one if it is missing
    pub async fn load(&mut self) -> Result<(), ConfigError> {
        if !tokio::fs::try_exists(&self.config_path).await.unwrap_or(false) {
            self.save().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_path)
            .await
            .map_err(ConfigError::Read)?;

        self.config = toml::from_str(&content)?;
        self.validate()?;
        Ok(())
    }

    pub async fn save(&self) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(&self.config)?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(ConfigError::Write)?;
            }
        }

        tokio::fs::write(&self.config_path, content)
            .await
            .map_err(ConfigError::Write)?;

        Ok(())
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn update_config(&mut self, config: AppConfig) -> Result<(), ConfigError> {
        self.config = config;
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let config = &self.config;

        if config.output.directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "Output directory cannot be empty".to_string(),
            ));
        }

        if config.driver.poll_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "Poll timeout must be greater than 0".to_string(),
            ));
        }

        if config.driver.idle_timeout <= config.driver.poll_timeout {
            return Err(ConfigError::Invalid(
                "Idle timeout must be longer than the poll timeout".to_string(),
            ));
        }

        if config.driver.retry.backoff_max < config.driver.retry.backoff_base {
            return Err(ConfigError::Invalid(
                "Retry backoff_max must not be below backoff_base".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Unknown log level '{}'",
                config.logging.level
            )));
        }

        for (index, test) in config.tests.iter().enumerate() {
            if test.configure.codec.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Test {} has no codec",
                    index
                )));
            }
            if test.input.framerate.is_some_and(|fps| fps <= 0.0)
                || test.configure.framerate.is_some_and(|fps| fps <= 0.0)
            {
                return Err(ConfigError::Invalid(format!(
                    "Test {} frame rate must be greater than 0",
                    index
                )));
            }
            let normalized = test.clone().with_defaults();
            normalized
                .build_media_format()
                .map_err(|e| ConfigError::Invalid(format!("Test {}: {}", index, e)))?;
            normalized
                .input_resolution()
                .map_err(|e| ConfigError::Invalid(format!("Test {}: {}", index, e)))?;
        }

        Ok(())
    }
}

/// Environment-based configuration override
pub struct EnvConfigOverride;

impl EnvConfigOverride {
    pub fn apply_overrides(config: &mut AppConfig) {
        use std::env;

        if let Ok(dir) = env::var("ENCODE_RUNNER_OUTPUT_DIR") {
            config.output.directory = PathBuf::from(dir);
        }

        if let Ok(level) = env::var("ENCODE_RUNNER_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(timeout) = env::var("ENCODE_RUNNER_POLL_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                config.driver.poll_timeout = Duration::from_millis(ms);
            }
        }
    }
}
