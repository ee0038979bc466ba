use link_queue_core::DEFAULT_MAX_RETRIES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("api.bearer_secret must be set (QUEUE_API_SECRET)")]
    MissingSecret,

    #[error("processor.check_interval_secs must be greater than zero")]
    ZeroInterval,

    #[error("Invalid probe method: {0}")]
    InvalidProbeMethod(String),

    #[error("consumer_mode processor requires linker.url (LINKER_API_URL)")]
    MissingLinkerUrl,
}

/// Which component consumes the queue in this deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerMode {
    /// An external worker polls `/queue/pending` and reports `/queue/result`
    Api,
    /// The in-process processor drains the queue on a timer
    Processor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub api: ApiConfig,
    pub queue: QueueConfig,
    pub processor: ProcessorConfig,
    pub probe: ProbeConfig,
    pub linker: LinkerConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub bearer_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub data_file: PathBuf,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub consumer_mode: ConsumerMode,
    pub check_interval_secs: u64,
    pub item_delay_ms: u64,
    pub attempt_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub url: String,
    pub method: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    pub url: Option<String>,
    pub bearer_secret: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub prometheus_port: Option<u16>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            host: "0.0.0.0".to_string(),
            port: 8090,
            bearer_secret: String::new(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            data_file: PathBuf::from("linking_queue.json"),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            consumer_mode: ConsumerMode::Api,
            check_interval_secs: 300,
            item_delay_ms: 2000,
            attempt_timeout_secs: 60,
            shutdown_grace_secs: 5,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            url: "http://localhost:8080/health".to_string(),
            method: "GET".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl Default for LinkerConfig {
    fn default() -> Self {
        LinkerConfig {
            url: None,
            bearer_secret: None,
            timeout_ms: 10_000,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            prometheus_port: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Check the settings that have no sensible fallback
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.bearer_secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.processor.check_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        self.probe_method()?;
        if self.processor.consumer_mode == ConsumerMode::Processor
            && self.linker.url.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingLinkerUrl);
        }
        Ok(())
    }

    pub fn probe_method(&self) -> Result<reqwest::Method, ConfigError> {
        reqwest::Method::from_bytes(self.probe.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidProbeMethod(self.probe.method.clone()))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.processor.check_interval_secs)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.processor.item_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.processor.attempt_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.processor.shutdown_grace_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe.timeout_ms)
    }

    /// Copy of the config safe to log
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api.bearer_secret.is_empty() {
            copy.api.bearer_secret = "<redacted>".to_string();
        }
        if copy.linker.bearer_secret.is_some() {
            copy.linker.bearer_secret = Some("<redacted>".to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BrokerConfig {
        let mut config = BrokerConfig::default();
        config.api.bearer_secret = "s3cret".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.api.port, 8090);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.check_interval(), Duration::from_secs(300));
        assert_eq!(config.item_delay(), Duration::from_millis(2000));
        assert_eq!(config.probe_timeout(), Duration::from_millis(5000));
        assert_eq!(config.processor.consumer_mode, ConsumerMode::Api);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = BrokerConfig::from_yaml(
            "api:\n  port: 9000\n  bearer_secret: abc\nprocessor:\n  consumer_mode: processor\n",
        )
        .unwrap();

        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.bearer_secret, "abc");
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.processor.consumer_mode, ConsumerMode::Processor);
        assert_eq!(config.processor.check_interval_secs, 300);
        assert_eq!(config.probe.method, "GET");
    }

    #[test]
    fn test_missing_secret_rejected() {
        let config = BrokerConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingSecret)));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = valid();
        config.processor.check_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroInterval)));
    }

    #[test]
    fn test_probe_method_parsing() {
        let mut config = valid();
        config.probe.method = "head".to_string();
        assert_eq!(config.probe_method().unwrap(), reqwest::Method::HEAD);

        config.probe.method = "NOT A METHOD".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProbeMethod(_))));
    }

    #[test]
    fn test_processor_mode_requires_linker() {
        let mut config = valid();
        config.processor.consumer_mode = ConsumerMode::Processor;
        assert!(matches!(config.validate(), Err(ConfigError::MissingLinkerUrl)));

        config.linker.url = Some("http://linker/api/link".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = valid();
        config.linker.bearer_secret = Some("other".to_string());

        let redacted = config.redacted();
        assert_eq!(redacted.api.bearer_secret, "<redacted>");
        assert_eq!(redacted.linker.bearer_secret.as_deref(), Some("<redacted>"));
        assert_eq!(config.api.bearer_secret, "s3cret");
    }
}
