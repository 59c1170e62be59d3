use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_ALERT_HOLD: Duration = Duration::from_millis(10_000);
pub const DEFAULT_ALERT_HISTORY_CAPACITY: usize = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint '{value}': {source}")]
    InvalidEndpoint {
        value: String,
        source: url::ParseError,
    },
    #[error("endpoint '{0}' must use the ws:// or wss:// scheme")]
    UnsupportedScheme(String),
    #[error("{name} must be greater than zero")]
    ZeroValue { name: &'static str },
    #[error("environment variable {name} is not a valid integer: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Settings for one monitoring session.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Inference service endpoint.
    pub endpoint: Url,
    /// Pacing interval between frame samples.
    pub frame_interval: Duration,
    /// Fixed delay between a close and the next connect attempt.
    pub reconnect_delay: Duration,
    /// How long the alert banner stays raised after a fall edge.
    pub alert_hold: Duration,
    pub alert_history_capacity: usize,
    pub connect_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid url"),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            alert_hold: DEFAULT_ALERT_HOLD,
            alert_history_capacity: DEFAULT_ALERT_HISTORY_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// On-disk overrides. Durations are whole milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub endpoint: Option<String>,
    pub frame_interval_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub alert_hold_ms: Option<u64>,
    pub alert_history_capacity: Option<usize>,
    pub connect_timeout_ms: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }
}

impl MonitorConfig {
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        self.endpoint = parse_endpoint(endpoint)?;
        Ok(self)
    }

    /// Defaults, then the optional file, then `CARETAKER_*` environment
    /// variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = file {
            config.apply_file(ConfigFile::load(path)?)?;
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: ConfigFile) -> Result<(), ConfigError> {
        if let Some(endpoint) = file.endpoint {
            self.endpoint = parse_endpoint(&endpoint)?;
        }
        if let Some(ms) = file.frame_interval_ms {
            self.frame_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.reconnect_delay_ms {
            self.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.alert_hold_ms {
            self.alert_hold = Duration::from_millis(ms);
        }
        if let Some(capacity) = file.alert_history_capacity {
            self.alert_history_capacity = capacity;
        }
        if let Some(ms) = file.connect_timeout_ms {
            self.connect_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(endpoint) = env::var("CARETAKER_ENDPOINT") {
            self.endpoint = parse_endpoint(&endpoint)?;
        }
        if let Some(ms) = env_millis("CARETAKER_FRAME_INTERVAL_MS")? {
            self.frame_interval = ms;
        }
        if let Some(ms) = env_millis("CARETAKER_RECONNECT_DELAY_MS")? {
            self.reconnect_delay = ms;
        }
        if let Some(ms) = env_millis("CARETAKER_ALERT_HOLD_MS")? {
            self.alert_hold = ms;
        }
        if let Some(ms) = env_millis("CARETAKER_CONNECT_TIMEOUT_MS")? {
            self.connect_timeout = ms;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.endpoint.scheme(), "ws" | "wss") {
            return Err(ConfigError::UnsupportedScheme(self.endpoint.to_string()));
        }
        let durations = [
            ("frame_interval", self.frame_interval),
            ("reconnect_delay", self.reconnect_delay),
            ("alert_hold", self.alert_hold),
            ("connect_timeout", self.connect_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::ZeroValue { name });
            }
        }
        if self.alert_history_capacity == 0 {
            return Err(ConfigError::ZeroValue {
                name: "alert_history_capacity",
            });
        }
        Ok(())
    }
}

fn parse_endpoint(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|source| ConfigError::InvalidEndpoint {
        value: value.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigError::UnsupportedScheme(value.to_string()));
    }
    Ok(url)
}

fn env_millis(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(None),
    }
}
