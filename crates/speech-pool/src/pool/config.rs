//! Pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::reliability::RetryPolicy;
use crate::{duration_millis, option_duration_millis};

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A value is out of range
    #[error("invalid speech pool configuration: {0}")]
    Invalid(String),

    /// An environment variable could not be parsed
    #[error("invalid value for {name}: {value:?}")]
    Unparsable { name: String, value: String },
}

/// Speech pool configuration
///
/// # Example
///
/// ```
/// use chatvoice_speech::SpeechPoolConfig;
/// use std::time::Duration;
///
/// let config = SpeechPoolConfig::default()
///     .with_pool_id("avatars")
///     .with_synthesize_attempts(4)
///     .with_request_timeout(Some(Duration::from_secs(20)));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeechPoolConfig {
    /// Identifier used in log fields
    pub pool_id: String,

    /// Full free-worker scans before falling back to creation
    pub scan_attempts: u32,

    /// End-to-end attempts for one synthesis request
    pub synthesize_attempts: u32,

    /// Launch-and-handshake attempts for one worker creation
    pub initialize_attempts: u32,

    /// Constant delay between retries of any kind
    #[serde(with = "duration_millis")]
    pub retry_interval: Duration,

    /// Deadline for one synthesis round trip (None = no deadline)
    #[serde(with = "option_duration_millis")]
    pub request_timeout: Option<Duration>,

    /// Deadline for the handshake round trip (None = no deadline)
    #[serde(with = "option_duration_millis")]
    pub handshake_timeout: Option<Duration>,

    /// Upper bound on pool size (None = grow on demand)
    pub max_workers: Option<usize>,

    /// Buffered pool events per subscriber
    pub event_capacity: usize,
}

impl Default for SpeechPoolConfig {
    fn default() -> Self {
        Self {
            pool_id: format!("speech-pool-{}", Uuid::now_v7()),
            scan_attempts: 1,
            synthesize_attempts: 3,
            initialize_attempts: 3,
            retry_interval: Duration::ZERO,
            request_timeout: Some(Duration::from_secs(30)),
            handshake_timeout: Some(Duration::from_secs(10)),
            max_workers: None,
            event_capacity: 64,
        }
    }
}

impl SpeechPoolConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - `SPEECH_POOL_ID`
    /// - `SPEECH_POOL_SCAN_ATTEMPTS` (default: 1)
    /// - `SPEECH_POOL_SYNTHESIZE_ATTEMPTS` (default: 3)
    /// - `SPEECH_POOL_INITIALIZE_ATTEMPTS` (default: 3)
    /// - `SPEECH_POOL_RETRY_INTERVAL_MS` (default: 0)
    /// - `SPEECH_POOL_REQUEST_TIMEOUT_MS` (default: 30000, 0 disables)
    /// - `SPEECH_POOL_HANDSHAKE_TIMEOUT_MS` (default: 10000, 0 disables)
    /// - `SPEECH_POOL_MAX_WORKERS` (default: unbounded)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any name → value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(id) = lookup("SPEECH_POOL_ID") {
            config.pool_id = id;
        }
        if let Some(n) = parse(&lookup, "SPEECH_POOL_SCAN_ATTEMPTS")? {
            config.scan_attempts = n;
        }
        if let Some(n) = parse(&lookup, "SPEECH_POOL_SYNTHESIZE_ATTEMPTS")? {
            config.synthesize_attempts = n;
        }
        if let Some(n) = parse(&lookup, "SPEECH_POOL_INITIALIZE_ATTEMPTS")? {
            config.initialize_attempts = n;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "SPEECH_POOL_RETRY_INTERVAL_MS")? {
            config.retry_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "SPEECH_POOL_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "SPEECH_POOL_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(n) = parse(&lookup, "SPEECH_POOL_MAX_WORKERS")? {
            config.max_workers = Some(n);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the pool identifier
    pub fn with_pool_id(mut self, id: impl Into<String>) -> Self {
        self.pool_id = id.into();
        self
    }

    /// Set the number of free-worker scans before creation
    pub fn with_scan_attempts(mut self, attempts: u32) -> Self {
        self.scan_attempts = attempts;
        self
    }

    /// Set the end-to-end synthesis attempt budget
    pub fn with_synthesize_attempts(mut self, attempts: u32) -> Self {
        self.synthesize_attempts = attempts;
        self
    }

    /// Set the per-creation handshake attempt budget
    pub fn with_initialize_attempts(mut self, attempts: u32) -> Self {
        self.initialize_attempts = attempts;
        self
    }

    /// Set the delay between retries
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the synthesis round-trip deadline
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake deadline
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Cap the pool size
    pub fn with_max_workers(mut self, max: Option<usize>) -> Self {
        self.max_workers = max;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_attempts == 0 {
            return Err(ConfigError::Invalid("scan_attempts must be at least 1".into()));
        }
        if self.synthesize_attempts == 0 {
            return Err(ConfigError::Invalid(
                "synthesize_attempts must be at least 1".into(),
            ));
        }
        if self.initialize_attempts == 0 {
            return Err(ConfigError::Invalid(
                "initialize_attempts must be at least 1".into(),
            ));
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn scan_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_interval, self.scan_attempts)
    }

    pub fn synthesize_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_interval, self.synthesize_attempts)
    }

    pub fn initialize_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_interval, self.initialize_attempts)
    }
}

pub(crate) fn parse<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Unparsable {
                name: name.to_string(),
                value,
            }),
    }
}
