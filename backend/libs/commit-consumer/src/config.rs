//! Connection and loop configuration, loaded from `KAFKA_*` environment variables

use rdkafka::ClientConfig;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policy::{CommitStrategy, FailurePolicy, LoopConfig};

/// Environment variable prefix for every setting
pub const ENV_PREFIX: &str = "KAFKA_";

/// Transport security between client and brokers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
}

impl SecurityProtocol {
    fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
        }
    }
}

/// Where a group without a committed cursor starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl FromStr for OffsetReset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(ConfigError::Invalid(format!(
                "offset reset must be `earliest` or `latest`, got `{}`",
                other
            ))),
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure policy name as it appears in `KAFKA_FAILURE_POLICY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicyKind {
    #[default]
    Abort,
    Skip,
    Retry,
}

/// Connection parameters shared by consumers and producers
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaSettings {
    /// Bootstrap servers, comma separated
    #[serde(default = "default_brokers")]
    pub brokers: String,

    #[serde(default)]
    pub security_protocol: SecurityProtocol,

    /// CA certificate used to verify the brokers
    #[serde(default)]
    pub ssl_ca_location: Option<PathBuf>,

    /// PKCS#12 keystore holding the client certificate
    #[serde(default)]
    pub ssl_keystore_location: Option<PathBuf>,

    #[serde(default)]
    pub ssl_keystore_password: Option<String>,

    /// Verify the broker hostname against its certificate
    #[serde(default = "default_true")]
    pub ssl_endpoint_identification: bool,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Bounded wait for each poll
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default)]
    pub failure_policy: FailurePolicyKind,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_true() -> bool {
    true
}

fn default_session_timeout_ms() -> u64 {
    45_000
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1_000
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            security_protocol: SecurityProtocol::default(),
            ssl_ca_location: None,
            ssl_keystore_location: None,
            ssl_keystore_password: None,
            ssl_endpoint_identification: true,
            session_timeout_ms: default_session_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            failure_policy: FailurePolicyKind::default(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl KafkaSettings {
    /// Load settings from `KAFKA_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings: Self = envy::prefixed(ENV_PREFIX).from_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from explicit `(name, value)` pairs using the same
    /// variable names as the environment
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let settings: Self = envy::prefixed(ENV_PREFIX).from_iter(pairs)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.split(',').all(|b| b.trim().is_empty()) {
            return Err(ConfigError::Invalid("brokers must not be empty".to_string()));
        }

        if self.security_protocol == SecurityProtocol::Ssl && self.ssl_ca_location.is_none() {
            return Err(ConfigError::Invalid(
                "ssl security protocol requires KAFKA_SSL_CA_LOCATION".to_string(),
            ));
        }

        if self.ssl_keystore_location.is_some() && self.ssl_keystore_password.is_none() {
            return Err(ConfigError::Invalid(
                "KAFKA_SSL_KEYSTORE_LOCATION requires KAFKA_SSL_KEYSTORE_PASSWORD".to_string(),
            ));
        }

        if self.failure_policy == FailurePolicyKind::Retry && self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "KAFKA_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "KAFKA_POLL_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        match self.failure_policy {
            FailurePolicyKind::Abort => FailurePolicy::Abort,
            FailurePolicyKind::Skip => FailurePolicy::Skip,
            FailurePolicyKind::Retry => FailurePolicy::Retry {
                max_attempts: self.retry_attempts,
                backoff: Duration::from_millis(self.retry_backoff_ms),
            },
        }
    }

    /// Loop settings for the given commit strategy
    pub fn loop_config(&self, commit_strategy: CommitStrategy) -> LoopConfig {
        LoopConfig {
            poll_timeout: self.poll_timeout(),
            failure_policy: self.failure_policy(),
            commit_strategy,
        }
    }

    /// Apply brokers and transport security to a client config
    pub fn apply_connection(&self, config: &mut ClientConfig) {
        config
            .set("bootstrap.servers", &self.brokers)
            .set("security.protocol", self.security_protocol.as_str());

        if let Some(ca) = &self.ssl_ca_location {
            config.set("ssl.ca.location", ca.to_string_lossy());
        }
        if let Some(keystore) = &self.ssl_keystore_location {
            config.set("ssl.keystore.location", keystore.to_string_lossy());
        }
        if let Some(password) = &self.ssl_keystore_password {
            config.set("ssl.keystore.password", password);
        }
        if self.security_protocol == SecurityProtocol::Ssl {
            let algorithm = if self.ssl_endpoint_identification {
                "https"
            } else {
                "none"
            };
            config.set("ssl.endpoint.identification.algorithm", algorithm);
        }
    }

    /// Client config for a producer
    pub fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        self.apply_connection(&mut config);
        config
            .set("acks", "all")
            .set("message.timeout.ms", "30000");
        config
    }
}

/// Everything needed to open one consumer
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub settings: KafkaSettings,
    pub group_id: String,
    pub topics: Vec<String>,
    pub offset_reset: OffsetReset,
    pub commit_strategy: CommitStrategy,
    /// Raw librdkafka properties applied last
    pub overrides: Vec<(String, String)>,
}

impl SourceConfig {
    pub fn new(settings: KafkaSettings, group_id: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            settings,
            group_id: group_id.into(),
            topics,
            offset_reset: OffsetReset::default(),
            commit_strategy: CommitStrategy::default(),
            overrides: Vec::new(),
        }
    }

    pub fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }

    pub fn with_commit_strategy(mut self, commit_strategy: CommitStrategy) -> Self {
        self.commit_strategy = commit_strategy;
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;

        if self.group_id.trim().is_empty() {
            return Err(ConfigError::Invalid("group id must not be empty".to_string()));
        }

        if self.topics.is_empty() || self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "at least one non-empty topic is required".to_string(),
            ));
        }

        if self.commit_strategy == CommitStrategy::Manual {
            let auto_commit = self
                .overrides
                .iter()
                .rev()
                .find(|(key, _)| key == "enable.auto.commit")
                .map(|(_, value)| value.eq_ignore_ascii_case("true"));
            if auto_commit == Some(true) {
                return Err(ConfigError::Invalid(
                    "manual commit requires enable.auto.commit=false".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// librdkafka consumer properties
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        self.settings.apply_connection(&mut config);

        config
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", self.offset_reset.as_str())
            .set("session.timeout.ms", self.settings.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false");

        match self.commit_strategy {
            CommitStrategy::Manual => {
                config.set("enable.auto.commit", "false");
            }
            CommitStrategy::Broker => {
                config
                    .set("enable.auto.commit", "true")
                    .set("auto.commit.interval.ms", "5000");
            }
        }

        for (key, value) in &self.overrides {
            config.set(key, value);
        }

        config
    }
}
