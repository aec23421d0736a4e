//! Layered settings: built-in defaults, an optional file, then environment.
//!
//! ```toml
//! [broker]
//! host = "rabbit.local"
//!
//! [channels.smoker]
//! threshold = 20
//! monitoring_duration = "5m"
//!
//! [channels.food_a]
//! ack = "auto"
//! ```
//!
//! Environment variables use the `SMOKEWATCH_` prefix and `__` between
//! nesting levels, e.g. `SMOKEWATCH_BROKER__HOST=rabbit.local` or
//! `SMOKEWATCH_CHANNELS__FOOD_B__THRESHOLD=2`.
//!
//! The three built-in channels are always present; files and environment can
//! override their fields or add new channels, but not remove them.

use std::collections::BTreeMap;
use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::channel::{AckMode, Channel};
use crate::data::duration::parse_duration;
use crate::data::{capacity_for, AlertRule, RuleKind};
use crate::error::ConfigError;

const ENV_PREFIX: &str = "SMOKEWATCH";

/// Everything the binary needs to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub channels: BTreeMap<String, ChannelSettings>,
}

/// Where the RabbitMQ server lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
    /// Full `amqp://` URI. Takes precedence over the individual fields.
    pub url: Option<String>,
}

/// One channel as written in configuration. Durations are strings such as
/// `"2.5m"` or `"30s"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub queue: String,
    pub rule: RuleKind,
    pub threshold: f64,
    pub ack: AckMode,
    pub monitoring_duration: String,
    pub sampling_interval: String,
    /// Explicit window size; overrides the two durations when set.
    pub window_capacity: Option<usize>,
    pub processing_delay: String,
    pub min_readings: usize,
    pub column: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            url: None,
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            queue: String::new(),
            rule: RuleKind::Stall,
            threshold: 1.0,
            ack: AckMode::AfterProcessing,
            monitoring_duration: "10m".to_string(),
            sampling_interval: "30s".to_string(),
            window_capacity: None,
            processing_delay: "0s".to_string(),
            min_readings: 1,
            column: 1,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        let smoker = ChannelSettings {
            queue: "Smart_Smoker".to_string(),
            rule: RuleKind::Drop,
            threshold: 15.0,
            ack: AckMode::Auto,
            monitoring_duration: "2.5m".to_string(),
            processing_delay: "1s".to_string(),
            column: 1,
            ..ChannelSettings::default()
        };
        let food_a = ChannelSettings {
            queue: "Food1".to_string(),
            ack: AckMode::AfterProcessing,
            processing_delay: "5s".to_string(),
            column: 2,
            ..ChannelSettings::default()
        };
        let food_b = ChannelSettings {
            queue: "Food2".to_string(),
            ack: AckMode::OnReceipt,
            processing_delay: "5s".to_string(),
            column: 3,
            ..ChannelSettings::default()
        };

        Self {
            broker: BrokerSettings::default(),
            channels: BTreeMap::from([
                ("smoker".to_string(), smoker),
                ("food_a".to_string(), food_a),
                ("food_b".to_string(), food_b),
            ]),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    /// Load defaults, then `path` (if any), then `SMOKEWATCH_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::build(path, environment())
    }

    fn build(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder.add_source(env).build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Every configured channel, ordered by name.
    pub fn channels(&self) -> Result<Vec<Channel>, ConfigError> {
        self.channels
            .iter()
            .map(|(name, settings)| settings.resolve(name))
            .collect()
    }

    /// The named channels, in the order given. An empty list selects all.
    pub fn select(&self, names: &[String]) -> Result<Vec<Channel>, ConfigError> {
        if names.is_empty() {
            return self.channels();
        }
        names.iter().map(|name| self.channel(name)).collect()
    }

    pub fn channel(&self, name: &str) -> Result<Channel, ConfigError> {
        self.channels
            .get(name)
            .ok_or_else(|| ConfigError::UnknownChannel(name.to_string()))?
            .resolve(name)
    }
}

impl BrokerSettings {
    /// The AMQP URI to connect to.
    pub fn uri(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "amqp://{}:{}@{}:{}/{}",
                self.username,
                self.password,
                self.host,
                self.port,
                urlencoded(&self.vhost)
            ),
        }
    }
}

// vhost names go in the URI path
fn urlencoded(s: &str) -> String {
    s.replace('%', "%25").replace('/', "%2F")
}

impl ChannelSettings {
    /// Validate and turn into a [`Channel`] called `name`.
    pub fn resolve(&self, name: &str) -> Result<Channel, ConfigError> {
        let invalid = |field: &'static str, reason: String| ConfigError::Invalid {
            channel: name.to_string(),
            field,
            reason,
        };

        if self.queue.trim().is_empty() {
            return Err(invalid("queue", "must not be empty".to_string()));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(invalid(
                "threshold",
                format!("{} is not a non-negative number", self.threshold),
            ));
        }
        if self.min_readings == 0 {
            return Err(invalid("min_readings", "must be at least 1".to_string()));
        }
        if self.column == 0 {
            return Err(invalid(
                "column",
                "column 0 holds the timestamp".to_string(),
            ));
        }

        let capacity = match self.window_capacity {
            Some(0) => return Err(invalid("window_capacity", "must be at least 1".to_string())),
            Some(capacity) => capacity,
            None => {
                let monitoring = parse_duration(&self.monitoring_duration)
                    .map_err(|e| invalid("monitoring_duration", e.to_string()))?;
                let sampling = parse_duration(&self.sampling_interval)
                    .map_err(|e| invalid("sampling_interval", e.to_string()))?;
                capacity_for(monitoring, sampling).ok_or_else(|| {
                    invalid(
                        "monitoring_duration",
                        format!(
                            "'{}' at one reading per '{}' holds no readings",
                            self.monitoring_duration, self.sampling_interval
                        ),
                    )
                })?
            }
        };
        let delay = parse_duration(&self.processing_delay)
            .map_err(|e| invalid("processing_delay", e.to_string()))?;

        Ok(Channel::new(
            name,
            self.queue.trim(),
            capacity,
            AlertRule::new(self.rule, self.threshold),
        )
        .with_ack_mode(self.ack)
        .with_processing_delay(delay)
        .with_min_readings(self.min_readings)
        .with_column(self.column))
    }
}
