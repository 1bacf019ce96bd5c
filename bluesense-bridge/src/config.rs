use std::path::Path;
use std::time::Duration;

use bluesense_core::protocol::{CommandTable, CommandTableError, FailureCommand, MetricCommand};
use serde::Deserialize;

use crate::aggregator::SensorFailurePolicy;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub link: LinkConfig,
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Replaces the built-in command table when non-empty.
    #[serde(default)]
    pub commands: Vec<MetricCommand>,
    /// Sensor failure ids that go with `commands`.
    #[serde(default)]
    pub failures: Vec<FailureCommand>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkConfig {
    Serial {
        /// Serial port path
        port: String,
        baud_rate: u32,
        /// Upper bound in seconds on each read from the station, 0 to wait forever
        #[serde(default = "default_read_timeout_secs")]
        read_timeout_secs: u64,
    },
    Mock {
        /// Interval in milliseconds between simulated packets
        #[serde(default = "default_packet_interval_ms")]
        packet_interval_ms: u64,
        /// Probability that a packet is sent with a broken checksum
        #[serde(default)]
        corruption_ratio: f64,
        /// Probability that a packet is replaced by a sensor failure
        #[serde(default)]
        sensor_failure_ratio: f64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReporterConfig {
    Http {
        /// Base URL of the remote store
        url: String,
        /// Database secret. Sent as the `auth` query parameter on its own,
        /// or used to sign a user token when `email` is set.
        #[serde(default)]
        secret: Option<String>,
        /// Identity the signed token is issued for
        #[serde(default)]
        email: Option<String>,
        #[serde(default = "default_error_path")]
        error_path: String,
        #[serde(default = "default_data_path")]
        data_path: String,
        /// Request timeout in seconds
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Log,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds between summaries
    pub report_interval_secs: u64,
    /// Pause in milliseconds after each packet, 0 to poll without pausing
    pub poll_interval_ms: u64,
    pub sensor_failure_policy: SensorFailurePolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be between 0 and 1, got {value}")]
    InvalidRatio { field: &'static str, value: f64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("reporter.email needs reporter.secret to sign the auth token")]
    EmailWithoutSecret,

    #[error("invalid command table: {0}")]
    CommandTable(#[from] CommandTableError),
}

fn default_read_timeout_secs() -> u64 {
    15
}

fn default_packet_interval_ms() -> u64 {
    200
}

fn default_error_path() -> String {
    "error".to_owned()
}

fn default_data_path() -> String {
    "data".to_owned()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.report_interval_secs == 0 {
            return Err(ConfigError::Zero("session.report_interval_secs"));
        }

        match self.link {
            LinkConfig::Serial { baud_rate: 0, .. } => {
                return Err(ConfigError::Zero("link.baud_rate"));
            }
            LinkConfig::Mock {
                packet_interval_ms,
                corruption_ratio,
                sensor_failure_ratio,
            } => {
                if packet_interval_ms == 0 {
                    return Err(ConfigError::Zero("link.packet_interval_ms"));
                }
                check_ratio("link.corruption_ratio", corruption_ratio)?;
                check_ratio("link.sensor_failure_ratio", sensor_failure_ratio)?;
            }
            LinkConfig::Serial { .. } => {}
        }

        if let ReporterConfig::Http {
            secret,
            email,
            timeout_secs,
            ..
        } = &self.reporter
        {
            if *timeout_secs == 0 {
                return Err(ConfigError::Zero("reporter.timeout_secs"));
            }
            let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
            if present(email) && !present(secret) {
                return Err(ConfigError::EmailWithoutSecret);
            }
        }

        self.command_table()?;
        Ok(())
    }

    /// The configured command table, or the built-in one if none is given.
    pub fn command_table(&self) -> Result<CommandTable, CommandTableError> {
        if self.commands.is_empty() && self.failures.is_empty() {
            return Ok(CommandTable::builtin());
        }
        CommandTable::new(self.commands.clone(), self.failures.clone())
    }
}

fn check_ratio(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRatio { field, value })
    }
}

impl LinkConfig {
    /// Per-read timeout the session applies to this link.
    pub fn read_timeout(&self) -> Option<Duration> {
        match self {
            LinkConfig::Serial {
                read_timeout_secs, ..
            } => (*read_timeout_secs > 0).then(|| Duration::from_secs(*read_timeout_secs)),
            LinkConfig::Mock { .. } => None,
        }
    }
}

impl SessionConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
            poll_interval_ms: 100,
            sensor_failure_policy: SensorFailurePolicy::Strict,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link: LinkConfig::Serial {
                port: "/dev/ttyACM0".to_string(),
                baud_rate: 9600,
                read_timeout_secs: default_read_timeout_secs(),
            },
            reporter: ReporterConfig::Log,
            session: SessionConfig::default(),
            commands: Vec::new(),
            failures: Vec::new(),
        }
    }
}
