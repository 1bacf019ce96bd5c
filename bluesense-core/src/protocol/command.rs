use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::PAYLOAD_SIZE;

pub const CMD_TEMPERATURE: u16 = 0x01;
pub const CMD_HUMIDITY: u16 = 0x02;
pub const CMD_PM1_0: u16 = 0x03;
pub const CMD_PM2_5: u16 = 0x04;
pub const CMD_PM10: u16 = 0x05;

/// The DHT sensor could not be read. Carries no payload.
pub const CMD_DHT_FAILED: u16 = 0xF1;
/// The particulate matter sensor could not be read. Carries no payload.
pub const CMD_PM_FAILED: u16 = 0xF2;

/// Name reserved for the timestamp field of a summary record.
const RESERVED_KEY: &str = "time";

/// How the payload bytes of a metric packet are interpreted.
///
/// All formats are little-endian. The 16-bit formats read the first two
/// payload bytes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    F32,
    I32,
    U32,
    I16,
    U16,
}

impl PayloadFormat {
    pub fn decode(self, payload: &[u8; PAYLOAD_SIZE]) -> f64 {
        let [a, b, c, d] = *payload;
        match self {
            PayloadFormat::F32 => f64::from(f32::from_le_bytes([a, b, c, d])),
            PayloadFormat::I32 => f64::from(i32::from_le_bytes([a, b, c, d])),
            PayloadFormat::U32 => f64::from(u32::from_le_bytes([a, b, c, d])),
            PayloadFormat::I16 => f64::from(i16::from_le_bytes([a, b])),
            PayloadFormat::U16 => f64::from(u16::from_le_bytes([a, b])),
        }
    }

    /// Inverse of [`PayloadFormat::decode`]. Integer formats truncate and
    /// saturate; unused payload bytes are zero.
    pub fn encode(self, value: f64) -> [u8; PAYLOAD_SIZE] {
        let mut payload = [0u8; PAYLOAD_SIZE];
        match self {
            PayloadFormat::F32 => payload.copy_from_slice(&(value as f32).to_le_bytes()),
            PayloadFormat::I32 => payload.copy_from_slice(&(value as i32).to_le_bytes()),
            PayloadFormat::U32 => payload.copy_from_slice(&(value as u32).to_le_bytes()),
            PayloadFormat::I16 => payload[..2].copy_from_slice(&(value as i16).to_le_bytes()),
            PayloadFormat::U16 => payload[..2].copy_from_slice(&(value as u16).to_le_bytes()),
        }
        payload
    }
}

/// A command id whose payload carries one sample of a metric.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricCommand {
    pub id: u16,
    pub format: PayloadFormat,
    /// Name of the metric in summary records.
    pub key: Box<str>,
    /// Physical sensor the metric is read from.
    pub sensor: Box<str>,
}

/// A reserved command id signalling that a sensor could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FailureCommand {
    pub id: u16,
    pub sensor: Box<str>,
}

/// Result of looking up a command id.
#[derive(Debug, Clone, Copy)]
pub enum Command<'a> {
    Metric(&'a MetricCommand),
    SensorFailed(&'a FailureCommand),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandTableError {
    #[error("command id {0:#06x} is defined more than once")]
    DuplicateId(u16),
    #[error("metric key '{0}' is defined more than once")]
    DuplicateKey(Box<str>),
    #[error("metric key '{0}' is reserved")]
    ReservedKey(Box<str>),
    #[error("metric key must not be empty (command id {0:#06x})")]
    EmptyKey(u16),
}

/// Maps command ids to the metric they carry or the sensor failure they signal.
#[derive(Debug, Clone)]
pub struct CommandTable {
    metrics: HashMap<u16, MetricCommand>,
    failures: HashMap<u16, FailureCommand>,
}

impl CommandTable {
    pub fn new(
        metrics: Vec<MetricCommand>,
        failures: Vec<FailureCommand>,
    ) -> Result<Self, CommandTableError> {
        let mut ids = HashSet::new();
        let mut keys = HashSet::new();

        for metric in &metrics {
            if metric.key.is_empty() {
                return Err(CommandTableError::EmptyKey(metric.id));
            }
            if &*metric.key == RESERVED_KEY {
                return Err(CommandTableError::ReservedKey(metric.key.clone()));
            }
            if !keys.insert(metric.key.clone()) {
                return Err(CommandTableError::DuplicateKey(metric.key.clone()));
            }
            if !ids.insert(metric.id) {
                return Err(CommandTableError::DuplicateId(metric.id));
            }
        }

        for failure in &failures {
            if !ids.insert(failure.id) {
                return Err(CommandTableError::DuplicateId(failure.id));
            }
        }

        Ok(Self {
            metrics: metrics.into_iter().map(|m| (m.id, m)).collect(),
            failures: failures.into_iter().map(|f| (f.id, f)).collect(),
        })
    }

    /// The table flashed into the bluesense station firmware.
    pub fn builtin() -> Self {
        let metric = |id, key: &str, sensor: &str| MetricCommand {
            id,
            format: PayloadFormat::F32,
            key: key.into(),
            sensor: sensor.into(),
        };
        let failure = |id, sensor: &str| FailureCommand {
            id,
            sensor: sensor.into(),
        };

        Self::new(
            vec![
                metric(CMD_TEMPERATURE, "temperature", "dht"),
                metric(CMD_HUMIDITY, "humidity", "dht"),
                metric(CMD_PM1_0, "pm1_0", "pm"),
                metric(CMD_PM2_5, "pm2_5", "pm"),
                metric(CMD_PM10, "pm10", "pm"),
            ],
            vec![failure(CMD_DHT_FAILED, "dht"), failure(CMD_PM_FAILED, "pm")],
        )
        .unwrap_or_else(|e| unreachable!("builtin command table is invalid: {e}"))
    }

    pub fn lookup(&self, command_id: u16) -> Option<Command<'_>> {
        if let Some(metric) = self.metrics.get(&command_id) {
            return Some(Command::Metric(metric));
        }
        self.failures.get(&command_id).map(Command::SensorFailed)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &MetricCommand> {
        self.metrics.values()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailureCommand> {
        self.failures.values()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::builtin()
    }
}
