use std::collections::{BTreeMap, HashSet};

use bluesense_core::Summary;
use ordered_float::NotNan;
use serde::Deserialize;
use tracing::debug;

/// How a sensor failure reported during an interval affects that
/// interval's completeness check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorFailurePolicy {
    /// Failures change nothing: every tracked metric needs a sample.
    #[default]
    Strict,
    /// Metrics of a failed sensor may be missing; they are left out of the
    /// summary instead of failing it.
    Excuse,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationError {
    #[error("no samples collected for {}", .0.join(", "))]
    MissingSamples(Vec<Box<str>>),

    #[error("no metrics collected")]
    NoMetrics,

    #[error("rejected non-finite sample {value} for {key}")]
    NonFinite { key: Box<str>, value: f64 },
}

#[derive(Debug)]
struct Series {
    sensor: Box<str>,
    values: Vec<NotNan<f64>>,
}

impl Series {
    fn mean(&self) -> Option<NotNan<f64>> {
        if self.values.is_empty() {
            return None;
        }
        let sum: f64 = self.values.iter().map(|v| v.into_inner()).sum();
        NotNan::new(sum / self.values.len() as f64).ok()
    }
}

/// Samples collected since the last report, per metric key.
///
/// Keys appear on their first sample and stay tracked for the life of the
/// aggregator; only their samples are cleared.
#[derive(Debug, Default)]
pub struct Aggregator {
    series: BTreeMap<Box<str>, Series>,
    failed_sensors: HashSet<Box<str>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample for `key`, read from `sensor`.
    pub fn record(&mut self, key: &str, sensor: &str, value: f64) -> Result<(), AggregationError> {
        let value = NotNan::new(value)
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| AggregationError::NonFinite {
                key: key.into(),
                value,
            })?;

        match self.series.get_mut(key) {
            Some(series) => series.values.push(value),
            None => {
                self.series.insert(
                    key.into(),
                    Series {
                        sensor: sensor.into(),
                        values: vec![value],
                    },
                );
            }
        }
        Ok(())
    }

    /// Note that `sensor` could not be read during the current interval.
    pub fn sensor_failed(&mut self, sensor: &str) {
        self.failed_sensors.insert(sensor.into());
    }

    pub fn samples(&self, key: &str) -> Option<&[NotNan<f64>]> {
        self.series.get(key).map(|s| s.values.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(|k| &**k)
    }

    pub fn is_tracking(&self, key: &str) -> bool {
        self.series.contains_key(key)
    }

    /// Reduce every tracked metric to its mean and start a new interval.
    ///
    /// The interval is reset whether or not a summary could be built.
    pub fn summarize(
        &mut self,
        policy: SensorFailurePolicy,
        time: jiff::Timestamp,
    ) -> Result<Summary, AggregationError> {
        let mut metrics = BTreeMap::new();
        let mut missing = Vec::new();

        for (key, series) in &self.series {
            match series.mean() {
                Some(mean) => {
                    metrics.insert(key.clone(), mean);
                }
                None if policy == SensorFailurePolicy::Excuse
                    && self.failed_sensors.contains(&series.sensor) =>
                {
                    debug!(%key, sensor = %series.sensor, "Omitting metric of failed sensor");
                }
                None => missing.push(key.clone()),
            }
        }

        self.reset();

        if !missing.is_empty() {
            return Err(AggregationError::MissingSamples(missing));
        }
        if metrics.is_empty() {
            return Err(AggregationError::NoMetrics);
        }

        Ok(Summary { metrics, time })
    }

    fn reset(&mut self) {
        for series in self.series.values_mut() {
            series.values.clear();
        }
        self.failed_sensors.clear();
    }
}
