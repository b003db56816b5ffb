//! Metric filters: the bridge from log entries to metric datapoints.
//! A filter belongs to exactly one log group and publishes to exactly one
//! metric. Evaluation never mutates the entry and never publishes more
//! than one datapoint per entry.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::metrics::{Datapoint, MetricId};
use crate::pattern::{FilterPattern, MatchedEntry};
use crate::types::{LogEntry, LogicalId};

/// What a matching entry publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetricValue {
    Constant(f64),
    /// Extract a named field of the match and parse it as a number.
    Field(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricFilterSpec {
    pub name: String,
    pub log_group: LogicalId,
    pub pattern: FilterPattern,
    pub metric: MetricId,
    pub value: MetricValue,
    /// Fallback when the extracted field is absent or not numeric.
    /// Without it such entries publish nothing.
    pub default_value: Option<f64>,
}

impl MetricFilterSpec {
    pub fn new(
        name: impl Into<String>,
        log_group: LogicalId,
        pattern: FilterPattern,
        metric: MetricId,
        value: MetricValue,
    ) -> Self {
        MetricFilterSpec {
            name: name.into(),
            log_group,
            pattern,
            metric,
            value,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: f64) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("metric filter needs a name");
        }
        if self.metric.namespace.trim().is_empty() || self.metric.name.trim().is_empty() {
            anyhow::bail!("metric filter {:?} has an incomplete metric id", self.name);
        }
        if let (MetricValue::Field(field), FilterPattern::Positional { fields }) =
            (&self.value, &self.pattern)
        {
            if !fields.contains(field) {
                anyhow::bail!(
                    "metric filter {:?} extracts {field:?} which the pattern does not define",
                    self.name
                );
            }
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        vec![self.log_group.clone()]
    }
}

/// Live counterpart of a filter spec. Group models hold one per attached
/// filter and call it for every ingested entry.
#[derive(Debug, Clone)]
pub struct MetricFilterModel {
    spec: MetricFilterSpec,
}

impl MetricFilterModel {
    pub fn new(spec: MetricFilterSpec) -> Self {
        MetricFilterModel { spec }
    }

    pub fn metric(&self) -> &MetricId {
        &self.spec.metric
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Some(datapoint) when the entry matches and a value can be produced.
    pub fn evaluate(&self, entry: &LogEntry) -> Option<Datapoint> {
        let matched = self.spec.pattern.evaluate(&entry.message)?;
        let value = self.resolve_value(&matched)?;
        Some(Datapoint {
            timestamp_ms: entry.timestamp_ms,
            value,
        })
    }

    fn resolve_value(&self, matched: &MatchedEntry) -> Option<f64> {
        match &self.spec.value {
            MetricValue::Constant(v) => Some(*v),
            MetricValue::Field(name) => matched
                .field(name)
                .and_then(|raw| raw.parse::<f64>().ok())
                .or(self.spec.default_value),
        }
    }
}
