//! Custom metric series.
//! Filters publish datapoints here and alarms read period statistics back.
//! The store is a shared handle; recording takes `&self` so group models
//! can fan out without threading mutability through every caller.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Namespace plus name, the full identity of a custom metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricId {
    pub namespace: String,
    pub name: String,
}

impl MetricId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        MetricId {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Sum,
    Average,
    Minimum,
    Maximum,
    SampleCount,
}

impl Statistic {
    /// None when the window holds no datapoints. Alarms map that to the
    /// insufficient-data state rather than treating it as zero.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let out = match self {
            Statistic::Sum => values.iter().sum(),
            Statistic::Average => values.iter().sum::<f64>() / values.len() as f64,
            Statistic::Minimum => values.iter().copied().fold(f64::INFINITY, f64::min),
            Statistic::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Statistic::SampleCount => values.len() as f64,
        };
        Some(out)
    }
}

/// Start of the period containing `timestamp_ms`, aligned to the epoch.
pub fn period_start_ms(period_secs: u32, timestamp_ms: i64) -> i64 {
    let period_ms = i64::from(period_secs) * 1000;
    if period_ms == 0 {
        return timestamp_ms;
    }
    timestamp_ms.div_euclid(period_ms) * period_ms
}

#[derive(Debug, Default)]
pub struct MetricStore {
    series: Mutex<HashMap<MetricId, Vec<Datapoint>>>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: &MetricId, point: Datapoint) {
        let mut series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        series.entry(id.clone()).or_default().push(point);
    }

    /// Datapoints with `start_ms <= timestamp < end_ms`.
    pub fn query(&self, id: &MetricId, start_ms: i64, end_ms: i64) -> Vec<Datapoint> {
        let series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        series
            .get(id)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp_ms >= start_ms && p.timestamp_ms < end_ms)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn statistic(
        &self,
        id: &MetricId,
        stat: Statistic,
        start_ms: i64,
        end_ms: i64,
    ) -> Option<f64> {
        let values: Vec<f64> = self
            .query(id, start_ms, end_ms)
            .iter()
            .map(|p| p.value)
            .collect();
        stat.apply(&values)
    }

    pub fn total_datapoints(&self, id: &MetricId) -> usize {
        let series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        series.get(id).map(Vec::len).unwrap_or(0)
    }
}
