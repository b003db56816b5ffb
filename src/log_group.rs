//! Log groups.
//! Ingestion is synchronous: every accepted entry is stored, offered to
//! each attached filter, then handed to each subscription. A slow or
//! closed subscription never blocks ingestion.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::metric_filter::MetricFilterModel;
use crate::metrics::MetricStore;
use crate::types::{ForwardRecord, LogEntry, LogicalId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retention {
    OneDay,
    OneWeek,
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    TwoYears,
    Infinite,
}

impl Retention {
    pub fn days(self) -> Option<u32> {
        match self {
            Retention::OneDay => Some(1),
            Retention::OneWeek => Some(7),
            Retention::OneMonth => Some(30),
            Retention::ThreeMonths => Some(90),
            Retention::SixMonths => Some(180),
            Retention::OneYear => Some(365),
            Retention::TwoYears => Some(731),
            Retention::Infinite => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogGroupSpec {
    /// Explicit physical name. Without one, resolution generates it.
    pub name: Option<String>,
    pub retention: Retention,
}

impl Default for LogGroupSpec {
    fn default() -> Self {
        LogGroupSpec {
            name: None,
            retention: Retention::TwoYears,
        }
    }
}

impl LogGroupSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        LogGroupSpec {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.is_empty() {
                anyhow::bail!("log group name must not be empty");
            }
            let ok = name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '.' | '#'));
            if !ok {
                anyhow::bail!("log group name {name:?} has invalid characters");
            }
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct LogGroupModel {
    inner: Arc<GroupInner>,
}

#[derive(Debug)]
struct GroupInner {
    name: String,
    retention: Retention,
    metrics: Arc<MetricStore>,
    filters: Mutex<Vec<MetricFilterModel>>,
    subscriptions: Mutex<Vec<mpsc::Sender<ForwardRecord>>>,
    entries: Mutex<Vec<LogEntry>>,
}

impl LogGroupModel {
    pub fn new(name: impl Into<String>, retention: Retention, metrics: Arc<MetricStore>) -> Self {
        LogGroupModel {
            inner: Arc::new(GroupInner {
                name: name.into(),
                retention,
                metrics,
                filters: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn from_spec(logical_id: &str, spec: &LogGroupSpec, metrics: Arc<MetricStore>) -> Self {
        let name = spec.name.clone().unwrap_or_else(|| logical_id.to_string());
        Self::new(name, spec.retention, metrics)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn attach_filter(&self, filter: MetricFilterModel) {
        self.inner
            .filters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(filter);
    }

    pub fn subscribe(&self, tx: mpsc::Sender<ForwardRecord>) {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
    }

    pub fn ingest(&self, entry: LogEntry) {
        {
            let filters = self.inner.filters.lock().unwrap_or_else(|e| e.into_inner());
            for filter in filters.iter() {
                if let Some(point) = filter.evaluate(&entry) {
                    self.inner.metrics.record(filter.metric(), point);
                }
            }
        }
        {
            let subs = self
                .inner
                .subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for tx in subs.iter() {
                let record = ForwardRecord {
                    source_group: self.inner.name.clone(),
                    principal: None,
                    timestamp_ms: entry.timestamp_ms,
                    message: entry.message.clone(),
                };
                if let Err(err) = tx.try_send(record) {
                    warn!(group = %self.inner.name, "subscription send failed: {err}");
                }
            }
        }
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn entry_count(&self) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Drops entries past retention. Returns how many were removed.
    pub fn prune_expired(&self, now_ms: i64) -> usize {
        let Some(days) = self.inner.retention.days() else {
            return 0;
        };
        let cutoff = now_ms - i64::from(days) * 86_400_000;
        let mut entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|e| e.timestamp_ms >= cutoff);
        before - entries.len()
    }
}
