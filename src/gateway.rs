//! Function-backed REST endpoint with access logging.
//! Requests are recorded in common log format into the bound group, and
//! client-side errors feed a sum-over-period metric.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assets::FunctionCode;
use crate::log_group::LogGroupModel;
use crate::metrics::{Datapoint, MetricId, MetricStore};
use crate::types::{LogEntry, LogicalId};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub runtime: String,
    /// `module.function`, resolved against the code directory.
    pub handler: String,
    pub code: FunctionCodeRef,
}

/// Where the function source comes from. The manifest records the path;
/// the bytes never leave disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCodeRef {
    pub dir: String,
}

impl FunctionSpec {
    pub fn new(
        name: impl Into<String>,
        runtime: impl Into<String>,
        handler: impl Into<String>,
        code: &FunctionCode,
    ) -> Self {
        FunctionSpec {
            name: name.into(),
            runtime: runtime.into(),
            handler: handler.into(),
            code: FunctionCodeRef {
                dir: code.dir.display().to_string(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("function needs a name");
        }
        if self.runtime.trim().is_empty() {
            anyhow::bail!("function {:?} has no runtime", self.name);
        }
        if !self.handler.contains('.') {
            anyhow::bail!(
                "function {:?} handler {:?} must be module.function",
                self.name,
                self.handler
            );
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestApiSpec {
    pub name: String,
    pub handler: LogicalId,
    pub access_log_group: LogicalId,
}

impl RestApiSpec {
    pub fn new(name: impl Into<String>, handler: LogicalId, access_log_group: LogicalId) -> Self {
        RestApiSpec {
            name: name.into(),
            handler,
            access_log_group,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("rest api needs a name");
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        vec![self.handler.clone(), self.access_log_group.clone()]
    }

    /// Client-side error count, summed per period by the caller's alarm
    /// or dashboard.
    pub fn metric_client_error(&self) -> MetricId {
        MetricId::new("ApiGateway", format!("{}-4XXError", self.name))
    }
}

/// One handled request, shaped for common log format rendering.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub remote_ip: String,
    pub user: Option<String>,
    pub at: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status: u16,
    /// None renders as `-`, the way servers report an unknown size.
    pub bytes: Option<u64>,
}

impl AccessRecord {
    pub fn to_clf(&self) -> String {
        format!(
            "{} - {} [{}] \"{} {} {}\" {} {}",
            self.remote_ip,
            self.user.as_deref().unwrap_or("-"),
            self.at.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.path,
            self.protocol,
            self.status,
            self.bytes.map(|b| b.to_string()).unwrap_or_else(|| "-".into())
        )
    }
}

/// Live endpoint: access log plus the client-error series.
#[derive(Debug)]
pub struct RestApiModel {
    access_log: LogGroupModel,
    metrics: Arc<MetricStore>,
    client_error_metric: MetricId,
    seq: u64,
}

impl RestApiModel {
    pub fn new(spec: &RestApiSpec, access_log: LogGroupModel, metrics: Arc<MetricStore>) -> Self {
        RestApiModel {
            access_log,
            client_error_metric: spec.metric_client_error(),
            metrics,
            seq: 0,
        }
    }

    pub fn record_request(&mut self, record: &AccessRecord) {
        self.seq += 1;
        let ts_ms = record.at.timestamp_millis();
        self.access_log.ingest(LogEntry::new(
            format!("req-{:06}", self.seq),
            ts_ms,
            record.to_clf(),
        ));
        if (400..500).contains(&record.status) {
            self.metrics.record(
                &self.client_error_metric,
                Datapoint {
                    timestamp_ms: ts_ms,
                    value: 1.0,
                },
            );
        }
    }

    pub fn client_error_metric(&self) -> &MetricId {
        &self.client_error_metric
    }
}
