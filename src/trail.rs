//! Account audit trail.
//! Every audit event is routed twice: as a JSON entry into the trail log
//! group, where the sign-in filter sees it, and as an object into the
//! sink under the audit prefix.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::log_group::LogGroupModel;
use crate::sink::ObjectStore;
use crate::types::{LogEntry, LogicalId};

/// One management event, serialized in the field naming the filter
/// selectors expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_time: DateTime<Utc>,
    pub event_source: String,
    pub event_name: String,
    pub aws_region: String,
    pub user_identity: UserIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl AuditEvent {
    pub fn console_login_failure(user: &str, region: &str, at: DateTime<Utc>) -> Self {
        AuditEvent {
            event_time: at,
            event_source: "signin.amazonaws.com".into(),
            event_name: "ConsoleLogin".into(),
            aws_region: region.into(),
            user_identity: UserIdentity {
                kind: "IAMUser".into(),
                user_name: Some(user.into()),
            },
            error_message: Some("Failed authentication".into()),
        }
    }

    pub fn console_login_success(user: &str, region: &str, at: DateTime<Utc>) -> Self {
        AuditEvent {
            error_message: None,
            ..Self::console_login_failure(user, region, at)
        }
    }

    pub fn api_call(name: &str, source: &str, region: &str, at: DateTime<Utc>) -> Self {
        AuditEvent {
            event_time: at,
            event_source: source.into(),
            event_name: name.into(),
            aws_region: region.into(),
            user_identity: UserIdentity {
                kind: "AssumedRole".into(),
                user_name: None,
            },
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailSpec {
    pub name: String,
    pub log_group: LogicalId,
    pub sink: LogicalId,
    pub key_prefix: String,
    pub multi_region: bool,
    pub include_global_events: bool,
}

impl TrailSpec {
    pub fn new(name: impl Into<String>, log_group: LogicalId, sink: LogicalId) -> Self {
        TrailSpec {
            name: name.into(),
            log_group,
            sink,
            key_prefix: "audit/".into(),
            multi_region: true,
            include_global_events: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("trail needs a name");
        }
        if !self.key_prefix.is_empty() && !self.key_prefix.ends_with('/') {
            anyhow::bail!("trail key prefix {:?} must end with '/'", self.key_prefix);
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        vec![self.log_group.clone(), self.sink.clone()]
    }
}

/// Live trail bound to its two destinations.
#[derive(Debug)]
pub struct TrailModel {
    name: String,
    key_prefix: String,
    group: LogGroupModel,
    sink: ObjectStore,
    seq: u64,
}

impl TrailModel {
    pub fn new(spec: &TrailSpec, group: LogGroupModel, sink: ObjectStore) -> Self {
        TrailModel {
            name: spec.name.clone(),
            key_prefix: spec.key_prefix.clone(),
            group,
            sink,
            seq: 0,
        }
    }

    /// Both routes or neither: the sink write happens first so a failed
    /// object put does not leave a group-only copy behind.
    pub fn record(&mut self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let ts_ms = event.event_time.timestamp_millis();
        self.seq += 1;
        let key = format!(
            "{}{}/{}-{:06}.json",
            self.key_prefix,
            event.event_time.format("%Y/%m/%d"),
            self.name,
            self.seq
        );
        self.sink.put(&key, json.clone().into_bytes())?;
        self.group
            .ingest(LogEntry::new(format!("audit-{:06}", self.seq), ts_ms, json));
        Ok(())
    }

    pub fn recorded(&self) -> u64 {
        self.seq
    }
}
