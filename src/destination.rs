//! Cross-account log destination.
//! The receiving side of the pipeline. Senders in other accounts
//! subscribe against an access policy; refusal happens at subscribe
//! time, never at first delivery.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pipeline::PipelineSender;
use crate::policy::AccessPolicy;
use crate::types::{ForwardRecord, LogEntry, LogicalId};

/// Action a sender must be allowed before it may attach.
pub const SUBSCRIBE_ACTION: &str = "logs:PutSubscriptionFilter";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub name: String,
    pub pipeline: LogicalId,
    pub policy: AccessPolicy,
}

impl DestinationSpec {
    pub fn new(name: impl Into<String>, pipeline: LogicalId, policy: AccessPolicy) -> Self {
        DestinationSpec {
            name: name.into(),
            pipeline,
            policy,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("destination needs a name");
        }
        self.policy.validate()
    }

    pub fn references(&self) -> Vec<LogicalId> {
        vec![self.pipeline.clone()]
    }
}

/// Live endpoint bound to its pipeline.
#[derive(Clone)]
pub struct DestinationModel {
    name: Arc<str>,
    endpoint: Arc<str>,
    policy: Arc<AccessPolicy>,
    sender: PipelineSender,
}

impl DestinationModel {
    pub fn new(spec: &DestinationSpec, endpoint: &str, sender: PipelineSender) -> Self {
        DestinationModel {
            name: Arc::from(spec.name.as_str()),
            endpoint: Arc::from(endpoint),
            policy: Arc::new(spec.policy.clone()),
            sender,
        }
    }

    /// The identifier senders address, exported as a stack output.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn subscribe(
        &self,
        principal_arn: &str,
        source_group: &str,
    ) -> Result<DestinationSubscription> {
        if !self.policy.allows(principal_arn, SUBSCRIBE_ACTION) {
            anyhow::bail!(
                "principal {principal_arn:?} is not allowed to subscribe to destination {}",
                self.name
            );
        }
        info!(
            destination = %self.name,
            principal = principal_arn,
            group = source_group,
            "subscription accepted"
        );
        Ok(DestinationSubscription {
            principal: principal_arn.to_string(),
            source_group: source_group.to_string(),
            sender: self.sender.clone(),
        })
    }
}

/// One accepted sender. Every forwarded entry carries the subscribing
/// principal so the receiving side can tell senders apart.
#[derive(Debug, Clone)]
pub struct DestinationSubscription {
    principal: String,
    source_group: String,
    sender: PipelineSender,
}

impl DestinationSubscription {
    pub async fn forward(&self, entry: &LogEntry) -> Result<()> {
        let record = ForwardRecord {
            source_group: self.source_group.clone(),
            principal: Some(self.principal.clone()),
            timestamp_ms: entry.timestamp_ms,
            message: entry.message.clone(),
        };
        self.sender.send(record).await
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }
}
