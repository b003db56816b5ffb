//! Notification topics.
//! Alarms publish here on state transitions. Deliveries are recorded per
//! endpoint so a transition that fired can be told apart from one that
//! did not.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::LogicalId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Subscription {
    Email(String),
}

impl TopicSpec {
    pub fn new(name: impl Into<String>) -> Self {
        TopicSpec {
            name: name.into(),
            subscriptions: Vec::new(),
        }
    }

    pub fn subscribe_email(mut self, address: impl Into<String>) -> Self {
        self.subscriptions.push(Subscription::Email(address.into()));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("topic needs a name");
        }
        for sub in &self.subscriptions {
            let Subscription::Email(addr) = sub;
            let (local, domain) = addr.split_once('@').unwrap_or(("", ""));
            if local.is_empty() || domain.is_empty() {
                anyhow::bail!("topic {:?} has invalid email endpoint {addr:?}", self.name);
            }
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub endpoint: String,
    pub subject: String,
    pub message: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone)]
pub struct TopicModel {
    inner: Arc<TopicInner>,
}

#[derive(Debug)]
struct TopicInner {
    spec: TopicSpec,
    deliveries: Mutex<Vec<Delivery>>,
}

impl TopicModel {
    pub fn new(spec: TopicSpec) -> Self {
        TopicModel {
            inner: Arc::new(TopicInner {
                spec,
                deliveries: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.spec.name
    }

    /// One delivery per subscribed endpoint. A topic with no subscribers
    /// accepts the publish and records nothing.
    pub fn publish(&self, subject: &str, message: &str, now_ms: i64) {
        let mut deliveries = self
            .inner
            .deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for sub in &self.inner.spec.subscriptions {
            let Subscription::Email(addr) = sub;
            info!(
                topic = %self.inner.spec.name,
                endpoint = %addr,
                subject,
                "notification delivered"
            );
            deliveries.push(Delivery {
                endpoint: addr.clone(),
                subject: subject.to_string(),
                message: message.to_string(),
                timestamp_ms: now_ms,
            });
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.inner
            .deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
