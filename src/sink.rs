//! Durable storage sink.
//! Keyed objects behind a shared handle. Writers never coordinate with
//! each other; every producer owns a key prefix and collisions are a bug
//! in the key scheme, not in the store.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::types::LogicalId;

pub const MAX_KEY_LEN: usize = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkSpec {
    /// Explicit physical name. Without one, resolution generates it and
    /// exports the result as a stack output.
    pub name: Option<String>,
}

impl SinkSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        SinkSpec {
            name: Some(name.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            // Bucket naming rules: lowercase, digits, hyphens.
            let ok = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !ok {
                anyhow::bail!("sink name {name:?} is not a valid bucket name");
            }
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        Vec::new()
    }
}

/// In-process stand-in for the bucket. Ordered keys keep listings
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins on key collision, like the real thing.
    pub fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.to_string(), body);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.get(key).cloned()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|body| String::from_utf8(body).ok())
    }

    /// Keys under a prefix, in lexical order.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn object_count(&self) -> usize {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_count() == 0
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        anyhow::bail!("object key must not be empty");
    }
    if key.len() > MAX_KEY_LEN {
        anyhow::bail!("object key exceeds {MAX_KEY_LEN} bytes");
    }
    if key.starts_with('/') {
        anyhow::bail!("object key must not start with '/'");
    }
    if key.chars().any(|c| c.is_ascii_control()) {
        anyhow::bail!("object key contains control characters");
    }
    Ok(())
}
