//! Access policy documents.
//! The cross-account destination and the instance role both carry a policy
//! document in the standard IAM JSON shape. Evaluation is deliberately
//! narrow: explicit allow-list, deny wins, everything else refused.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::types::LogicalId;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessPolicy {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: StringOrList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<StringOrList>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// `"Principal": {"AWS": ...}` or `{"Service": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "AWS", default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<StringOrList>,
    #[serde(rename = "Service", default, skip_serializing_if = "Option::is_none")]
    pub service: Option<StringOrList>,
}

/// IAM lets single-element lists collapse to a bare string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            StringOrList::One(s) => std::slice::from_ref(s).iter().map(String::as_str),
            StringOrList::Many(v) => v.as_slice().iter().map(String::as_str),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        self.iter().any(|p| wildcard_match(p, value))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StringOrList::One(s) => s.is_empty(),
            StringOrList::Many(v) => v.is_empty(),
        }
    }
}

impl From<&str> for StringOrList {
    fn from(s: &str) -> Self {
        StringOrList::One(s.to_string())
    }
}

impl AccessPolicy {
    pub fn allow(statement: Statement) -> Self {
        AccessPolicy {
            version: POLICY_VERSION.to_string(),
            statement: vec![statement],
        }
    }

    /// Default deny. A single matching Deny refuses even when an Allow
    /// also matches.
    pub fn allows(&self, principal_arn: &str, action: &str) -> bool {
        let mut allowed = false;
        for stmt in &self.statement {
            if !stmt.action.matches(action) {
                continue;
            }
            if !stmt.principal_matches(principal_arn) {
                continue;
            }
            match stmt.effect {
                Effect::Deny => return false,
                Effect::Allow => allowed = true,
            }
        }
        allowed
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != POLICY_VERSION {
            anyhow::bail!("unsupported policy version {:?}", self.version);
        }
        if self.statement.is_empty() {
            anyhow::bail!("policy has no statements");
        }
        for (i, stmt) in self.statement.iter().enumerate() {
            if stmt.action.is_empty() {
                anyhow::bail!("statement {i} has no actions");
            }
        }
        Ok(())
    }
}

impl Statement {
    fn principal_matches(&self, principal_arn: &str) -> bool {
        match &self.principal {
            None => false,
            Some(p) => {
                p.aws.as_ref().is_some_and(|set| set.matches(principal_arn))
                    || p.service
                        .as_ref()
                        .is_some_and(|set| set.matches(principal_arn))
            }
        }
    }
}

/// Standard trust document for a role assumed by one service principal.
pub fn service_trust(service: &str) -> AccessPolicy {
    AccessPolicy::allow(Statement {
        sid: None,
        effect: Effect::Allow,
        principal: Some(Principal {
            aws: None,
            service: Some(service.into()),
        }),
        action: "sts:AssumeRole".into(),
        resource: None,
    })
}

/// IAM role declaration. Only the trust relationship and the attached
/// managed policy names matter at this level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub assumed_by: String,
    pub managed_policies: Vec<String>,
}

impl RoleSpec {
    pub fn for_service(name: impl Into<String>, service: impl Into<String>) -> Self {
        RoleSpec {
            name: name.into(),
            assumed_by: service.into(),
            managed_policies: Vec::new(),
        }
    }

    pub fn with_managed_policy(mut self, policy: impl Into<String>) -> Self {
        self.managed_policies.push(policy.into());
        self
    }

    pub fn trust_document(&self) -> AccessPolicy {
        service_trust(&self.assumed_by)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("role needs a name");
        }
        if self.assumed_by.trim().is_empty() {
            anyhow::bail!("role {:?} has no trusted principal", self.name);
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        Vec::new()
    }
}

/// Glob match with `*` (any run) and `?` (single char), the semantics ARN
/// patterns use.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let mut pi = 0usize;
    let mut vi = 0usize;
    let mut star: Option<usize> = None;
    let mut mark = 0usize;
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = vi;
            pi += 1;
        } else if let Some(s) = star {
            // Backtrack: let the last star absorb one more char.
            pi = s + 1;
            mark += 1;
            vi = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
