//! Filter pattern language.
//! Two dialects: all-of field equality over JSON entries, and positional
//! templates over space-delimited lines. Evaluation is per entry and pure.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FilterPattern {
    /// Every condition must hold. Non-JSON entries never match.
    Json(Vec<FieldEquals>),
    /// Named fields matched against whitespace-delimited tokens, in order.
    Positional { fields: Vec<String> },
}

/// One `$.path = literal` condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldEquals {
    pub selector: String,
    pub expected: String,
}

impl FieldEquals {
    pub fn new(selector: impl Into<String>, expected: impl Into<String>) -> Self {
        FieldEquals {
            selector: selector.into(),
            expected: expected.into(),
        }
    }
}

/// Extracted fields of a matched entry, keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct MatchedEntry {
    fields: HashMap<String, String>,
}

impl MatchedEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl FilterPattern {
    pub fn all(conditions: Vec<FieldEquals>) -> Result<Self> {
        if conditions.is_empty() {
            anyhow::bail!("json pattern needs at least one condition");
        }
        for c in &conditions {
            if !c.selector.starts_with("$.") || c.selector.len() <= 2 {
                anyhow::bail!("selector {:?} must start with '$.'", c.selector);
            }
        }
        Ok(FilterPattern::Json(conditions))
    }

    /// Parses a template like `[ip, id, user, timestamp, request, status_code, size]`.
    pub fn positional(template: &str) -> Result<Self> {
        let inner = template
            .trim()
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .ok_or_else(|| anyhow::anyhow!("positional template {template:?} must be bracketed"))?;
        let fields: Vec<String> = inner
            .split(',')
            .map(|f| f.trim().to_string())
            .collect();
        if fields.iter().any(String::is_empty) {
            anyhow::bail!("positional template {template:?} has an empty field name");
        }
        for (i, f) in fields.iter().enumerate() {
            if !f.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                anyhow::bail!("field name {f:?} is not a valid identifier");
            }
            if fields[..i].contains(f) {
                anyhow::bail!("field name {f:?} appears twice");
            }
        }
        Ok(FilterPattern::Positional { fields })
    }

    /// None means no match. A match carries whatever fields the pattern
    /// could extract, which is how value extraction gets at `$size`.
    pub fn evaluate(&self, message: &str) -> Option<MatchedEntry> {
        match self {
            FilterPattern::Json(conditions) => evaluate_json(conditions, message),
            FilterPattern::Positional { fields } => evaluate_positional(fields, message),
        }
    }
}

fn evaluate_json(conditions: &[FieldEquals], message: &str) -> Option<MatchedEntry> {
    let doc: Value = serde_json::from_str(message.trim()).ok()?;
    if !doc.is_object() {
        return None;
    }
    for cond in conditions {
        let found = resolve_selector(&doc, &cond.selector)?;
        if scalar_text(found)? != cond.expected {
            return None;
        }
    }
    // Top-level scalars become extractable fields, same keys minus the `$.`.
    let mut fields = HashMap::new();
    if let Value::Object(map) = &doc {
        for (k, v) in map {
            if let Some(text) = scalar_text(v) {
                fields.insert(k.clone(), text);
            }
        }
    }
    Some(MatchedEntry { fields })
}

fn evaluate_positional(names: &[String], message: &str) -> Option<MatchedEntry> {
    let tokens = tokenize_delimited(message);
    // A line one token short still matches when only the final field is
    // missing; extraction then falls back to the configured default.
    let matched_len = if tokens.len() == names.len() {
        names.len()
    } else if tokens.len() + 1 == names.len() {
        names.len() - 1
    } else {
        return None;
    };
    let mut fields = HashMap::new();
    for (name, token) in names[..matched_len].iter().zip(tokens) {
        fields.insert(name.clone(), token);
    }
    Some(MatchedEntry { fields })
}

/// Splits on whitespace but keeps `"..."` and `[...]` runs as one token,
/// with the delimiters stripped. Access-log lines depend on this for the
/// timestamp and request fields.
fn tokenize_delimited(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        match c {
            '"' => {
                chars.next();
                for ch in chars.by_ref() {
                    if ch == '"' {
                        break;
                    }
                    token.push(ch);
                }
            }
            '[' => {
                chars.next();
                for ch in chars.by_ref() {
                    if ch == ']' {
                        break;
                    }
                    token.push(ch);
                }
            }
            _ => {
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() {
                        break;
                    }
                    token.push(ch);
                    chars.next();
                }
            }
        }
        tokens.push(token);
    }
    tokens
}

/// Walks `$.a.b` into nested objects.
fn resolve_selector<'a>(doc: &'a Value, selector: &str) -> Option<&'a Value> {
    let path = selector.strip_prefix("$.")?;
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
