//! Physical name generation.
//! Resolution turns logical ids into physical names that are stable across
//! runs: the same stack and id always hash to the same suffix.

use std::hash::Hasher;

use fnv::FnvHasher;

/// Lowercase a name and replace every non-alphanumeric run with a single
/// hyphen. Safe for bucket names and log group names alike.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Eight hex chars derived from an FNV-1a hash of the input.
pub fn hash_suffix(input: &str) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(input.as_bytes());
    format!("{:08x}", hasher.finish() as u32)
}

/// Generated physical name: `<stack-slug>-<id-slug>-<suffix>`.
/// Resources that carry an explicit name skip this entirely.
pub fn physical_name(stack: &str, logical_id: &str) -> String {
    let scope = format!("{stack}/{logical_id}");
    format!("{}-{}-{}", slug(stack), slug(logical_id), hash_suffix(&scope))
}

/// Endpoint identifier handed to cross-account senders. Follows the ARN
/// shape the receiving side expects in its access policy.
pub fn destination_endpoint(region: &str, account_id: &str, name: &str) -> String {
    format!("arn:aws:logs:{region}:{account_id}:destination:{name}")
}

/// Source ARN pattern a sender account must be allowed under.
pub fn account_principal(account_id: &str) -> String {
    format!("arn:aws:iam::{account_id}:root")
}

/// Invocation URL for a deployed REST endpoint. The api id is derived the
/// same way as physical name suffixes so it stays stable across runs.
pub fn rest_api_url(region: &str, stack: &str, logical_id: &str) -> String {
    let api_id = hash_suffix(&format!("{stack}/{logical_id}/api"));
    format!("https://{api_id}.execute-api.{region}.amazonaws.com/prod/")
}
