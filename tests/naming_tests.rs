//! Tests for physical name generation.

use logfabric::naming::{
    account_principal, destination_endpoint, hash_suffix, physical_name, rest_api_url, slug,
};

// ============================================================================
// slug Tests
// ============================================================================

#[test]
fn test_slug_lowercases() {
    assert_eq!(slug("LoggingWorkshop"), "loggingworkshop");
    assert_eq!(slug("ABC123"), "abc123");
}

#[test]
fn test_slug_collapses_separators() {
    assert_eq!(slug("Logging Workshop"), "logging-workshop");
    assert_eq!(slug("a  b"), "a-b");
    assert_eq!(slug("Weird__Name"), "weird-name");
}

#[test]
fn test_slug_trims_edges() {
    // Leading and trailing junk never becomes a hyphen
    assert_eq!(slug("!!abc"), "abc");
    assert_eq!(slug("abc!!"), "abc");
    assert_eq!(slug("--Weird__Name--"), "weird-name");
}

#[test]
fn test_slug_empty() {
    assert_eq!(slug(""), "");
    assert_eq!(slug("///"), "");
}

// ============================================================================
// hash_suffix Tests
// ============================================================================

#[test]
fn test_hash_suffix_is_eight_hex_chars() {
    let suffix = hash_suffix("LoggingWorkshop/LogBucket");
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_hash_suffix_is_deterministic() {
    assert_eq!(hash_suffix("same input"), hash_suffix("same input"));
}

// ============================================================================
// physical_name Tests
// ============================================================================

#[test]
fn test_physical_name_shape() {
    let name = physical_name("LoggingWorkshop", "LogBucket");
    assert!(name.starts_with("loggingworkshop-logbucket-"));
    assert_eq!(name.len(), "loggingworkshop-logbucket-".len() + 8);
}

#[test]
fn test_physical_name_stable_across_runs() {
    assert_eq!(
        physical_name("LoggingWorkshop", "LogBucket"),
        physical_name("LoggingWorkshop", "LogBucket")
    );
}

#[test]
fn test_physical_name_distinct_per_resource() {
    let a = physical_name("LoggingWorkshop", "LogBucket");
    let b = physical_name("LoggingWorkshop", "TrailLog");
    assert_ne!(a, b);
}

#[test]
fn test_physical_name_distinct_per_stack() {
    let a = physical_name("StackOne", "LogBucket");
    let b = physical_name("StackTwo", "LogBucket");
    assert_ne!(a, b);
}

// ============================================================================
// Endpoint Tests
// ============================================================================

#[test]
fn test_destination_endpoint() {
    let arn = destination_endpoint("us-east-1", "111111111111", "CentralDestination");
    assert_eq!(
        arn,
        "arn:aws:logs:us-east-1:111111111111:destination:CentralDestination"
    );
}

#[test]
fn test_account_principal() {
    assert_eq!(
        account_principal("222222222222"),
        "arn:aws:iam::222222222222:root"
    );
}

#[test]
fn test_rest_api_url_shape() {
    let url = rest_api_url("us-east-1", "SecondAccount", "Endpoint");
    assert!(url.starts_with("https://"));
    assert!(url.contains(".execute-api.us-east-1.amazonaws.com"));
    assert!(url.ends_with("/prod/"));
}

#[test]
fn test_rest_api_url_stable() {
    assert_eq!(
        rest_api_url("us-east-1", "SecondAccount", "Endpoint"),
        rest_api_url("us-east-1", "SecondAccount", "Endpoint")
    );
}

#[test]
fn test_rest_api_url_api_id_is_hash() {
    let url = rest_api_url("us-east-1", "SecondAccount", "Endpoint");
    let api_id = url
        .strip_prefix("https://")
        .and_then(|rest| rest.split('.').next())
        .unwrap();
    assert_eq!(api_id.len(), 8);
    assert!(api_id.chars().all(|c| c.is_ascii_hexdigit()));
}
