//! Tests for metric filter evaluation.

use logfabric::metric_filter::{MetricFilterModel, MetricFilterSpec, MetricValue};
use logfabric::metrics::MetricId;
use logfabric::pattern::{FieldEquals, FilterPattern};
use logfabric::types::{LogEntry, LogicalId};

fn signin_spec() -> MetricFilterSpec {
    MetricFilterSpec::new(
        "SignInFailMetricFilter",
        LogicalId::new("TrailLog"),
        FilterPattern::all(vec![
            FieldEquals::new("$.eventName", "ConsoleLogin"),
            FieldEquals::new("$.errorMessage", "Failed authentication"),
        ])
        .unwrap(),
        MetricId::new("CloudTrailMetrics", "ConsoleSigninFailureCount"),
        MetricValue::Constant(1.0),
    )
}

fn bytes_spec() -> MetricFilterSpec {
    MetricFilterSpec::new(
        "WebServerMetricFilter",
        LogicalId::new("WebServerLogGroup"),
        FilterPattern::positional("[ip, id, user, timestamp, request, status_code, size]").unwrap(),
        MetricId::new("WebServerMetric", "BytesTransferred"),
        MetricValue::Field("size".into()),
    )
}

fn entry(message: &str) -> LogEntry {
    LogEntry::new("e-1", 1_700_000_000_000, message)
}

// ============================================================================
// Constant Value Tests
// ============================================================================

#[test]
fn test_constant_on_match() {
    let model = MetricFilterModel::new(signin_spec());
    let point = model
        .evaluate(&entry(
            r#"{"eventName":"ConsoleLogin","errorMessage":"Failed authentication"}"#,
        ))
        .unwrap();
    assert_eq!(point.value, 1.0);
    assert_eq!(point.timestamp_ms, 1_700_000_000_000);
}

#[test]
fn test_no_match_publishes_nothing() {
    let model = MetricFilterModel::new(signin_spec());
    assert!(model
        .evaluate(&entry(r#"{"eventName":"ConsoleLogin"}"#))
        .is_none());
    assert!(model.evaluate(&entry("not json")).is_none());
}

// ============================================================================
// Field Extraction Tests
// ============================================================================

#[test]
fn test_field_extraction_parses_number() {
    let model = MetricFilterModel::new(bytes_spec());
    let line = r#"10.0.0.1 - - [12/Dec/2025:10:00:00 +0000] "GET /index.html HTTP/1.1" 200 2326"#;
    let point = model.evaluate(&entry(line)).unwrap();
    assert_eq!(point.value, 2326.0);
}

#[test]
fn test_unparseable_field_without_default_publishes_nothing() {
    let model = MetricFilterModel::new(bytes_spec());
    // Size of "-" is how servers report an unknown byte count
    let line = r#"10.0.0.1 - - [12/Dec/2025:10:00:00 +0000] "GET / HTTP/1.1" 304 -"#;
    assert!(model.evaluate(&entry(line)).is_none());
}

#[test]
fn test_unparseable_field_with_default_publishes_default() {
    let model = MetricFilterModel::new(bytes_spec().with_default(0.0));
    let line = r#"10.0.0.1 - - [12/Dec/2025:10:00:00 +0000] "GET / HTTP/1.1" 304 -"#;
    let point = model.evaluate(&entry(line)).unwrap();
    assert_eq!(point.value, 0.0);
}

#[test]
fn test_missing_final_field_uses_default() {
    let model = MetricFilterModel::new(bytes_spec().with_default(0.0));
    let line = r#"10.0.0.1 - - [12/Dec/2025:10:00:00 +0000] "GET / HTTP/1.1" 304"#;
    let point = model.evaluate(&entry(line)).unwrap();
    assert_eq!(point.value, 0.0);
}

#[test]
fn test_default_does_not_mask_real_values() {
    let model = MetricFilterModel::new(bytes_spec().with_default(0.0));
    let line = r#"10.0.0.1 - - [12/Dec/2025:10:00:00 +0000] "GET / HTTP/1.1" 200 512"#;
    let point = model.evaluate(&entry(line)).unwrap();
    assert_eq!(point.value, 512.0);
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn test_validate_accepts_well_formed_specs() {
    assert!(signin_spec().validate().is_ok());
    assert!(bytes_spec().validate().is_ok());
}

#[test]
fn test_validate_rejects_empty_name() {
    let mut spec = signin_spec();
    spec.name = "  ".into();
    assert!(spec.validate().is_err());
}

#[test]
fn test_validate_rejects_incomplete_metric() {
    let mut spec = signin_spec();
    spec.metric = MetricId::new("", "ConsoleSigninFailureCount");
    assert!(spec.validate().is_err());
}

#[test]
fn test_validate_rejects_unknown_extraction_field() {
    let mut spec = bytes_spec();
    spec.value = MetricValue::Field("bytes_sent".into());
    let err = spec.validate().unwrap_err();
    assert!(err.to_string().contains("bytes_sent"));
}

#[test]
fn test_references_name_the_log_group() {
    assert_eq!(signin_spec().references(), vec![LogicalId::new("TrailLog")]);
}
