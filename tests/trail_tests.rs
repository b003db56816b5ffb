//! Tests for the audit trail and its dual-route recording.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use logfabric::log_group::{LogGroupModel, Retention};
use logfabric::metric_filter::{MetricFilterModel, MetricFilterSpec, MetricValue};
use logfabric::metrics::{MetricId, MetricStore, Statistic};
use logfabric::pattern::{FieldEquals, FilterPattern};
use logfabric::sink::ObjectStore;
use logfabric::trail::{AuditEvent, TrailModel, TrailSpec};
use logfabric::types::LogicalId;

fn spec() -> TrailSpec {
    TrailSpec::new(
        "Trail",
        LogicalId::new("CloudTrailLogGroup"),
        LogicalId::new("LogBucket"),
    )
}

fn failure_at(y: i32, mo: u32, d: u32) -> AuditEvent {
    let at = Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).unwrap();
    AuditEvent::console_login_failure("alice", "us-east-1", at)
}

// ============================================================================
// Audit Event Tests
// ============================================================================

#[test]
fn test_failure_event_serializes_with_api_field_names() {
    let event = failure_at(2024, 5, 17);
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"eventName\":\"ConsoleLogin\""), "got: {json}");
    assert!(json.contains("\"eventSource\":\"signin.amazonaws.com\""));
    assert!(json.contains("\"awsRegion\":\"us-east-1\""));
    assert!(json.contains("\"errorMessage\":\"Failed authentication\""));
    assert!(json.contains("\"type\":\"IAMUser\""));
    assert!(json.contains("\"userName\":\"alice\""));
}

#[test]
fn test_successful_login_has_no_error_message() {
    let at = Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap();
    let event = AuditEvent::console_login_success("alice", "us-east-1", at);
    let json = serde_json::to_string(&event).unwrap();
    assert!(!json.contains("errorMessage"), "got: {json}");
    assert!(json.contains("\"eventName\":\"ConsoleLogin\""));
}

#[test]
fn test_api_call_event_shape() {
    let at = Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap();
    let event = AuditEvent::api_call("PutObject", "s3.amazonaws.com", "us-east-1", at);
    assert_eq!(event.event_name, "PutObject");
    assert_eq!(event.event_source, "s3.amazonaws.com");
    assert!(event.error_message.is_none());
    assert!(event.user_identity.user_name.is_none());
}

#[test]
fn test_event_round_trips_through_json() {
    let event = failure_at(2024, 5, 17);
    let json = serde_json::to_string(&event).unwrap();
    let back: AuditEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back.event_name, event.event_name);
    assert_eq!(back.error_message, event.error_message);
    assert_eq!(back.event_time, event.event_time);
}

// ============================================================================
// Trail Spec Tests
// ============================================================================

#[test]
fn test_spec_defaults() {
    let spec = spec();
    assert_eq!(spec.key_prefix, "audit/");
    assert!(spec.multi_region);
    assert!(spec.include_global_events);
    assert!(spec.validate().is_ok());
    assert_eq!(
        spec.references(),
        vec![
            LogicalId::new("CloudTrailLogGroup"),
            LogicalId::new("LogBucket")
        ]
    );
}

#[test]
fn test_spec_rejects_prefix_without_trailing_slash() {
    let mut bad = spec();
    bad.key_prefix = "audit".to_string();
    let err = bad.validate().unwrap_err();
    assert!(err.to_string().contains("must end with '/'"));
}

#[test]
fn test_empty_prefix_is_allowed() {
    let mut flat = spec();
    flat.key_prefix = String::new();
    assert!(flat.validate().is_ok());
}

// ============================================================================
// Recording Tests
// ============================================================================

#[test]
fn test_record_routes_to_group_and_sink() {
    let group = LogGroupModel::new(
        "CloudTrailLogGroup",
        Retention::TwoYears,
        Arc::new(MetricStore::new()),
    );
    let sink = ObjectStore::new();
    let mut trail = TrailModel::new(&spec(), group.clone(), sink.clone());

    trail.record(&failure_at(2024, 5, 17)).unwrap();
    assert_eq!(trail.recorded(), 1);

    let keys = sink.list("audit/");
    assert_eq!(keys, vec!["audit/2024/05/17/Trail-000001.json".to_string()]);

    let entries = group.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, "audit-000001");
    assert_eq!(entries[0].message, sink.get_string(&keys[0]).unwrap());
}

#[test]
fn test_entry_timestamp_is_the_event_time() {
    let group = LogGroupModel::new(
        "CloudTrailLogGroup",
        Retention::TwoYears,
        Arc::new(MetricStore::new()),
    );
    let mut trail = TrailModel::new(&spec(), group.clone(), ObjectStore::new());

    let event = failure_at(2024, 5, 17);
    trail.record(&event).unwrap();
    assert_eq!(
        group.entries()[0].timestamp_ms,
        event.event_time.timestamp_millis()
    );
}

#[test]
fn test_sequence_and_date_shape_the_object_keys() {
    let group = LogGroupModel::new(
        "CloudTrailLogGroup",
        Retention::TwoYears,
        Arc::new(MetricStore::new()),
    );
    let sink = ObjectStore::new();
    let mut trail = TrailModel::new(&spec(), group, sink.clone());

    trail.record(&failure_at(2024, 5, 17)).unwrap();
    trail.record(&failure_at(2024, 5, 17)).unwrap();
    trail.record(&failure_at(2024, 5, 18)).unwrap();

    let keys = sink.list("audit/");
    assert_eq!(
        keys,
        vec![
            "audit/2024/05/17/Trail-000001.json".to_string(),
            "audit/2024/05/17/Trail-000002.json".to_string(),
            "audit/2024/05/18/Trail-000003.json".to_string(),
        ]
    );
}

#[test]
fn test_recorded_events_reach_an_attached_filter() {
    let metrics = Arc::new(MetricStore::new());
    let group = LogGroupModel::new("CloudTrailLogGroup", Retention::TwoYears, metrics.clone());
    let metric = MetricId::new("CloudTrailMetrics", "ConsoleSigninFailureCount");
    let pattern = FilterPattern::all(vec![
        FieldEquals::new("$.eventName", "ConsoleLogin"),
        FieldEquals::new("$.errorMessage", "Failed authentication"),
    ])
    .unwrap();
    group.attach_filter(MetricFilterModel::new(MetricFilterSpec::new(
        "SigninFailures",
        LogicalId::new("CloudTrailLogGroup"),
        pattern,
        metric.clone(),
        MetricValue::Constant(1.0),
    )));
    let mut trail = TrailModel::new(&spec(), group, ObjectStore::new());

    let at = Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap();
    trail.record(&AuditEvent::console_login_failure("alice", "us-east-1", at)).unwrap();
    trail.record(&AuditEvent::console_login_success("alice", "us-east-1", at)).unwrap();

    // Only the failure publishes.
    let from = at.timestamp_millis() - 1_000;
    let sum = metrics.statistic(&metric, Statistic::Sum, from, from + 2_000);
    assert_eq!(sum, Some(1.0));
}
