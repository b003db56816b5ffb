//! Tests for topology declaration and resolution.

use std::collections::BTreeMap;

use logfabric::alarm::AlarmSpec;
use logfabric::init::{InitConfig, InitSpec, InitStep, DEFAULT_CONFIG_SET};
use logfabric::instance::{InstanceSpec, MachineImage};
use logfabric::log_group::LogGroupSpec;
use logfabric::metric_filter::{MetricFilterSpec, MetricValue};
use logfabric::metrics::MetricId;
use logfabric::network::{Cidr, NetworkSpec, SecurityGroupSpec};
use logfabric::notify::TopicSpec;
use logfabric::pattern::{FieldEquals, FilterPattern};
use logfabric::pipeline::PipelineSpec;
use logfabric::policy::RoleSpec;
use logfabric::sink::SinkSpec;
use logfabric::topology::{Resource, Topology};
use logfabric::types::LogicalId;

fn group() -> Resource {
    Resource::LogGroup(LogGroupSpec::new())
}

fn named_group(name: &str) -> Resource {
    Resource::LogGroup(LogGroupSpec::named(name))
}

fn filter_on(log_group: &LogicalId, metric: MetricId) -> Resource {
    Resource::MetricFilter(MetricFilterSpec::new(
        "Filter",
        log_group.clone(),
        FilterPattern::all(vec![FieldEquals::new("$.eventName", "ConsoleLogin")]).unwrap(),
        metric,
        MetricValue::Constant(1.0),
    ))
}

fn test_metric() -> MetricId {
    MetricId::new("Test", "Failures")
}

fn network() -> Resource {
    Resource::Network(
        NetworkSpec::new("Vpc", "10.0.0.0/16".parse::<Cidr>().unwrap())
            .with_subnet("app", 24, true),
    )
}

fn minimal_init() -> InitSpec {
    let mut configs = BTreeMap::new();
    configs.insert(
        "setup".to_string(),
        InitConfig::new(vec![InitStep::Command {
            exec: "true".into(),
        }]),
    );
    let mut sets = BTreeMap::new();
    sets.insert(DEFAULT_CONFIG_SET.to_string(), vec!["setup".to_string()]);
    InitSpec::from_config_sets(sets, configs).unwrap()
}

fn instance(network: &LogicalId, subnet: &str, role: &LogicalId, sgs: Vec<LogicalId>) -> Resource {
    Resource::Instance(InstanceSpec {
        name: "Box".into(),
        instance_type: "t2.micro".into(),
        image: MachineImage::AmazonLinux2,
        network: network.clone(),
        subnet: subnet.into(),
        role: role.clone(),
        security_groups: sgs,
        init: minimal_init(),
        user_data: None,
    })
}

// ============================================================================
// Declaration Tests
// ============================================================================

#[test]
fn test_declare_and_get() {
    let mut t = Topology::new("Test");
    let id = t.declare("Web", group()).unwrap();
    assert_eq!(t.len(), 1);
    assert!(t.contains(&id));
    assert_eq!(t.get(&id).unwrap().kind(), "LogGroup");
    assert!(!t.is_empty());
}

#[test]
fn test_declare_rejects_duplicate_id() {
    let mut t = Topology::new("Test");
    t.declare("Web", group()).unwrap();
    let err = t.declare("Web", group()).unwrap_err();
    assert!(err.to_string().contains("already declared"));
}

#[test]
fn test_declare_rejects_invalid_id() {
    let mut t = Topology::new("Test");
    assert!(t.declare("", group()).is_err());
    assert!(t.declare("has space", group()).is_err());
    assert!(t.declare("has/slash", group()).is_err());
    assert!(t.declare("Ok-Id_2", group()).is_ok());
}

#[test]
fn test_declare_rejects_forward_reference() {
    let mut t = Topology::new("Test");
    let err = t
        .declare("Filter", filter_on(&LogicalId::new("NotYet"), test_metric()))
        .unwrap_err();
    assert!(err.to_string().contains("undeclared"));
    assert!(err.to_string().contains("NotYet"));
    assert!(t.is_empty());
}

#[test]
fn test_declare_validates_the_resource() {
    let mut t = Topology::new("Test");
    let err = t
        .declare("Bad", Resource::Topic(TopicSpec::new("  ")))
        .unwrap_err();
    assert!(err.to_string().contains("name"));
}

// ============================================================================
// Dependency Edge Tests
// ============================================================================

#[test]
fn test_add_dependency_requires_declared_nodes() {
    let mut t = Topology::new("Test");
    let a = t.declare("A", group()).unwrap();
    assert!(t.add_dependency(&a, &LogicalId::new("Missing")).is_err());
    assert!(t.add_dependency(&LogicalId::new("Missing"), &a).is_err());
}

#[test]
fn test_add_dependency_rejects_self() {
    let mut t = Topology::new("Test");
    let a = t.declare("A", group()).unwrap();
    assert!(t.add_dependency(&a, &a).is_err());
}

#[test]
fn test_add_dependency_deduplicates() {
    let mut t = Topology::new("Test");
    let a = t.declare("A", group()).unwrap();
    let b = t.declare("B", group()).unwrap();
    t.add_dependency(&b, &a).unwrap();
    t.add_dependency(&b, &a).unwrap();
    assert_eq!(t.node(&b).unwrap().depends_on.len(), 1);
}

// ============================================================================
// Resolution Order Tests
// ============================================================================

#[test]
fn test_order_is_declaration_order_without_edges() {
    let mut t = Topology::new("Test");
    t.declare("Charlie", group()).unwrap();
    t.declare("Alpha", group()).unwrap();
    t.declare("Bravo", group()).unwrap();

    let resolved = t.resolve().unwrap();
    let order: Vec<&str> = resolved.order().iter().map(|id| id.as_str()).collect();
    assert_eq!(order, vec!["Charlie", "Alpha", "Bravo"]);
}

#[test]
fn test_references_order_dependencies_first() {
    let mut t = Topology::new("Test");
    let g = t.declare("Trail", group()).unwrap();
    t.declare("Filter", filter_on(&g, test_metric())).unwrap();

    let resolved = t.resolve().unwrap();
    let order: Vec<&str> = resolved.order().iter().map(|id| id.as_str()).collect();
    assert_eq!(order, vec!["Trail", "Filter"]);
}

#[test]
fn test_explicit_edges_override_declaration_order() {
    let mut t = Topology::new("Test");
    let first = t.declare("First", group()).unwrap();
    let second = t.declare("Second", group()).unwrap();
    t.add_dependency(&first, &second).unwrap();

    let resolved = t.resolve().unwrap();
    let order: Vec<&str> = resolved.order().iter().map(|id| id.as_str()).collect();
    assert_eq!(order, vec!["Second", "First"]);
}

#[test]
fn test_resolution_is_deterministic() {
    let mut t = Topology::new("Test");
    let g = t.declare("Trail", group()).unwrap();
    t.declare("Filter", filter_on(&g, test_metric())).unwrap();
    t.declare("Other", group()).unwrap();

    let a = t.resolve().unwrap();
    let b = t.resolve().unwrap();
    assert_eq!(a.order(), b.order());
}

#[test]
fn test_cycle_is_reported_with_members() {
    let mut t = Topology::new("Test");
    let a = t.declare("A", group()).unwrap();
    let b = t.declare("B", group()).unwrap();
    t.add_dependency(&a, &b).unwrap();
    t.add_dependency(&b, &a).unwrap();

    let err = t.resolve().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("cycle"), "got: {message}");
    assert!(message.contains("A, B"), "got: {message}");
}

// ============================================================================
// Cross Reference Tests
// ============================================================================

#[test]
fn test_filter_must_reference_a_log_group() {
    let mut t = Topology::new("Test");
    let sink = t.declare("Bucket", Resource::Sink(SinkSpec::new())).unwrap();
    t.declare("Filter", filter_on(&sink, test_metric())).unwrap();

    let err = t.resolve().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("expecting LogGroup"), "got: {message}");
    assert!(message.contains("found Sink"), "got: {message}");
}

#[test]
fn test_alarm_requires_exactly_one_publisher() {
    let mut t = Topology::new("Test");
    let topic = t.declare("Topic", Resource::Topic(TopicSpec::new("T"))).unwrap();
    t.declare(
        "Alarm",
        Resource::Alarm(AlarmSpec::new("A", test_metric(), 3.0).with_action(topic)),
    )
    .unwrap();

    let err = t.resolve().unwrap_err();
    assert!(err.to_string().contains("no metric filter publishes"));
}

#[test]
fn test_alarm_rejects_ambiguous_publishers() {
    let mut t = Topology::new("Test");
    let g = t.declare("Trail", group()).unwrap();
    t.declare("FilterOne", filter_on(&g, test_metric())).unwrap();
    t.declare("FilterTwo", filter_on(&g, test_metric())).unwrap();
    let topic = t.declare("Topic", Resource::Topic(TopicSpec::new("T"))).unwrap();
    t.declare(
        "Alarm",
        Resource::Alarm(AlarmSpec::new("A", test_metric(), 3.0).with_action(topic)),
    )
    .unwrap();

    let err = t.resolve().unwrap_err();
    assert!(err.to_string().contains("2 filters publish"));
}

#[test]
fn test_alarm_with_single_publisher_resolves() {
    let mut t = Topology::new("Test");
    let g = t.declare("Trail", group()).unwrap();
    t.declare("Filter", filter_on(&g, test_metric())).unwrap();
    let topic = t.declare("Topic", Resource::Topic(TopicSpec::new("T"))).unwrap();
    t.declare(
        "Alarm",
        Resource::Alarm(AlarmSpec::new("A", test_metric(), 3.0).with_action(topic)),
    )
    .unwrap();

    assert!(t.resolve().is_ok());
}

#[test]
fn test_instance_subnet_must_exist() {
    let mut t = Topology::new("Test");
    let net = t.declare("Vpc", network()).unwrap();
    let role = t
        .declare(
            "Role",
            Resource::Role(RoleSpec::for_service("Role", "ec2.amazonaws.com")),
        )
        .unwrap();
    t.declare("Box", instance(&net, "nonexistent", &role, vec![]))
        .unwrap();

    let err = t.resolve().unwrap_err();
    assert!(err.to_string().contains("does not define"));
}

#[test]
fn test_instance_security_group_must_share_the_network() {
    let mut t = Topology::new("Test");
    let net_a = t.declare("VpcA", network()).unwrap();
    let net_b = t.declare("VpcB", network()).unwrap();
    let sg = t
        .declare(
            "Sg",
            Resource::SecurityGroup(SecurityGroupSpec::new("Sg", "other vpc", net_b)),
        )
        .unwrap();
    let role = t
        .declare(
            "Role",
            Resource::Role(RoleSpec::for_service("Role", "ec2.amazonaws.com")),
        )
        .unwrap();
    t.declare("Box", instance(&net_a, "app", &role, vec![sg]))
        .unwrap();

    let err = t.resolve().unwrap_err();
    assert!(err.to_string().contains("another network"));
}

#[test]
fn test_pipeline_cannot_forward_its_own_diagnostics() {
    let mut t = Topology::new("Test");
    let sink = t.declare("Bucket", Resource::Sink(SinkSpec::new())).unwrap();
    let diag = t.declare("Diag", group()).unwrap();
    t.declare(
        "Fw",
        Resource::Pipeline(
            PipelineSpec::new("Fw", sink, "forwarded/", diag.clone()).with_source_group(diag),
        ),
    )
    .unwrap();

    let err = t.resolve().unwrap_err();
    assert!(err.to_string().contains("its own diagnostics"));
}

// ============================================================================
// Physical Name Tests
// ============================================================================

#[test]
fn test_generated_names_carry_the_stack_prefix() {
    let mut t = Topology::new("TestStack");
    let id = t.declare("Web", group()).unwrap();

    let resolved = t.resolve().unwrap();
    let name = resolved.physical_name(&id).unwrap();
    assert!(name.starts_with("teststack-web-"), "got: {name}");
}

#[test]
fn test_explicit_names_pass_through() {
    let mut t = Topology::new("TestStack");
    let id = t.declare("Web", named_group("WebServerLogGroup")).unwrap();

    let resolved = t.resolve().unwrap();
    assert_eq!(resolved.physical_name(&id), Some("WebServerLogGroup"));
}

#[test]
fn test_colliding_explicit_names_fail_resolution() {
    let mut t = Topology::new("TestStack");
    t.declare("One", named_group("Dup")).unwrap();
    t.declare("Two", named_group("Dup")).unwrap();

    let err = t.resolve().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Dup"), "got: {message}");
    assert!(message.contains("One"), "got: {message}");
    assert!(message.contains("Two"), "got: {message}");
}

#[test]
fn test_unknown_id_has_no_physical_name() {
    let mut t = Topology::new("TestStack");
    t.declare("Web", group()).unwrap();
    let resolved = t.resolve().unwrap();
    assert!(resolved.physical_name(&LogicalId::new("Other")).is_none());
}
