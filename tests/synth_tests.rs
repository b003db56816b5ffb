//! Tests for manifest rendering and the synth output files.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use logfabric::log_group::LogGroupSpec;
use logfabric::sink::SinkSpec;
use logfabric::synth::{manifest_path, render, write_manifest};
use logfabric::topology::{Resource, Topology};
use logfabric::trail::TrailSpec;
use logfabric::types::LogicalId;
use tempfile::tempdir;

fn demo_topology() -> Topology {
    let mut topology = Topology::new("DemoStack");
    topology.declare("LogBucket", Resource::Sink(SinkSpec::new())).unwrap();
    topology
        .declare("TrailLog", Resource::LogGroup(LogGroupSpec::new()))
        .unwrap();
    topology
        .declare(
            "Trail",
            Resource::Trail(TrailSpec::new(
                "Trail",
                LogicalId::new("TrailLog"),
                LogicalId::new("LogBucket"),
            )),
        )
        .unwrap();
    topology
}

// ============================================================================
// Manifest Path Tests
// ============================================================================

#[test]
fn test_manifest_path_slugs_the_stack_name() {
    assert_eq!(
        manifest_path(Path::new("out"), "LoggingWorkshop"),
        Path::new("out").join("loggingworkshop.manifest.json")
    );
    assert_eq!(
        manifest_path(Path::new("out"), "Second Account"),
        Path::new("out").join("second-account.manifest.json")
    );
}

// ============================================================================
// Render Tests
// ============================================================================

#[test]
fn test_render_follows_resolution_order() {
    let topology = demo_topology();
    let resolved = topology.resolve().unwrap();
    let manifest = render(&topology, &resolved, "us-east-1", BTreeMap::new()).unwrap();

    assert_eq!(manifest.stack, "DemoStack");
    assert_eq!(manifest.region, "us-east-1");
    let ids: Vec<&str> = manifest.resources.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["LogBucket", "TrailLog", "Trail"]);
    let kinds: Vec<&str> = manifest.resources.iter().map(|r| r.kind.as_str()).collect();
    assert_eq!(kinds, vec!["Sink", "LogGroup", "Trail"]);
}

#[test]
fn test_render_assigns_physical_names() {
    let topology = demo_topology();
    let resolved = topology.resolve().unwrap();
    let manifest = render(&topology, &resolved, "us-east-1", BTreeMap::new()).unwrap();

    let bucket = &manifest.resources[0];
    assert!(
        bucket.physical_name.starts_with("demostack-logbucket-"),
        "got: {}",
        bucket.physical_name
    );
    assert_eq!(bucket.physical_name.len(), "demostack-logbucket-".len() + 8);
}

#[test]
fn test_resource_spec_detail_drops_the_kind_tag() {
    let topology = demo_topology();
    let resolved = topology.resolve().unwrap();
    let manifest = render(&topology, &resolved, "us-east-1", BTreeMap::new()).unwrap();

    for resource in &manifest.resources {
        assert!(resource.spec.get("kind").is_none(), "kind leaked in {}", resource.id);
    }
    // The detail keeps every declared field besides the tag.
    assert_eq!(
        manifest.resources[2].spec.get("key_prefix").and_then(|v| v.as_str()),
        Some("audit/")
    );
}

#[test]
fn test_depends_on_serializes_only_when_present() {
    let mut topology = demo_topology();
    topology
        .add_dependency(&LogicalId::new("TrailLog"), &LogicalId::new("LogBucket"))
        .unwrap();
    let resolved = topology.resolve().unwrap();
    let manifest = render(&topology, &resolved, "us-east-1", BTreeMap::new()).unwrap();

    assert_eq!(manifest.resources[1].depends_on, vec!["LogBucket"]);
    assert!(manifest.resources[0].depends_on.is_empty());

    let json = serde_json::to_value(&manifest).unwrap();
    let resources = json["resources"].as_array().unwrap();
    assert!(resources[0].get("depends_on").is_none());
    assert!(resources[1].get("depends_on").is_some());
}

#[test]
fn test_outputs_pass_through() {
    let topology = demo_topology();
    let resolved = topology.resolve().unwrap();
    let mut outputs = BTreeMap::new();
    outputs.insert("LogBucketName".to_string(), "demostack-logbucket-abcd1234".to_string());
    let manifest = render(&topology, &resolved, "us-east-1", outputs).unwrap();
    assert_eq!(
        manifest.outputs.get("LogBucketName").map(String::as_str),
        Some("demostack-logbucket-abcd1234")
    );
}

// ============================================================================
// Write Tests
// ============================================================================

#[test]
fn test_write_creates_parents_and_leaves_no_temp_file() {
    let topology = demo_topology();
    let resolved = topology.resolve().unwrap();
    let manifest = render(&topology, &resolved, "us-east-1", BTreeMap::new()).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/out/demostack.manifest.json");
    write_manifest(&manifest, &path).unwrap();

    assert!(path.is_file());
    assert!(!path.with_extension("tmp").exists());

    let parsed: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed["stack"], "DemoStack");
    assert_eq!(parsed["region"], "us-east-1");
    assert_eq!(parsed["resources"].as_array().unwrap().len(), 3);
}
