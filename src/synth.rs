//! Manifest synthesis.
//! A resolved topology serializes to one JSON document: resources in
//! resolution order with their physical names, then the exported
//! outputs. Writes go through a temp file and rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::fs;

use anyhow::{Context as _, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::naming;
use crate::topology::{Resolved, Topology};

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub stack: String,
    pub region: String,
    pub resources: Vec<ManifestResource>,
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ManifestResource {
    pub id: String,
    pub kind: String,
    pub physical_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub spec: Value,
}

pub fn render(
    topology: &Topology,
    resolved: &Resolved,
    region: &str,
    outputs: BTreeMap<String, String>,
) -> Result<Manifest> {
    let mut resources = Vec::with_capacity(topology.len());
    for id in resolved.order() {
        let node = topology
            .node(id)
            .ok_or_else(|| anyhow::anyhow!("resolved order names unknown id {id}"))?;
        let physical_name = resolved
            .physical_name(id)
            .ok_or_else(|| anyhow::anyhow!("no physical name assigned to {id}"))?
            .to_string();
        let mut spec = serde_json::to_value(&node.resource)
            .with_context(|| format!("serializing {id}"))?;
        // The enum tag repeats the kind column; drop it from the detail.
        if let Some(obj) = spec.as_object_mut() {
            obj.remove("kind");
        }
        resources.push(ManifestResource {
            id: id.to_string(),
            kind: node.resource.kind().to_string(),
            physical_name,
            depends_on: node.depends_on.iter().map(|d| d.to_string()).collect(),
            spec,
        });
    }
    Ok(Manifest {
        stack: topology.name().to_string(),
        region: region.to_string(),
        resources,
        outputs,
    })
}

pub fn manifest_path(out_dir: &Path, stack: &str) -> PathBuf {
    out_dir.join(format!("{}.manifest.json", naming::slug(stack)))
}

pub fn write_manifest(manifest: &Manifest, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("creating manifest directory")?;
    }
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(manifest).context("serializing manifest")?;
    fs::write(&tmp, data).context("writing temp manifest")?;
    fs::rename(&tmp, path).context("replacing manifest")?;
    info!(
        stack = %manifest.stack,
        resources = manifest.resources.len(),
        path = %path.display(),
        "manifest written"
    );
    Ok(())
}
