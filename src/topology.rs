//! Topology graph.
//! Declaration is append-only and rejects unknown references on the
//! spot, so the graph is acyclic by construction unless explicit
//! dependencies are added. Resolution orders the graph, checks the
//! cross-resource rules and assigns physical names.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alarm::AlarmSpec;
use crate::destination::DestinationSpec;
use crate::gateway::{FunctionSpec, RestApiSpec};
use crate::instance::InstanceSpec;
use crate::log_group::LogGroupSpec;
use crate::metric_filter::MetricFilterSpec;
use crate::naming;
use crate::network::{FlowCaptureSpec, FlowDestination, NetworkSpec, SecurityGroupSpec};
use crate::notify::TopicSpec;
use crate::pipeline::PipelineSpec;
use crate::policy::RoleSpec;
use crate::sink::SinkSpec;
use crate::trail::TrailSpec;
use crate::types::LogicalId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    Sink(SinkSpec),
    LogGroup(LogGroupSpec),
    Trail(TrailSpec),
    MetricFilter(MetricFilterSpec),
    Alarm(AlarmSpec),
    Topic(TopicSpec),
    Network(NetworkSpec),
    SecurityGroup(SecurityGroupSpec),
    FlowCapture(FlowCaptureSpec),
    Role(RoleSpec),
    Instance(InstanceSpec),
    Pipeline(PipelineSpec),
    Destination(DestinationSpec),
    Function(FunctionSpec),
    RestApi(RestApiSpec),
}

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Sink(_) => "Sink",
            Resource::LogGroup(_) => "LogGroup",
            Resource::Trail(_) => "Trail",
            Resource::MetricFilter(_) => "MetricFilter",
            Resource::Alarm(_) => "Alarm",
            Resource::Topic(_) => "Topic",
            Resource::Network(_) => "Network",
            Resource::SecurityGroup(_) => "SecurityGroup",
            Resource::FlowCapture(_) => "FlowCapture",
            Resource::Role(_) => "Role",
            Resource::Instance(_) => "Instance",
            Resource::Pipeline(_) => "Pipeline",
            Resource::Destination(_) => "Destination",
            Resource::Function(_) => "Function",
            Resource::RestApi(_) => "RestApi",
        }
    }

    pub fn references(&self) -> Vec<LogicalId> {
        match self {
            Resource::Sink(s) => s.references(),
            Resource::LogGroup(s) => s.references(),
            Resource::Trail(s) => s.references(),
            Resource::MetricFilter(s) => s.references(),
            Resource::Alarm(s) => s.references(),
            Resource::Topic(s) => s.references(),
            Resource::Network(s) => s.references(),
            Resource::SecurityGroup(s) => s.references(),
            Resource::FlowCapture(s) => s.references(),
            Resource::Role(s) => s.references(),
            Resource::Instance(s) => s.references(),
            Resource::Pipeline(s) => s.references(),
            Resource::Destination(s) => s.references(),
            Resource::Function(s) => s.references(),
            Resource::RestApi(s) => s.references(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Resource::Sink(s) => s.validate(),
            Resource::LogGroup(s) => s.validate(),
            Resource::Trail(s) => s.validate(),
            Resource::MetricFilter(s) => s.validate(),
            Resource::Alarm(s) => s.validate(),
            Resource::Topic(s) => s.validate(),
            Resource::Network(s) => s.validate(),
            Resource::SecurityGroup(s) => s.validate(),
            Resource::FlowCapture(s) => s.validate(),
            Resource::Role(s) => s.validate(),
            Resource::Instance(s) => s.validate(),
            Resource::Pipeline(s) => s.validate(),
            Resource::Destination(s) => s.validate(),
            Resource::Function(s) => s.validate(),
            Resource::RestApi(s) => s.validate(),
        }
    }

    /// Physical name fixed at declaration, when the resource carries one.
    pub fn explicit_name(&self) -> Option<&str> {
        match self {
            Resource::Sink(s) => s.name.as_deref(),
            Resource::LogGroup(s) => s.name.as_deref(),
            Resource::Alarm(s) => Some(&s.name),
            Resource::Instance(s) => Some(&s.name),
            Resource::Destination(s) => Some(&s.name),
            _ => None,
        }
    }

    pub fn as_log_group(&self) -> Option<&LogGroupSpec> {
        match self {
            Resource::LogGroup(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_metric_filter(&self) -> Option<&MetricFilterSpec> {
        match self {
            Resource::MetricFilter(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_alarm(&self) -> Option<&AlarmSpec> {
        match self {
            Resource::Alarm(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_topic(&self) -> Option<&TopicSpec> {
        match self {
            Resource::Topic(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_network(&self) -> Option<&NetworkSpec> {
        match self {
            Resource::Network(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceSpec> {
        match self {
            Resource::Instance(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pipeline(&self) -> Option<&PipelineSpec> {
        match self {
            Resource::Pipeline(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_destination(&self) -> Option<&DestinationSpec> {
        match self {
            Resource::Destination(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_rest_api(&self) -> Option<&RestApiSpec> {
        match self {
            Resource::RestApi(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flow_capture(&self) -> Option<&FlowCaptureSpec> {
        match self {
            Resource::FlowCapture(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_trail(&self) -> Option<&TrailSpec> {
        match self {
            Resource::Trail(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: LogicalId,
    pub resource: Resource,
    /// Ordering-only edges on top of the data references.
    pub depends_on: Vec<LogicalId>,
}

#[derive(Debug, Clone)]
pub struct Topology {
    name: String,
    nodes: Vec<Node>,
    index: HashMap<LogicalId, usize>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Topology {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn contains(&self, id: &LogicalId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &LogicalId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.nodes[i].resource)
    }

    pub fn node(&self, id: &LogicalId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Adds one resource. Duplicate ids and references to anything not
    /// yet declared are rejected here, not at resolution.
    pub fn declare(&mut self, id: &str, resource: Resource) -> Result<LogicalId> {
        validate_logical_id(id)?;
        let id = LogicalId::new(id);
        if self.index.contains_key(&id) {
            anyhow::bail!("logical id {id} is already declared");
        }
        resource.validate()?;
        for referenced in resource.references() {
            if !self.index.contains_key(&referenced) {
                anyhow::bail!(
                    "resource {id} ({}) references undeclared {referenced}",
                    resource.kind()
                );
            }
        }
        debug!(stack = %self.name, id = %id, kind = resource.kind(), "declared");
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(Node {
            id: id.clone(),
            resource,
            depends_on: Vec::new(),
        });
        Ok(id)
    }

    /// Explicit ordering edge: `id` resolves after `on`.
    pub fn add_dependency(&mut self, id: &LogicalId, on: &LogicalId) -> Result<()> {
        if id == on {
            anyhow::bail!("{id} cannot depend on itself");
        }
        if !self.index.contains_key(on) {
            anyhow::bail!("dependency target {on} is not declared");
        }
        let node = self
            .index
            .get(id)
            .map(|&i| &mut self.nodes[i])
            .ok_or_else(|| anyhow::anyhow!("{id} is not declared"))?;
        if !node.depends_on.contains(on) {
            node.depends_on.push(on.clone());
        }
        Ok(())
    }

    /// Validates the graph as a whole and produces the deterministic
    /// resolution order plus physical names.
    pub fn resolve(&self) -> Result<Resolved> {
        self.check_cross_references()?;
        let order = self.topological_order()?;
        let physical = self.assign_physical_names()?;
        Ok(Resolved { order, physical })
    }

    // Rules that need more than one resource at a time.
    fn check_cross_references(&self) -> Result<()> {
        for node in &self.nodes {
            match &node.resource {
                Resource::MetricFilter(f) => {
                    self.expect_kind(&node.id, &f.log_group, "LogGroup")?;
                }
                Resource::Trail(t) => {
                    self.expect_kind(&node.id, &t.log_group, "LogGroup")?;
                    self.expect_kind(&node.id, &t.sink, "Sink")?;
                }
                Resource::Alarm(a) => {
                    for action in &a.actions {
                        self.expect_kind(&node.id, action, "Topic")?;
                    }
                    let publishers = self
                        .nodes
                        .iter()
                        .filter_map(|n| n.resource.as_metric_filter())
                        .filter(|f| f.metric == a.metric)
                        .count();
                    if publishers == 0 {
                        anyhow::bail!(
                            "alarm {} watches {}/{} which no metric filter publishes",
                            node.id,
                            a.metric.namespace,
                            a.metric.name
                        );
                    }
                    if publishers > 1 {
                        anyhow::bail!(
                            "alarm {} watches {}/{} which {publishers} filters publish",
                            node.id,
                            a.metric.namespace,
                            a.metric.name
                        );
                    }
                }
                Resource::SecurityGroup(sg) => {
                    self.expect_kind(&node.id, &sg.network, "Network")?;
                }
                Resource::FlowCapture(fc) => {
                    self.expect_kind(&node.id, &fc.network, "Network")?;
                    match &fc.destination {
                        FlowDestination::LogGroup(id) => {
                            self.expect_kind(&node.id, id, "LogGroup")?;
                        }
                        FlowDestination::Sink { sink, .. } => {
                            self.expect_kind(&node.id, sink, "Sink")?;
                        }
                    }
                }
                Resource::Instance(inst) => {
                    self.expect_kind(&node.id, &inst.network, "Network")?;
                    self.expect_kind(&node.id, &inst.role, "Role")?;
                    let network = self
                        .get(&inst.network)
                        .and_then(Resource::as_network)
                        .ok_or_else(|| anyhow::anyhow!("instance {} network missing", node.id))?;
                    if network.subnet(&inst.subnet).is_none() {
                        anyhow::bail!(
                            "instance {} placed in subnet {:?} which {} does not define",
                            node.id,
                            inst.subnet,
                            inst.network
                        );
                    }
                    for sg_id in &inst.security_groups {
                        self.expect_kind(&node.id, sg_id, "SecurityGroup")?;
                        if let Some(Resource::SecurityGroup(sg)) = self.get(sg_id) {
                            if sg.network != inst.network {
                                anyhow::bail!(
                                    "instance {} uses security group {sg_id} from another network",
                                    node.id
                                );
                            }
                        }
                    }
                }
                Resource::Pipeline(p) => {
                    self.expect_kind(&node.id, &p.sink, "Sink")?;
                    self.expect_kind(&node.id, &p.diagnostics_group, "LogGroup")?;
                    if let Some(group) = &p.source_group {
                        self.expect_kind(&node.id, group, "LogGroup")?;
                        if *group == p.diagnostics_group {
                            anyhow::bail!(
                                "pipeline {} would forward its own diagnostics",
                                node.id
                            );
                        }
                    }
                }
                Resource::Destination(d) => {
                    self.expect_kind(&node.id, &d.pipeline, "Pipeline")?;
                }
                Resource::RestApi(api) => {
                    self.expect_kind(&node.id, &api.handler, "Function")?;
                    self.expect_kind(&node.id, &api.access_log_group, "LogGroup")?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn expect_kind(&self, from: &LogicalId, target: &LogicalId, kind: &str) -> Result<()> {
        match self.get(target) {
            Some(resource) if resource.kind() == kind => Ok(()),
            Some(resource) => anyhow::bail!(
                "{from} references {target} expecting {kind}, found {}",
                resource.kind()
            ),
            None => anyhow::bail!("{from} references undeclared {target}"),
        }
    }

    /// Kahn's algorithm with a declaration-index tie break, so the order
    /// is total and stable across runs.
    fn topological_order(&self) -> Result<Vec<LogicalId>> {
        let n = self.nodes.len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree = vec![0usize; n];
        for (i, node) in self.nodes.iter().enumerate() {
            let mut deps: BTreeSet<usize> = BTreeSet::new();
            for referenced in node.resource.references() {
                if let Some(&j) = self.index.get(&referenced) {
                    deps.insert(j);
                }
            }
            for on in &node.depends_on {
                if let Some(&j) = self.index.get(on) {
                    deps.insert(j);
                }
            }
            indegree[i] = deps.len();
            for j in deps {
                dependents[j].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(&i) = ready.iter().next() {
            ready.remove(&i);
            order.push(self.nodes[i].id.clone());
            for &dep in &dependents[i] {
                indegree[dep] -= 1;
                if indegree[dep] == 0 {
                    ready.insert(dep);
                }
            }
        }
        if order.len() < n {
            let mut stuck: Vec<String> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| indegree[*i] > 0)
                .map(|(_, node)| node.id.to_string())
                .collect();
            stuck.sort();
            anyhow::bail!("dependency cycle among: {}", stuck.join(", "));
        }
        Ok(order)
    }

    fn assign_physical_names(&self) -> Result<HashMap<LogicalId, String>> {
        let mut physical = HashMap::with_capacity(self.nodes.len());
        let mut seen: HashMap<String, LogicalId> = HashMap::new();
        for node in &self.nodes {
            let name = match node.resource.explicit_name() {
                Some(explicit) => explicit.to_string(),
                None => naming::physical_name(&self.name, node.id.as_str()),
            };
            if let Some(other) = seen.insert(name.clone(), node.id.clone()) {
                anyhow::bail!(
                    "physical name {name:?} is claimed by both {other} and {}",
                    node.id
                );
            }
            physical.insert(node.id.clone(), name);
        }
        Ok(physical)
    }
}

/// Resolution output: a total order plus the name assignment.
#[derive(Debug, Clone)]
pub struct Resolved {
    order: Vec<LogicalId>,
    physical: HashMap<LogicalId, String>,
}

impl Resolved {
    pub fn order(&self) -> &[LogicalId] {
        &self.order
    }

    pub fn physical_name(&self, id: &LogicalId) -> Option<&str> {
        self.physical.get(id).map(String::as_str)
    }
}

fn validate_logical_id(id: &str) -> Result<()> {
    if id.is_empty() {
        anyhow::bail!("logical id must not be empty");
    }
    let ok = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !ok {
        anyhow::bail!("logical id {id:?} has invalid characters");
    }
    Ok(())
}
