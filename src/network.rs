//! Network declarations and flow capture.
//! A network is a CIDR block carved into named subnets. Flow captures are
//! one-way feeds: selected traffic records go to a log group line by line
//! or to the sink batch by batch.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::log_group::LogGroupModel;
use crate::sink::ObjectStore;
use crate::types::{LogEntry, LogicalId};

/// IPv4 block in `a.b.c.d/len` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub octets: [u8; 4],
    pub prefix: u8,
}

impl Cidr {
    pub fn new(octets: [u8; 4], prefix: u8) -> Result<Self> {
        if prefix > 32 {
            anyhow::bail!("CIDR prefix /{prefix} is out of range");
        }
        Ok(Cidr { octets, prefix })
    }
}

impl FromStr for Cidr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("CIDR {s:?} is missing a prefix length"))?;
        let mut octets = [0u8; 4];
        let parts: Vec<&str> = addr.split('.').collect();
        if parts.len() != 4 {
            anyhow::bail!("CIDR {s:?} has a malformed address");
        }
        for (i, part) in parts.iter().enumerate() {
            octets[i] = part
                .parse::<u8>()
                .map_err(|_| anyhow::anyhow!("CIDR {s:?} has a malformed octet {part:?}"))?;
        }
        let prefix = prefix
            .parse::<u8>()
            .map_err(|_| anyhow::anyhow!("CIDR {s:?} has a malformed prefix"))?;
        Cidr::new(octets, prefix)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets;
        write!(f, "{a}.{b}.{c}.{d}/{}", self.prefix)
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub name: String,
    pub cidr_mask: u8,
    pub public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub cidr: Cidr,
    pub subnets: Vec<SubnetSpec>,
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>, cidr: Cidr) -> Self {
        NetworkSpec {
            name: name.into(),
            cidr,
            subnets: Vec::new(),
        }
    }

    pub fn with_subnet(mut self, name: impl Into<String>, cidr_mask: u8, public: bool) -> Self {
        self.subnets.push(SubnetSpec {
            name: name.into(),
            cidr_mask,
            public,
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("network needs a name");
        }
        if self.subnets.is_empty() {
            anyhow::bail!("network {:?} declares no subnets", self.name);
        }
        for (i, subnet) in self.subnets.iter().enumerate() {
            if subnet.cidr_mask < self.cidr.prefix || subnet.cidr_mask > 28 {
                anyhow::bail!(
                    "subnet {:?} mask /{} does not fit inside {}",
                    subnet.name,
                    subnet.cidr_mask,
                    self.cidr
                );
            }
            if self.subnets[..i].iter().any(|s| s.name == subnet.name) {
                anyhow::bail!("subnet name {:?} appears twice", subnet.name);
            }
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        Vec::new()
    }

    pub fn subnet(&self, name: &str) -> Option<&SubnetSpec> {
        self.subnets.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Peer {
    AnyIpv4,
    Cidr(Cidr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressRule {
    pub peer: Peer,
    pub port: u16,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: String,
    pub network: LogicalId,
    pub allow_all_outbound: bool,
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroupSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        network: LogicalId,
    ) -> Self {
        SecurityGroupSpec {
            name: name.into(),
            description: description.into(),
            network,
            allow_all_outbound: true,
            ingress: Vec::new(),
        }
    }

    pub fn allow_ingress(mut self, peer: Peer, port: u16, description: impl Into<String>) -> Self {
        self.ingress.push(IngressRule {
            peer,
            port,
            description: description.into(),
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("security group needs a name");
        }
        for (i, rule) in self.ingress.iter().enumerate() {
            let dup = self.ingress[..i]
                .iter()
                .any(|r| r.port == rule.port && peer_eq(&r.peer, &rule.peer));
            if dup {
                anyhow::bail!(
                    "security group {:?} repeats an ingress rule for port {}",
                    self.name,
                    rule.port
                );
            }
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        vec![self.network.clone()]
    }
}

fn peer_eq(a: &Peer, b: &Peer) -> bool {
    match (a, b) {
        (Peer::AnyIpv4, Peer::AnyIpv4) => true,
        (Peer::Cidr(x), Peer::Cidr(y)) => x == y,
        _ => false,
    }
}

// ---- flow capture ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficFilter {
    All,
    AcceptOnly,
    RejectOnly,
}

impl TrafficFilter {
    pub fn selects(self, action: FlowAction) -> bool {
        match self {
            TrafficFilter::All => true,
            TrafficFilter::AcceptOnly => action == FlowAction::Accept,
            TrafficFilter::RejectOnly => action == FlowAction::Reject,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowDestination {
    LogGroup(LogicalId),
    Sink { sink: LogicalId, key_prefix: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowCaptureSpec {
    pub name: String,
    pub network: LogicalId,
    pub traffic: TrafficFilter,
    pub destination: FlowDestination,
}

impl FlowCaptureSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("flow capture needs a name");
        }
        if let FlowDestination::Sink { key_prefix, .. } = &self.destination {
            if !key_prefix.is_empty() && !key_prefix.ends_with('/') {
                anyhow::bail!("flow capture prefix {key_prefix:?} must end with '/'");
            }
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        let mut refs = vec![self.network.clone()];
        match &self.destination {
            FlowDestination::LogGroup(id) => refs.push(id.clone()),
            FlowDestination::Sink { sink, .. } => refs.push(sink.clone()),
        }
        refs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    Accept,
    Reject,
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowAction::Accept => f.write_str("ACCEPT"),
            FlowAction::Reject => f.write_str("REJECT"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub interface_id: String,
    pub src_addr: String,
    pub dst_addr: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub packets: u64,
    pub bytes: u64,
    pub start_s: i64,
    pub end_s: i64,
    pub action: FlowAction,
}

impl FlowRecord {
    /// Version 2 flow record line.
    pub fn to_line(&self, account_id: &str) -> String {
        format!(
            "2 {account_id} {} {} {} {} {} {} {} {} {} {} {} OK",
            self.interface_id,
            self.src_addr,
            self.dst_addr,
            self.src_port,
            self.dst_port,
            self.protocol,
            self.packets,
            self.bytes,
            self.start_s,
            self.end_s,
            self.action
        )
    }
}

/// Bound destination side of one capture.
#[derive(Debug)]
pub enum FlowTarget {
    Group(LogGroupModel),
    Sink {
        store: ObjectStore,
        key_prefix: String,
    },
}

#[derive(Debug)]
pub struct FlowCaptureModel {
    name: String,
    traffic: TrafficFilter,
    target: FlowTarget,
    account_id: String,
    seq: u64,
}

impl FlowCaptureModel {
    pub fn new(spec: &FlowCaptureSpec, target: FlowTarget, account_id: &str) -> Self {
        FlowCaptureModel {
            name: spec.name.clone(),
            traffic: spec.traffic,
            target,
            account_id: account_id.to_string(),
            seq: 0,
        }
    }

    /// Applies the traffic filter and delivers what survives. Returns how
    /// many records were delivered. An all-filtered batch writes nothing.
    pub fn deliver(&mut self, records: &[FlowRecord]) -> Result<usize> {
        let selected: Vec<&FlowRecord> = records
            .iter()
            .filter(|r| self.traffic.selects(r.action))
            .collect();
        if selected.is_empty() {
            return Ok(0);
        }
        match &self.target {
            FlowTarget::Group(group) => {
                for record in &selected {
                    self.seq += 1;
                    group.ingest(LogEntry::new(
                        format!("flow-{:06}", self.seq),
                        record.start_s * 1000,
                        record.to_line(&self.account_id),
                    ));
                }
            }
            FlowTarget::Sink { store, key_prefix } => {
                self.seq += 1;
                let body: String = selected
                    .iter()
                    .map(|r| r.to_line(&self.account_id))
                    .collect::<Vec<_>>()
                    .join("\n");
                let key = format!("{key_prefix}{}-{:06}.log", self.name, self.seq);
                store.put(&key, body.into_bytes())?;
            }
        }
        Ok(selected.len())
    }
}
