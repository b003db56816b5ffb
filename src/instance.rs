//! Compute instance declarations.
//! An instance ties together a network placement, an identity role, its
//! security groups and a bootstrap: the init plan runs first, then the
//! boot script.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::init::InitSpec;
use crate::types::LogicalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineImage {
    AmazonLinux2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub instance_type: String,
    pub image: MachineImage,
    pub network: LogicalId,
    /// Subnet name inside the referenced network.
    pub subnet: String,
    pub role: LogicalId,
    pub security_groups: Vec<LogicalId>,
    pub init: InitSpec,
    pub user_data: Option<String>,
}

impl InstanceSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("instance needs a name");
        }
        if !self.instance_type.contains('.') {
            anyhow::bail!(
                "instance {:?} has malformed type {:?}",
                self.name,
                self.instance_type
            );
        }
        if self.subnet.trim().is_empty() {
            anyhow::bail!("instance {:?} has no subnet placement", self.name);
        }
        self.init.validate()?;
        // The plan must flatten cleanly now, not at first boot.
        self.init.default_plan()?;
        if let Some(user_data) = &self.user_data {
            if user_data.trim().is_empty() {
                anyhow::bail!("instance {:?} has an empty boot script", self.name);
            }
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        let mut refs = vec![self.network.clone(), self.role.clone()];
        refs.extend(self.security_groups.iter().cloned());
        refs
    }
}
