//! Deploy-time asset loading.
//! Stacks embed a handful of files verbatim (agent config, bootstrap
//! script) and parse one (the destination access policy). Missing or
//! malformed assets fail declaration, not resolution.

use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context as _, Result};
use serde::Serialize;

use crate::policy::AccessPolicy;

pub const AGENT_CONFIG_FILE: &str = "agent/amazon-cloudwatch-agent.json";
pub const BOOTSTRAP_SCRIPT_FILE: &str = "userdata/bootstrap.sh";
pub const DESTINATION_POLICY_FILE: &str = "policy/destination-policy.json";
pub const FUNCTION_CODE_DIR: &str = "lambda";

/// A file embedded into a declaration without interpretation.
#[derive(Debug, Clone, Serialize)]
pub struct TextAsset {
    pub path: PathBuf,
    pub contents: String,
}

impl TextAsset {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading asset {}", path.display()))?;
        if contents.trim().is_empty() {
            anyhow::bail!("asset {} is empty", path.display());
        }
        Ok(TextAsset {
            path: path.to_path_buf(),
            contents,
        })
    }
}

/// Directory of function source shipped as-is. The handler module must
/// exist before anything is declared against it.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionCode {
    pub dir: PathBuf,
}

impl FunctionCode {
    pub fn from_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            anyhow::bail!("function code directory {} not found", dir.display());
        }
        Ok(FunctionCode {
            dir: dir.to_path_buf(),
        })
    }

    /// `sample.handler` means a `sample.py` next to the other sources.
    pub fn require_handler(&self, handler: &str) -> Result<()> {
        let module = handler
            .split('.')
            .next()
            .filter(|m| !m.is_empty())
            .with_context(|| format!("handler {handler:?} has no module part"))?;
        let file = self.dir.join(format!("{module}.py"));
        if !file.is_file() {
            anyhow::bail!(
                "handler {handler:?} expects {} which does not exist",
                file.display()
            );
        }
        Ok(())
    }
}

/// Everything the primary stack embeds.
#[derive(Debug, Clone)]
pub struct WorkshopAssets {
    pub agent_config: TextAsset,
    pub bootstrap_script: TextAsset,
    pub destination_policy_raw: TextAsset,
    pub destination_policy: AccessPolicy,
}

impl WorkshopAssets {
    pub fn load(asset_dir: &Path) -> Result<Self> {
        let agent_config = TextAsset::load(&asset_dir.join(AGENT_CONFIG_FILE))?;
        // The agent config rides along uninterpreted, but it still has to
        // be JSON or the agent on the instance will reject it.
        serde_json::from_str::<serde_json::Value>(&agent_config.contents)
            .with_context(|| format!("asset {} is not valid JSON", agent_config.path.display()))?;

        let bootstrap_script = TextAsset::load(&asset_dir.join(BOOTSTRAP_SCRIPT_FILE))?;

        let destination_policy_raw = TextAsset::load(&asset_dir.join(DESTINATION_POLICY_FILE))?;
        let destination_policy: AccessPolicy =
            serde_json::from_str(&destination_policy_raw.contents).with_context(|| {
                format!(
                    "parsing destination policy {}",
                    destination_policy_raw.path.display()
                )
            })?;
        destination_policy.validate()?;

        Ok(WorkshopAssets {
            agent_config,
            bootstrap_script,
            destination_policy_raw,
            destination_policy,
        })
    }
}

/// Assets for the sender-side stack.
#[derive(Debug, Clone)]
pub struct GatewayAssets {
    pub function_code: FunctionCode,
}

impl GatewayAssets {
    pub fn load(asset_dir: &Path) -> Result<Self> {
        let function_code = FunctionCode::from_dir(&asset_dir.join(FUNCTION_CODE_DIR))?;
        Ok(GatewayAssets { function_code })
    }
}
