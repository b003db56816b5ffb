//! Instance bootstrap.
//! Named configs grouped into config sets, flattened into one ordered
//! plan at declaration time. Applying a plan walks the steps in order and
//! stops at the first failure.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CONFIG_SET: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InitStep {
    /// Install a package from a URL.
    Package { url: String },
    /// Write a file with embedded contents to a target path.
    File { target: String, contents: String },
    /// Run a shell command.
    Command { exec: String },
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStep::Package { url } => write!(f, "install package {url}"),
            InitStep::File { target, .. } => write!(f, "write file {target}"),
            InitStep::Command { exec } => write!(f, "run command {exec}"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitConfig {
    pub steps: Vec<InitStep>,
}

impl InitConfig {
    pub fn new(steps: Vec<InitStep>) -> Self {
        InitConfig { steps }
    }
}

/// The full bootstrap declaration of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitSpec {
    /// Set name to ordered config names. Order inside a set is the order
    /// the configs run.
    pub config_sets: BTreeMap<String, Vec<String>>,
    pub configs: BTreeMap<String, InitConfig>,
}

impl InitSpec {
    pub fn from_config_sets(
        config_sets: BTreeMap<String, Vec<String>>,
        configs: BTreeMap<String, InitConfig>,
    ) -> Result<Self> {
        let spec = InitSpec {
            config_sets,
            configs,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.config_sets.contains_key(DEFAULT_CONFIG_SET) {
            anyhow::bail!("init spec has no {DEFAULT_CONFIG_SET:?} config set");
        }
        for (set, names) in &self.config_sets {
            if names.is_empty() {
                anyhow::bail!("config set {set:?} is empty");
            }
            for name in names {
                if !self.configs.contains_key(name) {
                    anyhow::bail!("config set {set:?} references unknown config {name:?}");
                }
            }
        }
        Ok(())
    }

    /// Flattens one set into a plan. Step order is the set's config order,
    /// then each config's own step order.
    pub fn plan(&self, set: &str) -> Result<InitPlan> {
        let names = self
            .config_sets
            .get(set)
            .ok_or_else(|| anyhow::anyhow!("unknown config set {set:?}"))?;
        let mut steps = Vec::new();
        for name in names {
            let config = self
                .configs
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("config set {set:?} references unknown config {name:?}"))?;
            for (index, step) in config.steps.iter().enumerate() {
                steps.push(PlannedStep {
                    config: name.clone(),
                    index,
                    step: step.clone(),
                });
            }
        }
        Ok(InitPlan {
            set: set.to_string(),
            steps,
        })
    }

    /// The set that runs automatically at first boot.
    pub fn default_plan(&self) -> Result<InitPlan> {
        self.plan(DEFAULT_CONFIG_SET)
    }
}

#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub config: String,
    pub index: usize,
    pub step: InitStep,
}

#[derive(Debug, Clone)]
pub struct InitPlan {
    pub set: String,
    pub steps: Vec<PlannedStep>,
}

/// Execution seam. The plan stays declarative; whatever applies it brings
/// the side effects.
pub trait StepRunner {
    fn install_package(&mut self, url: &str) -> Result<()>;
    fn write_file(&mut self, target: &str, contents: &str) -> Result<()>;
    fn run_command(&mut self, exec: &str) -> Result<()>;
}

impl InitPlan {
    /// Runs every step in order. The first failure aborts the rest and
    /// the error names the step that failed.
    pub fn apply(&self, runner: &mut dyn StepRunner) -> Result<usize> {
        for (position, planned) in self.steps.iter().enumerate() {
            debug!(
                set = %self.set,
                config = %planned.config,
                step = %planned.step,
                "applying init step"
            );
            let outcome = match &planned.step {
                InitStep::Package { url } => runner.install_package(url),
                InitStep::File { target, contents } => runner.write_file(target, contents),
                InitStep::Command { exec } => runner.run_command(exec),
            };
            outcome.with_context(|| {
                format!(
                    "init step {}/{} failed in config {:?}: {}",
                    position + 1,
                    self.steps.len(),
                    planned.config,
                    planned.step
                )
            })?;
        }
        Ok(self.steps.len())
    }
}
