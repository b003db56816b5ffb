use std::sync::Arc;
use std::{env, fs, path::PathBuf};

use anyhow::Result;
use directories::ProjectDirs;
use serde::Deserialize;

/// Deploy-time context shared by every stack builder. Values come from a
/// TOML file with environment overrides on top.
#[derive(Debug, Clone)]
pub struct Context {
    pub region: Arc<str>,
    pub account_id: Arc<str>,
    pub notification_email: Option<String>,
    pub out_dir: PathBuf,
    pub asset_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawContext {
    region: Option<String>,
    account_id: Option<String>,
    notification_email: Option<String>,
    out_dir: Option<PathBuf>,
    asset_dir: Option<PathBuf>,
}

impl From<RawContext> for Context {
    fn from(raw: RawContext) -> Self {
        Self {
            region: raw.region.unwrap_or_else(|| DEFAULT_REGION.into()).into(),
            account_id: raw
                .account_id
                .unwrap_or_else(|| DEFAULT_ACCOUNT.into())
                .into(),
            notification_email: raw.notification_email,
            out_dir: raw.out_dir.unwrap_or_else(|| PathBuf::from("out")),
            asset_dir: raw.asset_dir.unwrap_or_else(|| PathBuf::from("assets")),
        }
    }
}

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_ACCOUNT: &str = "111111111111";

impl Context {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut ctx = if let Some(path) = path {
            let raw = fs::read_to_string(path)?;
            Context::from(toml::from_str::<RawContext>(&raw)?)
        } else {
            let default_path = default_context_path();
            if default_path.exists() {
                let raw = fs::read_to_string(&default_path)?;
                Context::from(toml::from_str::<RawContext>(&raw)?)
            } else {
                Self::default_from_env()
            }
        };

        if let Ok(v) = env::var("AWS_REGION") {
            ctx.region = v.into();
        }
        if let Ok(v) = env::var("ACCOUNT_ID") {
            ctx.account_id = v.into();
        }
        if let Ok(v) = env::var("NOTIFICATION_EMAIL") {
            if !v.trim().is_empty() {
                ctx.notification_email = Some(v);
            }
        }
        if let Ok(p) = env::var("OUT_DIR") {
            ctx.out_dir = PathBuf::from(p);
        }
        if let Ok(p) = env::var("ASSET_DIR") {
            ctx.asset_dir = PathBuf::from(p);
        }
        validate_required(&ctx)?;
        Ok(ctx)
    }

    /// The alarm notification address is deploy-time input, not a default.
    /// Stacks that need it fail declaration when it is absent.
    pub fn require_notification_email(&self) -> Result<&str> {
        match self.notification_email.as_deref() {
            Some(email) if !email.trim().is_empty() => Ok(email),
            _ => anyhow::bail!(
                "NOTIFICATION_EMAIL is required (set via env or context file)"
            ),
        }
    }
}

impl Context {
    fn default_from_env() -> Self {
        Self {
            region: env_or("AWS_REGION", DEFAULT_REGION).into(),
            account_id: env_or("ACCOUNT_ID", DEFAULT_ACCOUNT).into(),
            notification_email: env::var("NOTIFICATION_EMAIL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            out_dir: PathBuf::from(env_or("OUT_DIR", "out")),
            asset_dir: PathBuf::from(env_or("ASSET_DIR", "assets")),
        }
    }
}

fn default_context_path() -> PathBuf {
    ProjectDirs::from("com", "logfabric", "logfabric")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".logfabric"))
        .join("context.toml")
}

fn validate_required(ctx: &Context) -> Result<()> {
    if ctx.region.trim().is_empty() {
        anyhow::bail!("AWS_REGION is required (set via env or context file)");
    }
    if ctx.account_id.trim().is_empty() {
        anyhow::bail!("ACCOUNT_ID is required (set via env or context file)");
    }
    if ctx.out_dir.as_os_str().is_empty() {
        anyhow::bail!("OUT_DIR must not be empty");
    }
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
