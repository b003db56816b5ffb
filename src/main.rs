use std::path::PathBuf;

use anyhow::Result;
use dotenvy::dotenv;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use logfabric::assets::{GatewayAssets, WorkshopAssets};
use logfabric::config::Context;
use logfabric::second_account;
use logfabric::synth;
use logfabric::workshop;

fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let ctx_path = std::env::args().nth(1).map(PathBuf::from);
    let ctx = Context::load(ctx_path)?;
    info!("synthesizing with context {:?}", ctx);

    let workshop_assets = WorkshopAssets::load(&ctx.asset_dir)?;
    let gateway_assets = GatewayAssets::load(&ctx.asset_dir)?;

    let workshop_stack = workshop::build(&ctx, &workshop_assets)?;
    let workshop_manifest = workshop_stack.synthesize(&ctx)?;
    let workshop_path = synth::manifest_path(&ctx.out_dir, workshop::STACK_NAME);
    synth::write_manifest(&workshop_manifest, &workshop_path)?;

    let second_stack = second_account::build(&gateway_assets)?;
    let second_manifest = second_stack.synthesize(&ctx)?;
    let second_path = synth::manifest_path(&ctx.out_dir, second_account::STACK_NAME);
    synth::write_manifest(&second_manifest, &second_path)?;

    for (name, value) in workshop_manifest
        .outputs
        .iter()
        .chain(second_manifest.outputs.iter())
    {
        info!("output {name} = {value}");
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();
}
