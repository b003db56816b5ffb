//! Sender account stack.
//! A function-backed REST endpoint whose access log lands in its own
//! group. The group is what a cross-account subscription forwards to the
//! primary account's destination.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use crate::assets::GatewayAssets;
use crate::config::Context;
use crate::gateway::{FunctionSpec, RestApiModel, RestApiSpec};
use crate::log_group::{LogGroupModel, LogGroupSpec, Retention};
use crate::metrics::MetricStore;
use crate::naming;
use crate::synth::{self, Manifest};
use crate::topology::{Resource, Topology};
use crate::types::LogicalId;

pub const STACK_NAME: &str = "SecondAccount";
pub const HANDLER: &str = "sample.handler";
pub const RUNTIME: &str = "python3.7";

#[derive(Debug, Clone)]
pub struct SecondAccountIds {
    pub function: LogicalId,
    pub access_log_group: LogicalId,
    pub api: LogicalId,
}

#[derive(Debug)]
pub struct SecondAccountStack {
    pub topology: Topology,
    pub ids: SecondAccountIds,
}

pub fn build(assets: &GatewayAssets) -> Result<SecondAccountStack> {
    assets.function_code.require_handler(HANDLER)?;
    let mut t = Topology::new(STACK_NAME);

    let function = t.declare(
        "SampleHandler",
        Resource::Function(FunctionSpec::new(
            "SampleHandler",
            RUNTIME,
            HANDLER,
            &assets.function_code,
        )),
    )?;

    let access_log_group = t.declare(
        "APIgatewayLogs",
        Resource::LogGroup(
            LogGroupSpec::named("APIgatewayLogs").with_retention(Retention::ThreeMonths),
        ),
    )?;

    let api = t.declare(
        "Endpoint",
        Resource::RestApi(RestApiSpec::new(
            "Endpoint",
            function.clone(),
            access_log_group.clone(),
        )),
    )?;

    Ok(SecondAccountStack {
        topology: t,
        ids: SecondAccountIds {
            function,
            access_log_group,
            api,
        },
    })
}

impl SecondAccountStack {
    pub fn synthesize(&self, ctx: &Context) -> Result<Manifest> {
        let resolved = self.topology.resolve()?;
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "EndpointUrl".to_string(),
            naming::rest_api_url(&ctx.region, STACK_NAME, self.ids.api.as_str()),
        );
        synth::render(&self.topology, &resolved, &ctx.region, outputs)
    }
}

/// Live access-log side of the stack.
pub struct SecondAccountModel {
    pub metrics: Arc<MetricStore>,
    pub access_log_group: LogGroupModel,
    pub api: RestApiModel,
}

impl SecondAccountModel {
    pub fn provision(stack: &SecondAccountStack) -> Result<Self> {
        let metrics = Arc::new(MetricStore::new());
        let group_spec = stack
            .topology
            .get(&stack.ids.access_log_group)
            .and_then(Resource::as_log_group)
            .ok_or_else(|| anyhow::anyhow!("access log group is missing"))?;
        let access_log_group = LogGroupModel::from_spec(
            stack.ids.access_log_group.as_str(),
            group_spec,
            metrics.clone(),
        );
        let api_spec = stack
            .topology
            .get(&stack.ids.api)
            .and_then(Resource::as_rest_api)
            .ok_or_else(|| anyhow::anyhow!("rest api is missing"))?;
        let api = RestApiModel::new(api_spec, access_log_group.clone(), metrics.clone());
        Ok(SecondAccountModel {
            metrics,
            access_log_group,
            api,
        })
    }
}
