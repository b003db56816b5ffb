//! Primary account stack.
//! Declares the full routing topology: audit trail plus sign-in alarm,
//! network flow captures, the instrumented web server, and the
//! forwarding pipeline with its cross-account destination.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::task::JoinHandle;

use crate::alarm::{AlarmModel, AlarmSpec};
use crate::assets::WorkshopAssets;
use crate::config::Context;
use crate::destination::{DestinationModel, DestinationSpec};
use crate::init::{InitConfig, InitSpec, InitStep, DEFAULT_CONFIG_SET};
use crate::instance::{InstanceSpec, MachineImage};
use crate::log_group::{LogGroupModel, LogGroupSpec, Retention};
use crate::metric_filter::{MetricFilterModel, MetricFilterSpec, MetricValue};
use crate::metrics::{MetricId, MetricStore};
use crate::naming;
use crate::network::{
    Cidr, FlowCaptureModel, FlowCaptureSpec, FlowDestination, FlowTarget, NetworkSpec, Peer,
    SecurityGroupSpec, TrafficFilter,
};
use crate::notify::{TopicModel, TopicSpec};
use crate::pattern::{FieldEquals, FilterPattern};
use crate::pipeline::{DeliveryPipeline, PipelineSender, PipelineSpec};
use crate::policy::RoleSpec;
use crate::sink::{ObjectStore, SinkSpec};
use crate::synth::{self, Manifest};
use crate::topology::{Resource, Topology};
use crate::trail::{TrailModel, TrailSpec};
use crate::types::LogicalId;

pub const STACK_NAME: &str = "LoggingWorkshop";

pub const SIGNIN_METRIC_NAMESPACE: &str = "CloudTrailMetrics";
pub const SIGNIN_METRIC_NAME: &str = "ConsoleSigninFailureCount";
pub const BYTES_METRIC_NAMESPACE: &str = "WebServerMetric";
pub const BYTES_METRIC_NAME: &str = "BytesTransferred";
pub const ACCESS_LOG_TEMPLATE: &str = "[ip, id, user, timestamp, request, status_code, size]";

const AGENT_RPM_URL: &str =
    "https://s3.amazonaws.com/amazoncloudwatch-agent/amazon_linux/amd64/latest/amazon-cloudwatch-agent.rpm";
const AGENT_CONFIG_TARGET: &str = "/opt/aws/amazon-cloudwatch-agent/etc/amazon-cloudwatch-agent.json";
const AGENT_START_COMMAND: &str = "/opt/aws/amazon-cloudwatch-agent/bin/amazon-cloudwatch-agent-ctl -a fetch-config -m ec2 -s -c file:/opt/aws/amazon-cloudwatch-agent/etc/amazon-cloudwatch-agent.json";

/// Logical ids of everything the stack declares, for callers that need
/// to look resources back up.
#[derive(Debug, Clone)]
pub struct WorkshopIds {
    pub sink: LogicalId,
    pub trail_group: LogicalId,
    pub trail: LogicalId,
    pub signin_filter: LogicalId,
    pub topic: LogicalId,
    pub alarm: LogicalId,
    pub network: LogicalId,
    pub flow_group: LogicalId,
    pub flow_all: LogicalId,
    pub flow_reject: LogicalId,
    pub role: LogicalId,
    pub security_group: LogicalId,
    pub instance: LogicalId,
    pub web_group: LogicalId,
    pub web_filter: LogicalId,
    pub diagnostics: LogicalId,
    pub pipeline: LogicalId,
    pub destination: LogicalId,
}

#[derive(Debug)]
pub struct WorkshopStack {
    pub topology: Topology,
    pub ids: WorkshopIds,
}

/// Declares the whole stack. Fails fast on a missing notification email
/// and on any asset problem already surfaced by the caller.
pub fn build(ctx: &Context, assets: &WorkshopAssets) -> Result<WorkshopStack> {
    let email = ctx.require_notification_email()?.to_string();
    let mut t = Topology::new(STACK_NAME);

    let sink = t.declare("LogBucket", Resource::Sink(SinkSpec::new()))?;

    let trail_group = t.declare(
        "TrailLog",
        Resource::LogGroup(LogGroupSpec::named("TrailLog").with_retention(Retention::ThreeMonths)),
    )?;
    let trail = t.declare(
        "CloudTrail",
        Resource::Trail(TrailSpec::new("CloudTrail", trail_group.clone(), sink.clone())),
    )?;

    let signin_metric = MetricId::new(SIGNIN_METRIC_NAMESPACE, SIGNIN_METRIC_NAME);
    let signin_filter = t.declare(
        "SignInFailMetricFilter",
        Resource::MetricFilter(MetricFilterSpec::new(
            "SignInFailMetricFilter",
            trail_group.clone(),
            FilterPattern::all(vec![
                FieldEquals::new("$.eventName", "ConsoleLogin"),
                FieldEquals::new("$.errorMessage", "Failed authentication"),
            ])?,
            signin_metric.clone(),
            MetricValue::Constant(1.0),
        )),
    )?;

    let topic = t.declare(
        "TrailTopic",
        Resource::Topic(TopicSpec::new("TrailTopic").subscribe_email(email)),
    )?;
    let alarm = t.declare(
        "TrailAlarm",
        Resource::Alarm(
            AlarmSpec::new("ConsoleSignInFailures", signin_metric, 3.0)
                .with_evaluation_periods(1)
                .with_action(topic.clone()),
        ),
    )?;

    let network = t.declare(
        "DemoVpc",
        Resource::Network(
            NetworkSpec::new("DemoVpc", "192.168.0.0/16".parse::<Cidr>()?)
                .with_subnet("webserver", 24, true),
        ),
    )?;

    let flow_group = t.declare(
        "VpcFlowLogGroup",
        Resource::LogGroup(
            LogGroupSpec::named("VpcFlowLogGroup").with_retention(Retention::ThreeMonths),
        ),
    )?;
    let flow_all = t.declare(
        "FlowLogToLogGroup",
        Resource::FlowCapture(FlowCaptureSpec {
            name: "FlowLogToLogGroup".into(),
            network: network.clone(),
            traffic: TrafficFilter::All,
            destination: FlowDestination::LogGroup(flow_group.clone()),
        }),
    )?;
    let flow_reject = t.declare(
        "FlowLogToS3",
        Resource::FlowCapture(FlowCaptureSpec {
            name: "FlowLogToS3".into(),
            network: network.clone(),
            traffic: TrafficFilter::RejectOnly,
            destination: FlowDestination::Sink {
                sink: sink.clone(),
                key_prefix: "flow/".into(),
            },
        }),
    )?;

    let role = t.declare(
        "WebServerRole",
        Resource::Role(
            RoleSpec::for_service("WebServerRole", "ec2.amazonaws.com")
                .with_managed_policy("CloudWatchAgentServerPolicy"),
        ),
    )?;

    let security_group = t.declare(
        "WebServer",
        Resource::SecurityGroup(
            SecurityGroupSpec::new("WebServer", "Webserver Security Group", network.clone())
                .allow_ingress(Peer::AnyIpv4, 80, "HTTP from anywhere")
                .allow_ingress(Peer::AnyIpv4, 22, "SSH from anywhere"),
        ),
    )?;

    let instance = t.declare(
        "WebServerInstance",
        Resource::Instance(InstanceSpec {
            name: "WebServer".into(),
            instance_type: "t2.micro".into(),
            image: MachineImage::AmazonLinux2,
            network: network.clone(),
            subnet: "webserver".into(),
            role: role.clone(),
            security_groups: vec![security_group.clone()],
            init: agent_init(assets)?,
            user_data: Some(assets.bootstrap_script.contents.clone()),
        }),
    )?;

    let web_group = t.declare(
        "WebServerLogGroup",
        Resource::LogGroup(
            LogGroupSpec::named("WebServerLogGroup").with_retention(Retention::OneMonth),
        ),
    )?;
    let web_filter = t.declare(
        "WebServerMetricFilter",
        Resource::MetricFilter(
            MetricFilterSpec::new(
                "WebServerMetricFilter",
                web_group.clone(),
                FilterPattern::positional(ACCESS_LOG_TEMPLATE)?,
                MetricId::new(BYTES_METRIC_NAMESPACE, BYTES_METRIC_NAME),
                MetricValue::Field("size".into()),
            )
            .with_default(0.0),
        ),
    )?;

    let diagnostics = t.declare(
        "ForwarderDiagnostics",
        Resource::LogGroup(
            LogGroupSpec::named("ForwarderDiagnostics").with_retention(Retention::OneMonth),
        ),
    )?;
    let pipeline = t.declare(
        "Forwarder",
        Resource::Pipeline(
            PipelineSpec::new("Forwarder", sink.clone(), "forwarded/", diagnostics.clone())
                .with_source_group(web_group.clone()),
        ),
    )?;
    let destination = t.declare(
        "CentralDestination",
        Resource::Destination(DestinationSpec::new(
            "CentralDestination",
            pipeline.clone(),
            assets.destination_policy.clone(),
        )),
    )?;

    Ok(WorkshopStack {
        topology: t,
        ids: WorkshopIds {
            sink,
            trail_group,
            trail,
            signin_filter,
            topic,
            alarm,
            network,
            flow_group,
            flow_all,
            flow_reject,
            role,
            security_group,
            instance,
            web_group,
            web_filter,
            diagnostics,
            pipeline,
            destination,
        },
    })
}

fn agent_init(assets: &WorkshopAssets) -> Result<InitSpec> {
    let mut configs = BTreeMap::new();
    configs.insert(
        "installCwAgent".to_string(),
        InitConfig::new(vec![InitStep::Package {
            url: AGENT_RPM_URL.into(),
        }]),
    );
    configs.insert(
        "configCwAgent".to_string(),
        InitConfig::new(vec![InitStep::File {
            target: AGENT_CONFIG_TARGET.into(),
            contents: assets.agent_config.contents.clone(),
        }]),
    );
    configs.insert(
        "startAgent".to_string(),
        InitConfig::new(vec![InitStep::Command {
            exec: AGENT_START_COMMAND.into(),
        }]),
    );
    let mut config_sets = BTreeMap::new();
    config_sets.insert(
        DEFAULT_CONFIG_SET.to_string(),
        vec![
            "installCwAgent".to_string(),
            "configCwAgent".to_string(),
            "startAgent".to_string(),
        ],
    );
    InitSpec::from_config_sets(config_sets, configs)
}

impl WorkshopStack {
    /// Resolve, collect outputs and render the manifest in one go.
    pub fn synthesize(&self, ctx: &Context) -> Result<Manifest> {
        let resolved = self.topology.resolve()?;
        let mut outputs = BTreeMap::new();
        let bucket = resolved
            .physical_name(&self.ids.sink)
            .context("sink has no physical name")?;
        outputs.insert("LogBucketName".to_string(), bucket.to_string());
        let destination = resolved
            .physical_name(&self.ids.destination)
            .context("destination has no physical name")?;
        outputs.insert(
            "CentralDestinationEndpoint".to_string(),
            naming::destination_endpoint(&ctx.region, &ctx.account_id, destination),
        );
        synth::render(&self.topology, &resolved, &ctx.region, outputs)
    }
}

/// Live counterparts of the declared stack, wired the way the topology
/// binds them. Needs a runtime because the pipeline runs as a task.
pub struct WorkshopModel {
    pub metrics: Arc<MetricStore>,
    pub sink: ObjectStore,
    pub trail_group: LogGroupModel,
    pub flow_group: LogGroupModel,
    pub web_group: LogGroupModel,
    pub diagnostics_group: LogGroupModel,
    pub trail: TrailModel,
    pub topic: TopicModel,
    pub alarm: AlarmModel,
    pub flow_all: FlowCaptureModel,
    pub flow_reject: FlowCaptureModel,
    pub pipeline: PipelineSender,
    pub pipeline_task: JoinHandle<()>,
    pub destination: DestinationModel,
}

impl WorkshopModel {
    pub fn provision(stack: &WorkshopStack, ctx: &Context) -> Result<Self> {
        let t = &stack.topology;
        let ids = &stack.ids;
        let metrics = Arc::new(MetricStore::new());
        let sink = ObjectStore::new();

        let trail_group = group_model(t, &ids.trail_group, &metrics)?;
        let filter = spec(t, &ids.signin_filter, Resource::as_metric_filter)?;
        trail_group.attach_filter(MetricFilterModel::new(filter.clone()));

        let web_group = group_model(t, &ids.web_group, &metrics)?;
        let web_filter = spec(t, &ids.web_filter, Resource::as_metric_filter)?;
        web_group.attach_filter(MetricFilterModel::new(web_filter.clone()));

        let flow_group = group_model(t, &ids.flow_group, &metrics)?;
        let diagnostics_group = group_model(t, &ids.diagnostics, &metrics)?;

        let trail_spec = spec(t, &ids.trail, Resource::as_trail)?;
        let trail = TrailModel::new(trail_spec, trail_group.clone(), sink.clone());

        let topic_spec = spec(t, &ids.topic, Resource::as_topic)?;
        let topic = TopicModel::new(topic_spec.clone());
        let alarm_spec = spec(t, &ids.alarm, Resource::as_alarm)?;
        let alarm = AlarmModel::new(alarm_spec.clone(), vec![topic.clone()]);

        let flow_all_spec = spec(t, &ids.flow_all, Resource::as_flow_capture)?;
        let flow_all = FlowCaptureModel::new(
            flow_all_spec,
            FlowTarget::Group(flow_group.clone()),
            &ctx.account_id,
        );
        let flow_reject_spec = spec(t, &ids.flow_reject, Resource::as_flow_capture)?;
        let FlowDestination::Sink { key_prefix, .. } = &flow_reject_spec.destination else {
            anyhow::bail!("{} should deliver to the sink", ids.flow_reject);
        };
        let flow_reject = FlowCaptureModel::new(
            flow_reject_spec,
            FlowTarget::Sink {
                store: sink.clone(),
                key_prefix: key_prefix.clone(),
            },
            &ctx.account_id,
        );

        let pipeline_spec = spec(t, &ids.pipeline, Resource::as_pipeline)?;
        let (pipeline, pipeline_task) =
            DeliveryPipeline::new(pipeline_spec.clone(), sink.clone(), diagnostics_group.clone())
                .spawn();
        if pipeline_spec.source_group.as_ref() == Some(&ids.web_group) {
            pipeline.subscribe_group(&web_group);
        }

        let destination_spec = spec(t, &ids.destination, Resource::as_destination)?;
        let endpoint =
            naming::destination_endpoint(&ctx.region, &ctx.account_id, &destination_spec.name);
        let destination = DestinationModel::new(destination_spec, &endpoint, pipeline.clone());

        Ok(WorkshopModel {
            metrics,
            sink,
            trail_group,
            flow_group,
            web_group,
            diagnostics_group,
            trail,
            topic,
            alarm,
            flow_all,
            flow_reject,
            pipeline,
            pipeline_task,
            destination,
        })
    }
}

fn group_model(
    t: &Topology,
    id: &LogicalId,
    metrics: &Arc<MetricStore>,
) -> Result<LogGroupModel> {
    let group = spec(t, id, Resource::as_log_group)?;
    Ok(LogGroupModel::from_spec(id.as_str(), group, metrics.clone()))
}

fn spec<'a, T>(
    t: &'a Topology,
    id: &LogicalId,
    pick: fn(&'a Resource) -> Option<&'a T>,
) -> Result<&'a T> {
    t.get(id)
        .and_then(pick)
        .ok_or_else(|| anyhow::anyhow!("{id} is missing or has the wrong kind"))
}
