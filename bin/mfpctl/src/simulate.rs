//! ---
//! mfp_section: "06-control-cli"
//! mfp_subsection: "binary"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "In-process platform simulation command."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Connects the configured client and every other trusted application to a
//! simulated broker, publishes a burst of messages from the client, and reports
//! what each peer received.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use indexmap::IndexMap;
use mfp_client::{MessageClient, PublishOptions, TopicSubscription};
use mfp_common::{init_tracing, PlatformConfig};
use mfp_gateway::{GatewayConfig, GatewayMetricsExporter};
use mfp_testharness::PlatformHarness;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug, Args)]
pub struct SimulateCommand {
    /// Configuration file describing the client and the broker.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Number of messages the client publishes.
    #[arg(long, default_value_t = 10)]
    pub messages: u64,
    /// Topic prefix; messages go to `<topic>/<sequence>`.
    #[arg(long, default_value = "mfpctl/ping")]
    pub topic: String,
    /// How long each peer waits for the next message, in milliseconds.
    #[arg(long = "wait-ms", default_value_t = 500)]
    pub wait_ms: u64,
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
    /// Append the gateway metrics in the prometheus text format.
    #[arg(long)]
    pub metrics: bool,
}

/// Outcome of one simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub client: String,
    pub broker_origin: String,
    pub published: u64,
    pub subscribers: u64,
    pub deliveries: IndexMap<String, u64>,
    pub posted: u64,
    pub received: u64,
    pub filtered: u64,
    #[serde(skip)]
    pub metrics: Option<String>,
}

pub fn run(command: SimulateCommand) -> Result<()> {
    let loaded = crate::load_config(command.config.as_deref())?;
    init_tracing("mfpctl", &loaded.config.logging)?;
    let runtime = Runtime::new()?;
    let report = runtime.block_on(simulate(&loaded.config, &command))?;
    if command.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    if let Some(metrics) = &report.metrics {
        print!("{}", metrics);
    }
    Ok(())
}

struct Peer {
    name: String,
    client: MessageClient,
    subscription: TopicSubscription,
}

pub async fn simulate(config: &PlatformConfig, command: &SimulateCommand) -> Result<SimulationReport> {
    let platform = PlatformHarness::start(&config.broker);
    let registry = Registry::new();
    let exporter = Arc::new(GatewayMetricsExporter::register(&registry)?);
    let gateway_config = GatewayConfig::from(&config.client);
    let wait = Duration::from_millis(command.wait_ms);

    let name = config.client.symbolic_name.clone();
    let client = MessageClient::with_metrics(
        name.clone(),
        gateway_config,
        platform.embed(&config.client.origin),
        exporter.clone(),
    );
    let info = client
        .when_connected()
        .await
        .with_context(|| format!("client '{}' did not connect", name))?;

    let pattern = format!("{}/:sequence", command.topic);
    let mut peers = Vec::new();
    for (peer_name, application) in &config.broker.applications {
        if *peer_name == name {
            continue;
        }
        let peer = MessageClient::with_metrics(
            peer_name.clone(),
            gateway_config,
            platform.embed(&application.origin),
            exporter.clone(),
        );
        peer.when_connected()
            .await
            .with_context(|| format!("peer '{}' did not connect", peer_name))?;
        let subscription = peer.observe(&pattern).await?;
        peers.push(Peer {
            name: peer_name.clone(),
            client: peer,
            subscription,
        });
    }

    let first_topic = format!("{}/0", command.topic);
    let subscribers = wait_for_subscribers(&client, &first_topic, peers.len() as u64, wait).await?;

    for sequence in 0..command.messages {
        client
            .publish(
                &format!("{}/{}", command.topic, sequence),
                Some(json!({ "sequence": sequence })),
                PublishOptions::default(),
            )
            .await?;
    }

    let mut deliveries = IndexMap::new();
    for mut peer in peers {
        let mut received = 0;
        while received < command.messages {
            match timeout(wait, peer.subscription.recv()).await {
                Ok(Some(_)) => received += 1,
                Ok(None) | Err(_) => break,
            }
        }
        deliveries.insert(peer.name, received);
        peer.client.destroy();
    }

    let counters = client.gateway().metrics();
    client.destroy();

    let metrics = if command.metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        Some(String::from_utf8(buffer)?)
    } else {
        None
    };

    Ok(SimulationReport {
        client: name,
        broker_origin: info.broker_origin,
        published: command.messages,
        subscribers,
        deliveries,
        posted: counters.posted,
        received: counters.received,
        filtered: counters.filtered,
        metrics,
    })
}

/// Poll the broker until `expected` subscriptions match `topic`.
async fn wait_for_subscribers(
    client: &MessageClient,
    topic: &str,
    expected: u64,
    wait: Duration,
) -> Result<u64> {
    let deadline = Instant::now() + wait;
    loop {
        let count = client.subscriber_count(topic).await?;
        if count >= expected {
            return Ok(count);
        }
        if Instant::now() >= deadline {
            return Err(anyhow!(
                "only {} of {} peers subscribed to {} in time",
                count,
                expected,
                topic
            ));
        }
        sleep(Duration::from_millis(10)).await;
    }
}

fn render(report: &SimulationReport) -> String {
    let mut out = format!(
        "client {} connected to broker {}\npublished {} messages to {} subscribers\n",
        report.client, report.broker_origin, report.published, report.subscribers
    );
    for (peer, received) in &report.deliveries {
        out.push_str(&format!("  {}: {}/{}\n", peer, received, report.published));
    }
    out.push_str(&format!(
        "gateway: {} posted, {} received, {} filtered\n",
        report.posted, report.received, report.filtered
    ));
    out
}
