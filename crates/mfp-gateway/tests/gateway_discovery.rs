//! ---
//! mfp_section: "04-broker-gateway"
//! mfp_subsection: "tests"
//! mfp_type: "test"
//! mfp_scope: "code"
//! mfp_description: "Discovery, filtering, and teardown behaviour of the broker gateway."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use mfp_common::UnreachableBrokerPolicy;
use mfp_gateway::{BrokerGateway, GatewayConfig, GatewayError, GatewayMetricsExporter};
use mfp_logging::capture::LogCapture;
use mfp_messaging::{
    BootstrapParams, MessageEnvelope, MessagingTransport, PlatformTopics, TopicMessage,
};
use mfp_testharness::{HarnessFrameHost, ScriptedGateway, ScriptedHost};
use mfp_transport::{InMemoryWindow, MessageEvent, Window, ANY_ORIGIN};
use prometheus::Registry;
use serde_json::json;
use tokio::time::{sleep, timeout, Instant};
use tracing::Level;

const APP_ORIGIN: &str = "https://app-1.example";
const BROKER: &str = "https://broker.example";

fn config(discovery_timeout_ms: u64) -> GatewayConfig {
    GatewayConfig::default().with_discovery_timeout(Duration::from_millis(discovery_timeout_ms))
}

fn scripted(script: ScriptedGateway) -> Arc<ScriptedHost> {
    HarnessFrameHost::new(InMemoryWindow::top(APP_ORIGIN), script)
}

fn broker_event(origin: &str, transport: MessagingTransport, topic: &str) -> MessageEvent {
    let envelope = MessageEnvelope::topic(transport, TopicMessage::new(topic).with_payload(json!(topic)));
    MessageEvent::new(origin, envelope.to_value().expect("encode"))
}

#[tokio::test(start_paused = true)]
async fn discovers_broker_and_filters_inbound_traffic() {
    let script = ScriptedGateway::connected_to(BROKER)
        .loading_after(Duration::from_millis(10))
        .replying_after(Duration::from_millis(20));
    let host = scripted(script);
    let started = Instant::now();
    let gateway = BrokerGateway::new("app-1", config(1000), host.clone());
    let mut stream = gateway.messages();

    let info = gateway.gateway_info().await.expect("discovered");
    assert_eq!(info.broker_origin, BROKER);
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(gateway.state().name(), "connected");

    // one hidden frame loading the bootstrap document
    let frames = host.mounted_frames();
    assert_eq!(frames.len(), 1);
    assert!(host.frame_style(frames[0]).expect("style").is_hidden());
    let src = host.frame_src(frames[0]).expect("src");
    let document = host.document(&src).expect("document");
    assert!(document.contains("Message Broker Gateway for 'app-1'"));
    let params = BootstrapParams::parse(&document).expect("params");
    assert_eq!(params.client_origin, APP_ORIGIN);
    assert_eq!(params.discovery_timeout(), Duration::from_millis(1000));

    // exactly one gateway info request, addressed to the frame's origin
    let requests = host.runtime().requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].transport, MessagingTransport::ClientToGateway);
    let request = requests[0].topic_message().expect("topic");
    assert_eq!(request.topic, PlatformTopics::REQUEST_GATEWAY_INFO);
    assert!(request.reply_to.is_some());
    let frame_window = host.frame_window(frames[0]).expect("frame window");
    let posted = frame_window.posted();
    assert_eq!(posted[0].target_origin, frame_window.origin());

    // only broker-origin, broker-to-client envelopes come through
    frame_window
        .post_message(broker_event("https://evil.example", MessagingTransport::BrokerToClient, "forged"), ANY_ORIGIN)
        .expect("post");
    frame_window
        .post_message(broker_event(BROKER, MessagingTransport::BrokerToGateway, "wrong-leg"), ANY_ORIGIN)
        .expect("post");
    frame_window
        .post_message(MessageEvent::new(BROKER, json!({"transport": "garbage"})), ANY_ORIGIN)
        .expect("post");
    frame_window
        .post_message(broker_event(BROKER, MessagingTransport::BrokerToClient, "news"), ANY_ORIGIN)
        .expect("post");

    let delivered = stream.recv().await.expect("delivered");
    assert_eq!(delivered.topic_message().map(|m| m.topic.as_str()), Some("news"));
    assert!(timeout(Duration::from_millis(50), stream.recv()).await.is_err());
    assert_eq!(gateway.metrics().received, 1);
    assert_eq!(gateway.metrics().filtered, 3);
}

#[tokio::test(start_paused = true)]
async fn posted_envelopes_arrive_unchanged_at_the_gateway_window() {
    let host = scripted(ScriptedGateway::connected_to(BROKER));
    let gateway = BrokerGateway::new("app-1", config(1000), host.clone());

    let envelope = MessageEnvelope::topic(
        MessagingTransport::ClientToBroker,
        TopicMessage::new("orders/42")
            .with_payload(json!({"qty": 3, "tags": ["a", "b"]}))
            .with_header("trace", json!("t-1")),
    );
    gateway.post_message(envelope.clone()).await.expect("posted");

    let frame_window = host
        .frame_window(host.mounted_frames()[0])
        .expect("frame window");
    let last = frame_window.posted().pop().expect("posted event");
    assert!(last.dispatched);
    assert_eq!(last.target_origin, frame_window.origin());
    assert_eq!(last.event.origin, APP_ORIGIN);
    assert_eq!(MessageEnvelope::from_value(last.event.data).expect("decode"), envelope);
    assert_eq!(gateway.metrics().posted, 1);
}

#[tokio::test(start_paused = true)]
async fn discovery_times_out_no_earlier_than_configured() {
    let host = scripted(ScriptedGateway::silent());
    let started = Instant::now();
    let gateway = BrokerGateway::new("app-1", config(1000), host);

    let err = gateway.gateway_info().await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_eq!(
        err,
        GatewayError::DiscoveryTimeout {
            timeout: Duration::from_millis(1000)
        }
    );
    assert_eq!(
        err.to_string(),
        "[BrokerDiscoverTimeoutError] Message broker not discovered within the 1000ms timeout. Messages cannot be published or received."
    );

    // publishing never resolves by default
    let envelope = MessageEnvelope::topic(MessagingTransport::ClientToBroker, TopicMessage::new("a"));
    assert!(timeout(Duration::from_secs(5), gateway.post_message(envelope)).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn timer_starts_once_the_frame_loaded() {
    let host = scripted(ScriptedGateway::silent().never_loading());
    let gateway = BrokerGateway::new("app-1", config(100), host);
    assert!(timeout(Duration::from_secs(1), gateway.gateway_info()).await.is_err());
    assert_eq!(gateway.state().name(), "mounting");
}

#[tokio::test(start_paused = true)]
async fn gateway_refusal_surfaces_the_reported_error() {
    let host = scripted(ScriptedGateway::failing_with("X"));
    let config = config(1000).with_unreachable_broker(UnreachableBrokerPolicy::Reject);
    let gateway = BrokerGateway::new("app-1", config, host);

    let err = gateway.gateway_info().await.unwrap_err();
    assert_eq!(err, GatewayError::DiscoveryRefused("X".to_owned()));
    assert_eq!(err.to_string(), "X");

    let envelope = MessageEnvelope::topic(MessagingTransport::ClientToBroker, TopicMessage::new("a"));
    match gateway.post_message(envelope).await {
        Err(GatewayError::NotConnected(reason)) => assert_eq!(reason, "X"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn replies_from_another_origin_are_not_trusted() {
    let host = scripted(ScriptedGateway::connected_to("https://evil.example").replying_from("https://evil.example"));
    let gateway = BrokerGateway::new("app-1", config(200), host);
    assert!(matches!(
        gateway.gateway_info().await,
        Err(GatewayError::DiscoveryTimeout { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn destroy_silences_the_gateway() {
    let host = scripted(ScriptedGateway::connected_to(BROKER));
    let gateway = BrokerGateway::new("app-1", config(1000), host.clone());
    let mut stream = gateway.messages();
    gateway.gateway_info().await.expect("discovered");
    let frame = host.mounted_frames()[0];
    let frame_window = host.frame_window(frame).expect("frame window");

    gateway.destroy();
    sleep(Duration::from_millis(1)).await;

    assert_eq!(host.unmounted_frames(), vec![frame]);
    assert!(host.live_object_urls().is_empty());
    assert_eq!(host.revoked_object_urls().len(), 1);
    assert!(frame_window.is_closed());
    assert!(stream.recv().await.is_none());
    assert!(gateway.messages().recv().await.is_none());
    assert_eq!(gateway.state().name(), "destroyed");

    let envelope = MessageEnvelope::topic(MessagingTransport::ClientToBroker, TopicMessage::new("a"));
    assert!(timeout(Duration::from_secs(5), gateway.post_message(envelope)).await.is_err());
    assert!(timeout(Duration::from_secs(5), gateway.gateway_info()).await.is_err());

    // a second destroy is a no-op
    gateway.destroy();
    drop(gateway);
    sleep(Duration::from_millis(1)).await;
    assert_eq!(host.unmounted_frames().len(), 1);
    assert_eq!(host.revoked_object_urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn destroy_during_discovery_leaves_waiters_pending() {
    let host = scripted(ScriptedGateway::silent());
    let gateway = BrokerGateway::new("app-1", config(1000), host.clone());
    sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.state().name(), "discovering");

    gateway.destroy();
    assert!(timeout(Duration::from_secs(5), gateway.gateway_info()).await.is_err());
    assert_eq!(host.unmounted_frames().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exporter_counts_gateway_traffic() {
    let registry = Registry::new();
    let exporter = Arc::new(GatewayMetricsExporter::register(&registry).expect("register"));
    let host = scripted(ScriptedGateway::connected_to(BROKER));
    let gateway = BrokerGateway::with_metrics("app-1", config(1000), host, exporter);

    for topic in ["a", "b"] {
        let envelope = MessageEnvelope::topic(MessagingTransport::ClientToBroker, TopicMessage::new(topic));
        gateway.post_message(envelope).await.expect("posted");
    }

    let families = registry.gather();
    let posted = families
        .iter()
        .find(|family| family.get_name() == "gateway_envelopes_posted_total")
        .expect("posted family");
    assert_eq!(posted.get_metric()[0].get_counter().get_value(), 2.0);
    let discovery = families
        .iter()
        .find(|family| family.get_name() == "gateway_discovery_seconds")
        .expect("discovery family");
    assert_eq!(discovery.get_metric()[0].get_histogram().get_sample_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn delivers_envelopes_tagged_with_arrow_transports() {
    let host = scripted(ScriptedGateway::connected_to(BROKER));
    let gateway = BrokerGateway::new("app-1", config(1000), host.clone());
    let mut stream = gateway.messages();
    gateway.gateway_info().await.expect("discovered");

    let frame_window = host.frame_window(host.mounted_frames()[0]).expect("frame window");
    let envelope = json!({
        "messageId": "m-1",
        "transport": "broker→client",
        "channel": "topic-publish",
        "message": {"topic": "news"}
    });
    frame_window
        .post_message(MessageEvent::new(BROKER, envelope), ANY_ORIGIN)
        .expect("post");

    let delivered = timeout(Duration::from_millis(100), stream.recv())
        .await
        .expect("delivered in time")
        .expect("stream open");
    assert_eq!(delivered.message_id, "m-1");
    assert_eq!(delivered.transport, MessagingTransport::BrokerToClient);
    assert_eq!(delivered.topic_message().expect("topic").topic, "news");
}

#[tokio::test(start_paused = true)]
async fn discovery_failure_is_logged_once_at_error_level() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let host = scripted(ScriptedGateway::silent());
    let gateway = BrokerGateway::new("app-1", config(200), host);
    let err = gateway.gateway_info().await.expect_err("timed out");
    assert!(matches!(err, GatewayError::DiscoveryTimeout { .. }));

    let errors = capture.at_level(Level::ERROR);
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert_eq!(errors[0].field("event"), Some("gateway.discovery"));
    assert_eq!(errors[0].field("app"), Some("app-1"));
}
