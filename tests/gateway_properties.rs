//! ---
//! mfp_section: "15-testing-qa-runbook"
//! mfp_subsection: "integration-tests"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Timing and filtering guarantees of the broker gateway."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use mfp_common::UnreachableBrokerPolicy;
use mfp_gateway::{BrokerGateway, GatewayConfig, GatewayError};
use mfp_messaging::{MessageEnvelope, MessagingTransport, TopicMessage};
use mfp_testharness::{HarnessFrameHost, ScriptedGateway, ScriptedHost};
use mfp_transport::{InMemoryWindow, MessageEvent, Window, ANY_ORIGIN};
use serde_json::json;
use tokio::time::{sleep, timeout, Instant};

const BROKER: &str = "https://broker.example";

fn host(script: ScriptedGateway) -> Arc<ScriptedHost> {
    HarnessFrameHost::new(InMemoryWindow::top("https://app-1.example"), script)
}

fn gateway_config() -> GatewayConfig {
    GatewayConfig::default().with_discovery_timeout(Duration::from_millis(1000))
}

fn broker_envelope(topic: &str) -> MessageEnvelope {
    MessageEnvelope::topic(
        MessagingTransport::BrokerToClient,
        TopicMessage::new(topic).with_payload(json!(topic)),
    )
}

#[tokio::test(start_paused = true)]
async fn app_1_discovers_the_broker_within_thirty_milliseconds() {
    let host = host(
        ScriptedGateway::connected_to(BROKER)
            .loading_after(Duration::from_millis(10))
            .replying_after(Duration::from_millis(20)),
    );
    let started = Instant::now();
    let gateway = BrokerGateway::new("app-1", gateway_config(), host.clone());
    let mut messages = gateway.messages();

    let info = gateway.gateway_info().await.unwrap();
    assert_eq!(info.broker_origin, BROKER);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(30), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(40), "{:?}", elapsed);

    let frame = host.frame_window(host.mounted_frames()[0]).unwrap();
    let evil = MessageEvent::new("https://evil.example", broker_envelope("evil").to_value().unwrap());
    frame.post_message(evil, ANY_ORIGIN).unwrap();
    let trusted = MessageEvent::new(BROKER, broker_envelope("trusted").to_value().unwrap());
    frame.post_message(trusted, ANY_ORIGIN).unwrap();

    let delivered = messages.recv().await.unwrap();
    assert_eq!(delivered.topic_message().unwrap().topic, "trusted");
    assert!(timeout(Duration::from_millis(100), messages.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn post_stays_pending_until_the_discovery_timeout() {
    let host = host(ScriptedGateway::silent());
    let config = gateway_config().with_unreachable_broker(UnreachableBrokerPolicy::Reject);
    let gateway = BrokerGateway::new("app-1", config, host);
    let started = Instant::now();

    let envelope = MessageEnvelope::topic(MessagingTransport::ClientToBroker, TopicMessage::new("early"));
    let outcome = gateway.post_message(envelope).await;
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert!(matches!(outcome, Err(GatewayError::NotConnected(_))));
    assert!(matches!(
        gateway.gateway_info().await,
        Err(GatewayError::DiscoveryTimeout { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn refusal_arrives_strictly_before_the_timeout() {
    let host = host(ScriptedGateway::failing_with("X").replying_after(Duration::from_millis(20)));
    let started = Instant::now();
    let gateway = BrokerGateway::new("app-1", gateway_config(), host);

    let err = gateway.gateway_info().await.unwrap_err();
    assert_eq!(err.to_string(), "X");
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn events_raced_against_destroy_are_not_emitted() {
    let host = host(ScriptedGateway::connected_to(BROKER));
    let gateway = BrokerGateway::new("app-1", gateway_config(), host.clone());
    let mut messages = gateway.messages();
    gateway.gateway_info().await.unwrap();
    let frame = host.frame_window(host.mounted_frames()[0]).unwrap();

    gateway.destroy();
    // the frame is only unmounted once the teardown task runs
    let late = MessageEvent::new(BROKER, broker_envelope("late").to_value().unwrap());
    frame.post_message(late, ANY_ORIGIN).unwrap();

    assert!(messages.recv().await.is_none());
    sleep(Duration::from_millis(10)).await;
    assert!(frame.is_closed());
    assert!(messages.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn round_trip_reaches_the_gateway_window_verbatim() {
    let host = host(ScriptedGateway::connected_to(BROKER));
    let gateway = BrokerGateway::new("app-1", gateway_config(), host.clone());
    let envelope = MessageEnvelope::topic(
        MessagingTransport::ClientToBroker,
        TopicMessage::new("orders/7").with_payload(json!([1, 2, 3])),
    );
    gateway.post_message(envelope.clone()).await.unwrap();

    let frame = host.frame_window(host.mounted_frames()[0]).unwrap();
    let sent = frame
        .posted()
        .into_iter()
        .find(|posted| posted.event.data["messageId"] == json!(envelope.message_id))
        .unwrap();
    assert_eq!(sent.target_origin, frame.origin());
    assert_eq!(MessageEnvelope::from_value(sent.event.data).unwrap(), envelope);
}

#[tokio::test(start_paused = true)]
async fn gateways_do_not_share_their_termination_signal() {
    let first_host = host(ScriptedGateway::connected_to(BROKER));
    let second_host = host(ScriptedGateway::connected_to(BROKER));
    let first = BrokerGateway::new("app-1", gateway_config(), first_host);
    let second = BrokerGateway::new("app-1", gateway_config(), second_host.clone());
    first.gateway_info().await.unwrap();
    second.gateway_info().await.unwrap();
    let mut second_messages = second.messages();

    first.destroy();
    sleep(Duration::from_millis(10)).await;
    assert!(!second.is_destroyed());

    let frame = second_host.frame_window(second_host.mounted_frames()[0]).unwrap();
    let event = MessageEvent::new(BROKER, broker_envelope("still-here").to_value().unwrap());
    frame.post_message(event, ANY_ORIGIN).unwrap();
    let delivered = second_messages.recv().await.unwrap();
    assert_eq!(delivered.topic_message().unwrap().topic, "still-here");
    let envelope = MessageEnvelope::topic(MessagingTransport::ClientToBroker, TopicMessage::new("a"));
    second.post_message(envelope).await.unwrap();
}
