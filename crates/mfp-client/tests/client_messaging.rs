//! ---
//! mfp_section: "05-client-api"
//! mfp_subsection: "tests"
//! mfp_type: "test"
//! mfp_scope: "code"
//! mfp_description: "Client operations against the simulated broker."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::time::Duration;

use mfp_client::{ClientError, MessageClient, PublishOptions, RequestOptions};
use mfp_common::PlatformConfig;
use mfp_gateway::{GatewayConfig, GatewayError};
use mfp_messaging::{EnvelopeError, IntentMessage, TopicMessage};
use mfp_testharness::PlatformHarness;
use serde_json::json;
use tokio::time::{sleep, timeout};

const PLATFORM: &str = r#"
[broker]
origin = "https://host.example"

[broker.applications.app-1]
origin = "https://app-1.example"

[broker.applications.app-2]
origin = "https://app-2.example"
"#;

fn platform() -> PlatformHarness {
    let config: PlatformConfig = PLATFORM.parse().expect("config");
    PlatformHarness::start(&config.broker)
}

fn connect(platform: &PlatformHarness, app: &str, origin: &str) -> MessageClient {
    MessageClient::connect(app, GatewayConfig::default(), platform.embed(origin))
}

/// Let the gateway frames and the broker drain their inboxes.
async fn settle() {
    sleep(Duration::from_millis(5)).await;
}

#[tokio::test(start_paused = true)]
async fn wildcard_subscription_receives_publications_with_params() {
    let platform = platform();
    let subscriber = connect(&platform, "app-1", "https://app-1.example");
    let publisher = connect(&platform, "app-2", "https://app-2.example");

    let mut weather = subscriber.observe("weather/:city").await.expect("observe");
    settle().await;
    publisher
        .publish("weather/zurich", Some(json!({"celsius": 21})), PublishOptions::default())
        .await
        .expect("publish");

    let message = weather.recv().await.expect("delivered");
    assert_eq!(message.topic, "weather/zurich");
    assert_eq!(message.params.get("city").map(String::as_str), Some("zurich"));
    assert_eq!(message.payload, Some(json!({"celsius": 21})));
}

#[tokio::test(start_paused = true)]
async fn overlapping_subscriptions_each_see_a_message_once() {
    let platform = platform();
    let client = connect(&platform, "app-1", "https://app-1.example");

    let mut exact = client.observe("orders/42").await.expect("observe");
    let mut pattern = client.observe("orders/:id").await.expect("observe");
    settle().await;
    client
        .publish("orders/42", Some(json!("created")), PublishOptions::default())
        .await
        .expect("publish");

    assert_eq!(exact.recv().await.expect("exact").payload, Some(json!("created")));
    assert_eq!(pattern.recv().await.expect("pattern").payload, Some(json!("created")));
    assert!(timeout(Duration::from_millis(50), exact.recv()).await.is_err());
    assert!(timeout(Duration::from_millis(50), pattern.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn retained_message_is_replayed_until_cleared() {
    let platform = platform();
    let client = connect(&platform, "app-1", "https://app-1.example");

    client
        .publish("status", Some(json!("up")), PublishOptions::default().retained())
        .await
        .expect("publish");
    settle().await;

    let mut late = client.observe("status").await.expect("observe");
    assert_eq!(late.recv().await.expect("replayed").payload, Some(json!("up")));

    client
        .publish("status", None, PublishOptions::default().retained())
        .await
        .expect("clear");
    settle().await;
    assert!(platform.broker().retained("status").is_none());

    let mut later = client.observe("status").await.expect("observe");
    assert!(timeout(Duration::from_millis(50), later.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn request_resolves_with_the_first_reply() {
    let platform = platform();
    let requester = connect(&platform, "app-1", "https://app-1.example");
    let responder = connect(&platform, "app-2", "https://app-2.example");

    let mut greetings = responder.observe("greeting").await.expect("observe");
    settle().await;
    let replier = tokio::spawn(async move {
        let request = greetings.recv().await.expect("request");
        let reply_to = request.reply_to.expect("reply topic");
        let name = request.payload.and_then(|p| p.as_str().map(str::to_owned)).unwrap_or_default();
        for reply in [format!("hello {}", name), "too late".to_owned()] {
            responder
                .publish(&reply_to, Some(json!(reply)), PublishOptions::default())
                .await
                .expect("reply");
        }
        responder
    });

    let reply = requester
        .request("greeting", Some(json!("ada")), RequestOptions::default())
        .await
        .expect("reply");
    assert_eq!(reply.payload, Some(json!("hello ada")));
    let _responder = replier.await.expect("replier");
}

#[tokio::test(start_paused = true)]
async fn request_without_replier_times_out() {
    let platform = platform();
    let client = connect(&platform, "app-1", "https://app-1.example");
    client.when_connected().await.expect("connected");

    let err = client
        .request(
            "nobody/home",
            None,
            RequestOptions::default().with_timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap_err();
    match err {
        ClientError::Timeout { topic, timeout } => {
            assert_eq!(topic, "nobody/home");
            assert_eq!(timeout, Duration::from_millis(300));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn subscriber_count_follows_subscriptions() {
    let platform = platform();
    let observer = connect(&platform, "app-1", "https://app-1.example");
    let counter = connect(&platform, "app-2", "https://app-2.example");

    assert_eq!(counter.subscriber_count("alerts/fire").await.expect("count"), 0);
    let first = observer.observe("alerts/:kind").await.expect("observe");
    let _second = observer.observe("alerts/fire").await.expect("observe");
    settle().await;
    assert_eq!(counter.subscriber_count("alerts/fire").await.expect("count"), 2);

    first.unsubscribe().await.expect("unsubscribe");
    settle().await;
    assert_eq!(counter.subscriber_count("alerts/fire").await.expect("count"), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_subscription_is_cancelled_at_the_broker() {
    let platform = platform();
    let client = connect(&platform, "app-1", "https://app-1.example");
    let subscription = client.observe("news").await.expect("observe");
    settle().await;
    assert_eq!(platform.broker().subscriber_count("news"), 1);

    drop(subscription);
    settle().await;
    assert_eq!(platform.broker().subscriber_count("news"), 0);
}

#[tokio::test(start_paused = true)]
async fn intents_reach_the_other_clients_with_the_sender() {
    let platform = platform();
    let issuer = connect(&platform, "app-1", "https://app-1.example");
    let handler = connect(&platform, "app-2", "https://app-2.example");
    let mut intents = handler.handle_intents();
    let mut own = issuer.handle_intents();
    handler.when_connected().await.expect("connected");

    issuer
        .issue_intent(
            IntentMessage::new("view").with_qualifier("entity", "person"),
            Some(json!({"id": 7})),
        )
        .await
        .expect("issued");

    let received = intents.recv().await.expect("intent");
    assert_eq!(received.intent.intent_type, "view");
    assert_eq!(received.intent.payload, Some(json!({"id": 7})));
    let issuer_id = platform
        .broker()
        .clients()
        .into_iter()
        .find(|client| client.app == "app-1")
        .map(|client| client.client_id);
    assert_eq!(received.sender_id, issuer_id);
    assert!(timeout(Duration::from_millis(50), own.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn destroy_disconnects_from_the_broker() {
    let platform = platform();
    let client = connect(&platform, "app-1", "https://app-1.example");
    let mut subscription = client.observe("news").await.expect("observe");
    settle().await;
    assert_eq!(platform.broker().clients().len(), 1);

    client.destroy();
    settle().await;
    assert!(platform.broker().clients().is_empty());
    assert_eq!(platform.broker().subscriber_count("news"), 0);
    assert!(subscription.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn unknown_application_is_refused() {
    let platform = platform();
    let client = connect(&platform, "app-9", "https://app-9.example");
    match client.when_connected().await {
        Err(ClientError::Gateway(GatewayError::DiscoveryRefused(reason))) => {
            assert!(reason.contains("Unknown client"), "{}", reason)
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn application_on_the_wrong_origin_is_blocked() {
    let platform = platform();
    let client = connect(&platform, "app-1", "https://app-2.example");
    match client.when_connected().await {
        Err(ClientError::Gateway(GatewayError::DiscoveryRefused(reason))) => {
            assert!(reason.contains("Wrong origin"), "{}", reason)
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn wildcard_topics_cannot_be_published() {
    let platform = platform();
    let client = connect(&platform, "app-1", "https://app-1.example");
    let err = client
        .publish("weather/:city", None, PublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Envelope(EnvelopeError::InvalidTopic { .. })));
}

#[tokio::test(start_paused = true)]
async fn headers_travel_with_the_message() {
    let platform = platform();
    let client = connect(&platform, "app-1", "https://app-1.example");
    let mut audit = client.observe("audit").await.expect("observe");
    settle().await;
    client
        .publish(
            "audit",
            Some(json!(1)),
            PublishOptions::default().with_header("trace", json!("t-9")),
        )
        .await
        .expect("publish");
    let message: TopicMessage = audit.recv().await.expect("delivered");
    assert_eq!(message.headers.get("trace"), Some(&json!("t-9")));
    assert_eq!(
        message.headers.get(TopicMessage::SUBSCRIBER_ID_HEADER),
        Some(&json!(audit.subscriber_id()))
    );
}
