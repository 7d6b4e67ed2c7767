//! ---
//! mfp_section: "11-simulation"
//! mfp_subsection: "05-simulated-broker"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "In-process message broker for end-to-end scenarios."
//! mfp_version: "v0.1.0"
//! mfp_owner: "tbd"
//! ---
//! Broker living in the host window.
//!
//! Accepts connect requests from trusted applications, tracks subscriptions,
//! routes topic messages (including retained messages and replies), answers
//! subscriber count requests, and fans intents out to the other clients.
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use mfp_common::BrokerConfig;
use mfp_messaging::{
    ConnackMessage, ConnectMessage, IntentMessage, Message, MessageEnvelope, MessagingTransport,
    PlatformTopics, ReturnCode, TopicMatcher, TopicMessage, TopicSubscribeCommand,
};
use mfp_transport::{filter_by_transport, pluck_envelope, InMemoryWindow, MessageEvent, Window, WindowRef};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A client the broker accepted.
#[derive(Clone)]
pub struct ConnectedClient {
    /// Id assigned on connect.
    pub client_id: String,
    /// Symbolic application name.
    pub app: String,
    /// Origin the client connected from.
    pub origin: String,
    window: WindowRef,
}

impl fmt::Debug for ConnectedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedClient")
            .field("client_id", &self.client_id)
            .field("app", &self.app)
            .field("origin", &self.origin)
            .field("window", &self.window.id())
            .finish()
    }
}

struct Subscription {
    client_id: String,
    subscriber_id: Option<String>,
    matcher: TopicMatcher,
}

impl Subscription {
    /// Copy of `message` as delivered to this subscription, if it matches.
    fn delivery(&self, message: &TopicMessage) -> Option<TopicMessage> {
        let params = self.matcher.matches(&message.topic)?;
        let mut delivered = message.clone();
        delivered.params = params;
        if let Some(subscriber_id) = &self.subscriber_id {
            delivered
                .headers
                .insert(TopicMessage::SUBSCRIBER_ID_HEADER.to_owned(), json!(subscriber_id));
        }
        Some(delivered)
    }
}

struct BrokerState {
    window: WindowRef,
    applications: IndexMap<String, String>,
    clients: IndexMap<String, ConnectedClient>,
    subscriptions: Vec<Subscription>,
    retained: IndexMap<String, (Option<String>, TopicMessage)>,
}

/// Message broker running on an in-memory window.
pub struct SimulatedBroker {
    window: Arc<InMemoryWindow>,
    state: Arc<Mutex<BrokerState>>,
    task: JoinHandle<()>,
}

impl SimulatedBroker {
    /// Start a broker trusting the configured applications.
    pub fn from_config(window: Arc<InMemoryWindow>, config: &BrokerConfig) -> Self {
        Self::start(
            window,
            config
                .applications
                .iter()
                .map(|(name, app)| (name.clone(), app.origin.clone())),
        )
    }

    /// Start a broker trusting the given `(name, origin)` pairs.
    pub fn start(
        window: Arc<InMemoryWindow>,
        applications: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let state = Arc::new(Mutex::new(BrokerState {
            window: window.clone(),
            applications: applications.into_iter().collect(),
            clients: IndexMap::new(),
            subscriptions: Vec::new(),
            retained: IndexMap::new(),
        }));
        let inbox = window.subscribe();
        let task = tokio::spawn(run_broker(inbox, state.clone()));
        Self {
            window,
            state,
            task,
        }
    }

    /// Window the broker listens on.
    pub fn window(&self) -> Arc<InMemoryWindow> {
        self.window.clone()
    }

    /// Origin of the broker window.
    pub fn origin(&self) -> String {
        self.window.origin().to_owned()
    }

    /// Clients currently connected, in connect order.
    pub fn clients(&self) -> Vec<ConnectedClient> {
        self.state.lock().clients.values().cloned().collect()
    }

    /// Number of subscriptions matching `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state.lock().subscriber_count(topic)
    }

    /// Retained message of `topic`, if any.
    pub fn retained(&self, topic: &str) -> Option<TopicMessage> {
        self.state
            .lock()
            .retained
            .get(topic)
            .map(|(_, message)| message.clone())
    }

    /// Stop processing events.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SimulatedBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_broker(
    mut inbox: tokio::sync::broadcast::Receiver<MessageEvent>,
    state: Arc<Mutex<BrokerState>>,
) {
    loop {
        match inbox.recv().await {
            Ok(event) => state.lock().handle(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "broker inbox lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

impl BrokerState {
    fn origin(&self) -> String {
        self.window.origin().to_owned()
    }

    fn handle(&mut self, event: MessageEvent) {
        if !filter_by_transport(&event, MessagingTransport::GatewayToBroker) {
            return;
        }
        let origin = event.origin.clone();
        let Some(source) = event.source.clone() else {
            return;
        };
        let Some(envelope) = pluck_envelope(event) else {
            return;
        };

        if let Some(connect) = envelope
            .topic_message()
            .filter(|message| message.topic == PlatformTopics::CLIENT_CONNECT)
        {
            self.connect(connect, &origin, source);
            return;
        }

        let Some(client_id) = self.client_of(&source, &origin) else {
            tracing::debug!(origin = %origin, "envelope from unconnected gateway ignored");
            return;
        };
        let envelope = envelope.with_sender(client_id.clone());
        match envelope.message {
            Some(Message::TopicSubscribe(command)) => self.subscribe(&client_id, command),
            Some(Message::TopicUnsubscribe(command)) => {
                self.subscriptions.retain(|subscription| {
                    let cancelled = match &command.subscriber_id {
                        Some(id) => subscription.subscriber_id.as_ref() == Some(id),
                        None => subscription.matcher.pattern() == command.topic,
                    };
                    !(subscription.client_id == client_id && cancelled)
                });
            }
            Some(Message::Topic(message)) if message.topic == PlatformTopics::CLIENT_DISCONNECT => {
                self.disconnect(&client_id)
            }
            Some(Message::Topic(message))
                if message.topic == PlatformTopics::REQUEST_SUBSCRIBER_COUNT =>
            {
                self.answer_subscriber_count(message)
            }
            Some(Message::Topic(message)) => self.publish(Some(client_id), message),
            Some(Message::Intent(intent)) => self.dispatch_intent(&client_id, intent),
            None => {}
        }
    }

    fn client_of(&self, source: &WindowRef, origin: &str) -> Option<String> {
        self.clients
            .values()
            .find(|client| client.window.id() == source.id() && client.origin == origin)
            .map(|client| client.client_id.clone())
    }

    fn connect(&mut self, request: &TopicMessage, origin: &str, source: WindowRef) {
        let Some(reply_to) = request.reply_to.clone() else {
            return;
        };
        let connack = match request.payload_as::<ConnectMessage>() {
            Ok(Some(connect)) => match self.applications.get(&connect.symbolic_app_name) {
                None => ConnackMessage::refused(
                    ReturnCode::Rejected,
                    format!(
                        "Client connect attempt rejected by the message broker: Unknown client. [app='{}']",
                        connect.symbolic_app_name
                    ),
                ),
                Some(expected) if expected != origin => ConnackMessage::refused(
                    ReturnCode::Blocked,
                    format!(
                        "Client connect attempt blocked by the message broker: Wrong origin [actual='{}', expected='{}', app='{}']",
                        origin, expected, connect.symbolic_app_name
                    ),
                ),
                Some(_) => {
                    let client = ConnectedClient {
                        client_id: Uuid::new_v4().to_string(),
                        app: connect.symbolic_app_name,
                        origin: origin.to_owned(),
                        window: source.clone(),
                    };
                    tracing::debug!(client_id = %client.client_id, app = %client.app, "client connected");
                    let connack = ConnackMessage::accepted(client.client_id.clone());
                    self.clients.insert(client.client_id.clone(), client);
                    connack
                }
            },
            _ => ConnackMessage::refused(
                ReturnCode::BadRequest,
                "Client connect attempt rejected by the message broker: Bad request.",
            ),
        };
        let Ok(payload) = serde_json::to_value(connack) else {
            return;
        };
        let reply = MessageEnvelope::topic(
            MessagingTransport::BrokerToGateway,
            TopicMessage::new(reply_to).with_payload(payload),
        );
        self.post(&source, origin, reply);
    }

    fn disconnect(&mut self, client_id: &str) {
        if let Some(client) = self.clients.shift_remove(client_id) {
            tracing::debug!(client_id, app = %client.app, "client disconnected");
        }
        self.subscriptions
            .retain(|subscription| subscription.client_id != client_id);
    }

    fn subscribe(&mut self, client_id: &str, command: TopicSubscribeCommand) {
        let matcher = match TopicMatcher::new(&command.topic) {
            Ok(matcher) => matcher,
            Err(err) => {
                tracing::debug!(client_id, error = %err, "subscription refused");
                return;
            }
        };
        let subscription = Subscription {
            client_id: client_id.to_owned(),
            subscriber_id: command.subscriber_id,
            matcher,
        };
        let replay: Vec<(Option<String>, TopicMessage)> = self
            .retained
            .values()
            .filter_map(|(sender, message)| {
                subscription
                    .delivery(message)
                    .map(|delivered| (sender.clone(), delivered))
            })
            .collect();
        self.subscriptions.push(subscription);
        for (sender, message) in replay {
            self.deliver_topic(client_id, sender.as_deref(), message);
        }
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions
            .iter()
            .filter(|subscription| subscription.matcher.is_match(topic))
            .count()
    }

    fn answer_subscriber_count(&mut self, request: TopicMessage) {
        let (Some(reply_to), Some(topic)) = (
            request.reply_to,
            request.payload.as_ref().and_then(|payload| payload.as_str()),
        ) else {
            return;
        };
        let count = self.subscriber_count(topic);
        self.publish(None, TopicMessage::new(reply_to).with_payload(json!(count)));
    }

    fn publish(&mut self, sender: Option<String>, message: TopicMessage) {
        if message.topic.contains(':') {
            tracing::debug!(topic = %message.topic, "publishing to a wildcard topic ignored");
            return;
        }
        if message.retain {
            if message.payload.is_none() {
                self.retained.shift_remove(&message.topic);
                return;
            }
            self.retained
                .insert(message.topic.clone(), (sender.clone(), message.clone()));
        }
        let deliveries: Vec<(String, TopicMessage)> = self
            .subscriptions
            .iter()
            .filter_map(|subscription| {
                subscription
                    .delivery(&message)
                    .map(|delivered| (subscription.client_id.clone(), delivered))
            })
            .collect();
        for (client_id, delivered) in deliveries {
            self.deliver_topic(&client_id, sender.as_deref(), delivered);
        }
    }

    fn dispatch_intent(&mut self, sender: &str, intent: IntentMessage) {
        let recipients: Vec<ConnectedClient> = self
            .clients
            .values()
            .filter(|client| client.client_id != sender)
            .cloned()
            .collect();
        for client in recipients {
            let envelope = MessageEnvelope::intent(MessagingTransport::BrokerToClient, intent.clone())
                .with_sender(sender);
            self.post(&client.window, &client.origin, envelope);
        }
    }

    fn deliver_topic(&self, client_id: &str, sender: Option<&str>, message: TopicMessage) {
        let Some(client) = self.clients.get(client_id) else {
            return;
        };
        let mut envelope = MessageEnvelope::topic(MessagingTransport::BrokerToClient, message);
        if let Some(sender) = sender {
            envelope = envelope.with_sender(sender);
        }
        self.post(&client.window, &client.origin, envelope);
    }

    fn post(&self, target: &WindowRef, target_origin: &str, envelope: MessageEnvelope) {
        let data = match envelope.to_value() {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "broker envelope not encodable");
                return;
            }
        };
        let event = MessageEvent::new(self.origin(), data).with_source(self.window.clone());
        if let Err(err) = target.post_message(event, target_origin) {
            tracing::debug!(error = %err, "client window gone");
        }
    }
}
