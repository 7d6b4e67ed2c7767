//! ---
//! mfp_section: "04-broker-gateway"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Broker gateway and discovery protocol."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::future::pending;
use std::sync::Arc;

use mfp_common::UnreachableBrokerPolicy;
use mfp_logging::{log_system_event, mfp_debug, mfp_error, mfp_warn, LogContext, SystemEventOutcome};
use mfp_messaging::{BootstrapParams, MessageEnvelope, MessagingTransport};
use mfp_transport::{
    EnvelopeFilter, FrameHost, FrameStyle, MessageEvent, MountedFrame,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;

use crate::config::GatewayConfig;
use crate::discovery::{request_gateway_info, wait_for_shutdown, DiscoveryState, GatewayInfo};
use crate::metrics::{GatewayCounters, GatewayMetrics, GatewayMetricsExporter};
use crate::{GatewayError, Result};

const INBOUND_BUFFER: usize = 1024;

struct Shared {
    client_app_name: String,
    state: watch::Sender<DiscoveryState>,
    shutdown: watch::Sender<bool>,
    inbound: broadcast::Sender<MessageEnvelope>,
    counters: GatewayCounters,
}

impl Shared {
    fn log_context(&self) -> LogContext<'_> {
        LogContext::for_app(&self.client_app_name)
    }

    /// Move to `next` unless the gateway was destroyed meanwhile.
    fn transition(&self, next: DiscoveryState) {
        self.state.send_if_modified(|state| {
            if matches!(state, DiscoveryState::Destroyed) {
                return false;
            }
            *state = next;
            true
        });
    }

    fn is_destroyed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Client-side handle to the broker gateway.
///
/// Creating the gateway starts mounting its frame right away; discovery runs
/// in the background. Posting waits for discovery, and broker envelopes are
/// available through [`BrokerGateway::messages`]. Dropping the handle
/// destroys the gateway.
pub struct BrokerGateway {
    shared: Arc<Shared>,
    host: Arc<dyn FrameHost>,
    config: GatewayConfig,
}

enum Settled {
    Connected(GatewayInfo),
    Failed(GatewayError),
    Destroyed,
}

impl BrokerGateway {
    /// Mount the gateway frame for `client_app_name` and start discovery.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        client_app_name: impl Into<String>,
        config: GatewayConfig,
        host: Arc<dyn FrameHost>,
    ) -> Self {
        Self::build(client_app_name.into(), config, host, None)
    }

    /// Like [`BrokerGateway::new`], additionally reporting to a metrics exporter.
    pub fn with_metrics(
        client_app_name: impl Into<String>,
        config: GatewayConfig,
        host: Arc<dyn FrameHost>,
        exporter: Arc<GatewayMetricsExporter>,
    ) -> Self {
        Self::build(client_app_name.into(), config, host, Some(exporter))
    }

    fn build(
        client_app_name: String,
        config: GatewayConfig,
        host: Arc<dyn FrameHost>,
        exporter: Option<Arc<GatewayMetricsExporter>>,
    ) -> Self {
        let (state, _) = watch::channel(DiscoveryState::Unstarted);
        let (shutdown, _) = watch::channel(false);
        let (inbound, _) = broadcast::channel(INBOUND_BUFFER);
        let shared = Arc::new(Shared {
            client_app_name,
            state,
            shutdown,
            inbound,
            counters: GatewayCounters::new(exporter),
        });
        tokio::spawn(run_gateway(shared.clone(), config, host.clone()));
        Self {
            shared,
            host,
            config,
        }
    }

    /// Symbolic name of the client application.
    pub fn client_app_name(&self) -> &str {
        &self.shared.client_app_name
    }

    /// Settings the gateway was created with.
    pub fn config(&self) -> GatewayConfig {
        self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DiscoveryState {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every lifecycle transition.
    pub fn watch_state(&self) -> watch::Receiver<DiscoveryState> {
        self.shared.state.subscribe()
    }

    /// Counters collected so far.
    pub fn metrics(&self) -> GatewayMetrics {
        self.shared.counters.snapshot()
    }

    /// Wait for discovery to finish.
    ///
    /// Resolves with the gateway info or the discovery error. Never resolves
    /// once the gateway is destroyed.
    pub async fn gateway_info(&self) -> Result<GatewayInfo> {
        match self.settled().await {
            Settled::Connected(info) => Ok(info),
            Settled::Failed(err) => Err(err),
            Settled::Destroyed => pending().await,
        }
    }

    /// Post an envelope to the broker via the gateway frame.
    ///
    /// Waits for discovery. If discovery failed or the gateway is destroyed,
    /// the returned future either never resolves or fails with
    /// [`GatewayError::NotConnected`], depending on
    /// [`GatewayConfig::unreachable_broker`].
    pub async fn post_message(&self, envelope: MessageEnvelope) -> Result<()> {
        let info = match self.settled().await {
            Settled::Connected(info) => info,
            Settled::Failed(err) => return self.unreachable(err.to_string()).await,
            Settled::Destroyed => return self.unreachable("gateway destroyed".to_owned()).await,
        };
        if self.shared.is_destroyed() {
            return self.unreachable("gateway destroyed".to_owned()).await;
        }

        let data = envelope.to_value()?;
        let event = MessageEvent::new(self.host.origin(), data).with_source(self.host.window());
        info.window.post_message(event, info.window.origin())?;
        self.shared.counters.observe_posted();
        tracing::trace!(
            app = %self.shared.client_app_name,
            message_id = %envelope.message_id,
            channel = %envelope.channel,
            "envelope posted to gateway"
        );
        Ok(())
    }

    /// Stream of envelopes the broker sends to this client.
    ///
    /// Only envelopes posted from the broker origin on the broker-to-client leg
    /// are delivered. Envelopes received before the stream was created are not
    /// replayed. The stream ends when the gateway is destroyed.
    pub fn messages(&self) -> MessageStream {
        MessageStream {
            inbound: self.shared.inbound.subscribe(),
            shutdown: self.shared.shutdown.subscribe(),
        }
    }

    /// Tear the gateway down.
    ///
    /// Idempotent. Unmounts the gateway frame and revokes its object URL,
    /// ends every [`MessageStream`], and leaves pending waits unresolved.
    pub fn destroy(&self) {
        let already = self.shared.shutdown.send_replace(true);
        self.shared.state.send_replace(DiscoveryState::Destroyed);
        if !already {
            log_system_event(
                Some(&self.shared.log_context()),
                "gateway.destroy",
                "broker gateway destroyed",
                SystemEventOutcome::Success,
            );
        }
    }

    /// Whether [`BrokerGateway::destroy`] was called.
    pub fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    async fn settled(&self) -> Settled {
        let mut state = self.shared.state.subscribe();
        loop {
            {
                let current = state.borrow_and_update();
                match &*current {
                    DiscoveryState::Connected(info) => return Settled::Connected(info.clone()),
                    DiscoveryState::Failed(err) => return Settled::Failed(err.clone()),
                    DiscoveryState::Destroyed => return Settled::Destroyed,
                    DiscoveryState::Unstarted
                    | DiscoveryState::Mounting
                    | DiscoveryState::Discovering => {}
                }
            }
            if state.changed().await.is_err() {
                return Settled::Destroyed;
            }
        }
    }

    async fn unreachable(&self, reason: String) -> Result<()> {
        match self.config.unreachable_broker {
            UnreachableBrokerPolicy::Pend => pending().await,
            UnreachableBrokerPolicy::Reject => Err(GatewayError::NotConnected(reason)),
        }
    }
}

impl Drop for BrokerGateway {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Broker envelopes delivered to one subscriber.
pub struct MessageStream {
    inbound: broadcast::Receiver<MessageEnvelope>,
    shutdown: watch::Receiver<bool>,
}

impl MessageStream {
    /// Next envelope, or `None` once the gateway is destroyed.
    pub async fn recv(&mut self) -> Option<MessageEnvelope> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                received = self.inbound.recv() => match received {
                    Ok(envelope) => {
                        if *self.shutdown.borrow() {
                            return None;
                        }
                        return Some(envelope);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "message stream lagged; envelopes dropped");
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }
}

async fn run_gateway(shared: Arc<Shared>, config: GatewayConfig, host: Arc<dyn FrameHost>) {
    if shared.is_destroyed() {
        return;
    }
    let mut shutdown = shared.shutdown.subscribe();
    shared.transition(DiscoveryState::Mounting);

    let frame = match mount_gateway_frame(&shared, &host, &config) {
        Ok(frame) => frame,
        Err(err) => {
            mfp_error!(context = shared.log_context(), "gateway frame not mounted: {}", err);
            shared.transition(DiscoveryState::Failed(err));
            return;
        }
    };

    let window = tokio::select! {
        biased;
        _ = wait_for_shutdown(&mut shutdown) => return,
        loaded = frame.loaded => match loaded {
            Ok(window) => window,
            // unmounted before it loaded
            Err(_) => return,
        },
    };
    mfp_debug!(context = shared.log_context(), "gateway frame loaded (window {})", window.id());
    shared.transition(DiscoveryState::Discovering);

    let outcome = request_gateway_info(
        &host.window(),
        &host.origin(),
        window,
        config.discovery_timeout,
        &mut shutdown,
    )
    .await;
    let (info, elapsed) = match outcome {
        None => return,
        Some(Ok(connected)) => connected,
        Some(Err(err)) => {
            log_system_event(
                Some(&shared.log_context()),
                "gateway.discovery",
                &err.to_string(),
                SystemEventOutcome::Fault,
            );
            shared.transition(DiscoveryState::Failed(err));
            return;
        }
    };

    shared.counters.observe_discovery(elapsed);
    // listen before announcing the connection so replies to the first posts are seen
    let raw = info.window.subscribe();
    let filter = EnvelopeFilter::new(info.broker_origin.clone(), MessagingTransport::BrokerToClient);
    log_system_event(
        Some(&shared.log_context().with_broker_origin(&info.broker_origin)),
        "gateway.discovery",
        "message broker discovered",
        SystemEventOutcome::Success,
    );
    shared.transition(DiscoveryState::Connected(info));
    pump_broker_envelopes(&shared, raw, filter, shutdown).await;
}

/// Render the bootstrap document, mount the hidden frame, and arm its teardown.
fn mount_gateway_frame(
    shared: &Arc<Shared>,
    host: &Arc<dyn FrameHost>,
    config: &GatewayConfig,
) -> Result<MountedFrame> {
    let params = BootstrapParams::new(
        shared.client_app_name.clone(),
        host.origin(),
        config.discovery_timeout,
    );
    let url = host
        .create_object_url(&params.render())
        .map_err(GatewayError::Mount)?;
    let frame = match host.mount_frame(&url, &FrameStyle::hidden()) {
        Ok(frame) => frame,
        Err(err) => {
            host.revoke_object_url(&url);
            return Err(GatewayError::Mount(err));
        }
    };

    let teardown_host = host.clone();
    let teardown_shared = shared.clone();
    let frame_id = frame.id;
    let mut shutdown = shared.shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_shutdown(&mut shutdown).await;
        teardown_host.unmount_frame(frame_id);
        teardown_host.revoke_object_url(&url);
        mfp_debug!(
            context = teardown_shared.log_context(),
            "gateway {} unmounted, {} revoked",
            frame_id,
            url
        );
    });
    Ok(frame)
}

async fn pump_broker_envelopes(
    shared: &Shared,
    mut raw: broadcast::Receiver<MessageEvent>,
    filter: EnvelopeFilter,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            received = raw.recv() => match received {
                Ok(event) => match filter.accept(event) {
                    Some(envelope) => {
                        shared.counters.observe_received();
                        // no subscribers means nobody is listening right now
                        let _ = shared.inbound.send(envelope);
                    }
                    None => shared.counters.observe_filtered(),
                },
                Err(RecvError::Lagged(skipped)) => {
                    mfp_warn!(context = shared.log_context(), "gateway window listener lagged by {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    mfp_debug!(context = shared.log_context(), "inbound pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use mfp_transport::{FrameId, InMemoryWindow, TransportError, Window, WindowRef};
    use tokio::sync::oneshot;

    /// Frame host whose frame never loads.
    struct StalledHost {
        window: Arc<InMemoryWindow>,
        calls: Mutex<Vec<String>>,
        loaders: Mutex<Vec<oneshot::Sender<WindowRef>>>,
        fail_mount: bool,
    }

    impl FrameHost for StalledHost {
        fn origin(&self) -> String {
            self.window.origin().to_owned()
        }

        fn window(&self) -> WindowRef {
            self.window.clone()
        }

        fn create_object_url(&self, _document: &str) -> mfp_transport::Result<String> {
            self.calls.lock().expect("lock").push("create".into());
            Ok("blob:test/1".into())
        }

        fn revoke_object_url(&self, url: &str) {
            self.calls.lock().expect("lock").push(format!("revoke {}", url));
        }

        fn mount_frame(&self, _src: &str, style: &FrameStyle) -> mfp_transport::Result<MountedFrame> {
            assert!(style.is_hidden());
            if self.fail_mount {
                return Err(TransportError::Mount("no document body".into()));
            }
            self.calls.lock().expect("lock").push("mount".into());
            let (tx, loaded) = oneshot::channel();
            self.loaders.lock().expect("lock").push(tx);
            Ok(MountedFrame {
                id: FrameId(1),
                loaded,
            })
        }

        fn unmount_frame(&self, id: FrameId) {
            self.calls.lock().expect("lock").push(format!("unmount {}", id));
        }
    }

    fn stalled(fail_mount: bool) -> Arc<StalledHost> {
        Arc::new(StalledHost {
            window: InMemoryWindow::top("https://app-1.example"),
            calls: Mutex::new(Vec::new()),
            loaders: Mutex::new(Vec::new()),
            fail_mount,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_tears_down_exactly_once() {
        let host = stalled(false);
        let gateway = BrokerGateway::new("app-1", GatewayConfig::default(), host.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(gateway.state().name(), "mounting");

        gateway.destroy();
        gateway.destroy();
        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(gateway);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let calls = host.calls.lock().expect("lock").clone();
        assert_eq!(calls, vec!["create", "mount", "unmount frame-1", "revoke blob:test/1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn mount_failure_is_reported_to_waiters() {
        let host = stalled(true);
        let gateway = BrokerGateway::new("app-1", GatewayConfig::default(), host.clone());
        let err = gateway.gateway_info().await.unwrap_err();
        assert!(matches!(err, GatewayError::Mount(_)));
        let calls = host.calls.lock().expect("lock").clone();
        assert_eq!(calls, vec!["create", "revoke blob:test/1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejecting_policy_fails_posts_after_destroy() {
        let host = stalled(false);
        let config = GatewayConfig::default().with_unreachable_broker(UnreachableBrokerPolicy::Reject);
        let gateway = BrokerGateway::new("app-1", config, host);
        gateway.destroy();
        let envelope = MessageEnvelope::topic(
            MessagingTransport::ClientToBroker,
            mfp_messaging::TopicMessage::new("a"),
        );
        assert!(matches!(
            gateway.post_message(envelope).await,
            Err(GatewayError::NotConnected(_))
        ));
        let mut stream = gateway.messages();
        assert!(stream.recv().await.is_none());
    }
}
