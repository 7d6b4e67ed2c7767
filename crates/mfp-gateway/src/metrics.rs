//! ---
//! mfp_section: "04-broker-gateway"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Broker gateway and discovery protocol."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};

/// Point-in-time counters of a gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayMetrics {
    /// Envelopes posted to the gateway window.
    pub posted: u64,
    /// Broker envelopes republished to subscribers.
    pub received: u64,
    /// Events dropped by the origin, transport, or decoding checks.
    pub filtered: u64,
}

/// Prometheus metric handles for gateway activity.
#[derive(Clone)]
pub struct GatewayMetricsExporter {
    posted: IntCounter,
    received: IntCounter,
    filtered: IntCounter,
    discovery: Histogram,
}

impl GatewayMetricsExporter {
    /// Register gateway metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let posted = IntCounter::with_opts(Opts::new(
            "gateway_envelopes_posted_total",
            "Envelopes posted to the broker gateway",
        ))?;
        let received = IntCounter::with_opts(Opts::new(
            "gateway_envelopes_received_total",
            "Broker envelopes delivered to subscribers",
        ))?;
        let filtered = IntCounter::with_opts(Opts::new(
            "gateway_events_filtered_total",
            "Events dropped by origin or transport checks",
        ))?;
        let discovery = Histogram::with_opts(HistogramOpts::new(
            "gateway_discovery_seconds",
            "Time from frame load to gateway info reply",
        ))?;

        registry.register(Box::new(posted.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(filtered.clone()))?;
        registry.register(Box::new(discovery.clone()))?;

        Ok(Self {
            posted,
            received,
            filtered,
            discovery,
        })
    }
}

/// Counters shared between the gateway handle and its tasks.
#[derive(Default)]
pub(crate) struct GatewayCounters {
    posted: AtomicU64,
    received: AtomicU64,
    filtered: AtomicU64,
    exporter: Option<Arc<GatewayMetricsExporter>>,
}

impl GatewayCounters {
    pub(crate) fn new(exporter: Option<Arc<GatewayMetricsExporter>>) -> Self {
        Self {
            exporter,
            ..Self::default()
        }
    }

    pub(crate) fn observe_posted(&self) {
        self.posted.fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = &self.exporter {
            exporter.posted.inc();
        }
    }

    pub(crate) fn observe_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = &self.exporter {
            exporter.received.inc();
        }
    }

    pub(crate) fn observe_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = &self.exporter {
            exporter.filtered.inc();
        }
    }

    pub(crate) fn observe_discovery(&self, elapsed: Duration) {
        if let Some(exporter) = &self.exporter {
            exporter.discovery.observe(elapsed.as_secs_f64());
        }
    }

    pub(crate) fn snapshot(&self) -> GatewayMetrics {
        GatewayMetrics {
            posted: self.posted.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_feed_the_exporter() {
        let registry = Registry::new();
        let exporter = Arc::new(GatewayMetricsExporter::register(&registry).expect("register"));
        let counters = GatewayCounters::new(Some(exporter));
        counters.observe_posted();
        counters.observe_received();
        counters.observe_received();
        counters.observe_filtered();
        counters.observe_discovery(Duration::from_millis(20));

        assert_eq!(
            counters.snapshot(),
            GatewayMetrics {
                posted: 1,
                received: 2,
                filtered: 1
            }
        );
        let families = registry.gather();
        let received = families
            .iter()
            .find(|f| f.get_name() == "gateway_envelopes_received_total")
            .expect("received family");
        assert_eq!(received.get_metric()[0].get_counter().get_value(), 2.0);
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        GatewayMetricsExporter::register(&registry).expect("first");
        assert!(GatewayMetricsExporter::register(&registry).is_err());
    }
}
