use crate::PeerId;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Peer {
    pub peer: String,
}

impl Peer {
    pub fn new(peer: &PeerId) -> Self {
        Self {
            peer: peer.to_string(),
        }
    }
}

/// Counters maintained by the simulated network.
pub struct Metrics {
    /// Envelopes enqueued, labeled by origin.
    pub sent: Family<Peer, Counter>,
    /// Envelopes handed to a recipient, labeled by recipient.
    pub delivered: Family<Peer, Counter>,
    /// Envelopes pushed back to the next tick because the bandwidth was exhausted.
    pub deferred: Counter,
    /// Envelopes in flight at the start of the latest tick.
    pub in_flight: Gauge,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self {
            sent: Family::default(),
            delivered: Family::default(),
            deferred: Counter::default(),
            in_flight: Gauge::default(),
        };
        registry.register("messages_sent", "messages sent", metrics.sent.clone());
        registry.register(
            "messages_delivered",
            "messages delivered",
            metrics.delivered.clone(),
        );
        registry.register(
            "messages_deferred",
            "messages deferred by bandwidth limits",
            metrics.deferred.clone(),
        );
        registry.register(
            "messages_in_flight",
            "messages in flight at the start of the tick",
            metrics.in_flight.clone(),
        );
        metrics
    }
}
