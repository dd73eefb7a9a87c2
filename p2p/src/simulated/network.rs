//! Implementation of a `simulated` network.

use super::{metrics, Error};
use crate::{PeerId, Recipients};
use prometheus_client::registry::Registry;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rand_distr::Exp1;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// Multiple of the mean delay after which an envelope is always delivered.
///
/// Sampled delays above this ceiling are clipped, so it also acts as an implicit
/// per-message timeout.
pub const MAX_DELAY_FACTOR: f64 = 20.0;

/// Configuration for a `simulated` network.
#[derive(Clone, Debug)]
pub struct Config {
    /// Mean number of ticks before an envelope arrives.
    pub mean_delay: f64,

    /// Maximum number of envelopes that can make progress in a single tick.
    pub max_bandwidth: usize,

    /// Probability of dropping an envelope.
    ///
    /// Validated but not applied: sampled latency already stands in for
    /// retransmissions over a reliable transport.
    pub drop_rate: f64,

    /// Seed for delay sampling and contention shuffling.
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mean_delay: 5.0,
            max_bandwidth: 20,
            drop_rate: 0.1,
            seed: 0,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), Error> {
        if !self.mean_delay.is_finite() || self.mean_delay <= 0.0 {
            return Err(Error::InvalidMeanDelay(self.mean_delay));
        }
        if self.max_bandwidth == 0 {
            return Err(Error::InvalidBandwidth);
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(Error::InvalidDropRate(self.drop_rate));
        }
        Ok(())
    }
}

/// A message in transit between two peers.
#[derive(Clone, Debug)]
pub struct Envelope<M> {
    pub from: PeerId,
    pub to: PeerId,
    pub message: M,
    remaining: f64,
}

impl<M> Envelope<M> {
    /// Ticks (possibly fractional) left before the envelope arrives.
    pub fn remaining(&self) -> f64 {
        self.remaining
    }
}

/// Implementation of a `simulated` network.
///
/// Time only advances through [Network::tick]. Each tick, at most `max_bandwidth`
/// envelopes have their countdown decremented (the rest wait untouched) and any
/// envelope whose countdown is exhausted is delivered synchronously.
pub struct Network<M> {
    cfg: Config,
    rng: StdRng,

    peers: BTreeSet<PeerId>,
    slowdown: HashMap<PeerId, f64>,

    in_flight: Vec<Envelope<M>>,
    time: u64,
    history: BTreeMap<u64, usize>,

    metrics: metrics::Metrics,
}

impl<M: Clone> Network<M> {
    /// Create a new simulated network with a given configuration.
    pub fn new(cfg: Config, registry: &mut Registry) -> Result<Self, Error> {
        cfg.validate()?;
        if cfg.drop_rate > 0.0 {
            debug!(drop_rate = cfg.drop_rate, "drop rate is not applied");
        }
        Ok(Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            cfg,
            peers: BTreeSet::new(),
            slowdown: HashMap::new(),
            in_flight: Vec::new(),
            time: 0,
            history: BTreeMap::new(),
            metrics: metrics::Metrics::init(registry),
        })
    }

    /// Register a new peer with the network.
    pub fn register(&mut self, peer: PeerId) -> Result<(), Error> {
        if !self.peers.insert(peer) {
            return Err(Error::AlreadyRegistered(peer));
        }
        Ok(())
    }

    /// Multiply the mean delay of every envelope sent to or from `peer`.
    ///
    /// When both endpoints are degraded, the larger factor applies.
    pub fn degrade(&mut self, peer: PeerId, factor: f64) -> Result<(), Error> {
        if !self.peers.contains(&peer) {
            return Err(Error::UnknownPeer(peer));
        }
        if !factor.is_finite() || factor <= 0.0 {
            return Err(Error::InvalidSlowdown(factor));
        }
        self.slowdown.insert(peer, factor);
        Ok(())
    }

    /// Mean delay between two peers, accounting for degraded endpoints.
    fn mean_delay(&self, from: &PeerId, to: &PeerId) -> f64 {
        let from = self.slowdown.get(from).copied().unwrap_or(1.0);
        let to = self.slowdown.get(to).copied().unwrap_or(1.0);
        self.cfg.mean_delay * from.max(to)
    }

    /// Sample an arrival countdown from an exponential distribution, clipped to
    /// `[1, MAX_DELAY_FACTOR * mean]` (the ceiling wins if the bounds cross).
    fn sample_delay(&mut self, mean: f64) -> f64 {
        let sample: f64 = self.rng.sample(Exp1);
        (sample * mean).max(1.0).min(mean * MAX_DELAY_FACTOR)
    }

    /// Enqueue a single envelope, sampling its arrival countdown.
    pub fn enqueue(&mut self, from: PeerId, to: PeerId, message: M) {
        let mean = self.mean_delay(&from, &to);
        let remaining = self.sample_delay(mean);
        trace!(%from, %to, remaining, "sending message");
        self.metrics
            .sent
            .get_or_create(&metrics::Peer::new(&from))
            .inc();
        self.in_flight.push(Envelope {
            from,
            to,
            message,
            remaining,
        });
    }

    /// Send a message from `origin` to a set of recipients.
    ///
    /// [Recipients::All] resolves to every registered peer except `origin`. Explicitly
    /// addressing `origin` is allowed. Unknown recipients are dropped.
    pub fn send(&mut self, origin: PeerId, recipients: Recipients, message: M) -> Vec<PeerId> {
        let recipients = match recipients {
            Recipients::All => self
                .peers
                .iter()
                .filter(|peer| **peer != origin)
                .copied()
                .collect(),
            Recipients::Some(peers) => peers,
            Recipients::One(peer) => vec![peer],
        };

        let mut sent = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if !self.peers.contains(&recipient) {
                debug!(%origin, %recipient, reason = "no agent", "dropping message");
                continue;
            }
            self.enqueue(origin, recipient, message.clone());
            sent.push(recipient);
        }
        sent
    }

    /// Advance time by one tick and run a delivery pass.
    ///
    /// `deliver` is invoked synchronously for every envelope that arrives during this
    /// tick and may send new envelopes through the provided network handle. Those
    /// envelopes first make progress on the following tick.
    pub fn tick<F>(&mut self, mut deliver: F)
    where
        F: FnMut(&mut Self, Envelope<M>),
    {
        self.time += 1;
        self.history.insert(self.time, self.in_flight.len());
        self.metrics.in_flight.set(self.in_flight.len() as i64);

        // Snapshot the in-flight set (anything sent during delivery lands in a fresh list)
        let mut pending = std::mem::take(&mut self.in_flight);
        if pending.len() > self.cfg.max_bandwidth {
            // No priority under contention: overload must not favor any peer
            pending.shuffle(&mut self.rng);
            debug!(
                time = self.time,
                in_flight = pending.len(),
                max_bandwidth = self.cfg.max_bandwidth,
                "bandwidth exhausted"
            );
        }

        let mut served = 0;
        for mut envelope in pending {
            if served >= self.cfg.max_bandwidth {
                self.metrics.deferred.inc();
                self.in_flight.push(envelope);
                continue;
            }
            served += 1;

            envelope.remaining -= 1.0;
            if envelope.remaining > 0.0 {
                self.in_flight.push(envelope);
                continue;
            }
            self.metrics
                .delivered
                .get_or_create(&metrics::Peer::new(&envelope.to))
                .inc();
            trace!(from = %envelope.from, to = %envelope.to, time = self.time, "delivering message");
            deliver(self, envelope);
        }
    }

    /// Current simulated time.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Envelopes currently in transit.
    pub fn in_flight(&self) -> &[Envelope<M>] {
        &self.in_flight
    }

    /// Number of envelopes in flight at the start of each tick.
    pub fn history(&self) -> &BTreeMap<u64, usize> {
        &self.history
    }

    /// Registered peers.
    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.iter()
    }
}
