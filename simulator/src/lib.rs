//! Run a committee of replicas over a simulated network.
//!
//! A [Simulation] owns everything a run needs: the network, one replica per
//! peer, the shared genesis and a metrics registry. Time advances in lockstep:
//! every replica observes the tick (and may time out) before the network
//! delivers whatever arrived during it.
//!
//! # Example
//!
//! ```rust
//! use simulator::{Config, Simulation};
//!
//! let mut simulation = Simulation::new(Config::default()).unwrap();
//! simulation.run(200);
//! let summary = simulation.summary();
//! assert!(summary.agreement);
//! ```

use motorway_consensus::{
    genesis::Genesis,
    replica::{self, Backfill, Finalized, Replica},
    selector::RoundRobin,
    types::{Confirm, Message},
    Height,
};
use motorway_p2p::{
    simulated::{self, Network},
    PeerId, Recipients, Sender,
};
use prometheus_client::{encoding::text::encode, registry::Registry};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] simulated::Error),
    #[error("replica error: {0}")]
    Replica(#[from] replica::Error),
    #[error("invalid committee size: {0}")]
    InvalidCommittee(u32),
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),
    #[error("metrics encoding failed")]
    Metrics(#[from] std::fmt::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for a [Simulation].
#[derive(Clone, Debug)]
pub struct Config {
    /// Committee size (peers are numbered `0..peers`).
    pub peers: u32,

    /// Peers that start out silent.
    pub byzantine: BTreeSet<PeerId>,

    /// Ticks without a vote before a replica times out.
    pub timeout_delay: u64,

    /// Broadcast timeouts instead of sending them to the next leader only.
    pub broadcast_timeout: bool,

    /// Send `VoteConfirm` to the leader of the next height.
    pub confirm_to_next_leader: bool,

    /// Base seed for replica payloads (peer `i` uses `seed + i`).
    pub seed: u64,

    /// Delay, bandwidth and contention settings.
    pub network: simulated::Config,

    /// Mean delay multipliers for degraded peers.
    pub slowdown: BTreeMap<PeerId, f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peers: 4,
            byzantine: BTreeSet::new(),
            timeout_delay: 100,
            broadcast_timeout: true,
            confirm_to_next_leader: false,
            seed: 0,
            network: simulated::Config::default(),
            slowdown: BTreeMap::new(),
        }
    }
}

/// Outcome of a run, as reported by the driver.
#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    /// Ticks elapsed.
    pub time: u64,
    pub peers: usize,
    pub byzantine: Vec<u32>,
    pub quorum: usize,
    /// Finalized entries (block or nil) per peer.
    pub committed: BTreeMap<u32, usize>,
    /// Highest height finalized by every honest peer.
    pub highest_common: Option<Height>,
    /// Non-nil entries finalized by the first honest peer.
    pub blocks: usize,
    /// Mean number of envelopes in flight at the start of a tick.
    pub average_in_flight: f64,
    pub agreement: bool,
    pub integrity: bool,
}

/// Lets the active replica send through the network and look up the lock
/// tables of every other replica.
struct Directory<'a> {
    me: PeerId,
    network: &'a mut Network<Message>,
    before: &'a [Replica<RoundRobin>],
    after: &'a [Replica<RoundRobin>],
}

impl Directory<'_> {
    fn replica(&self, peer: &PeerId) -> Option<&Replica<RoundRobin>> {
        let index = peer.index();
        let me = self.me.index();
        if index < me {
            self.before.get(index)
        } else if index > me {
            self.after.get(index - me - 1)
        } else {
            None
        }
    }
}

impl Sender for Directory<'_> {
    type Message = Message;

    fn send(&mut self, recipients: Recipients, message: Message) -> Vec<PeerId> {
        self.network.send(self.me, recipients, message)
    }
}

impl Backfill for Directory<'_> {
    fn locked(&self, peers: &[PeerId], height: Height) -> Option<(PeerId, Arc<Confirm>)> {
        peers.iter().find_map(|peer| {
            let confirm = self.replica(peer)?.locked_at(height)?;
            Some((*peer, confirm.clone()))
        })
    }
}

/// Hand `f` the replica of `peer` and a [Directory] over the rest.
///
/// Replica `i` must sit at index `i`.
fn with_replica<F, R>(
    replicas: &mut [Replica<RoundRobin>],
    network: &mut Network<Message>,
    peer: PeerId,
    f: F,
) -> Option<R>
where
    F: FnOnce(&mut Replica<RoundRobin>, &mut Directory<'_>) -> R,
{
    if peer.index() >= replicas.len() {
        return None;
    }
    let (before, rest) = replicas.split_at_mut(peer.index());
    let (replica, after) = rest.split_first_mut()?;
    let mut directory = Directory {
        me: peer,
        network,
        before,
        after,
    };
    Some(f(replica, &mut directory))
}

/// A single run over a fully connected committee.
pub struct Simulation {
    registry: Registry,
    network: Network<Message>,
    replicas: Vec<Replica<RoundRobin>>,
    genesis: Genesis,
}

impl Simulation {
    /// Bootstrap the committee from genesis and let the leader of height 1 propose.
    pub fn new(cfg: Config) -> Result<Self, Error> {
        if cfg.peers == 0 {
            return Err(Error::InvalidCommittee(cfg.peers));
        }
        let peers: Vec<PeerId> = (0..cfg.peers).map(PeerId::new).collect();
        if let Some(peer) = cfg
            .byzantine
            .iter()
            .chain(cfg.slowdown.keys())
            .find(|peer| peer.index() >= peers.len())
        {
            return Err(Error::UnknownPeer(*peer));
        }

        // Wire the network
        let mut registry = Registry::default();
        let mut network = Network::new(
            cfg.network.clone(),
            registry.sub_registry_with_prefix("network"),
        )?;
        for peer in &peers {
            network.register(*peer)?;
        }
        for (peer, factor) in &cfg.slowdown {
            network.degrade(*peer, *factor)?;
        }

        // Seed every replica with the same genesis
        let selector = RoundRobin::new(peers.clone());
        let genesis = Genesis::new(&selector);
        let metrics = replica::Metrics::init(registry.sub_registry_with_prefix("replica"));
        let replicas = peers
            .iter()
            .map(|me| {
                let mut replica = Replica::new(replica::Config {
                    me: *me,
                    selector: selector.clone(),
                    peers: peers.clone(),
                    timeout_delay: cfg.timeout_delay,
                    broadcast_timeout: cfg.broadcast_timeout,
                    confirm_to_next_leader: cfg.confirm_to_next_leader,
                    seed: cfg.seed.wrapping_add(me.index() as u64),
                    metrics: metrics.clone(),
                });
                replica.seed(&genesis);
                replica.set_byzantine(cfg.byzantine.contains(me));
                replica
            })
            .collect();

        let mut simulation = Self {
            registry,
            network,
            replicas,
            genesis,
        };
        simulation.kickoff()?;
        info!(
            peers = cfg.peers,
            byzantine = cfg.byzantine.len(),
            "simulation started"
        );
        Ok(simulation)
    }

    fn kickoff(&mut self) -> Result<(), Error> {
        let Self {
            network,
            replicas,
            genesis,
            ..
        } = self;
        for index in 0..replicas.len() {
            let peer = PeerId::new(index as u32);
            if let Some(result) = with_replica(replicas, network, peer, |replica, directory| {
                replica.kickoff(directory, genesis)
            }) {
                result?;
            }
        }
        Ok(())
    }

    /// Advance every replica's timer, then run one network delivery pass.
    pub fn tick(&mut self) {
        let Self {
            network, replicas, ..
        } = self;
        for index in 0..replicas.len() {
            let peer = PeerId::new(index as u32);
            with_replica(replicas, network, peer, |replica, directory| {
                replica.tick(directory)
            });
        }
        network.tick(|network, envelope| {
            let to = envelope.to;
            let from = envelope.from;
            let message = envelope.message;
            if with_replica(&mut replicas[..], network, to, |replica, directory| {
                replica.process(directory, from, message)
            })
            .is_none()
            {
                debug!(%from, %to, "no replica for envelope");
            }
        });
    }

    /// Run `ticks` ticks.
    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Run `ticks` ticks, calling `observe` after each one.
    pub fn run_with<F>(&mut self, ticks: u64, mut observe: F) -> Result<(), Error>
    where
        F: FnMut(&Self) -> Result<(), Error>,
    {
        for _ in 0..ticks {
            self.tick();
            observe(self)?;
        }
        Ok(())
    }

    /// Silence (or revive) a replica mid-run.
    pub fn set_byzantine(&mut self, peer: PeerId, byzantine: bool) -> Result<(), Error> {
        let replica = self
            .replicas
            .get_mut(peer.index())
            .ok_or(Error::UnknownPeer(peer))?;
        replica.set_byzantine(byzantine);
        Ok(())
    }

    /// Multiply the mean delay of every envelope to or from `peer`.
    pub fn degrade(&mut self, peer: PeerId, factor: f64) -> Result<(), Error> {
        self.network.degrade(peer, factor)?;
        Ok(())
    }

    pub fn time(&self) -> u64 {
        self.network.time()
    }

    /// Messages that were in flight when the current tick started.
    pub fn signals(&self) -> usize {
        self.network
            .history()
            .get(&self.time())
            .copied()
            .unwrap_or(0)
    }

    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    pub fn network(&self) -> &Network<Message> {
        &self.network
    }

    pub fn replicas(&self) -> &[Replica<RoundRobin>] {
        &self.replicas
    }

    pub fn replica(&self, peer: PeerId) -> Option<&Replica<RoundRobin>> {
        self.replicas.get(peer.index())
    }

    /// Replicas that are currently honest.
    pub fn honest(&self) -> impl Iterator<Item = &Replica<RoundRobin>> {
        self.replicas.iter().filter(|replica| !replica.is_byzantine())
    }

    /// Highest height above genesis finalized by every honest replica.
    pub fn highest_common(&self) -> Option<Height> {
        let mut honest = self.honest();
        let first = honest.next()?;
        let others: Vec<_> = honest.collect();
        first
            .committed()
            .keys()
            .rev()
            .filter(|height| **height > 0)
            .find(|height| {
                others
                    .iter()
                    .all(|replica| replica.committed().contains_key(*height))
            })
            .copied()
    }

    /// Returns true if no two honest replicas finalized different entries at
    /// the same height.
    pub fn agreement(&self) -> bool {
        let honest: Vec<_> = self.honest().collect();
        honest.iter().enumerate().all(|(i, a)| {
            honest[i + 1..].iter().all(|b| {
                a.committed().iter().all(|(height, finalized)| {
                    b.committed()
                        .get(height)
                        .map_or(true, |other| finalized.is_same(other))
                })
            })
        })
    }

    /// Returns true if every finalized block extends the block finalized at the
    /// height below it (when both are known and non-nil).
    pub fn integrity(&self) -> bool {
        self.honest().all(|replica| {
            let committed = replica.committed();
            committed.iter().all(|(height, finalized)| {
                let (Finalized::Block(block), Some(height)) = (finalized, height.checked_sub(1))
                else {
                    return true;
                };
                match committed.get(&height) {
                    Some(Finalized::Block(parent)) => parent.is_parent(block),
                    _ => true,
                }
            })
        })
    }

    pub fn summary(&self) -> Summary {
        let history = self.network.history();
        let average_in_flight = if history.is_empty() {
            0.0
        } else {
            history.values().sum::<usize>() as f64 / history.len() as f64
        };
        let blocks = self
            .honest()
            .next()
            .map(|replica| {
                replica
                    .committed()
                    .values()
                    .filter(|finalized| finalized.block().is_some())
                    .count()
            })
            .unwrap_or(0);
        Summary {
            time: self.time(),
            peers: self.replicas.len(),
            byzantine: self
                .replicas
                .iter()
                .filter(|replica| replica.is_byzantine())
                .map(|replica| replica.me().index() as u32)
                .collect(),
            quorum: motorway_utils::quorum(self.replicas.len() as u32) as usize,
            committed: self
                .replicas
                .iter()
                .map(|replica| (replica.me().index() as u32, replica.committed().len()))
                .collect(),
            highest_common: self.highest_common(),
            blocks,
            average_in_flight,
            agreement: self.agreement(),
            integrity: self.integrity(),
        }
    }

    /// Encode all replica and network metrics in the Prometheus text format.
    pub fn encode_metrics(&self) -> Result<String, Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}
