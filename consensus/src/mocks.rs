//! Deliver messages between replicas instantly and in order.

use crate::{
    replica::{Backfill, Replica},
    selector::{RoundRobin, Selector},
    types::{Confirm, Message},
    Height,
};
use motorway_p2p::{PeerId, Recipients, Sender};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

/// FIFO message router over a fixed committee.
///
/// The router has no view into replica state, so [Backfill] lookups only succeed
/// for locks registered with [Router::share].
pub struct Router {
    peers: Vec<PeerId>,
    origin: PeerId,
    queue: VecDeque<(PeerId, PeerId, Message)>,
    shared: BTreeMap<(PeerId, Height), Arc<Confirm>>,

    /// Every message handed to the router, in order.
    pub sent: Vec<(PeerId, Recipients, Message)>,
    /// Number of delivered messages per kind.
    pub delivered: BTreeMap<&'static str, usize>,
}

impl Router {
    pub fn new(n: u32) -> Self {
        Self {
            peers: (0..n).map(PeerId::new).collect(),
            origin: PeerId::default(),
            queue: VecDeque::new(),
            shared: BTreeMap::new(),
            sent: Vec::new(),
            delivered: BTreeMap::new(),
        }
    }

    /// Act on behalf of `origin` for subsequent sends.
    pub fn with(&mut self, origin: PeerId) -> &mut Self {
        self.origin = origin;
        self
    }

    /// Make `peer`'s lock at `height` available to [Backfill] lookups.
    pub fn share(&mut self, peer: PeerId, height: Height, confirm: Arc<Confirm>) {
        self.shared.insert((peer, height), confirm);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Deliver queued messages (including those sent in response) until the queue is
    /// empty, `done` returns true or `limit` messages were delivered.
    pub fn run<S, F>(&mut self, replicas: &mut [Replica<S>], limit: usize, mut done: F) -> usize
    where
        S: Selector,
        F: FnMut(&[Replica<S>]) -> bool,
    {
        let mut steps = 0;
        while steps < limit && !done(replicas) {
            let Some((from, to, message)) = self.queue.pop_front() else {
                break;
            };
            *self.delivered.entry(message.kind()).or_default() += 1;
            self.origin = to;
            replicas[to.index()].process(self, from, message);
            steps += 1;
        }
        steps
    }
}

impl Sender for Router {
    type Message = Message;

    fn send(&mut self, recipients: Recipients, message: Message) -> Vec<PeerId> {
        let targets: Vec<PeerId> = match &recipients {
            Recipients::All => self
                .peers
                .iter()
                .filter(|peer| **peer != self.origin)
                .copied()
                .collect(),
            Recipients::Some(peers) => peers.clone(),
            Recipients::One(peer) => vec![*peer],
        };
        for target in &targets {
            self.queue.push_back((self.origin, *target, message.clone()));
        }
        self.sent.push((self.origin, recipients, message));
        targets
    }
}

impl Backfill for Router {
    fn locked(&self, peers: &[PeerId], height: Height) -> Option<(PeerId, Arc<Confirm>)> {
        peers
            .iter()
            .filter(|peer| **peer != self.origin)
            .find_map(|peer| {
                self.shared
                    .get(&(*peer, height))
                    .map(|confirm| (*peer, confirm.clone()))
            })
    }
}

/// Committee of `n` peers with round-robin leaders.
pub fn committee(n: u32) -> RoundRobin {
    RoundRobin::new((0..n).map(PeerId::new).collect())
}
