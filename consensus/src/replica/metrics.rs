use crate::types::Message as Wire;
use motorway_p2p::PeerId;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

const PREPARE_TYPE: i32 = 1;
const VOTE_PREPARE_TYPE: i32 = 2;
const CONFIRM_TYPE: i32 = 3;
const VOTE_CONFIRM_TYPE: i32 = 4;
const COMMIT_TYPE: i32 = 5;
const TIMEOUT_TYPE: i32 = 6;

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

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PeerMessage {
    pub peer: String,
    pub message: i32,
}

impl PeerMessage {
    pub fn new(peer: &PeerId, message: &Wire) -> Self {
        let message = match message {
            Wire::Prepare(_) => PREPARE_TYPE,
            Wire::VotePrepare(_) => VOTE_PREPARE_TYPE,
            Wire::Confirm(_) => CONFIRM_TYPE,
            Wire::VoteConfirm(_) => VOTE_CONFIRM_TYPE,
            Wire::Commit(_) => COMMIT_TYPE,
            Wire::Timeout(_) => TIMEOUT_TYPE,
        };
        Self {
            peer: peer.to_string(),
            message,
        }
    }
}

/// Counters shared by every replica of a simulation (each labeled by peer).
///
/// Families are reference counted, so a clone records into the same series.
#[derive(Clone, Default)]
pub struct Metrics {
    /// Messages processed while honest.
    pub received: Family<PeerMessage, Counter>,
    /// Messages that failed validation.
    pub rejected: Family<PeerMessage, Counter>,
    /// Heights finalized (block or nil).
    pub commits: Family<Peer, Counter>,
    /// Conflicting commits observed for an already finalized height.
    pub equivocations: Family<Peer, Counter>,
    /// Blocks proposed.
    pub proposals: Family<Peer, Counter>,
    /// Local timeouts.
    pub timeouts: Family<Peer, Counter>,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "received",
            "messages processed by a replica",
            metrics.received.clone(),
        );
        registry.register(
            "rejected",
            "messages rejected by a replica",
            metrics.rejected.clone(),
        );
        registry.register("commits", "heights finalized", metrics.commits.clone());
        registry.register(
            "equivocations",
            "conflicting commits detected",
            metrics.equivocations.clone(),
        );
        registry.register("proposals", "blocks proposed", metrics.proposals.clone());
        registry.register("timeouts", "local timeouts", metrics.timeouts.clone());
        metrics
    }
}
