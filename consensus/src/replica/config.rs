use super::Metrics;
use crate::selector::Selector;
use motorway_p2p::PeerId;

/// Configuration for a [super::Replica].
pub struct Config<S: Selector> {
    /// Identity of the replica.
    pub me: PeerId,

    /// Leader and committee for each height.
    pub selector: S,

    /// Peers the replica talks to (must include `me`).
    pub peers: Vec<PeerId>,

    /// Ticks without a new vote before giving up on the next height.
    pub timeout_delay: u64,

    /// Whether to broadcast timeouts to every peer (including `me`) or only send
    /// them to the leader of the height after the one being skipped.
    pub broadcast_timeout: bool,

    /// Whether to send confirm votes to the leader of the next height (which then
    /// extends the chain without a commit round) instead of the current leader.
    pub confirm_to_next_leader: bool,

    /// Seed for block payloads.
    pub seed: u64,

    /// Counters to record into.
    pub metrics: Metrics,
}

impl<S: Selector> Config<S> {
    /// Assert enforces that all configuration values are valid.
    pub fn assert(&self) {
        assert!(self.timeout_delay > 0, "timeout delay must be greater than zero");
        assert!(
            self.peers.contains(&self.me),
            "peers must include the replica itself"
        );
    }
}
