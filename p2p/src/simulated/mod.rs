//! Deliver messages between simulated peers in discrete ticks.
//!
//! Every envelope is assigned an arrival countdown sampled from an exponential
//! distribution around the configured mean delay. A tick decrements the countdown
//! of at most `max_bandwidth` envelopes (chosen uniformly at random when the
//! network is congested) and delivers those that reach zero. Together these
//! produce randomized latency, bounded throughput and reordering under contention.

mod metrics;
mod network;
pub use network::{Config, Envelope, Network, MAX_DELAY_FACTOR};

use crate::PeerId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("invalid mean delay (must be finite and positive): {0}")]
    InvalidMeanDelay(f64),
    #[error("invalid bandwidth (must be positive)")]
    InvalidBandwidth,
    #[error("invalid drop rate (must be in [0, 1]): {0}")]
    InvalidDropRate(f64),
    #[error("invalid slowdown (must be finite and positive): {0}")]
    InvalidSlowdown(f64),
    #[error("peer already registered: {0}")]
    AlreadyRegistered(PeerId),
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),
}
