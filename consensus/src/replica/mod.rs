//! Drive a single replica through the Prepare, Confirm and Commit phases.
//!
//! # Protocol
//!
//! Heights are proposed by a rotating leader (see [crate::selector]). At each
//! height:
//!
//! 1. The leader broadcasts a `Prepare` carrying a new block and a justification:
//!    either a certificate of `VoteConfirm` (a quorum locked on the previous
//!    height) or a certificate of `Timeout` (a quorum gave up on it).
//! 2. Replicas that have not voted at (or above) this height check the
//!    justification, vote, finalize the previous height and send a `VotePrepare`
//!    to the leader.
//! 3. Once the leader collects a quorum of votes it broadcasts a `Confirm` with the
//!    certificate. Replicas lock on the proposal and send a `VoteConfirm` to the
//!    leader (or, when configured, to the leader of the next height).
//! 4. A quorum of `VoteConfirm` either becomes a `Commit` (broadcast by the current
//!    leader) or directly justifies the next `Prepare` (assembled by the next
//!    leader).
//!
//! A replica that sees no new vote for `timeout_delay` ticks emits a `Timeout` for
//! the height after its latest vote and votes nil there. The leader of the height
//! after a timed out one proposes as soon as it gathers a quorum of timeouts.
//!
//! # Data availability
//!
//! A replica that must check a `VoteConfirm` justification without having locked
//! on the certified proposal may query another replica's lock table through
//! [Backfill]. This stands in for an out-of-band fetch and only exists in the
//! simulation.

mod actor;
mod config;
mod metrics;

pub use actor::Replica;
pub use config::Config;
pub use metrics::Metrics;

use crate::{
    block::Block,
    types::{Confirm, Prepare},
    Height,
};
use motorway_p2p::PeerId;
use std::sync::Arc;
use thiserror::Error;

/// Errors that cause a message to be dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("already voted at {current} (received {height})")]
    AlreadyVoted { height: Height, current: Height },
    #[error("invalid proposer at {height}: expected {expected}, got {actual}")]
    InvalidProposer {
        height: Height,
        expected: PeerId,
        actual: PeerId,
    },
    #[error("missing justification at {0}")]
    MissingJustification(Height),
    #[error("insufficient signers at {0}")]
    InsufficientSigners(Height),
    #[error("height mismatch: expected {expected}, got {actual}")]
    HeightMismatch { expected: Height, actual: Height },
    #[error("certified block does not match lock at {0}")]
    BlockMismatch(Height),
    #[error("proposal does not match vote at {0}")]
    VoteMismatch(Height),
    #[error("missing vote at {0}")]
    MissingVote(Height),
    #[error("missing lock at {0}")]
    MissingLock(Height),
    #[error("no ancestor to build on below {0}")]
    NoAncestor(Height),
}

/// Vote recorded at a height.
#[derive(Clone, Debug)]
pub enum Vote {
    /// Vote for a proposal.
    Block(Arc<Prepare>),
    /// Vote for no block (the height was skipped).
    Nil,
}

/// Entry of the finalized chain.
#[derive(Clone, Debug)]
pub enum Finalized {
    Block(Block),
    Nil,
}

impl Finalized {
    /// Returns true if both entries finalize the same block (or are both nil).
    pub fn is_same(&self, other: &Finalized) -> bool {
        match (self, other) {
            (Finalized::Block(a), Finalized::Block(b)) => a.is_same(b),
            (Finalized::Nil, Finalized::Nil) => true,
            _ => false,
        }
    }

    pub fn block(&self) -> Option<&Block> {
        match self {
            Finalized::Block(block) => Some(block),
            Finalized::Nil => None,
        }
    }
}

/// Leader sub-state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not collecting votes for a proposal of our own.
    Idle,
    /// Collecting `VotePrepare` for our proposal at the given height.
    Proposing(Height),
}

/// Out-of-band lookup of another replica's lock table.
pub trait Backfill {
    /// Return the first peer in `peers` (other than the caller) with a lock at
    /// `height`, together with that lock.
    fn locked(&self, peers: &[PeerId], height: Height) -> Option<(PeerId, Arc<Confirm>)>;
}
