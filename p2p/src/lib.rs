//! Deliver messages between simulated peers with sampled latency and bounded bandwidth.
//!
//! Peers are identified by a stable [PeerId] (an index into the committee) rather than by
//! reference, so any component can name a peer without holding on to it.

use std::fmt::{self, Display};

pub mod simulated;

/// Stable identity of a participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(u32);

impl PeerId {
    /// Create an identity from a committee index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position of the peer in the committee.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for PeerId {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Enum indicating the set of recipients to send a message to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipients {
    All,
    Some(Vec<PeerId>),
    One(PeerId),
}

/// Interface for sending messages to a set of recipients.
pub trait Sender {
    /// Message carried by the sender.
    type Message;

    /// Send a message to a set of recipients.
    ///
    /// Returns the recipients the message was accepted for (unknown recipients
    /// are silently skipped).
    fn send(&mut self, recipients: Recipients, message: Self::Message) -> Vec<PeerId>;
}
