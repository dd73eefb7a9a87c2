//! Messages exchanged by replicas and the quorum certificates that bind them.
//!
//! Every message carries the identity of its `sender`. Nested messages are
//! shared through [Arc] so that a certificate chain (a Commit certifying a
//! VoteConfirm for a Confirm wrapping a Prepare justified by an older
//! certificate) is cloned in constant time.

use crate::{block::Block, Height};
use motorway_p2p::PeerId;
use motorway_utils::is_quorum;
use std::{collections::BTreeSet, sync::Arc};

/// Proposal of `block` at `height`, justified by a certificate over `height - 1`.
#[derive(Clone, Debug)]
pub struct Prepare {
    pub sender: PeerId,
    pub height: Height,
    pub block: Block,

    /// Only the genesis proposal is unjustified.
    pub justification: Option<Justification>,
}

impl Prepare {
    /// Returns true if both proposals carry the same block at the same height.
    pub fn matches(&self, other: &Prepare) -> bool {
        self.height == other.height && self.block.is_same(&other.block)
    }
}

/// Vote for a [Prepare], sent to the leader of its height.
#[derive(Clone, Debug)]
pub struct VotePrepare {
    pub sender: PeerId,
    pub prepare: Arc<Prepare>,
}

/// Proof that a quorum voted for `prepare`.
#[derive(Clone, Debug)]
pub struct Confirm {
    pub sender: PeerId,
    pub prepare: Arc<Prepare>,
    pub certificate: Certificate<VotePrepare>,
}

/// Vote for a [Confirm] (a replica has locked on the underlying proposal).
#[derive(Clone, Debug)]
pub struct VoteConfirm {
    pub sender: PeerId,
    pub confirm: Arc<Confirm>,
}

/// Proof that a quorum locked on the proposal at `height`.
#[derive(Clone, Debug)]
pub struct Commit {
    pub sender: PeerId,
    pub height: Height,
    pub certificate: Certificate<VoteConfirm>,
}

/// Declaration that the sender gave up waiting for a proposal at `height`.
#[derive(Clone, Debug)]
pub struct Timeout {
    pub sender: PeerId,
    pub height: Height,

    /// Certificate of the sender's most recent lock, if any.
    ///
    /// Informational: it is never validated by recipients.
    pub certificate: Option<Certificate<VotePrepare>>,
}

/// Every message a replica may receive.
#[derive(Clone, Debug)]
pub enum Message {
    Prepare(Arc<Prepare>),
    VotePrepare(Arc<VotePrepare>),
    Confirm(Arc<Confirm>),
    VoteConfirm(Arc<VoteConfirm>),
    Commit(Arc<Commit>),
    Timeout(Arc<Timeout>),
}

impl Message {
    /// Identity the message claims to come from.
    pub fn sender(&self) -> PeerId {
        match self {
            Message::Prepare(prepare) => prepare.sender,
            Message::VotePrepare(vote) => vote.sender,
            Message::Confirm(confirm) => confirm.sender,
            Message::VoteConfirm(vote) => vote.sender,
            Message::Commit(commit) => commit.sender,
            Message::Timeout(timeout) => timeout.sender,
        }
    }

    /// Height the message refers to.
    pub fn height(&self) -> Height {
        match self {
            Message::Prepare(prepare) => prepare.height,
            Message::VotePrepare(vote) => vote.prepare.height,
            Message::Confirm(confirm) => confirm.prepare.height,
            Message::VoteConfirm(vote) => vote.confirm.prepare.height,
            Message::Commit(commit) => commit.height,
            Message::Timeout(timeout) => timeout.height,
        }
    }

    /// Short name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Prepare(_) => "prepare",
            Message::VotePrepare(_) => "vote_prepare",
            Message::Confirm(_) => "confirm",
            Message::VoteConfirm(_) => "vote_confirm",
            Message::Commit(_) => "commit",
            Message::Timeout(_) => "timeout",
        }
    }
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::VotePrepare {}
    impl Sealed for super::VoteConfirm {}
    impl Sealed for super::Timeout {}
}

/// Messages a [Certificate] may certify.
pub trait Certifiable: sealed::Sealed {
    /// Content equality (ignores the sender).
    fn matches(&self, other: &Self) -> bool;

    /// Height the certified message refers to.
    fn height(&self) -> Height;
}

impl Certifiable for VotePrepare {
    fn matches(&self, other: &Self) -> bool {
        self.prepare.matches(&other.prepare)
    }

    fn height(&self) -> Height {
        self.prepare.height
    }
}

impl Certifiable for VoteConfirm {
    fn matches(&self, other: &Self) -> bool {
        self.confirm.prepare.matches(&other.confirm.prepare)
    }

    fn height(&self) -> Height {
        self.confirm.prepare.height
    }
}

impl Certifiable for Timeout {
    fn matches(&self, other: &Self) -> bool {
        self.height == other.height
    }

    fn height(&self) -> Height {
        self.height
    }
}

/// A quorum certificate: `message` together with the set of peers that sent it.
///
/// Signatures are not modeled. The signer set stands in for an aggregate signature
/// and is trusted as-is.
#[derive(Clone, Debug)]
pub struct Certificate<K> {
    message: Arc<K>,
    signers: BTreeSet<PeerId>,
}

impl<K: Certifiable> Certificate<K> {
    pub fn new(message: Arc<K>, signers: BTreeSet<PeerId>) -> Self {
        Self { message, signers }
    }

    /// Returns true if more than two-thirds of `total` peers signed.
    pub fn check(&self, total: usize) -> bool {
        is_quorum(self.signers.len(), total)
    }

    /// Returns true if `other` has the same content as the certified message.
    pub fn matches(&self, other: &K) -> bool {
        self.message.matches(other)
    }

    pub fn message(&self) -> &Arc<K> {
        &self.message
    }

    pub fn signers(&self) -> &BTreeSet<PeerId> {
        &self.signers
    }

    pub fn height(&self) -> Height {
        self.message.height()
    }
}

/// Justification for extending the chain at `height + 1`.
#[derive(Clone, Debug)]
pub enum Justification {
    /// A quorum locked on the proposal at `height`.
    Confirmed(Certificate<VoteConfirm>),
    /// A quorum timed out at `height`.
    TimedOut(Certificate<Timeout>),
}

impl Justification {
    pub fn check(&self, total: usize) -> bool {
        match self {
            Justification::Confirmed(certificate) => certificate.check(total),
            Justification::TimedOut(certificate) => certificate.check(total),
        }
    }

    /// Height that was certified.
    pub fn height(&self) -> Height {
        match self {
            Justification::Confirmed(certificate) => certificate.height(),
            Justification::TimedOut(certificate) => certificate.height(),
        }
    }
}
