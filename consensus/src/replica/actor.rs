use super::{
    metrics::{Peer, PeerMessage},
    Backfill, Config, Error, Finalized, Metrics, Phase, Vote,
};
use crate::{
    block::Block,
    genesis::Genesis,
    selector::Selector,
    types::{
        Certificate, Commit, Confirm, Justification, Message, Prepare, Timeout, VoteConfirm,
        VotePrepare,
    },
    Height,
};
use bytes::Bytes;
use motorway_p2p::{PeerId, Recipients, Sender};
use motorway_utils::is_quorum;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::{
    collections::{BTreeMap, BTreeSet},
    mem,
    sync::Arc,
};
use tracing::{debug, info, trace, warn};

/// Size of randomly generated block payloads.
const PAYLOAD_SIZE: usize = 8;

/// Signers collected by a leader, tagged with the height they refer to.
///
/// The same set is reused for every round a leader drives. Signers for an older
/// height are ignored and signers for a newer height start a fresh round.
#[derive(Default)]
struct Votes {
    height: Height,
    signers: BTreeSet<PeerId>,
}

impl Votes {
    fn add(&mut self, height: Height, signer: PeerId) -> Option<usize> {
        if height < self.height {
            return None;
        }
        if height > self.height {
            self.height = height;
            self.signers.clear();
        }
        self.signers.insert(signer);
        Some(self.signers.len())
    }

    fn take(&mut self) -> BTreeSet<PeerId> {
        mem::take(&mut self.signers)
    }

    fn reset(&mut self, height: Height) {
        self.height = height;
        self.signers.clear();
    }
}

/// A replica of the replicated state machine.
///
/// Every handler runs to completion synchronously. Outbound messages are handed to
/// the context and only reach other replicas once the network delivers them.
pub struct Replica<S: Selector> {
    me: PeerId,
    selector: S,
    peers: Vec<PeerId>,
    others: Vec<PeerId>,

    timeout_delay: u64,
    broadcast_timeout: bool,
    confirm_to_next_leader: bool,

    byzantine: bool,
    rng: StdRng,
    clock: u64,

    voted: BTreeMap<Height, Vote>,
    locked: BTreeMap<Height, Arc<Confirm>>,
    committed: BTreeMap<Height, Finalized>,
    votes: Votes,
    timeouts: BTreeMap<Height, BTreeSet<PeerId>>,
    phase: Phase,

    metrics: Metrics,
    label: Peer,
}

impl<S: Selector> Replica<S> {
    /// Create a new replica with an empty history.
    ///
    /// Call [Replica::seed] before processing any message.
    pub fn new(cfg: Config<S>) -> Self {
        cfg.assert();
        let mut peers = cfg.peers;
        peers.sort();
        peers.dedup();
        let others = peers.iter().filter(|p| **p != cfg.me).copied().collect();
        Self {
            me: cfg.me,
            selector: cfg.selector,
            peers,
            others,

            timeout_delay: cfg.timeout_delay,
            broadcast_timeout: cfg.broadcast_timeout,
            confirm_to_next_leader: cfg.confirm_to_next_leader,

            byzantine: false,
            rng: StdRng::seed_from_u64(cfg.seed),
            clock: 0,

            voted: BTreeMap::new(),
            locked: BTreeMap::new(),
            committed: BTreeMap::new(),
            votes: Votes::default(),
            timeouts: BTreeMap::new(),
            phase: Phase::Idle,

            label: Peer::new(&cfg.me),
            metrics: cfg.metrics,
        }
    }

    /// Record the genesis proposal as voted, locked and committed at height 0.
    pub fn seed(&mut self, genesis: &Genesis) {
        self.voted
            .insert(0, Vote::Block(genesis.prepare().clone()));
        self.locked.insert(0, genesis.confirm().clone());
        self.committed
            .insert(0, Finalized::Block(genesis.block().clone()));
    }

    /// If this replica leads height 1, propose on top of genesis.
    pub fn kickoff<C>(&mut self, ctx: &mut C, genesis: &Genesis) -> Result<(), Error>
    where
        C: Sender<Message = Message> + Backfill,
    {
        if self.byzantine || !self.selector.is_leader(1, &self.me) {
            return Ok(());
        }
        self.enter_proposing(1);
        let justification = Justification::Confirmed(genesis.certificate().clone());
        let value = self.payload();
        self.propose_new_block(ctx, 1, justification, value)
    }

    /// Advance the local timer by one tick, timing out if no vote was cast recently.
    pub fn tick<C>(&mut self, ctx: &mut C)
    where
        C: Sender<Message = Message> + Backfill,
    {
        if self.byzantine {
            return;
        }
        self.clock += 1;
        if self.clock < self.timeout_delay {
            return;
        }

        // Give up on the next height
        let height = self.height() + 1;
        let certificate = self
            .locked
            .values()
            .next_back()
            .map(|confirm| confirm.certificate.clone());
        let timeout = Message::Timeout(Arc::new(Timeout {
            sender: self.me,
            height,
            certificate,
        }));
        let recipients = if self.broadcast_timeout {
            Recipients::Some(self.peers.clone())
        } else {
            Recipients::One(self.selector.leader(height + 1))
        };
        ctx.send(recipients, timeout);
        debug!(peer = %self.me, height, "timed out");
        self.metrics.timeouts.get_or_create(&self.label).inc();

        // Timing out is irrevocable: vote nil and restart the timer
        self.clock = 0;
        self.voted.insert(height, Vote::Nil);
    }

    /// Handle a message delivered by the network.
    ///
    /// Invalid messages are logged and dropped.
    pub fn process<C>(&mut self, ctx: &mut C, from: PeerId, message: Message)
    where
        C: Sender<Message = Message> + Backfill,
    {
        if self.byzantine {
            return;
        }
        let label = PeerMessage::new(&self.me, &message);
        self.metrics.received.get_or_create(&label).inc();
        trace!(
            peer = %self.me,
            %from,
            kind = message.kind(),
            height = message.height(),
            "received message"
        );
        let result = match message {
            Message::Prepare(prepare) => self.propose(ctx, prepare),
            Message::VotePrepare(vote) => self.on_vote_prepare(ctx, vote),
            Message::Confirm(confirm) => self.confirm(ctx, confirm),
            Message::VoteConfirm(vote) => self.on_vote_confirm(ctx, vote),
            Message::Commit(commit) => self.on_commit(ctx, commit),
            Message::Timeout(timeout) => self.on_timeout(ctx, timeout),
        };
        let Err(err) = result else {
            return;
        };
        self.metrics.rejected.get_or_create(&label).inc();
        match err {
            Error::NoAncestor(_) | Error::MissingLock(_) => {
                warn!(peer = %self.me, %from, ?err, "data unavailable")
            }
            _ => debug!(peer = %self.me, %from, ?err, "dropped message"),
        }
    }

    /// Vote for a proposal.
    pub fn propose<C>(&mut self, ctx: &mut C, prepare: Arc<Prepare>) -> Result<(), Error>
    where
        C: Sender<Message = Message> + Backfill,
    {
        // Never vote twice at the same height
        let height = prepare.height;
        let current = self.height();
        if current >= height {
            return Err(Error::AlreadyVoted { height, current });
        }

        let leader = self.selector.leader(height);
        if prepare.sender != leader {
            return Err(Error::InvalidProposer {
                height,
                expected: leader,
                actual: prepare.sender,
            });
        }
        let Some(justification) = &prepare.justification else {
            return Err(Error::MissingJustification(height));
        };
        let total = self.selector.participants(height).len();
        if !justification.check(total) {
            return Err(Error::InsufficientSigners(height));
        }
        let parent = height - 1;
        if justification.height() != parent {
            return Err(Error::HeightMismatch {
                expected: parent,
                actual: justification.height(),
            });
        }
        match justification {
            Justification::Confirmed(certificate) => {
                if !self.locked.contains_key(&parent) {
                    if let Some((peer, confirm)) = ctx.locked(&self.peers, parent) {
                        warn!(peer = %self.me, from = %peer, height = parent, "backfilled lock");
                        self.locked.insert(parent, confirm);
                    }
                }
                let lock = self.locked.get(&parent).ok_or(Error::MissingLock(parent))?;
                let certified = &certificate.message().confirm.prepare.block;
                if !lock.prepare.block.is_same(certified) {
                    return Err(Error::BlockMismatch(parent));
                }
            }
            Justification::TimedOut(_) => {
                // Only the height linkage is checked. The committed prefix is not: a
                // replica that voted a block at the timed out height finalizes that
                // block below, while the leader that closed the height finalizes nil.
            }
        }

        // Vote
        self.voted.insert(height, Vote::Block(prepare.clone()));
        self.timeouts = self.timeouts.split_off(&height);
        self.clock = 0;
        debug!(peer = %self.me, height, block = %prepare.block, "voted");

        // A proposal at height means its parent can be finalized
        self.commit_block(parent);

        let vote = Message::VotePrepare(Arc::new(VotePrepare {
            sender: self.me,
            prepare,
        }));
        ctx.send(Recipients::One(leader), vote);
        Ok(())
    }

    /// Collect votes for our own proposal.
    pub fn on_vote_prepare<C>(&mut self, ctx: &mut C, vote: Arc<VotePrepare>) -> Result<(), Error>
    where
        C: Sender<Message = Message> + Backfill,
    {
        let height = vote.prepare.height;
        if self.phase != Phase::Proposing(height) || !self.selector.is_leader(height, &self.me) {
            return Ok(());
        }
        match self.voted.get(&height) {
            Some(Vote::Block(ours)) if ours.matches(&vote.prepare) => {}
            _ => return Err(Error::VoteMismatch(height)),
        }
        let Some(count) = self.votes.add(height, vote.sender) else {
            return Ok(());
        };
        if !is_quorum(count, self.selector.participants(height).len()) {
            return Ok(());
        }

        // Confirm the proposal
        self.phase = Phase::Idle;
        let signers = self.votes.take();
        info!(peer = %self.me, height, signers = signers.len(), "assembled prepare certificate");
        let confirm = Arc::new(Confirm {
            sender: self.me,
            prepare: vote.prepare.clone(),
            certificate: Certificate::new(vote, signers),
        });
        self.confirm(ctx, confirm.clone())?;
        ctx.send(Recipients::Some(self.others.clone()), Message::Confirm(confirm));
        Ok(())
    }

    /// Lock on a proposal certified by a quorum of votes.
    pub fn confirm<C>(&mut self, ctx: &mut C, confirm: Arc<Confirm>) -> Result<(), Error>
    where
        C: Sender<Message = Message> + Backfill,
    {
        let height = confirm.prepare.height;
        let leader = self.selector.leader(height);
        if confirm.sender != leader {
            return Err(Error::InvalidProposer {
                height,
                expected: leader,
                actual: confirm.sender,
            });
        }
        if !self.voted.contains_key(&height) {
            debug!(peer = %self.me, height, "confirm for unknown proposal, catching up");
            self.propose(ctx, confirm.prepare.clone())?;
        }
        match self.voted.get(&height) {
            Some(Vote::Block(ours)) if ours.matches(&confirm.prepare) => {}
            Some(_) => return Err(Error::VoteMismatch(height)),
            None => return Err(Error::MissingVote(height)),
        }
        if !confirm.certificate.message().prepare.matches(&confirm.prepare) {
            return Err(Error::BlockMismatch(height));
        }
        if !confirm
            .certificate
            .check(self.selector.participants(height).len())
        {
            return Err(Error::InsufficientSigners(height));
        }

        // Lock
        self.locked.insert(height, confirm.clone());
        debug!(peer = %self.me, height, "locked");
        let target = if self.confirm_to_next_leader {
            self.selector.leader(height + 1)
        } else {
            leader
        };
        let vote = Message::VoteConfirm(Arc::new(VoteConfirm {
            sender: self.me,
            confirm,
        }));
        ctx.send(Recipients::One(target), vote);
        Ok(())
    }

    /// Collect confirm votes, either to commit our own proposal or to extend it.
    pub fn on_vote_confirm<C>(&mut self, ctx: &mut C, vote: Arc<VoteConfirm>) -> Result<(), Error>
    where
        C: Sender<Message = Message> + Backfill,
    {
        // Late votes arriving after we started proposing are irrelevant
        if self.phase != Phase::Idle {
            return Ok(());
        }
        let height = vote.confirm.prepare.height;
        let total = self.selector.participants(height).len();

        if self.selector.is_leader(height, &self.me) {
            let Some(count) = self.votes.add(height, vote.sender) else {
                return Ok(());
            };
            if !is_quorum(count, total) {
                return Ok(());
            }
            let signers = self.votes.take();
            info!(peer = %self.me, height, signers = signers.len(), "assembled commit certificate");
            let commit = Arc::new(Commit {
                sender: self.me,
                height,
                certificate: Certificate::new(vote, signers),
            });
            self.on_commit(ctx, commit.clone())?;
            ctx.send(Recipients::Some(self.others.clone()), Message::Commit(commit));
            return Ok(());
        }

        let next = height + 1;
        if !self.selector.is_leader(next, &self.me) {
            return Ok(());
        }
        let Some(count) = self.votes.add(height, vote.sender) else {
            return Ok(());
        };
        if !is_quorum(count, total) {
            return Ok(());
        }

        // Extend the chain without waiting for a commit
        let signers = self.votes.take();
        self.enter_proposing(next);
        let justification = Justification::Confirmed(Certificate::new(vote, signers));
        let value = self.payload();
        self.propose_new_block(ctx, next, justification, value)
    }

    /// Finalize a height certified by a quorum of confirm votes.
    pub fn on_commit<C>(&mut self, ctx: &mut C, commit: Arc<Commit>) -> Result<(), Error>
    where
        C: Sender<Message = Message> + Backfill,
    {
        let height = commit.height;
        let leader = self.selector.leader(height);
        if commit.sender != leader {
            return Err(Error::InvalidProposer {
                height,
                expected: leader,
                actual: commit.sender,
            });
        }
        let confirm = &commit.certificate.message().confirm;
        if confirm.prepare.height != height {
            return Err(Error::HeightMismatch {
                expected: height,
                actual: confirm.prepare.height,
            });
        }
        if !commit
            .certificate
            .check(self.selector.participants(height).len())
        {
            return Err(Error::InsufficientSigners(height));
        }

        // A certified block at an already finalized height (a nil finalized after a
        // timeout quorum, or another block) means a quorum contradicted itself
        if let Some(finalized) = self.committed.get(&height) {
            let certified = Finalized::Block(confirm.prepare.block.clone());
            if !finalized.is_same(&certified) {
                warn!(
                    peer = %self.me,
                    height,
                    ?finalized,
                    block = %confirm.prepare.block,
                    "conflicting commit"
                );
                self.metrics.equivocations.get_or_create(&self.label).inc();
            }
            return Ok(());
        }

        if !self.locked.contains_key(&height) {
            debug!(peer = %self.me, height, "commit for unknown lock, catching up");
            self.confirm(ctx, confirm.clone())?;
        }
        match self.voted.get(&height) {
            Some(Vote::Block(ours)) if ours.matches(&confirm.prepare) => {}
            Some(_) => return Err(Error::VoteMismatch(height)),
            None => return Err(Error::MissingVote(height)),
        }
        self.commit_block(height);

        // Reuse the commit certificate to extend the chain
        let next = height + 1;
        if self.selector.is_leader(next, &self.me) && self.phase == Phase::Idle {
            self.enter_proposing(next);
            let justification = Justification::Confirmed(commit.certificate.clone());
            let value = self.payload();
            self.propose_new_block(ctx, next, justification, value)?;
        }
        Ok(())
    }

    /// Record a timeout and, if we lead the following height, skip the timed out one.
    pub fn on_timeout<C>(&mut self, ctx: &mut C, timeout: Arc<Timeout>) -> Result<(), Error>
    where
        C: Sender<Message = Message> + Backfill,
    {
        let height = timeout.height;
        if self.height() > height {
            return Ok(());
        }
        let signers = self.timeouts.entry(height).or_default();
        signers.insert(timeout.sender);
        let count = signers.len();

        let next = height + 1;
        if !self.selector.is_leader(next, &self.me) {
            return Ok(());
        }
        if !is_quorum(count, self.selector.participants(height).len()) {
            return Ok(());
        }

        // Close the timed out height
        self.voted.insert(height, Vote::Nil);
        self.locked.remove(&height);
        if self.phase != Phase::Idle {
            return Ok(());
        }
        let signers = self.timeouts.get(&height).cloned().unwrap_or_default();
        info!(peer = %self.me, height, signers = signers.len(), "assembled timeout certificate");
        self.enter_proposing(next);
        let justification = Justification::TimedOut(Certificate::new(timeout, signers));
        let value = self.payload();
        self.propose_new_block(ctx, next, justification, value)
    }

    /// Finalize whatever we voted at `height` (a no-op if already finalized).
    pub fn commit_block(&mut self, height: Height) {
        if self.committed.contains_key(&height) {
            return;
        }
        let finalized = match self.voted.get(&height) {
            Some(Vote::Block(prepare)) => {
                info!(peer = %self.me, height, block = %prepare.block, "committed block");
                Finalized::Block(prepare.block.clone())
            }
            Some(Vote::Nil) => {
                info!(peer = %self.me, height, "committed nil");
                Finalized::Nil
            }
            None => {
                warn!(peer = %self.me, height, "missing vote, skipping commit");
                return;
            }
        };
        self.committed.insert(height, finalized);
        self.metrics.commits.get_or_create(&self.label).inc();
    }

    /// Build a block on the most recent block we voted for below `height` and
    /// broadcast it (voting for it ourselves).
    ///
    /// Returns to [Phase::Idle] without broadcasting if there is no block to build
    /// on or we already voted at `height`.
    pub fn propose_new_block<C>(
        &mut self,
        ctx: &mut C,
        height: Height,
        justification: Justification,
        value: Bytes,
    ) -> Result<(), Error>
    where
        C: Sender<Message = Message> + Backfill,
    {
        let Some(parent) = self
            .voted
            .range(..height)
            .rev()
            .find_map(|(_, vote)| match vote {
                Vote::Block(prepare) => Some(&prepare.block),
                Vote::Nil => None,
            })
        else {
            self.phase = Phase::Idle;
            return Err(Error::NoAncestor(height));
        };
        let block = Block::new(value, Some(parent));
        let prepare = Arc::new(Prepare {
            sender: self.me,
            height,
            block,
            justification: Some(justification),
        });

        // A proposal we cannot vote for ourselves never gathers our vote back
        match self.propose(ctx, prepare.clone()) {
            Ok(()) => {}
            Err(Error::AlreadyVoted { current, .. }) => {
                self.phase = Phase::Idle;
                debug!(peer = %self.me, height, current, "already voted, skipping proposal");
                return Ok(());
            }
            Err(err) => {
                self.phase = Phase::Idle;
                return Err(err);
            }
        }
        info!(peer = %self.me, height, block = %prepare.block, "proposing block");
        self.metrics.proposals.get_or_create(&self.label).inc();
        ctx.send(Recipients::Some(self.others.clone()), Message::Prepare(prepare));
        Ok(())
    }

    /// Stop (or resume) reacting to the timer and to delivered messages.
    pub fn set_byzantine(&mut self, byzantine: bool) {
        if byzantine != self.byzantine {
            info!(peer = %self.me, byzantine, "toggled byzantine");
        }
        self.byzantine = byzantine;
    }

    fn enter_proposing(&mut self, height: Height) {
        self.phase = Phase::Proposing(height);
        self.votes.reset(height);
    }

    fn payload(&mut self) -> Bytes {
        let mut value = [0u8; PAYLOAD_SIZE];
        self.rng.fill_bytes(&mut value);
        Bytes::copy_from_slice(&value)
    }

    pub fn me(&self) -> PeerId {
        self.me
    }

    pub fn is_byzantine(&self) -> bool {
        self.byzantine
    }

    /// Highest height voted on (block or nil).
    pub fn height(&self) -> Height {
        self.voted.keys().next_back().copied().unwrap_or(0)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Ticks since the last vote (or timeout).
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn voted_at(&self, height: Height) -> Option<&Vote> {
        self.voted.get(&height)
    }

    pub fn locked_at(&self, height: Height) -> Option<&Arc<Confirm>> {
        self.locked.get(&height)
    }

    /// Finalized chain (may have holes).
    pub fn committed(&self) -> &BTreeMap<Height, Finalized> {
        &self.committed
    }

    /// Peers that sent a timeout for `height`.
    pub fn timeouts_at(&self, height: Height) -> Option<&BTreeSet<PeerId>> {
        self.timeouts.get(&height)
    }
}
