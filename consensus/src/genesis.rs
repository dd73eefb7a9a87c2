//! Bootstrap every replica from a shared, pre-finalized height 0.

use crate::{
    block::Block,
    selector::Selector,
    types::{Certificate, Confirm, Prepare, VoteConfirm, VotePrepare},
};
use bytes::Bytes;
use std::{collections::BTreeSet, sync::Arc};

/// Payload of the genesis block.
pub const GENESIS_VALUE: &[u8] = b"genesis";

/// Height 0 as every replica agrees on it before the simulation starts.
///
/// The proposal is attributed to the leader of height 0 and certified by the
/// whole committee, so the leader of height 1 can justify its first proposal
/// without any special casing.
#[derive(Clone, Debug)]
pub struct Genesis {
    prepare: Arc<Prepare>,
    confirm: Arc<Confirm>,
    certificate: Certificate<VoteConfirm>,
}

impl Genesis {
    pub fn new<S: Selector>(selector: &S) -> Self {
        let leader = selector.leader(0);
        let signers: BTreeSet<_> = selector.participants(0).iter().copied().collect();

        let prepare = Arc::new(Prepare {
            sender: leader,
            height: 0,
            block: Block::new(Bytes::from_static(GENESIS_VALUE), None),
            justification: None,
        });
        let vote = Arc::new(VotePrepare {
            sender: leader,
            prepare: prepare.clone(),
        });
        let confirm = Arc::new(Confirm {
            sender: leader,
            prepare: prepare.clone(),
            certificate: Certificate::new(vote, signers.clone()),
        });
        let vote = Arc::new(VoteConfirm {
            sender: leader,
            confirm: confirm.clone(),
        });
        Self {
            prepare,
            confirm,
            certificate: Certificate::new(vote, signers),
        }
    }

    pub fn block(&self) -> &Block {
        &self.prepare.block
    }

    pub fn prepare(&self) -> &Arc<Prepare> {
        &self.prepare
    }

    pub fn confirm(&self) -> &Arc<Confirm> {
        &self.confirm
    }

    /// Certificate justifying the proposal at height 1.
    pub fn certificate(&self) -> &Certificate<VoteConfirm> {
        &self.certificate
    }
}
