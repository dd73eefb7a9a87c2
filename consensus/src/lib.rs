//! Order opaque blocks in a Byzantine environment with a three-phase protocol.
//!
//! A rotating leader proposes (Prepare), a quorum votes and the leader certifies the
//! votes (Confirm), a quorum locks and the leader certifies the locks (Commit). A
//! proposal at height `h` finalizes whatever was voted at `h - 1`, so under a
//! stable leader rotation every phase of one height overlaps with the next.
//!
//! # Status
//!
//! The protocol is only exercised inside the discrete-time network simulator
//! (`motorway-p2p::simulated`). Certificates are bare signer sets: there is no
//! real cryptography.

pub mod block;
pub mod genesis;
#[cfg(test)]
pub mod mocks;
pub mod replica;
pub mod selector;
pub mod types;

/// Index of a slot in the chain.
pub type Height = u64;
