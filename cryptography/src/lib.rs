//! Content-address simulated blocks with deterministic digests.
//!
//! Signatures are intentionally absent: a quorum certificate in the simulation is a bare set of
//! signer identities, so the only primitive needed is a hash function to bind a block to its
//! payload and parent.

use std::{
    fmt::{Debug, Display},
    hash::Hash,
};

pub mod sha256;
pub use sha256::{hash, Sha256};

/// Fixed-size output of a [Hasher].
pub trait Digest:
    Copy + Eq + Ord + Hash + Debug + Display + AsRef<[u8]> + Send + Sync + 'static
{
}

/// Interface the simulation relies on for hashing.
///
/// This trait is required to implement the `Clone` trait because it is often
/// part of a struct that is cloned. In practice, implementations do not actually
/// clone the hasher state but users should not rely on this behavior and call `reset`
/// after cloning.
pub trait Hasher: Clone + Send + Sync + 'static {
    /// Digest generated by the hasher.
    type Digest: Digest;

    /// Create a new hasher.
    fn new() -> Self;

    /// Append message to previously recorded data.
    fn update(&mut self, message: &[u8]);

    /// Hash all recorded data and reset the hasher
    /// to the initial state.
    fn finalize(&mut self) -> Self::Digest;

    /// Reset the hasher without generating a hash.
    ///
    /// This function does not need to be called after `finalize`.
    fn reset(&mut self);
}
