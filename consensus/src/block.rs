//! Content-addressed chain entries.

use bytes::Bytes;
use motorway_cryptography::{sha256::Digest, Hasher, Sha256};
use std::fmt::{self, Display};

/// An immutable chain entry whose identity is its digest.
///
/// Equality and parentage are decided purely by digest comparison, so copies
/// received from different (possibly byzantine) peers can be compared safely.
#[derive(Clone, Debug)]
pub struct Block {
    value: Bytes,
    parent: Option<Digest>,
    digest: Digest,
}

impl Block {
    /// Create a block extending `parent` (or a genesis block if `None`).
    pub fn new(value: Bytes, parent: Option<&Block>) -> Self {
        let parent = parent.map(|parent| parent.digest);
        let digest = Self::compute_digest(&value, parent.as_ref());
        Self {
            value,
            parent,
            digest,
        }
    }

    /// Compute `H(value, parent)`.
    ///
    /// The value is length-prefixed so that no `(value, parent)` pair can be
    /// reinterpreted as another.
    pub fn compute_digest(value: &[u8], parent: Option<&Digest>) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(&(value.len() as u64).to_be_bytes());
        hasher.update(value);
        if let Some(parent) = parent {
            hasher.update(parent);
        }
        hasher.finalize()
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn parent(&self) -> Option<&Digest> {
        self.parent.as_ref()
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Returns true if `child` was built directly on top of this block.
    pub fn is_parent(&self, child: &Block) -> bool {
        child.parent == Some(self.digest)
    }

    /// Returns true if `other` has the same digest.
    pub fn is_same(&self, other: &Block) -> bool {
        self.digest == other.digest
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let genesis = Block::new(Bytes::from_static(b"genesis"), None);
        let again = Block::new(Bytes::from_static(b"genesis"), None);
        assert!(genesis.is_same(&again));
        assert!(genesis.parent().is_none());

        let child = Block::new(Bytes::from_static(b"B"), Some(&genesis));
        let twin = Block::new(Bytes::from_static(b"B"), Some(&again));
        assert!(child.is_same(&twin));
        assert_eq!(
            child.digest(),
            &Block::compute_digest(b"B", Some(genesis.digest()))
        );
    }

    #[test]
    fn test_digest_binds_inputs() {
        let genesis = Block::new(Bytes::from_static(b"genesis"), None);
        let other = Block::new(Bytes::from_static(b"other"), None);

        // Changing the value changes the digest
        let a = Block::new(Bytes::from_static(b"A"), Some(&genesis));
        let b = Block::new(Bytes::from_static(b"B"), Some(&genesis));
        assert!(!a.is_same(&b));

        // Changing the parent changes the digest
        let c = Block::new(Bytes::from_static(b"A"), Some(&other));
        assert!(!a.is_same(&c));

        // A parent is not the same as an absent parent
        let d = Block::new(Bytes::from_static(b"A"), None);
        assert!(!a.is_same(&d));

        // Length prefixing keeps the boundary between value and parent
        let e = Block::compute_digest(b"", Some(genesis.digest()));
        let f = Block::compute_digest(genesis.digest().as_ref(), None);
        assert_ne!(e, f);
    }

    #[test]
    fn test_parentage() {
        let genesis = Block::new(Bytes::from_static(b"genesis"), None);
        let child = Block::new(Bytes::from_static(b"B"), Some(&genesis));
        let grandchild = Block::new(Bytes::from_static(b"C"), Some(&child));
        assert!(genesis.is_parent(&child));
        assert!(child.is_parent(&grandchild));
        assert!(!genesis.is_parent(&grandchild));
        assert!(!child.is_parent(&genesis));
        assert_eq!(child.to_string(), child.digest().to_string());
    }
}
