//! Map heights to proposers.

use crate::Height;
use motorway_p2p::PeerId;

/// Deterministic mapping from a height to its committee and leader.
///
/// Implementations must be pure in `height`: every replica evaluates the
/// selector independently and must reach the same answer.
pub trait Selector: Clone {
    /// Leader responsible for proposing at `height`.
    fn leader(&self, height: Height) -> PeerId;

    /// Committee that votes at `height` (ordered and deduplicated).
    fn participants(&self, height: Height) -> &[PeerId];

    /// Returns true if `peer` is the leader at `height`.
    fn is_leader(&self, height: Height, peer: &PeerId) -> bool {
        self.leader(height) == *peer
    }
}

/// Rotate leadership through a static committee.
#[derive(Clone, Debug)]
pub struct RoundRobin {
    peers: Vec<PeerId>,
}

impl RoundRobin {
    /// Create a selector over `peers`.
    ///
    /// # Panics
    ///
    /// Panics if `peers` is empty.
    pub fn new(mut peers: Vec<PeerId>) -> Self {
        peers.sort();
        peers.dedup();
        assert!(!peers.is_empty(), "committee must not be empty");
        Self { peers }
    }
}

impl Selector for RoundRobin {
    fn leader(&self, height: Height) -> PeerId {
        let index = (height % self.peers.len() as u64) as usize;
        self.peers[index]
    }

    fn participants(&self, _: Height) -> &[PeerId] {
        &self.peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 0; "genesis")]
    #[test_case(1, 1; "first")]
    #[test_case(3, 3; "last")]
    #[test_case(4, 0; "wrap")]
    #[test_case(1_000_001, 1; "far")]
    fn test_round_robin(height: Height, expected: u32) {
        let selector = RoundRobin::new((0..4).map(PeerId::new).collect());
        assert_eq!(selector.leader(height), PeerId::new(expected));
        assert!(selector.is_leader(height, &PeerId::new(expected)));
        assert!(!selector.is_leader(height, &PeerId::new((expected + 1) % 4)));
    }

    #[test]
    fn test_participants_sorted() {
        let selector = RoundRobin::new(vec![
            PeerId::new(2),
            PeerId::new(0),
            PeerId::new(2),
            PeerId::new(1),
        ]);
        let expected = [PeerId::new(0), PeerId::new(1), PeerId::new(2)];
        assert_eq!(selector.participants(0), expected);
        assert_eq!(selector.participants(99), expected);
        assert_eq!(selector.leader(5), PeerId::new(2));
    }

    #[test]
    #[should_panic(expected = "committee must not be empty")]
    fn test_empty_committee() {
        RoundRobin::new(Vec::new());
    }
}
