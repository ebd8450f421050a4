//! At-most-once quorum confirmation.
//!
//! A vote box collects one vote per validator for a single vote identifier
//! and fires exactly once when a threshold of identical votes is reached.
//! Votes are opaque serialized values, so one box type covers validity
//! bools, realized fees, and structured retry votes alike.
//!
//! The box is the protocol's only at-most-once construct: every
//! Finish-stage ledger mutation is gated on the `first_confirmed_now`
//! signal, which a given box returns on exactly one `vote` call no matter
//! how many validators restate the winning value afterwards.

pub mod error;
pub mod evidence;
pub mod vote_box;

pub use error::VoteError;
pub use evidence::EvidenceVoteBox;
pub use vote_box::{VoteBox, VoteOutcome};

use serde::{Deserialize, Serialize};

/// `⌈2n/3⌉` — the quorum threshold for a validator set of size `n`.
pub fn majority23(n: usize) -> usize {
    (2 * n).div_ceil(3)
}

/// The persisted union of vote-box flavors.
///
/// Plain quorum votes (deposit validity, realized fees) use `Basic`;
/// order retries use `Evidence`, whose votes carry per-voter reports of
/// uncooperative validators. A closed enum keeps the persisted layout
/// exhaustively matched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AnyVoteBox {
    Basic(VoteBox),
    Evidence(EvidenceVoteBox),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority23_rounds_up() {
        assert_eq!(majority23(1), 1);
        assert_eq!(majority23(3), 2);
        assert_eq!(majority23(4), 3);
        assert_eq!(majority23(6), 4);
        assert_eq!(majority23(7), 5);
        assert_eq!(majority23(100), 67);
    }
}
