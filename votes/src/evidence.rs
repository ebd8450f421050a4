//! The evidence-carrying vote box used by order retries.
//!
//! A retry vote says "this batch is stuck, rewind it" and names the peer
//! validators the voter observed failing to cooperate. The value tally
//! works exactly like the basic box; on top of it, the box can reach a
//! *full* outcome — by evidence threshold or by collecting every
//! validator's vote — at which point the misbehaving validators are
//! reported to the behaviour collaborator exactly once.

use crate::vote_box::{VoteBox, VoteOutcome};
use crate::VoteError;
use harbor_types::ValidatorAddress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidenceVoteBox {
    pub inner: VoteBox,
    /// Per-voter evidence: the validators that voter saw fail to sign.
    pub evidence: Vec<(ValidatorAddress, Vec<ValidatorAddress>)>,
    /// Set once behaviour has been reported, so it fires at most once.
    pub reported: bool,
}

impl EvidenceVoteBox {
    pub fn new(confirm_threshold: usize) -> Result<Self, VoteError> {
        Ok(Self {
            inner: VoteBox::new(confirm_threshold)?,
            evidence: Vec::new(),
            reported: false,
        })
    }

    /// Record a vote together with the voter's evidence.
    ///
    /// Evidence follows the same mutability rule as the vote itself:
    /// replaceable until the box confirms, frozen after (late voters'
    /// evidence is still recorded).
    pub fn vote<V: Serialize>(
        &mut self,
        voter: &ValidatorAddress,
        value: &V,
        uncooperative: Vec<ValidatorAddress>,
    ) -> Result<VoteOutcome, VoteError> {
        let frozen = self.inner.confirmed;
        let outcome = self.inner.vote(voter, value)?;
        match self.evidence.iter_mut().find(|(v, _)| v == voter) {
            Some((_, ev)) => {
                if !frozen {
                    *ev = uncooperative;
                }
            }
            None => self.evidence.push((voter.clone(), uncooperative)),
        }
        Ok(outcome)
    }

    /// The full outcome, once available: for every validator in the
    /// current set, whether it behaved normally.
    ///
    /// Available when some validator is named uncooperative by at least
    /// `evidence_threshold` voters, or when every validator in the set has
    /// voted. Returns `None` until then. Callers gate behaviour reporting
    /// on this plus the `reported` flag.
    pub fn full_outcome(
        &self,
        validator_set: &[ValidatorAddress],
        evidence_threshold: usize,
    ) -> Option<Vec<(ValidatorAddress, bool)>> {
        let mut named: HashMap<&ValidatorAddress, usize> = HashMap::new();
        for (_, ev) in &self.evidence {
            for v in ev {
                *named.entry(v).or_insert(0) += 1;
            }
        }

        let by_threshold = named.values().any(|&c| c >= evidence_threshold);
        let all_voted = validator_set
            .iter()
            .all(|v| self.evidence.iter().any(|(voter, _)| voter == v));
        if !by_threshold && !all_voted {
            return None;
        }

        Some(
            validator_set
                .iter()
                .map(|v| {
                    let accusations = named.get(v).copied().unwrap_or(0);
                    (v.clone(), accusations < evidence_threshold)
                })
                .collect(),
        )
    }

    pub fn mark_reported(&mut self) {
        self.reported = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(name: &str) -> ValidatorAddress {
        ValidatorAddress::new(format!("hrbval{name}"))
    }

    fn set4() -> Vec<ValidatorAddress> {
        vec![val("1"), val("2"), val("3"), val("4")]
    }

    #[test]
    fn value_tally_behaves_like_basic_box() {
        let mut eb = EvidenceVoteBox::new(3).unwrap();
        eb.vote(&val("1"), &1u32, vec![]).unwrap();
        eb.vote(&val("2"), &1u32, vec![]).unwrap();
        let out = eb.vote(&val("3"), &1u32, vec![]).unwrap();
        assert!(out.first_confirmed_now);
    }

    #[test]
    fn no_full_outcome_before_threshold_or_all_votes() {
        let mut eb = EvidenceVoteBox::new(3).unwrap();
        eb.vote(&val("1"), &1u32, vec![val("4")]).unwrap();
        eb.vote(&val("2"), &1u32, vec![val("4")]).unwrap();
        assert!(eb.full_outcome(&set4(), 3).is_none());
    }

    #[test]
    fn full_outcome_by_evidence_threshold() {
        let mut eb = EvidenceVoteBox::new(3).unwrap();
        eb.vote(&val("1"), &1u32, vec![val("4")]).unwrap();
        eb.vote(&val("2"), &1u32, vec![val("4")]).unwrap();
        eb.vote(&val("3"), &1u32, vec![val("4")]).unwrap();

        let outcome = eb.full_outcome(&set4(), 3).unwrap();
        let v4 = outcome.iter().find(|(v, _)| v == &val("4")).unwrap();
        assert!(!v4.1);
        let v1 = outcome.iter().find(|(v, _)| v == &val("1")).unwrap();
        assert!(v1.1);
    }

    #[test]
    fn full_outcome_when_every_validator_voted() {
        let mut eb = EvidenceVoteBox::new(3).unwrap();
        for v in set4() {
            eb.vote(&v, &1u32, vec![]).unwrap();
        }
        let outcome = eb.full_outcome(&set4(), 3).unwrap();
        assert!(outcome.iter().all(|(_, normal)| *normal));
    }

    #[test]
    fn evidence_frozen_after_confirmation() {
        let mut eb = EvidenceVoteBox::new(2).unwrap();
        eb.vote(&val("1"), &1u32, vec![val("4")]).unwrap();
        eb.vote(&val("2"), &1u32, vec![val("4")]).unwrap();
        // Post-confirmation replacement attempt is ignored.
        eb.vote(&val("1"), &1u32, vec![]).unwrap();
        let ev1 = &eb.evidence.iter().find(|(v, _)| v == &val("1")).unwrap().1;
        assert_eq!(ev1, &vec![val("4")]);
    }
}
