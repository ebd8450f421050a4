//! The basic majority vote box.

use crate::VoteError;
use harbor_types::ValidatorAddress;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One validator's recorded vote: the serialized value it reported.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoteItem {
    pub voter: ValidatorAddress,
    pub vote: Vec<u8>,
}

/// What one `vote` call produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteOutcome {
    /// True on exactly the call that crossed the threshold.
    pub first_confirmed_now: bool,
    pub confirmed: bool,
    /// Voters whose recorded value equals the winning value; empty until
    /// confirmed.
    pub valid_voters: Vec<ValidatorAddress>,
}

/// Collects one vote per validator and confirms once a threshold of
/// identical votes is reached.
///
/// Pre-confirmation a validator may change its vote (the entry is
/// replaced); post-confirmation existing entries are frozen, but late
/// voters are still recorded so the valid-voter set keeps growing.
/// `result` and `confirmed` never change once set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoteBox {
    pub confirm_threshold: usize,
    pub items: Vec<VoteItem>,
    pub confirmed: bool,
    pub result: Option<Vec<u8>>,
}

impl VoteBox {
    pub fn new(confirm_threshold: usize) -> Result<Self, VoteError> {
        if confirm_threshold == 0 {
            return Err(VoteError::ZeroThreshold);
        }
        Ok(Self {
            confirm_threshold,
            items: Vec::new(),
            confirmed: false,
            result: None,
        })
    }

    /// Record `voter`'s vote for `value`.
    pub fn vote<V: Serialize>(
        &mut self,
        voter: &ValidatorAddress,
        value: &V,
    ) -> Result<VoteOutcome, VoteError> {
        let encoded = bincode::serialize(value)?;
        Ok(self.vote_raw(voter, encoded))
    }

    /// Record a pre-serialized vote. The serialized form is the grouping
    /// key: two votes agree iff their bytes are identical.
    pub fn vote_raw(&mut self, voter: &ValidatorAddress, encoded: Vec<u8>) -> VoteOutcome {
        if self.confirmed {
            // Frozen: existing entries never change, late voters are
            // appended so they count toward the valid-voter set.
            if !self.items.iter().any(|i| &i.voter == voter) {
                self.items.push(VoteItem {
                    voter: voter.clone(),
                    vote: encoded,
                });
            }
            return VoteOutcome {
                first_confirmed_now: false,
                confirmed: true,
                valid_voters: self.valid_voters(),
            };
        }

        match self.items.iter_mut().find(|i| &i.voter == voter) {
            Some(item) => item.vote = encoded,
            None => self.items.push(VoteItem {
                voter: voter.clone(),
                vote: encoded,
            }),
        }

        let winner = self.tally();
        if let Some(value) = winner {
            self.confirmed = true;
            self.result = Some(value);
            return VoteOutcome {
                first_confirmed_now: true,
                confirmed: true,
                valid_voters: self.valid_voters(),
            };
        }

        VoteOutcome {
            first_confirmed_now: false,
            confirmed: false,
            valid_voters: Vec::new(),
        }
    }

    /// Group votes by serialized value; return the first value whose group
    /// reached the threshold.
    fn tally(&self) -> Option<Vec<u8>> {
        let mut groups: HashMap<&[u8], usize> = HashMap::new();
        for item in &self.items {
            let count = groups.entry(item.vote.as_slice()).or_insert(0);
            *count += 1;
            if *count >= self.confirm_threshold {
                return Some(item.vote.clone());
            }
        }
        None
    }

    /// Voters whose recorded value equals the winning value.
    pub fn valid_voters(&self) -> Vec<ValidatorAddress> {
        match &self.result {
            Some(result) => self
                .items
                .iter()
                .filter(|i| &i.vote == result)
                .map(|i| i.voter.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Decode the winning value, if confirmed.
    pub fn result<V: DeserializeOwned>(&self) -> Result<Option<V>, VoteError> {
        match &self.result {
            Some(bytes) => Ok(Some(bincode::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of distinct voters recorded.
    pub fn voter_count(&self) -> usize {
        self.items.len()
    }
}
