//! Vote box storage.
//!
//! Boxes are keyed by vote ID and never deleted by the protocol itself;
//! a height index entry written at creation lets the node's retention
//! sweep prune old boxes later.

use crate::keys::{composite, height_bytes, prefix};
use crate::kv::KvStore;
use crate::StoreError;
use harbor_types::BlockHeight;
use harbor_votes::AnyVoteBox;

pub struct VoteStore<'a, S: KvStore> {
    kv: &'a S,
}

fn box_key(vote_id: &str) -> Vec<u8> {
    composite(prefix::VOTE_BOX, &[vote_id.as_bytes()])
}

fn height_index_key(height: BlockHeight, vote_id: &str) -> Vec<u8> {
    composite(
        prefix::VOTE_HEIGHT_INDEX,
        &[&height_bytes(height), vote_id.as_bytes()],
    )
}

impl<'a, S: KvStore> VoteStore<'a, S> {
    pub fn new(kv: &'a S) -> Self {
        Self { kv }
    }

    pub fn get_box(&self, vote_id: &str) -> Result<Option<AnyVoteBox>, StoreError> {
        match self.kv.get(&box_key(vote_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist a box. The height index entry is written once, when the box
    /// first appears, recording its creation height.
    pub fn set_box(
        &self,
        vote_id: &str,
        vote_box: &AnyVoteBox,
        height: BlockHeight,
    ) -> Result<(), StoreError> {
        let key = box_key(vote_id);
        let fresh = self.kv.get(&key)?.is_none();
        self.kv.set(&key, &bincode::serialize(vote_box)?)?;
        if fresh {
            self.kv
                .set(&height_index_key(height, vote_id), vote_id.as_bytes())?;
        }
        Ok(())
    }

    /// Delete every box created strictly below `cutoff`. Returns how many
    /// boxes were removed. This is the node's retention sweep, not a
    /// protocol action.
    pub fn prune_below(&self, cutoff: BlockHeight) -> Result<usize, StoreError> {
        let mut removed = 0;
        for (key, value) in self.kv.scan_prefix(&[prefix::VOTE_HEIGHT_INDEX])? {
            // Key layout: prefix byte, len(8), 8 height bytes, then the id.
            let height_bytes: [u8; 8] = key[2..10]
                .try_into()
                .map_err(|_| StoreError::Serialization("bad height index key".into()))?;
            if u64::from_be_bytes(height_bytes) >= cutoff {
                break;
            }
            let vote_id = String::from_utf8(value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            self.kv.delete(&box_key(&vote_id))?;
            self.kv.delete(&key)?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKvStore;
    use harbor_types::ValidatorAddress;
    use harbor_votes::VoteBox;

    fn basic_box() -> AnyVoteBox {
        let mut vb = VoteBox::new(2).unwrap();
        vb.vote(&ValidatorAddress::new("hrbval1"), &true).unwrap();
        AnyVoteBox::Basic(vb)
    }

    #[test]
    fn box_roundtrips() {
        let kv = MemKvStore::new();
        let store = VoteStore::new(&kv);
        store.set_box("order-1", &basic_box(), 5).unwrap();
        let got = store.get_box("order-1").unwrap().unwrap();
        match got {
            AnyVoteBox::Basic(vb) => assert_eq!(vb.voter_count(), 1),
            _ => panic!("wrong flavor"),
        }
    }

    #[test]
    fn prune_removes_only_older_boxes() {
        let kv = MemKvStore::new();
        let store = VoteStore::new(&kv);
        store.set_box("old", &basic_box(), 10).unwrap();
        store.set_box("new", &basic_box(), 20).unwrap();

        let removed = store.prune_below(15).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_box("old").unwrap().is_none());
        assert!(store.get_box("new").unwrap().is_some());
    }

    #[test]
    fn creation_height_sticks_across_updates() {
        let kv = MemKvStore::new();
        let store = VoteStore::new(&kv);
        store.set_box("b", &basic_box(), 10).unwrap();
        // Later update at a higher height must not re-index the box.
        store.set_box("b", &basic_box(), 30).unwrap();

        let removed = store.prune_below(20).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_box("b").unwrap().is_none());
    }
}
