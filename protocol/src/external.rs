//! Boundary collaborators the protocol consumes but does not implement.
//!
//! The epoch/staking module supplies the validator set the vote threshold
//! is sized from; the behaviour module consumes misbehaviour findings.
//! Both are traits here, with scripted implementations for tests.

use harbor_types::{BlockHeight, ValidatorAddress};

/// One validator-set epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Epoch {
    pub index: u64,
    pub validators: Vec<ValidatorAddress>,
}

/// The epoch/staking collaborator.
pub trait EpochKeeper {
    fn current_epoch(&self) -> Epoch;

    fn epoch_by_height(&self, height: BlockHeight) -> Epoch;

    /// Whether `validator` is an active key node in the current epoch.
    fn is_active_key_node(&self, validator: &ValidatorAddress) -> bool;

    /// Signal that every custodian asset has migrated to the new epoch's
    /// custodians. Consumed by the epoch manager, outside this module.
    fn set_migration_finished(&self);
}

/// The behaviour/slashing collaborator.
///
/// This module only reports *which* validators misbehaved; the
/// consequences live elsewhere.
pub trait BehaviourKeeper {
    fn handle_behaviour(
        &self,
        behaviour_key: &str,
        validator: &ValidatorAddress,
        height: BlockHeight,
        was_normal: bool,
    );
}

/// Scripted epoch keeper for tests: a fixed validator set.
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    pub struct FixedEpochKeeper {
        epoch: Epoch,
        migration_finished: AtomicBool,
    }

    impl FixedEpochKeeper {
        pub fn new(validators: Vec<ValidatorAddress>) -> Self {
            Self {
                epoch: Epoch {
                    index: 1,
                    validators,
                },
                migration_finished: AtomicBool::new(false),
            }
        }

        pub fn migration_finished(&self) -> bool {
            self.migration_finished.load(Ordering::Relaxed)
        }
    }

    impl EpochKeeper for FixedEpochKeeper {
        fn current_epoch(&self) -> Epoch {
            self.epoch.clone()
        }

        fn epoch_by_height(&self, _height: BlockHeight) -> Epoch {
            self.epoch.clone()
        }

        fn is_active_key_node(&self, validator: &ValidatorAddress) -> bool {
            self.epoch.validators.contains(validator)
        }

        fn set_migration_finished(&self) {
            self.migration_finished.store(true, Ordering::Relaxed);
        }
    }

    /// Records every behaviour report it receives.
    #[derive(Default)]
    pub struct RecordingBehaviourKeeper {
        pub reports: Mutex<Vec<(String, ValidatorAddress, BlockHeight, bool)>>,
    }

    impl BehaviourKeeper for RecordingBehaviourKeeper {
        fn handle_behaviour(
            &self,
            behaviour_key: &str,
            validator: &ValidatorAddress,
            height: BlockHeight,
            was_normal: bool,
        ) {
            self.reports.lock().unwrap().push((
                behaviour_key.to_string(),
                validator.clone(),
                height,
                was_normal,
            ));
        }
    }
}
