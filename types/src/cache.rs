use core::num::NonZeroU64;
use std::sync::Arc;

use bls::PublicKeyBytes;
use enum_map::EnumMap;
use im::HashMap;
use once_cell::sync::OnceCell;
use typenum::Unsigned as _;

use crate::{
    altair::primitives::NonZeroGwei,
    nonstandard::RelativeEpoch,
    phase0::primitives::{CommitteeIndex, Epoch, Gwei, Slot, ValidatorIndex},
    preset::Preset,
};

/// Derived data attached to a state.
///
/// Not part of the serialized form or the hash tree root. Ignored by equality.
#[derive(Clone, Default, Debug)]
pub struct Cache {
    // `OnceCell::get_or_try_init` lets the context be built lazily through a shared reference.
    // `std::sync::OnceLock` has no stable fallible equivalent.
    pub epoch_context: OnceCell<Arc<EpochContext>>,
}

impl Cache {
    /// Must be called whenever the state enters a new epoch.
    ///
    /// Everything in the context is tied to a single epoch, so none of it carries over.
    pub fn advance_epoch(&mut self) {
        self.epoch_context.take();
    }
}

/// Per-epoch view of the validator registry.
///
/// Built once from a state and never modified afterwards.
#[derive(Debug)]
pub struct EpochContext {
    pub epoch: Epoch,
    pub shufflings: EnumMap<RelativeEpoch, Shuffling>,
    /// Proposer of every slot in `epoch`, indexed by slot within the epoch.
    pub proposer_indices: Box<[ValidatorIndex]>,
    /// Effective balance of every validator at the time the context was built.
    pub effective_balances: Box<[Gwei]>,
    /// Persistent map from public key to index. Validators appended later are not in it.
    pub validator_indices: HashMap<PublicKeyBytes, ValidatorIndex>,
}

#[derive(Debug)]
pub struct Shuffling {
    pub epoch: Epoch,
    /// Indices of validators active in `epoch`, in ascending order.
    pub active_validator_indices: Box<[ValidatorIndex]>,
    /// `active_validator_indices` permuted by the seeded shuffle.
    pub shuffled_validator_indices: Box<[ValidatorIndex]>,
    pub committees_per_slot: NonZeroU64,
    pub total_active_balance: NonZeroGwei,
}

impl EpochContext {
    #[must_use]
    pub fn shuffling(&self, relative_epoch: RelativeEpoch) -> &Shuffling {
        &self.shufflings[relative_epoch]
    }

    #[must_use]
    pub fn proposer_index<P: Preset>(&self, slot: Slot) -> Option<ValidatorIndex> {
        let slot_in_epoch = usize::try_from(slot % P::SlotsPerEpoch::U64).ok()?;
        self.proposer_indices.get(slot_in_epoch).copied()
    }

    /// Number of validators in the registry when the context was built.
    #[must_use]
    pub fn validator_count(&self) -> usize {
        self.effective_balances.len()
    }
}

impl Shuffling {
    #[must_use]
    pub fn committee_count<P: Preset>(&self) -> u64 {
        self.committees_per_slot.get() * P::SlotsPerEpoch::U64
    }

    /// Returns the committee `index` of `slot`, or `None` if `index` is out of range.
    ///
    /// Committee `k` out of `n` in the epoch spans `shuffled[len * k / n..len * (k + 1) / n]`.
    #[must_use]
    pub fn beacon_committee<P: Preset>(
        &self,
        slot: Slot,
        index: CommitteeIndex,
    ) -> Option<&[ValidatorIndex]> {
        if index >= self.committees_per_slot.get() {
            return None;
        }

        let committee_count = u128::from(self.committee_count::<P>());
        let slot_in_epoch = u128::from(slot % P::SlotsPerEpoch::U64);
        let committee = slot_in_epoch * u128::from(self.committees_per_slot.get())
            + u128::from(index);
        let length = self.shuffled_validator_indices.len() as u128;

        let start = usize::try_from(length * committee / committee_count).ok()?;
        let end = usize::try_from(length * (committee + 1) / committee_count).ok()?;

        self.shuffled_validator_indices.get(start..end)
    }

    /// Iterates over all committees of `slot` in index order.
    pub fn beacon_committees<P: Preset>(
        &self,
        slot: Slot,
    ) -> impl Iterator<Item = (CommitteeIndex, &[ValidatorIndex])> {
        (0..self.committees_per_slot.get())
            .filter_map(move |index| Some((index, self.beacon_committee::<P>(slot, index)?)))
    }
}
