//! Construction of the per-epoch [`EpochContext`].
//!
//! The context is derived entirely from the state at the start of an epoch. Block processing
//! cannot change anything it contains:
//! - activations and exits only take effect `MAX_SEED_LOOKAHEAD` epochs later;
//! - effective balances only change during epoch processing;
//! - validators added by deposits are not active yet.
//!
//! The driver discards the context when the state crosses into a new epoch.

use core::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{ensure, Result};
use enum_map::EnumMap;
use im::HashMap;
use itertools::Itertools as _;
use typenum::Unsigned as _;
use types::{
    cache::{EpochContext, Shuffling},
    phase0::{
        consts::{DOMAIN_BEACON_ATTESTER, DOMAIN_BEACON_PROPOSER},
        primitives::{Epoch, Gwei},
    },
    preset::Preset,
    traits::BeaconState,
};

use crate::{accessors, error::Error, misc};

/// Returns the context cached in `state`, building it first if needed.
pub fn get_or_init<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<&Arc<EpochContext>> {
    let context = state
        .cache()
        .epoch_context
        .get_or_try_init(|| compute(state).map(Arc::new))?;

    let state_epoch = accessors::get_current_epoch(state);

    ensure!(
        context.epoch == state_epoch,
        Error::EpochContextOutOfDate {
            context_epoch: context.epoch,
            state_epoch,
        },
    );

    Ok(context)
}

pub fn compute<P: Preset>(state: &(impl BeaconState<P> + ?Sized)) -> Result<EpochContext> {
    let current_epoch = accessors::get_current_epoch(state);
    let previous_epoch = accessors::get_previous_epoch(state);

    let previous = compute_shuffling(state, previous_epoch)?;
    let current = compute_shuffling(state, current_epoch)?;

    let proposer_indices = misc::slots_in_epoch::<P>(current_epoch)
        .map(|slot| {
            let epoch_seed = accessors::get_seed(state, current_epoch, DOMAIN_BEACON_PROPOSER);
            let seed = hashing::hash_256_64(epoch_seed, slot);
            misc::compute_proposer_index(state, &current.active_validator_indices, seed)
        })
        .collect::<Result<_>>()?;

    let effective_balances = state
        .validators()
        .iter()
        .map(|validator| validator.effective_balance)
        .collect();

    let validator_indices = state
        .validators()
        .iter()
        .zip(0..)
        .map(|(validator, index)| (validator.pubkey.clone(), index))
        .collect::<HashMap<_, _>>();

    Ok(EpochContext {
        epoch: current_epoch,
        shufflings: EnumMap::from_array([previous, current]),
        proposer_indices,
        effective_balances,
        validator_indices,
    })
}

fn compute_shuffling<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    epoch: Epoch,
) -> Result<Shuffling> {
    let active_validator_indices =
        accessors::active_validator_indices_ordered(state, epoch).collect_vec();

    let mut total: Gwei = 0;

    for validator_index in active_validator_indices.iter().copied() {
        let effective_balance = accessors::validator(state, validator_index)?.effective_balance;
        total = total
            .checked_add(effective_balance)
            .ok_or(Error::BalanceOverflow)?;
    }

    let total_active_balance = NonZeroU64::new(total)
        .map_or(P::EFFECTIVE_BALANCE_INCREMENT, |total| {
            total.max(P::EFFECTIVE_BALANCE_INCREMENT)
        });

    let committees_per_slot = misc::committee_count_from_active_validator_count::<P>(
        u64::try_from(active_validator_indices.len())?,
    );

    let seed = accessors::get_seed(state, epoch, DOMAIN_BEACON_ATTESTER);
    let mut shuffled_validator_indices = active_validator_indices.clone();

    shuffling::shuffle_slice::<P, _>(&mut shuffled_validator_indices, seed)?;

    debug_assert!(committees_per_slot.get() <= P::MaxCommitteesPerSlot::U64);

    Ok(Shuffling {
        epoch,
        active_validator_indices: active_validator_indices.into_boxed_slice(),
        shuffled_validator_indices: shuffled_validator_indices.into_boxed_slice(),
        committees_per_slot,
        total_active_balance,
    })
}
