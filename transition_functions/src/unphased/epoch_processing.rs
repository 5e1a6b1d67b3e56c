use core::num::NonZeroU64;

use anyhow::{anyhow, Result};
use arithmetic::U64Ext as _;
use helper_functions::{
    accessors::{
        self, get_block_root, get_current_epoch, get_next_epoch, get_previous_epoch,
        get_randao_mix, get_validator_activation_churn_limit,
    },
    error::Error as HelperError,
    misc::compute_activation_exit_epoch,
    mutators::{decrease_balance, increase_balance, initiate_validator_exit},
    predicates::{is_active_validator, is_eligible_for_activation, is_eligible_for_activation_queue},
};
use itertools::Itertools as _;
use ssz_types::{BitVector, VariableList};
use tokio_util::sync::CancellationToken;
use tree_hash::TreeHash as _;
use typenum::Unsigned as _;
use types::{
    config::Config,
    nonstandard::{AttestationEpoch, Phase},
    phase0::{
        consts::GENESIS_EPOCH,
        containers::{Checkpoint, HistoricalBatch, Validator},
        primitives::{Epoch, Gwei},
    },
    preset::Preset,
    traits::BeaconState,
};

use crate::unphased::{cancellation, EpochDeltas};

pub fn process_rewards_and_penalties<P: Preset>(
    state: &mut impl BeaconState<P>,
    deltas: impl IntoIterator<Item = impl EpochDeltas>,
    cancel: &CancellationToken,
) -> Result<()> {
    if !should_process_rewards_and_penalties(state) {
        return Ok(());
    }

    for (balance, deltas) in state.balances_mut().iter_mut().zip(deltas) {
        cancellation::check(cancel)?;

        for (reward, penalty) in deltas.components() {
            increase_balance(balance, reward);
            decrease_balance(balance, penalty);
        }
    }

    Ok(())
}

// Used before Electra. Electra activates every eligible validator and rate limits deposits instead.
pub fn process_registry_updates<P: Preset>(
    config: &Config,
    state: &mut impl BeaconState<P>,
) -> Result<()> {
    let current_epoch = get_current_epoch(state);
    let next_epoch = get_next_epoch(state);

    // The indices collected in these do not overlap.
    let mut eligible_for_activation_queue = vec![];
    let mut ejections = vec![];
    let mut activation_queue = vec![];

    for (validator, validator_index) in state.validators().iter().zip(0..) {
        if is_eligible_for_activation_queue::<P>(validator) {
            eligible_for_activation_queue.push(validator_index);
        }

        if is_active_validator(validator, current_epoch)
            && validator.effective_balance <= config.ejection_balance
        {
            ejections.push(validator_index);
        }

        if is_eligible_for_activation(state, validator) {
            activation_queue.push((validator_index, validator.activation_eligibility_epoch));
        }
    }

    // > Process activation eligibility and ejections
    for validator_index in eligible_for_activation_queue {
        helper_functions::mutators::validator_mut(state, validator_index)?
            .activation_eligibility_epoch = next_epoch;
    }

    for validator_index in ejections {
        initiate_validator_exit(config, state, validator_index)?;
    }

    // > Queue validators eligible for activation and not yet dequeued for activation
    let activation_queue = activation_queue
        .into_iter()
        // > Order by the sequence of activation_eligibility_epoch setting and then index
        .sorted_unstable_by_key(|(validator_index, activation_eligibility_epoch)| {
            (*activation_eligibility_epoch, *validator_index)
        })
        .map(|(validator_index, _)| validator_index);

    // > Dequeued validators for activation up to activation churn limit
    let churn_limit = usize::try_from(get_validator_activation_churn_limit(config, state)?)?;
    let activation_exit_epoch = compute_activation_exit_epoch::<P>(current_epoch);

    for validator_index in activation_queue.take(churn_limit) {
        helper_functions::mutators::validator_mut(state, validator_index)?.activation_epoch =
            activation_exit_epoch;
    }

    Ok(())
}

/// Applies the correlation penalty to validators slashed `EPOCHS_PER_SLASHINGS_VECTOR / 2` epochs
/// ago.
///
/// Electra rounds the penalty per effective balance increment instead of per validator.
pub fn process_slashings<P: Preset>(
    state: &mut impl BeaconState<P>,
    proportional_slashing_multiplier: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let epoch = get_current_epoch(state);
    let total_balance = accessors::total_active_balance(state)?;
    let increment = P::EFFECTIVE_BALANCE_INCREMENT;

    // > Compute slashed balances in the current epoch
    let total_slashings = state
        .slashings()
        .iter()
        .try_fold(0_u64, |total, slashing| total.checked_add(*slashing))
        .ok_or(HelperError::BalanceOverflow)?;

    // > Compute the sum of slashings over the whole vector, capped by the total balance
    let adjusted_total_slashing_balance = total_slashings
        .saturating_mul(proportional_slashing_multiplier)
        .min(total_balance.get());

    let penalty_per_increment = (state.phase() >= Phase::Electra).then(|| {
        adjusted_total_slashing_balance / (total_balance.get() / increment).max(1)
    });

    let target_withdrawable_epoch = epoch + P::EpochsPerSlashingsVector::U64 / 2;
    let mut penalties = vec![];

    for (validator, validator_index) in state.validators().iter().zip(0..) {
        cancellation::check(cancel)?;

        if validator.slashed && validator.withdrawable_epoch == target_withdrawable_epoch {
            let penalty = match penalty_per_increment {
                Some(per_increment) => per_increment * (validator.effective_balance / increment),
                None => slashing_penalty(
                    validator.effective_balance,
                    adjusted_total_slashing_balance,
                    total_balance,
                    increment,
                )?,
            };

            penalties.push((validator_index, penalty));
        }
    }

    for (validator_index, penalty) in penalties {
        decrease_balance(
            helper_functions::mutators::balance(state, validator_index)?,
            penalty,
        );
    }

    Ok(())
}

// > Factored out from penalty numerator to avoid uint64 overflow
fn slashing_penalty(
    effective_balance: Gwei,
    adjusted_total_slashing_balance: Gwei,
    total_balance: NonZeroU64,
    increment: NonZeroU64,
) -> Result<Gwei> {
    let penalty_numerator = u128::from(effective_balance / increment)
        * u128::from(adjusted_total_slashing_balance);

    let penalty = penalty_numerator / u128::from(total_balance.get()) * u128::from(increment.get());

    Ok(Gwei::try_from(penalty)?)
}

pub fn process_eth1_data_reset<P: Preset>(state: &mut impl BeaconState<P>) {
    let next_epoch = get_next_epoch(state);

    // > Reset eth1 data votes
    if next_epoch.mod_typenum::<P::EpochsPerEth1VotingPeriod>() == 0 {
        *state.eth1_data_votes_mut() = VariableList::default();
    }
}

/// Moves effective balances toward actual balances with hysteresis.
///
/// `max_effective_balance` is constant before Electra and depends on withdrawal credentials after.
pub fn process_effective_balance_updates<P: Preset>(
    state: &mut impl BeaconState<P>,
    max_effective_balance: impl Fn(&Validator) -> Gwei,
    cancel: &CancellationToken,
) -> Result<()> {
    let hysteresis_increment = P::EFFECTIVE_BALANCE_INCREMENT.get() / P::HYSTERESIS_QUOTIENT;
    let downward_threshold = hysteresis_increment * P::HYSTERESIS_DOWNWARD_MULTIPLIER;
    let upward_threshold = hysteresis_increment * P::HYSTERESIS_UPWARD_MULTIPLIER;

    let (validators, balances) = state.validators_mut_with_balances();

    // > Update effective balances with hysteresis
    for (validator, balance) in validators.iter_mut().zip(balances.iter().copied()) {
        cancellation::check(cancel)?;

        let below = balance + downward_threshold < validator.effective_balance;
        let above = validator.effective_balance + upward_threshold < balance;

        if below || above {
            validator.effective_balance = balance
                .prev_multiple_of(P::EFFECTIVE_BALANCE_INCREMENT)
                .min(max_effective_balance(validator));
        }
    }

    Ok(())
}

pub fn process_slashings_reset<P: Preset>(state: &mut impl BeaconState<P>) {
    let next_epoch = get_next_epoch(state);
    let index = accessors::ring_index::<P::EpochsPerSlashingsVector>(next_epoch);

    // > Reset slashings
    state.slashings_mut()[index] = 0;
}

pub fn process_randao_mixes_reset<P: Preset>(state: &mut impl BeaconState<P>) {
    let current_epoch = get_current_epoch(state);
    let next_epoch = get_next_epoch(state);
    let index = accessors::ring_index::<P::EpochsPerHistoricalVector>(next_epoch);

    // > Set randao mix
    state.randao_mixes_mut()[index] = get_randao_mix(state, current_epoch);
}

/// Whether a full `SLOTS_PER_HISTORICAL_ROOT` worth of roots ends with the epoch before
/// `next_epoch`.
#[must_use]
pub fn is_historical_accumulation_epoch<P: Preset>(next_epoch: Epoch) -> bool {
    let epochs_per_historical_root = P::SlotsPerHistoricalRoot::U64 / P::SlotsPerEpoch::U64;

    next_epoch % epochs_per_historical_root.max(1) == 0
}

// Replaced by `capella::process_historical_summaries_update`.
pub fn process_historical_roots_update<P: Preset>(state: &mut impl BeaconState<P>) -> Result<()> {
    let next_epoch = get_next_epoch(state);

    // > Set historical root accumulator
    if is_historical_accumulation_epoch::<P>(next_epoch) {
        let historical_batch = HistoricalBatch::<P> {
            block_roots: state.block_roots().clone(),
            state_roots: state.state_roots().clone(),
        };

        state
            .historical_roots_mut()
            .push(historical_batch.tree_hash_root())
            .map_err(|_| HelperError::ListFull)?;
    }

    Ok(())
}

pub fn weigh_justification_and_finalization<P: Preset>(
    state: &mut impl BeaconState<P>,
    total_active_balance: Gwei,
    previous_epoch_target_balance: Gwei,
    current_epoch_target_balance: Gwei,
) -> Result<()> {
    let previous_epoch = get_previous_epoch(state);
    let current_epoch = get_current_epoch(state);
    let old_previous_justified_checkpoint = state.previous_justified_checkpoint();
    let old_current_justified_checkpoint = state.current_justified_checkpoint();

    // > Process justifications
    *state.previous_justified_checkpoint_mut() = state.current_justified_checkpoint();

    let old_bits = state.justification_bits();
    let mut bits = [false; 4];

    for (position, bit) in bits.iter_mut().enumerate().skip(1) {
        *bit = old_bits.get(position - 1).unwrap_or_default();
    }

    let is_supermajority = |target_balance: Gwei| {
        u128::from(target_balance) * 3 >= u128::from(total_active_balance) * 2
    };

    if is_supermajority(previous_epoch_target_balance) {
        *state.current_justified_checkpoint_mut() = Checkpoint {
            epoch: previous_epoch,
            root: get_block_root(state, AttestationEpoch::Previous)?,
        };

        bits[1] = true;
    }

    if is_supermajority(current_epoch_target_balance) {
        *state.current_justified_checkpoint_mut() = Checkpoint {
            epoch: current_epoch,
            root: get_block_root(state, AttestationEpoch::Current)?,
        };

        bits[0] = true;
    }

    let mut justification_bits = BitVector::new();

    for (position, bit) in bits.into_iter().enumerate() {
        justification_bits
            .set(position, bit)
            .map_err(|error| anyhow!("{error:?}"))?;
    }

    *state.justification_bits_mut() = justification_bits;

    // > Process finalizations
    // > The 2nd/3rd/4th most recent epochs are justified, the 2nd using the 4th as source
    if bits[1..4].iter().all(|bit| *bit)
        && old_previous_justified_checkpoint.epoch + 3 == current_epoch
    {
        *state.finalized_checkpoint_mut() = old_previous_justified_checkpoint;
    }

    // > The 2nd/3rd most recent epochs are justified, the 2nd using the 3rd as source
    if bits[1..3].iter().all(|bit| *bit)
        && old_previous_justified_checkpoint.epoch + 2 == current_epoch
    {
        *state.finalized_checkpoint_mut() = old_previous_justified_checkpoint;
    }

    // > The 1st/2nd/3rd most recent epochs are justified, the 1st using the 3rd as source
    if bits[0..3].iter().all(|bit| *bit)
        && old_current_justified_checkpoint.epoch + 2 == current_epoch
    {
        *state.finalized_checkpoint_mut() = old_current_justified_checkpoint;
    }

    // > The 1st/2nd most recent epochs are justified, the 1st using the 2nd as source
    if bits[0..2].iter().all(|bit| *bit)
        && old_current_justified_checkpoint.epoch + 1 == current_epoch
    {
        *state.finalized_checkpoint_mut() = old_current_justified_checkpoint;
    }

    Ok(())
}

pub fn should_process_justification_and_finalization<P: Preset>(
    state: &impl BeaconState<P>,
) -> bool {
    // > Initial FFG checkpoint values have a `0x00` stub for `root`.
    // > Skip FFG updates in the first two epochs to avoid
    // > corner cases that might result in modifying this stub.
    GENESIS_EPOCH + 1 < get_current_epoch(state)
}

pub fn should_process_rewards_and_penalties<P: Preset>(state: &impl BeaconState<P>) -> bool {
    // > No rewards are applied at the end of `GENESIS_EPOCH`
    // > because rewards are for work done in the previous epoch
    GENESIS_EPOCH < get_current_epoch(state)
}
