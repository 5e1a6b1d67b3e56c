use anyhow::Result;
use helper_functions::{
    accessors::{
        self, get_activation_exit_churn_limit, get_current_epoch, get_next_epoch,
        index_of_public_key,
    },
    electra::{initiate_validator_exit, is_eligible_for_activation_queue},
    misc::{
        compute_activation_exit_epoch, compute_start_slot_at_epoch,
        get_validator_max_effective_balance,
    },
    mutators::{balance, decrease_balance, increase_balance, validator_mut},
    predicates::{is_active_validator, is_eligible_for_activation},
};
use log::{debug, warn};
use ssz_types::VariableList;
use tokio_util::sync::CancellationToken;
use types::{
    config::Config,
    electra::containers::PendingDeposit,
    phase0::{
        consts::{FAR_FUTURE_EPOCH, GENESIS_SLOT},
        containers::DepositData,
    },
    preset::Preset,
    traits::PostElectraBeaconState,
};

use super::block_processing::add_validator_to_registry;
use crate::{altair, capella, unphased};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

pub fn process_epoch<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.epoch_processing_timer(state.phase()));

    debug!(
        "processing {} epoch {}",
        state.phase(),
        get_current_epoch(state),
    );

    let (statistics, summaries) = altair::statistics(state);

    altair::process_justification_and_finalization(state, statistics)?;
    altair::process_inactivity_updates(config, state, summaries.iter().copied(), cancel)?;

    altair::process_rewards_and_penalties(
        config,
        state,
        statistics,
        summaries,
        P::INACTIVITY_PENALTY_QUOTIENT_BELLATRIX,
        cancel,
    )?;

    // > [Modified in Electra:EIP7251]
    process_registry_updates(config, state)?;
    unphased::process_slashings(state, P::PROPORTIONAL_SLASHING_MULTIPLIER_BELLATRIX, cancel)?;
    unphased::process_eth1_data_reset(state);

    // > [New in Electra:EIP7251]
    process_pending_deposits(config, state, cancel)?;
    process_pending_consolidations(state, cancel)?;

    // > [Modified in Electra:EIP7251]
    unphased::process_effective_balance_updates(
        state,
        get_validator_max_effective_balance::<P>,
        cancel,
    )?;

    unphased::process_slashings_reset(state);
    unphased::process_randao_mixes_reset(state);
    capella::process_historical_summaries_update(state)?;
    altair::process_participation_flag_updates(state);
    altair::process_sync_committee_updates(state)
}

/// Electra registry updates.
///
/// Activations are no longer limited by a churn. The balance churn is applied to pending
/// deposits instead.
pub fn process_registry_updates<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
) -> Result<()> {
    let current_epoch = get_current_epoch(state);
    let next_epoch = get_next_epoch(state);
    let activation_epoch = compute_activation_exit_epoch::<P>(current_epoch);

    let mut eligible_for_activation_queue = vec![];
    let mut ejections = vec![];
    let mut activations = vec![];

    // > Process activation eligibility, ejections, and activations
    for (validator, validator_index) in state.validators().iter().zip(0..) {
        if is_eligible_for_activation_queue::<P>(validator) {
            eligible_for_activation_queue.push(validator_index);
        } else if is_active_validator(validator, current_epoch)
            && validator.effective_balance <= config.ejection_balance
        {
            ejections.push(validator_index);
        } else if is_eligible_for_activation(state, validator) {
            activations.push(validator_index);
        }
    }

    for validator_index in eligible_for_activation_queue {
        validator_mut(state, validator_index)?.activation_eligibility_epoch = next_epoch;
    }

    for validator_index in ejections {
        initiate_validator_exit(config, state, validator_index)?;
    }

    for validator_index in activations {
        validator_mut(state, validator_index)?.activation_epoch = activation_epoch;
    }

    Ok(())
}

/// Applies queued deposits up to the activation and exit churn.
///
/// Deposits of exited validators are moved to the back of the queue. Deposits of withdrawn
/// validators do not count against the churn.
pub fn process_pending_deposits<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    let next_epoch = get_next_epoch(state);
    let available_for_processing =
        state.deposit_balance_to_consume() + get_activation_exit_churn_limit(config, state)?;
    let finalized_slot = compute_start_slot_at_epoch::<P>(state.finalized_checkpoint().epoch);

    let mut processed_amount = 0;
    let mut next_deposit_index = 0;
    let mut deposits_to_postpone = vec![];
    let mut is_churn_limit_reached = false;

    for deposit in &state.pending_deposits().clone() {
        unphased::cancellation::check(cancel)?;

        // > Do not process deposit requests if Eth1 bridge deposits are not yet applied.
        if deposit.slot > GENESIS_SLOT
            && state.eth1_deposit_index() < state.deposit_requests_start_index()
        {
            break;
        }

        // > Check if deposit has been finalized, otherwise, stop processing.
        if deposit.slot > finalized_slot {
            break;
        }

        // > Check if number of processed deposits has not reached the limit, otherwise, stop
        // > processing.
        if next_deposit_index >= P::MAX_PENDING_DEPOSITS_PER_EPOCH {
            break;
        }

        let (is_validator_exited, is_validator_withdrawn) =
            match index_of_public_key(state, &deposit.pubkey)? {
                Some(validator_index) => {
                    let validator = accessors::validator(state, validator_index)?;

                    (
                        validator.exit_epoch < FAR_FUTURE_EPOCH,
                        validator.withdrawable_epoch < next_epoch,
                    )
                }
                None => (false, false),
            };

        if is_validator_withdrawn {
            // > Deposited balance will never become active. Increase balance but do not consume
            // > churn
            apply_pending_deposit(config, state, deposit)?;
        } else if is_validator_exited {
            // > Validator is exiting, postpone the deposit until after withdrawable epoch
            deposits_to_postpone.push(deposit.clone());
        } else {
            // > Check if deposit fits in the churn, otherwise, do no more deposit processing in
            // > this epoch.
            is_churn_limit_reached = processed_amount + deposit.amount > available_for_processing;

            if is_churn_limit_reached {
                break;
            }

            // > Consume churn and apply deposit.
            processed_amount += deposit.amount;
            apply_pending_deposit(config, state, deposit)?;
        }

        // > Regardless of how the deposit was handled, we move on in the queue.
        next_deposit_index += 1;
    }

    let remaining = state
        .pending_deposits()
        .iter()
        .skip(usize::try_from(next_deposit_index)?)
        .cloned()
        .chain(deposits_to_postpone)
        .collect::<Vec<_>>();

    *state.pending_deposits_mut() = VariableList::from(remaining);

    // > Accumulate churn only if the churn limit has been hit.
    *state.deposit_balance_to_consume_mut() = if is_churn_limit_reached {
        available_for_processing - processed_amount
    } else {
        0
    };

    Ok(())
}

fn apply_pending_deposit<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    deposit: &PendingDeposit,
) -> Result<()> {
    let PendingDeposit {
        ref pubkey,
        withdrawal_credentials,
        amount,
        ref signature,
        ..
    } = *deposit;

    if let Some(validator_index) = index_of_public_key(state, pubkey)? {
        increase_balance(balance(state, validator_index)?, amount);
        return Ok(());
    }

    let deposit_data = DepositData {
        pubkey: pubkey.clone(),
        withdrawal_credentials,
        amount,
        signature: signature.clone(),
    };

    // > Verify the deposit signature (proof of possession) which is not checked by the deposit
    // > contract
    if unphased::is_valid_deposit_signature(config, &deposit_data) {
        add_validator_to_registry(state, pubkey.clone(), withdrawal_credentials, amount)?;
    } else {
        warn!("dropping pending deposit with invalid signature (public key: {pubkey:?})");
    }

    Ok(())
}

pub fn process_pending_consolidations<P: Preset>(
    state: &mut impl PostElectraBeaconState<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    let next_epoch = get_next_epoch(state);
    let mut next_pending_consolidation = 0;

    for pending_consolidation in &state.pending_consolidations().clone() {
        unphased::cancellation::check(cancel)?;

        let source_index = pending_consolidation.source_index;
        let source_validator = accessors::validator(state, source_index)?;

        if source_validator.slashed {
            next_pending_consolidation += 1;
            continue;
        }

        if source_validator.withdrawable_epoch > next_epoch {
            break;
        }

        // > Calculate the consolidated balance
        let source_effective_balance = accessors::balance(state, source_index)?
            .min(source_validator.effective_balance);

        // > Move active balance to target. Excess balance is withdrawable.
        decrease_balance(balance(state, source_index)?, source_effective_balance);
        increase_balance(
            balance(state, pending_consolidation.target_index)?,
            source_effective_balance,
        );

        next_pending_consolidation += 1;
    }

    let remaining = state
        .pending_consolidations()
        .iter()
        .skip(next_pending_consolidation)
        .copied()
        .collect::<Vec<_>>();

    *state.pending_consolidations_mut() = VariableList::from(remaining);

    Ok(())
}
