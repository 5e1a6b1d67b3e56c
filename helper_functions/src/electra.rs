use anyhow::{ensure, Result};
use itertools::Itertools as _;
use ssz_types::VariableList;
use types::{
    config::Config,
    electra::containers::{Attestation, IndexedAttestation},
    nonstandard::SlashingKind,
    phase0::{
        consts::FAR_FUTURE_EPOCH,
        containers::Validator,
        primitives::{Epoch, Gwei, ValidatorIndex},
    },
    preset::Preset,
    traits::{BeaconState, PostElectraBeaconState},
};

use crate::{
    accessors::{self, beacon_committee},
    block_rewards::RewardLedger,
    error::Error,
    misc::{get_committee_indices, get_validator_max_effective_balance},
    mutators::{self, apply_slashing, compute_exit_epoch_and_update_churn, SlashingQuotients},
    predicates::has_execution_withdrawal_credential,
};

// > Check if ``validator`` is eligible to be placed into the activation queue.
#[must_use]
pub const fn is_eligible_for_activation_queue<P: Preset>(validator: &Validator) -> bool {
    validator.activation_eligibility_epoch == FAR_FUTURE_EPOCH
        && validator.effective_balance >= P::MIN_ACTIVATION_BALANCE
}

// > Check if ``validator`` is fully withdrawable.
#[must_use]
pub fn is_fully_withdrawable_validator(validator: &Validator, balance: Gwei, epoch: Epoch) -> bool {
    has_execution_withdrawal_credential(validator)
        && validator.withdrawable_epoch <= epoch
        && balance > 0
}

// > Check if ``validator`` is partially withdrawable.
#[must_use]
pub fn is_partially_withdrawable_validator<P: Preset>(
    validator: &Validator,
    balance: Gwei,
) -> bool {
    let max_effective_balance = get_validator_max_effective_balance::<P>(validator);
    let has_max_effective_balance = validator.effective_balance == max_effective_balance;
    let has_excess_balance = balance > max_effective_balance;

    has_execution_withdrawal_credential(validator)
        && has_max_effective_balance
        && has_excess_balance
}

pub fn get_indexed_attestation<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    attestation: &Attestation<P>,
) -> Result<IndexedAttestation<P>> {
    let attesting_indices = get_attesting_indices(state, attestation)?;

    Ok(IndexedAttestation {
        // The aggregation bitlist has the same capacity as `attesting_indices`.
        attesting_indices: VariableList::from(attesting_indices),
        data: attestation.data,
        signature: attestation.signature.clone(),
    })
}

// > Return the set of attesting indices corresponding to ``aggregation_bits`` and ``committee_bits``.
//
// The result is sorted. Committees of one slot are disjoint, so it contains no duplicates.
pub fn get_attesting_indices<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    attestation: &Attestation<P>,
) -> Result<Vec<ValidatorIndex>> {
    let mut output = vec![];
    let mut committee_offset = 0;

    for committee_index in get_committee_indices::<P>(&attestation.committee_bits) {
        let committee = beacon_committee(state, attestation.data.slot, committee_index)?;

        let committee_attesters = committee
            .iter()
            .enumerate()
            .filter(|(position, _)| {
                attestation
                    .aggregation_bits
                    .get(committee_offset + position)
                    .unwrap_or_default()
            })
            .map(|(_, validator_index)| *validator_index);

        output.extend(committee_attesters);

        committee_offset += committee.len();
    }

    // > Bitfield length matches total number of participants
    ensure!(
        committee_offset == attestation.aggregation_bits.len(),
        Error::ParticipantsCountMismatch {
            aggregation_bitlist_length: attestation.aggregation_bits.len(),
            participants_count: committee_offset,
        },
    );

    output.sort_unstable();

    Ok(output.into_iter().dedup().collect())
}

// > Initiate the exit of the validator with index ``index``.
pub fn initiate_validator_exit<P: Preset>(
    config: &Config,
    state: &mut (impl PostElectraBeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Result<()> {
    let validator = accessors::validator(state, validator_index)?;

    // > Return if validator already initiated exit
    if validator.exit_epoch != FAR_FUTURE_EPOCH {
        return Ok(());
    }

    // > Compute exit queue epoch
    let exit_queue_epoch =
        compute_exit_epoch_and_update_churn(config, state, validator.effective_balance)?;

    // > Set validator exit epoch and withdrawable epoch
    let validator = mutators::validator_mut(state, validator_index)?;

    validator.exit_epoch = exit_queue_epoch;

    validator.withdrawable_epoch = exit_queue_epoch
        .checked_add(config.min_validator_withdrawability_delay)
        .ok_or(Error::EpochOverflow)?;

    Ok(())
}

// > Slash the validator with index ``slashed_index``.
pub fn slash_validator<P: Preset>(
    config: &Config,
    state: &mut (impl PostElectraBeaconState<P> + ?Sized),
    slashed_index: ValidatorIndex,
    whistleblower_index: Option<ValidatorIndex>,
    kind: SlashingKind,
    ledger: impl RewardLedger,
) -> Result<()> {
    initiate_validator_exit(config, state, slashed_index)?;

    apply_slashing(
        state,
        SlashingQuotients {
            min_slashing_penalty: P::MIN_SLASHING_PENALTY_QUOTIENT_ELECTRA,
            whistleblower_reward: P::WHISTLEBLOWER_REWARD_QUOTIENT_ELECTRA,
            proposer_reward: None,
        },
        slashed_index,
        whistleblower_index,
        kind,
        ledger,
    )
}
