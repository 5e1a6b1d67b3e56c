use std::sync::Arc;

use anyhow::Result;
use arithmetic::U64Ext as _;
use helper_functions::{
    accessors::{get_beacon_proposer_index, get_indexed_attestation, index_of_public_key},
    block_rewards::RewardLedger,
    error::Error as HelperError,
    mutators::{balance, increase_balance},
    predicates::validate_received_indexed_attestation,
    verifier::Verifier,
};
use log::warn;
use tokio_util::sync::CancellationToken;
use tree_hash::TreeHash as _;
use types::{
    config::Config,
    nonstandard::AttestationEpoch,
    phase0::{
        beacon_state::BeaconState as Phase0BeaconState,
        consts::FAR_FUTURE_EPOCH,
        containers::{
            Attestation, BeaconBlock as Phase0BeaconBlock, Deposit, DepositData,
            PendingAttestation, Validator,
        },
        primitives::ValidatorIndex,
    },
    preset::Preset,
};

use crate::{
    altair::{self, Operations},
    unphased::{self, cancellation},
};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "metrics")]
use types::nonstandard::Phase;

pub fn process_block<P: Preset>(
    config: &Config,
    state: &mut Phase0BeaconState<P>,
    block: &Phase0BeaconBlock<P>,
    mut verifier: impl Verifier,
    mut ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.block_transition_timer(Phase::Phase0));

    let body = &block.body;

    let header = altair::header_of(
        block.slot,
        block.proposer_index,
        block.parent_root,
        body.tree_hash_root(),
    );

    unphased::process_block_header(state, header)?;
    unphased::process_randao(config, state, &body.randao_reveal, &mut verifier)?;
    unphased::process_eth1_data(state, body.eth1_data)?;

    let eth1_deposit_bound = state.eth1_data.deposit_count;

    unphased::validate_deposit_count(state, body.deposits.len(), eth1_deposit_bound)?;

    process_operations(
        config,
        state,
        Operations {
            proposer_slashings: &body.proposer_slashings,
            attester_slashings: &body.attester_slashings,
            attestations: &body.attestations,
            deposits: &body.deposits,
            voluntary_exits: &body.voluntary_exits,
        },
        &mut verifier,
        &mut ledger,
        cancel,
    )?;

    verifier.finish()
}

/// Applies operations in the order they are listed in the block body.
///
/// Attestations are only recorded here. They are rewarded in epoch processing.
pub fn process_operations<P: Preset, V: Verifier>(
    config: &Config,
    state: &mut Phase0BeaconState<P>,
    operations: Operations<'_, P>,
    mut verifier: V,
    mut ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<()> {
    let Operations {
        proposer_slashings,
        attester_slashings,
        attestations,
        deposits,
        voluntary_exits,
    } = operations;

    for proposer_slashing in proposer_slashings {
        cancellation::check(cancel)?;
        altair::process_proposer_slashing(
            config,
            state,
            proposer_slashing,
            &mut verifier,
            &mut ledger,
        )?;
    }

    for attester_slashing in attester_slashings {
        cancellation::check(cancel)?;
        altair::process_attester_slashing(
            config,
            state,
            attester_slashing,
            &mut verifier,
            &mut ledger,
        )?;
    }

    for attestation in attestations {
        cancellation::check(cancel)?;
        process_attestation(config, state, attestation, &mut verifier)?;
    }

    for deposit in deposits {
        cancellation::check(cancel)?;
        process_deposit(config, state, deposit, &mut ledger)?;
    }

    for voluntary_exit in voluntary_exits {
        cancellation::check(cancel)?;
        altair::process_voluntary_exit(config, state, voluntary_exit, &mut verifier)?;
    }

    Ok(())
}

pub fn process_attestation<P: Preset>(
    config: &Config,
    state: &mut Phase0BeaconState<P>,
    attestation: &Attestation<P>,
    verifier: impl Verifier,
) -> Result<()> {
    let attestation_epoch = unphased::validate_attestation_data(state, attestation.data)?;

    let indexed_attestation = get_indexed_attestation(state, attestation)?;

    validate_received_indexed_attestation(config, state, &indexed_attestation, verifier)?;

    let pending_attestation = PendingAttestation {
        aggregation_bits: attestation.aggregation_bits.clone(),
        data: attestation.data,
        inclusion_delay: state.slot - attestation.data.slot,
        proposer_index: get_beacon_proposer_index(state)?,
    };

    let pending_attestations = match attestation_epoch {
        AttestationEpoch::Previous => &mut state.previous_epoch_attestations,
        AttestationEpoch::Current => &mut state.current_epoch_attestations,
    };

    Arc::make_mut(pending_attestations)
        .push(pending_attestation)
        .map_err(|_| HelperError::ListFull)?;

    Ok(())
}

pub fn process_deposit<P: Preset>(
    config: &Config,
    state: &mut Phase0BeaconState<P>,
    deposit: &Deposit,
    ledger: impl RewardLedger,
) -> Result<()> {
    unphased::verify_deposit_merkle_branch(state, state.eth1_deposit_index, deposit)?;

    // > Deposits must be processed in order
    state.eth1_deposit_index += 1;

    apply_deposit(config, state, &deposit.data, ledger)
}

/// Tops up an existing validator or registers a new one.
///
/// Phase 0 states have no per-validator participation or inactivity lists to extend.
pub fn apply_deposit<P: Preset>(
    config: &Config,
    state: &mut Phase0BeaconState<P>,
    deposit_data: &DepositData,
    mut ledger: impl RewardLedger,
) -> Result<()> {
    let DepositData {
        ref pubkey,
        withdrawal_credentials,
        amount,
        ..
    } = *deposit_data;

    if let Some(validator_index) = index_of_public_key(state, pubkey)? {
        increase_balance(balance(state, validator_index)?, amount);
        ledger.record_deposit(validator_index, amount);
        return Ok(());
    }

    if !unphased::is_valid_deposit_signature(config, deposit_data) {
        warn!("skipping deposit with invalid signature (public key: {pubkey:?})");
        return Ok(());
    }

    let effective_balance = amount
        .prev_multiple_of(P::EFFECTIVE_BALANCE_INCREMENT)
        .min(P::MAX_EFFECTIVE_BALANCE);

    let validator = Validator {
        pubkey: pubkey.clone(),
        withdrawal_credentials,
        effective_balance,
        slashed: false,
        activation_eligibility_epoch: FAR_FUTURE_EPOCH,
        activation_epoch: FAR_FUTURE_EPOCH,
        exit_epoch: FAR_FUTURE_EPOCH,
        withdrawable_epoch: FAR_FUTURE_EPOCH,
    };

    let validator_index = ValidatorIndex::try_from(state.validators.len())?;

    Arc::make_mut(&mut state.validators)
        .push(validator)
        .map_err(|_| HelperError::ListFull)?;

    Arc::make_mut(&mut state.balances)
        .push(amount)
        .map_err(|_| HelperError::ListFull)?;

    ledger.record_deposit(validator_index, amount);

    Ok(())
}

#[cfg(test)]
mod tests {
    use core::num::NonZeroU64;

    use bls::SignatureBytes;
    use helper_functions::{
        accessors::{self, beacon_committee},
        block_rewards::BlockRewards,
        verifier::NullVerifier,
    };
    use ssz_types::BitList;
    use types::{
        nonstandard::Phase,
        phase0::{
            containers::{AttestationData, Checkpoint},
            primitives::H256,
        },
        preset::Minimal,
    };

    use super::*;

    fn state_at_slot(slot: u64) -> Result<Phase0BeaconState<Minimal>> {
        let config = Config::minimal();
        let count = NonZeroU64::new(16).ok_or_else(|| anyhow::anyhow!("zero"))?;
        let state = interop::quick_start_beacon_state(&config, Phase::Phase0, 0, count)?;

        let mut state = state
            .phase0()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("quick start did not produce a Phase 0 state"))?;

        state.slot = slot;
        state.cache.advance_epoch();

        Ok(state)
    }

    fn full_attestation(
        state: &Phase0BeaconState<Minimal>,
        slot: u64,
    ) -> Result<Attestation<Minimal>> {
        let committee_length = beacon_committee(state, slot, 0)?.len();
        let mut aggregation_bits = BitList::with_capacity(committee_length)
            .map_err(|error| anyhow::anyhow!("{error:?}"))?;

        for position in 0..committee_length {
            aggregation_bits
                .set(position, true)
                .map_err(|error| anyhow::anyhow!("{error:?}"))?;
        }

        Ok(Attestation {
            aggregation_bits,
            data: AttestationData {
                slot,
                index: 0,
                beacon_block_root: H256::ZERO,
                source: Checkpoint::default(),
                target: Checkpoint {
                    epoch: slot / 8,
                    root: H256::ZERO,
                },
            },
            signature: SignatureBytes::empty(),
        })
    }

    #[test]
    fn attestations_are_recorded_for_epoch_processing() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(10)?;
        let balances = state.balances.clone();
        let proposer_index = get_beacon_proposer_index(&state)?;

        let current = full_attestation(&state, 9)?;
        let previous = full_attestation(&state, 7)?;

        process_attestation(&config, &mut state, &current, NullVerifier)?;
        process_attestation(&config, &mut state, &previous, NullVerifier)?;

        assert_eq!(
            state.current_epoch_attestations.to_vec(),
            [PendingAttestation {
                aggregation_bits: current.aggregation_bits,
                data: current.data,
                inclusion_delay: 1,
                proposer_index,
            }],
        );
        assert_eq!(state.previous_epoch_attestations.len(), 1);
        assert_eq!(state.previous_epoch_attestations[0].inclusion_delay, 3);
        assert_eq!(state.balances, balances);

        Ok(())
    }

    #[test]
    fn attestation_with_wrong_target_epoch_is_rejected() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(10)?;
        let mut attestation = full_attestation(&state, 9)?;

        attestation.data.target.epoch = 0;

        process_attestation(&config, &mut state, &attestation, NullVerifier)
            .expect_err("target epoch must match the epoch of the slot");

        assert!(state.current_epoch_attestations.is_empty());
        assert!(state.previous_epoch_attestations.is_empty());

        Ok(())
    }

    #[test]
    fn deposits_register_validators_without_participation() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(9)?;
        let mut rewards = BlockRewards::default();

        let existing =
            interop::quick_start_deposit_data::<Minimal>(&config, &interop::secret_key(3));
        let balance_before = accessors::balance(&state, 3)?;

        apply_deposit(&config, &mut state, &existing, &mut rewards)?;

        assert_eq!(
            accessors::balance(&state, 3)?,
            balance_before + existing.amount,
        );
        assert_eq!(state.validators.len(), 16);

        let new =
            interop::quick_start_deposit_data::<Minimal>(&config, &interop::secret_key(100));

        apply_deposit(&config, &mut state, &new, &mut rewards)?;

        assert_eq!(state.validators.len(), 17);
        assert_eq!(state.balances.len(), 17);
        assert_eq!(state.validators[16].activation_epoch, FAR_FUTURE_EPOCH);
        assert_eq!(index_of_public_key(&state, &new.pubkey)?, Some(16));
        assert_eq!(rewards.deposits.len(), 2);

        Ok(())
    }
}
