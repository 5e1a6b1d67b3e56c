use anyhow::{ensure, Result};
use bls::PublicKey;
use execution_engine::{ExecutionEngine, NewPayloadRequest};
use helper_functions::{
    accessors::{self, get_current_epoch},
    block_rewards::RewardLedger,
    error::SignatureKind,
    misc::{bls_withdrawal_credentials, eth1_address_withdrawal_credentials, withdrawal_address},
    mutators::{balance, decrease_balance, validator_mut},
    predicates::{is_fully_withdrawable_validator, is_partially_withdrawable_validator},
    signing::SignForAllForksWithGenesis as _,
    verifier::Verifier,
};
use itertools::izip;
use tokio_util::sync::CancellationToken;
use tree_hash::TreeHash as _;
use typenum::Unsigned as _;
use types::{
    capella::{
        beacon_state::BeaconState as CapellaBeaconState,
        containers::{
            BeaconBlock as CapellaBeaconBlock, ExecutionPayload, ExecutionPayloadHeader,
            SignedBlsToExecutionChange, Withdrawal,
        },
    },
    config::Config,
    phase0::{consts::BLS_WITHDRAWAL_PREFIX, primitives::ValidatorIndex},
    preset::Preset,
    traits::PostCapellaBeaconState,
};

use crate::{
    altair::{self, Operations},
    bellatrix::{self, PayloadSummary},
    unphased::{self, cancellation, Error},
};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "metrics")]
use types::nonstandard::Phase;

pub fn process_block<P: Preset>(
    config: &Config,
    state: &mut CapellaBeaconState<P>,
    block: &CapellaBeaconBlock<P>,
    execution_engine: impl ExecutionEngine<P>,
    mut verifier: impl Verifier,
    mut ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.block_transition_timer(Phase::Capella));

    let body = &block.body;

    let header = altair::header_of(
        block.slot,
        block.proposer_index,
        block.parent_root,
        body.tree_hash_root(),
    );

    unphased::process_block_header(state, header)?;

    // > [New in Capella]
    process_withdrawals(state, &body.execution_payload.withdrawals)?;

    // > [Modified in Capella] Removed `is_execution_enabled` check in Capella
    process_execution_payload(config, state, &body.execution_payload, execution_engine)?;

    unphased::process_randao(config, state, &body.randao_reveal, &mut verifier)?;
    unphased::process_eth1_data(state, body.eth1_data)?;

    let eth1_deposit_bound = state.eth1_data.deposit_count;

    unphased::validate_deposit_count(state, body.deposits.len(), eth1_deposit_bound)?;

    altair::process_operations(
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

    // > [New in Capella]
    process_bls_to_execution_changes(
        config,
        state,
        &body.bls_to_execution_changes,
        &mut verifier,
        cancel,
    )?;

    altair::process_sync_aggregate(
        config,
        state,
        &body.sync_aggregate,
        &mut verifier,
        ledger,
    )?;

    verifier.finish()
}

pub fn process_execution_payload<P: Preset>(
    config: &Config,
    state: &mut CapellaBeaconState<P>,
    payload: &ExecutionPayload<P>,
    execution_engine: impl ExecutionEngine<P>,
) -> Result<()> {
    // > [Modified in Capella] Removed `is_merge_transition_complete` check in Capella
    bellatrix::validate_payload_consistency(
        config,
        state,
        PayloadSummary {
            parent_hash: payload.parent_hash,
            prev_randao: payload.prev_randao,
            timestamp: payload.timestamp,
        },
        Some(state.latest_execution_payload_header.block_hash),
    )?;

    // > Verify the execution payload is valid
    bellatrix::verify_with_engine(execution_engine, NewPayloadRequest::Capella { payload })?;

    // > Cache execution payload header
    state.latest_execution_payload_header = ExecutionPayloadHeader::from(payload);

    Ok(())
}

pub fn process_bls_to_execution_changes<P: Preset>(
    config: &Config,
    state: &mut impl PostCapellaBeaconState<P>,
    bls_to_execution_changes: &[SignedBlsToExecutionChange],
    mut verifier: impl Verifier,
    cancel: &CancellationToken,
) -> Result<()> {
    for bls_to_execution_change in bls_to_execution_changes {
        cancellation::check(cancel)?;
        process_bls_to_execution_change(config, state, bls_to_execution_change, &mut verifier)?;
    }

    Ok(())
}

pub fn process_bls_to_execution_change<P: Preset>(
    config: &Config,
    state: &mut impl PostCapellaBeaconState<P>,
    bls_to_execution_change: &SignedBlsToExecutionChange,
    verifier: impl Verifier,
) -> Result<()> {
    validate_bls_to_execution_change(config, state, bls_to_execution_change, verifier)?;

    let address_change = &bls_to_execution_change.message;

    validator_mut(state, address_change.validator_index)?.withdrawal_credentials =
        eth1_address_withdrawal_credentials(address_change.to_execution_address);

    Ok(())
}

pub fn validate_bls_to_execution_change<P: Preset, V: Verifier>(
    config: &Config,
    state: &impl PostCapellaBeaconState<P>,
    bls_to_execution_change: &SignedBlsToExecutionChange,
    mut verifier: V,
) -> Result<()> {
    let address_change = &bls_to_execution_change.message;
    let index = address_change.validator_index;
    let in_state = accessors::validator(state, index)?.withdrawal_credentials;

    ensure!(
        in_state[0] == BLS_WITHDRAWAL_PREFIX,
        Error::WithdrawalCredentialsNotBls { index },
    );

    let computed = bls_withdrawal_credentials(&address_change.from_bls_pubkey);

    ensure!(
        in_state == computed,
        Error::WithdrawalCredentialsMismatch {
            index,
            in_state,
            computed,
        },
    );

    // > Fork-agnostic domain since address changes are valid across forks
    if !V::IS_NULL {
        verifier.verify_singular(
            address_change.signing_root(config, state),
            &bls_to_execution_change.signature,
            &PublicKey::try_from(&address_change.from_bls_pubkey)?,
            SignatureKind::BlsToExecutionChange,
        )?;
    }

    Ok(())
}

pub fn process_withdrawals<P: Preset>(
    state: &mut impl PostCapellaBeaconState<P>,
    in_block: &[Withdrawal],
) -> Result<()> {
    let expected_withdrawals = get_expected_withdrawals(state)?;
    apply_withdrawals(state, &expected_withdrawals, in_block)
}

/// Debits the expected withdrawals after checking them against the payload, then moves both
/// withdrawal cursors.
pub fn apply_withdrawals<P: Preset>(
    state: &mut impl PostCapellaBeaconState<P>,
    expected_withdrawals: &[Withdrawal],
    in_block: &[Withdrawal],
) -> Result<()> {
    ensure!(
        expected_withdrawals.len() == in_block.len(),
        Error::WithdrawalCountMismatch {
            computed: expected_withdrawals.len(),
            in_block: in_block.len(),
        },
    );

    for (computed, in_block) in izip!(expected_withdrawals, in_block) {
        ensure!(
            computed == in_block,
            Error::WithdrawalMismatch {
                computed: *computed,
                in_block: *in_block,
            },
        );

        decrease_balance(balance(state, computed.validator_index)?, computed.amount);
    }

    // > Update the next withdrawal index if this block contained withdrawals
    if let Some(latest_withdrawal) = expected_withdrawals.last() {
        *state.next_withdrawal_index_mut() = latest_withdrawal.index + 1;
    }

    let validator_count = state.validators().len() as u64;

    if validator_count == 0 {
        return Ok(());
    }

    // > Update the next validator index to start the next withdrawal sweep
    let next_validator_index = match expected_withdrawals.last() {
        // > Next sweep starts after the latest withdrawal's validator index
        Some(latest_withdrawal)
            if expected_withdrawals.len() == P::MaxWithdrawalsPerPayload::USIZE =>
        {
            next_in_sweep(latest_withdrawal.validator_index, validator_count)
        }
        // > Advance sweep by the max length of the sweep if there was not a full set of withdrawals
        _ => {
            (state.next_withdrawal_validator_index() + P::MAX_VALIDATORS_PER_WITHDRAWALS_SWEEP)
                % validator_count
        }
    };

    *state.next_withdrawal_validator_index_mut() = next_validator_index;

    Ok(())
}

pub fn get_expected_withdrawals<P: Preset>(
    state: &impl PostCapellaBeaconState<P>,
) -> Result<Vec<Withdrawal>> {
    let epoch = get_current_epoch(state);
    let validator_count = state.validators().len() as u64;
    let bound = validator_count.min(P::MAX_VALIDATORS_PER_WITHDRAWALS_SWEEP);

    let mut withdrawal_index = state.next_withdrawal_index();
    let mut validator_index = state.next_withdrawal_validator_index();
    let mut withdrawals = vec![];

    for _ in 0..bound {
        let validator = accessors::validator(state, validator_index)?;
        let balance = accessors::balance(state, validator_index)?;

        let amount = if is_fully_withdrawable_validator(validator, balance, epoch) {
            Some(balance)
        } else if is_partially_withdrawable_validator::<P>(validator, balance) {
            Some(balance - P::MAX_EFFECTIVE_BALANCE)
        } else {
            None
        };

        if let Some(amount) = amount {
            withdrawals.push(Withdrawal {
                index: withdrawal_index,
                validator_index,
                address: withdrawal_address(validator.withdrawal_credentials),
                amount,
            });

            withdrawal_index += 1;
        }

        if withdrawals.len() == P::MaxWithdrawalsPerPayload::USIZE {
            break;
        }

        validator_index = next_in_sweep(validator_index, validator_count);
    }

    Ok(withdrawals)
}

pub(crate) const fn next_in_sweep(
    validator_index: ValidatorIndex,
    validator_count: u64,
) -> ValidatorIndex {
    (validator_index + 1) % validator_count
}
