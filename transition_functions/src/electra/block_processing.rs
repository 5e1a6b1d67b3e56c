use anyhow::{ensure, Result};
use arithmetic::U64Ext as _;
use bls::PublicKeyBytes;
use execution_engine::{ExecutionEngine, NewPayloadRequest};
use helper_functions::{
    accessors::{
        self, beacon_committee, get_consolidation_churn_limit, get_current_epoch,
        get_pending_balance_to_withdraw, index_of_public_key,
    },
    block_rewards::RewardLedger,
    electra::{
        get_indexed_attestation, initiate_validator_exit, is_fully_withdrawable_validator,
        is_partially_withdrawable_validator, slash_validator,
    },
    error::Error as HelperError,
    misc::{get_committee_indices, get_validator_max_effective_balance, withdrawal_address},
    mutators::{
        compute_consolidation_epoch_and_update_churn, compute_exit_epoch_and_update_churn,
        switch_to_compounding_validator, validator_mut,
    },
    predicates::{
        has_compounding_withdrawal_credential, has_eth1_withdrawal_credential,
        has_execution_withdrawal_credential, is_active_validator,
        validate_received_electra_indexed_attestation,
    },
    verifier::Verifier,
};
use log::warn;
use parse_display::Display;
use ssz_types::VariableList;
use tokio_util::sync::CancellationToken;
use tree_hash::TreeHash as _;
use typenum::Unsigned as _;
use types::{
    capella::containers::Withdrawal,
    config::Config,
    deneb::containers::ExecutionPayloadHeader,
    electra::{
        beacon_state::BeaconState as ElectraBeaconState,
        consts::{FULL_EXIT_REQUEST_AMOUNT, UNSET_DEPOSIT_REQUESTS_START_INDEX},
        containers::{
            Attestation, AttesterSlashing, BeaconBlock as ElectraBeaconBlock, BeaconBlockBody,
            ConsolidationRequest, DepositRequest, IndexedAttestation, PendingConsolidation,
            PendingDeposit, PendingPartialWithdrawal, WithdrawalRequest,
        },
    },
    nonstandard::{Phase, SlashingKind},
    phase0::{
        consts::{FAR_FUTURE_EPOCH, GENESIS_SLOT},
        containers::{Deposit, DepositData, ProposerSlashing, SignedVoluntaryExit, Validator},
        primitives::{DepositIndex, Epoch, ExecutionAddress, Gwei, ValidatorIndex, H256},
    },
    preset::Preset,
    traits::PostElectraBeaconState,
};

use crate::{
    altair,
    bellatrix::{self, PayloadSummary},
    capella, deneb,
    unphased::{self, cancellation, Error},
};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

pub fn process_block<P: Preset>(
    config: &Config,
    state: &mut ElectraBeaconState<P>,
    block: &ElectraBeaconBlock<P>,
    execution_engine: impl ExecutionEngine<P>,
    mut verifier: impl Verifier,
    mut ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.block_transition_timer(Phase::Electra));

    let body = &block.body;

    let header = altair::header_of(
        block.slot,
        block.proposer_index,
        block.parent_root,
        body.tree_hash_root(),
    );

    unphased::process_block_header(state, header)?;

    // > [Modified in Electra:EIP7251]
    process_withdrawals(state, &body.execution_payload.withdrawals)?;

    // > [Modified in Electra:EIP6110]
    process_execution_payload(
        config,
        state,
        body,
        block.parent_root,
        execution_engine,
        cancel,
    )?;

    unphased::process_randao(config, state, &body.randao_reveal, &mut verifier)?;
    unphased::process_eth1_data(state, body.eth1_data)?;

    // > [Modified in Electra:EIP6110]
    // > Disable former deposit mechanism once all prior deposits are processed
    unphased::validate_deposit_count(state, body.deposits.len(), eth1_deposit_bound(state))?;

    process_operations(config, state, body, &mut verifier, &mut ledger, cancel)?;

    altair::process_sync_aggregate(
        config,
        state,
        &body.sync_aggregate,
        &mut verifier,
        ledger,
    )?;

    verifier.finish()
}

/// Index one past the last deposit that may still come through the Eth1 bridge.
#[must_use]
pub fn eth1_deposit_bound<P: Preset>(state: &impl PostElectraBeaconState<P>) -> DepositIndex {
    state
        .eth1_data()
        .deposit_count
        .min(state.deposit_requests_start_index())
}

pub fn process_withdrawals<P: Preset>(
    state: &mut impl PostElectraBeaconState<P>,
    in_block: &[Withdrawal],
) -> Result<()> {
    let (expected_withdrawals, processed_partial_withdrawals_count) =
        get_expected_withdrawals(state)?;

    capella::apply_withdrawals(state, &expected_withdrawals, in_block)?;

    // > Update pending partial withdrawals [New in Electra:EIP7251]
    let remaining = state
        .pending_partial_withdrawals()
        .iter()
        .skip(processed_partial_withdrawals_count)
        .copied()
        .collect::<Vec<_>>();

    *state.pending_partial_withdrawals_mut() = VariableList::from(remaining);

    Ok(())
}

/// Withdrawals for the next payload along with the number of pending partial withdrawals they
/// consume.
///
/// Pending partial withdrawals are consumed even when they produce no withdrawal.
pub fn get_expected_withdrawals<P: Preset>(
    state: &impl PostElectraBeaconState<P>,
) -> Result<(Vec<Withdrawal>, usize)> {
    let epoch = get_current_epoch(state);
    let validator_count = state.validators().len() as u64;
    let bound = validator_count.min(P::MAX_VALIDATORS_PER_WITHDRAWALS_SWEEP);
    let max_pending_partials = usize::try_from(P::MAX_PENDING_PARTIALS_PER_WITHDRAWALS_SWEEP)?;

    let mut withdrawal_index = state.next_withdrawal_index();
    let mut validator_index = state.next_withdrawal_validator_index();
    let mut withdrawals: Vec<Withdrawal> = vec![];
    let mut processed_partial_withdrawals_count = 0;

    let already_withdrawn = |withdrawals: &[Withdrawal], validator_index: ValidatorIndex| {
        withdrawals
            .iter()
            .filter(|withdrawal| withdrawal.validator_index == validator_index)
            .map(|withdrawal| withdrawal.amount)
            .sum::<Gwei>()
    };

    // > [New in Electra:EIP7251] Consume pending partial withdrawals
    for withdrawal in state.pending_partial_withdrawals() {
        if withdrawal.withdrawable_epoch > epoch || withdrawals.len() == max_pending_partials {
            break;
        }

        let validator = accessors::validator(state, withdrawal.validator_index)?;
        let balance = accessors::balance(state, withdrawal.validator_index)?
            .saturating_sub(already_withdrawn(&withdrawals, withdrawal.validator_index));

        let has_sufficient_effective_balance =
            validator.effective_balance >= P::MIN_ACTIVATION_BALANCE;
        let has_excess_balance = balance > P::MIN_ACTIVATION_BALANCE;

        if validator.exit_epoch == FAR_FUTURE_EPOCH
            && has_sufficient_effective_balance
            && has_excess_balance
        {
            withdrawals.push(Withdrawal {
                index: withdrawal_index,
                validator_index: withdrawal.validator_index,
                address: withdrawal_address(validator.withdrawal_credentials),
                amount: withdrawal.amount.min(balance - P::MIN_ACTIVATION_BALANCE),
            });

            withdrawal_index += 1;
        }

        processed_partial_withdrawals_count += 1;
    }

    // > Sweep for remaining.
    for _ in 0..bound {
        let validator = accessors::validator(state, validator_index)?;
        let balance = accessors::balance(state, validator_index)?
            .saturating_sub(already_withdrawn(&withdrawals, validator_index));

        let amount = if is_fully_withdrawable_validator(validator, balance, epoch) {
            Some(balance)
        } else if is_partially_withdrawable_validator::<P>(validator, balance) {
            Some(balance - get_validator_max_effective_balance::<P>(validator))
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

        validator_index = capella::next_in_sweep(validator_index, validator_count);
    }

    Ok((withdrawals, processed_partial_withdrawals_count))
}

pub fn process_execution_payload<P: Preset>(
    config: &Config,
    state: &mut ElectraBeaconState<P>,
    body: &BeaconBlockBody<P>,
    parent_beacon_block_root: H256,
    execution_engine: impl ExecutionEngine<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    let payload = &body.execution_payload;

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

    // > [Modified in Electra:EIP7691]
    let versioned_hashes =
        deneb::blob_versioned_hashes(config, Phase::Electra, &body.blob_kzg_commitments, cancel)?;

    // > Verify the execution payload is valid
    bellatrix::verify_with_engine(
        execution_engine,
        NewPayloadRequest::Electra {
            payload,
            versioned_hashes: &versioned_hashes,
            parent_beacon_block_root,
            execution_requests: &body.execution_requests,
        },
    )?;

    // > Cache execution payload header
    state.latest_execution_payload_header = ExecutionPayloadHeader::from(payload);

    Ok(())
}

/// Applies operations and execution layer requests in the order they are listed in the block
/// body.
pub fn process_operations<P: Preset, V: Verifier>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    body: &BeaconBlockBody<P>,
    mut verifier: V,
    mut ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<()> {
    for proposer_slashing in &body.proposer_slashings {
        cancellation::check(cancel)?;
        process_proposer_slashing(
            config,
            state,
            proposer_slashing,
            &mut verifier,
            &mut ledger,
        )?;
    }

    for attester_slashing in &body.attester_slashings {
        cancellation::check(cancel)?;
        process_attester_slashing(
            config,
            state,
            attester_slashing,
            &mut verifier,
            &mut ledger,
        )?;
    }

    for attestation in &body.attestations {
        cancellation::check(cancel)?;
        process_attestation(config, state, attestation, &mut verifier, &mut ledger)?;
    }

    for deposit in &body.deposits {
        cancellation::check(cancel)?;
        process_deposit(config, state, deposit, &mut ledger)?;
    }

    for voluntary_exit in &body.voluntary_exits {
        cancellation::check(cancel)?;
        process_voluntary_exit(config, state, voluntary_exit, &mut verifier)?;
    }

    capella::process_bls_to_execution_changes(
        config,
        state,
        &body.bls_to_execution_changes,
        &mut verifier,
        cancel,
    )?;

    // > [New in Electra:EIP6110]
    for deposit_request in &body.execution_requests.deposits {
        cancellation::check(cancel)?;
        process_deposit_request(state, deposit_request)?;
    }

    // > [New in Electra:EIP7002:EIP7251]
    for withdrawal_request in &body.execution_requests.withdrawals {
        cancellation::check(cancel)?;
        process_withdrawal_request(config, state, withdrawal_request)?;
    }

    // > [New in Electra:EIP7251]
    for consolidation_request in &body.execution_requests.consolidations {
        cancellation::check(cancel)?;
        process_consolidation_request(config, state, consolidation_request)?;
    }

    Ok(())
}

pub fn process_proposer_slashing<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    proposer_slashing: &ProposerSlashing,
    verifier: impl Verifier,
    ledger: impl RewardLedger,
) -> Result<()> {
    unphased::validate_proposer_slashing(config, state, proposer_slashing, verifier)?;

    let index = proposer_slashing.signed_header_1.message.proposer_index;

    slash_validator(
        config,
        state,
        index,
        None,
        SlashingKind::Proposer,
        ledger,
    )
}

pub fn process_attester_slashing<P: Preset, V: Verifier>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    attester_slashing: &AttesterSlashing<P>,
    mut verifier: V,
    mut ledger: impl RewardLedger,
) -> Result<()> {
    let attestation_1 = &attester_slashing.attestation_1;
    let attestation_2 = &attester_slashing.attestation_2;

    unphased::validate_attester_slashing_data(attestation_1.data, attestation_2.data)?;
    validate_received_electra_indexed_attestation(config, state, attestation_1, &mut verifier)?;
    validate_received_electra_indexed_attestation(config, state, attestation_2, &mut verifier)?;

    let slashable_indices = unphased::slashable_indices(
        state,
        &attestation_1.attesting_indices,
        &attestation_2.attesting_indices,
    )?;

    for validator_index in slashable_indices {
        slash_validator(
            config,
            state,
            validator_index,
            None,
            SlashingKind::Attester,
            &mut ledger,
        )?;
    }

    Ok(())
}

pub fn process_attestation<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    attestation: &Attestation<P>,
    verifier: impl Verifier,
    ledger: impl RewardLedger,
) -> Result<()> {
    let indexed_attestation = validate_attestation(config, state, attestation, verifier)?;

    altair::apply_attestation(
        state,
        attestation.data,
        indexed_attestation.attesting_indices.iter().copied(),
        ledger,
    )
}

pub fn validate_attestation<P: Preset>(
    config: &Config,
    state: &impl PostElectraBeaconState<P>,
    attestation: &Attestation<P>,
    verifier: impl Verifier,
) -> Result<IndexedAttestation<P>> {
    let data = attestation.data;

    unphased::validate_attestation_data(state, data)?;

    // > [Modified in Electra:EIP7549]
    ensure!(
        data.index == 0,
        Error::AttestationWithNonZeroCommitteeIndex { data },
    );

    let mut committee_offset = 0;

    for committee_index in get_committee_indices::<P>(&attestation.committee_bits) {
        // Fails for committee indices not below the committee count.
        let committee_length = beacon_committee(state, data.slot, committee_index)?.len();

        let has_attesters = (committee_offset..committee_offset + committee_length)
            .any(|position| attestation.aggregation_bits.get(position).unwrap_or_default());

        ensure!(
            has_attesters,
            HelperError::NoCommitteeAttesters {
                index: committee_index,
            },
        );

        committee_offset += committee_length;
    }

    // The length of the aggregation bits is checked in `get_attesting_indices`.
    let indexed_attestation = get_indexed_attestation(state, attestation)?;

    validate_received_electra_indexed_attestation(config, state, &indexed_attestation, verifier)?;

    Ok(indexed_attestation)
}

pub fn process_deposit<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    deposit: &Deposit,
    ledger: impl RewardLedger,
) -> Result<()> {
    unphased::verify_deposit_merkle_branch(state, state.eth1_deposit_index(), deposit)?;

    // > Deposits must be processed in order
    *state.eth1_deposit_index_mut() += 1;

    apply_deposit(config, state, &deposit.data, ledger)
}

/// Queues an Eth1 bridge deposit.
///
/// New validators are registered with a zero balance. Deposits for new validators with an invalid
/// proof of possession are skipped.
pub fn apply_deposit<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    deposit_data: &DepositData,
    mut ledger: impl RewardLedger,
) -> Result<()> {
    let DepositData {
        ref pubkey,
        withdrawal_credentials,
        amount,
        ref signature,
    } = *deposit_data;

    let validator_index = match index_of_public_key(state, pubkey)? {
        Some(validator_index) => validator_index,
        None => {
            // > Verify the deposit signature (proof of possession) which is not checked by the
            // > deposit contract
            if !unphased::is_valid_deposit_signature(config, deposit_data) {
                warn!("skipping deposit with invalid signature (public key: {pubkey:?})");
                return Ok(());
            }

            add_validator_to_registry(state, pubkey.clone(), withdrawal_credentials, 0)?
        }
    };

    // > [Modified in Electra:EIP7251]
    state
        .pending_deposits_mut()
        .push(PendingDeposit {
            pubkey: pubkey.clone(),
            withdrawal_credentials,
            amount,
            signature: signature.clone(),
            slot: GENESIS_SLOT,
        })
        .map_err(|_| HelperError::ListFull)?;

    ledger.record_deposit(validator_index, amount);

    Ok(())
}

/// Registers a validator whose effective balance is capped according to its credentials.
pub fn add_validator_to_registry<P: Preset>(
    state: &mut impl PostElectraBeaconState<P>,
    pubkey: PublicKeyBytes,
    withdrawal_credentials: H256,
    amount: Gwei,
) -> Result<ValidatorIndex> {
    let mut validator = Validator {
        pubkey,
        withdrawal_credentials,
        effective_balance: 0,
        slashed: false,
        activation_eligibility_epoch: FAR_FUTURE_EPOCH,
        activation_epoch: FAR_FUTURE_EPOCH,
        exit_epoch: FAR_FUTURE_EPOCH,
        withdrawable_epoch: FAR_FUTURE_EPOCH,
    };

    validator.effective_balance = amount
        .prev_multiple_of(P::EFFECTIVE_BALANCE_INCREMENT)
        .min(get_validator_max_effective_balance::<P>(&validator));

    altair::add_validator_to_registry(state, validator, amount)
}

pub fn process_voluntary_exit<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    signed_voluntary_exit: &SignedVoluntaryExit,
    verifier: impl Verifier,
) -> Result<()> {
    unphased::validate_voluntary_exit(config, state, signed_voluntary_exit, verifier)?;

    let index = signed_voluntary_exit.message.validator_index;

    // > [New in Electra:EIP7251]
    // > Only exit validator if it has no pending withdrawals in the queue
    ensure!(
        get_pending_balance_to_withdraw(state, index) == 0,
        Error::VoluntaryExitWithPendingWithdrawals { index },
    );

    // > Initiate exit
    initiate_validator_exit(config, state, index)
}

// Reasons for ignoring execution layer requests. Ignored requests leave the block valid.
#[derive(Clone, Copy, Debug, Display)]
enum Ignored {
    #[display("partial withdrawal queue is full")]
    PartialWithdrawalQueueFull,
    #[display("consolidation queue is full")]
    ConsolidationQueueFull,
    #[display("consolidation churn limit is too low")]
    ConsolidationChurnTooLow,
    #[display("source and target are the same validator")]
    SourceIsTarget,
    #[display("public key is not in the registry")]
    UnknownPublicKey,
    #[display("withdrawal credentials do not authorize source address")]
    UnauthorizedSource,
    #[display("target does not have compounding credentials")]
    TargetNotCompounding,
    #[display("validator is not active")]
    NotActive,
    #[display("validator has already initiated exit")]
    AlreadyExiting,
    #[display("validator has not been active long enough")]
    NotActiveLongEnough,
    #[display("validator has pending withdrawals")]
    PendingWithdrawals,
    #[display("validator has no excess balance to withdraw")]
    NoExcessBalance,
}

fn ignore(kind: &str, reason: Ignored) -> Result<()> {
    warn!("ignoring {kind} request: {reason}");
    Ok(())
}

pub fn process_deposit_request<P: Preset>(
    state: &mut impl PostElectraBeaconState<P>,
    deposit_request: &DepositRequest,
) -> Result<()> {
    let DepositRequest {
        pubkey,
        withdrawal_credentials,
        amount,
        signature,
        index,
    } = deposit_request.clone();

    // > Set deposit request start index
    if state.deposit_requests_start_index() == UNSET_DEPOSIT_REQUESTS_START_INDEX {
        *state.deposit_requests_start_index_mut() = index;
    }

    let slot = state.slot();

    state
        .pending_deposits_mut()
        .push(PendingDeposit {
            pubkey,
            withdrawal_credentials,
            amount,
            signature,
            slot,
        })
        .map_err(|_| HelperError::ListFull)?;

    Ok(())
}

pub fn process_withdrawal_request<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    withdrawal_request: &WithdrawalRequest,
) -> Result<()> {
    const KIND: &str = "withdrawal";

    let amount = withdrawal_request.amount;
    let is_full_exit_request = amount == FULL_EXIT_REQUEST_AMOUNT;

    // > If partial withdrawal queue is full, only full exits are processed
    if state.pending_partial_withdrawals().len() == P::PendingPartialWithdrawalsLimit::USIZE
        && !is_full_exit_request
    {
        return ignore(KIND, Ignored::PartialWithdrawalQueueFull);
    }

    let Some(index) = index_of_public_key(state, &withdrawal_request.validator_pubkey)? else {
        return ignore(KIND, Ignored::UnknownPublicKey);
    };

    let validator = accessors::validator(state, index)?;
    let current_epoch = get_current_epoch(state);

    // > Verify withdrawal credentials
    if !is_authorized_source(validator, withdrawal_request.source_address) {
        return ignore(KIND, Ignored::UnauthorizedSource);
    }

    if let Some(reason) = exit_blocker(config, validator, current_epoch) {
        return ignore(KIND, reason);
    }

    let pending_balance_to_withdraw = get_pending_balance_to_withdraw(state, index);

    if is_full_exit_request {
        // > Only exit validator if it has no pending withdrawals in the queue
        if pending_balance_to_withdraw > 0 {
            return ignore(KIND, Ignored::PendingWithdrawals);
        }

        return initiate_validator_exit(config, state, index);
    }

    let balance = accessors::balance(state, index)?;
    let has_sufficient_effective_balance =
        validator.effective_balance >= P::MIN_ACTIVATION_BALANCE;
    let has_excess_balance = balance > P::MIN_ACTIVATION_BALANCE + pending_balance_to_withdraw;

    // > Only allow partial withdrawals with compounding withdrawal credentials
    if !(has_compounding_withdrawal_credential(validator)
        && has_sufficient_effective_balance
        && has_excess_balance)
    {
        return ignore(KIND, Ignored::NoExcessBalance);
    }

    let to_withdraw =
        amount.min(balance - P::MIN_ACTIVATION_BALANCE - pending_balance_to_withdraw);
    let exit_queue_epoch = compute_exit_epoch_and_update_churn(config, state, to_withdraw)?;
    let withdrawable_epoch = exit_queue_epoch + config.min_validator_withdrawability_delay;

    state
        .pending_partial_withdrawals_mut()
        .push(PendingPartialWithdrawal {
            validator_index: index,
            amount: to_withdraw,
            withdrawable_epoch,
        })
        .map_err(|_| HelperError::ListFull)?;

    Ok(())
}

pub fn process_consolidation_request<P: Preset>(
    config: &Config,
    state: &mut impl PostElectraBeaconState<P>,
    consolidation_request: &ConsolidationRequest,
) -> Result<()> {
    const KIND: &str = "consolidation";

    let ConsolidationRequest {
        source_address,
        ref source_pubkey,
        ref target_pubkey,
    } = *consolidation_request;

    if let Some(source_index) = switch_to_compounding_source(state, consolidation_request)? {
        return switch_to_compounding_validator(state, source_index);
    }

    // > Verify that source != target, so a consolidation cannot be used as an exit
    if source_pubkey == target_pubkey {
        return ignore(KIND, Ignored::SourceIsTarget);
    }

    // > If the pending consolidations queue is full, consolidation requests are ignored
    if state.pending_consolidations().len() == P::PendingConsolidationsLimit::USIZE {
        return ignore(KIND, Ignored::ConsolidationQueueFull);
    }

    // > If there is too little available consolidation churn limit, consolidation requests are
    // > ignored
    if get_consolidation_churn_limit(config, state)? <= P::MIN_ACTIVATION_BALANCE {
        return ignore(KIND, Ignored::ConsolidationChurnTooLow);
    }

    // > Verify pubkeys exists
    let Some(source_index) = index_of_public_key(state, source_pubkey)? else {
        return ignore(KIND, Ignored::UnknownPublicKey);
    };

    let Some(target_index) = index_of_public_key(state, target_pubkey)? else {
        return ignore(KIND, Ignored::UnknownPublicKey);
    };

    let source_validator = accessors::validator(state, source_index)?;
    let target_validator = accessors::validator(state, target_index)?;
    let current_epoch = get_current_epoch(state);

    // > Verify source withdrawal credentials
    if !is_authorized_source(source_validator, source_address) {
        return ignore(KIND, Ignored::UnauthorizedSource);
    }

    // > Verify that target has compounding withdrawal credentials
    if !has_compounding_withdrawal_credential(target_validator) {
        return ignore(KIND, Ignored::TargetNotCompounding);
    }

    // > Verify the source and the target are active
    // > Verify exits for source and target have not been initiated
    if !is_active_validator(target_validator, current_epoch) {
        return ignore(KIND, Ignored::NotActive);
    }

    if target_validator.exit_epoch != FAR_FUTURE_EPOCH {
        return ignore(KIND, Ignored::AlreadyExiting);
    }

    if let Some(reason) = exit_blocker(config, source_validator, current_epoch) {
        return ignore(KIND, reason);
    }

    // > Verify the source has no pending withdrawals in the queue
    if get_pending_balance_to_withdraw(state, source_index) > 0 {
        return ignore(KIND, Ignored::PendingWithdrawals);
    }

    // > Initiate source validator exit and append pending consolidation
    let effective_balance = source_validator.effective_balance;
    let exit_epoch =
        compute_consolidation_epoch_and_update_churn(config, state, effective_balance)?;
    let source_validator = validator_mut(state, source_index)?;

    source_validator.exit_epoch = exit_epoch;
    source_validator.withdrawable_epoch = exit_epoch + config.min_validator_withdrawability_delay;

    state
        .pending_consolidations_mut()
        .push(PendingConsolidation {
            source_index,
            target_index,
        })
        .map_err(|_| HelperError::ListFull)?;

    Ok(())
}

// A consolidation request from a validator into itself switches it to compounding credentials.
// Returns the validator if the request is such a switch and it is valid.
fn switch_to_compounding_source<P: Preset>(
    state: &impl PostElectraBeaconState<P>,
    consolidation_request: &ConsolidationRequest,
) -> Result<Option<ValidatorIndex>> {
    let ConsolidationRequest {
        source_address,
        ref source_pubkey,
        ref target_pubkey,
    } = *consolidation_request;

    // > Switch to compounding requires source and target be equal
    if source_pubkey != target_pubkey {
        return Ok(None);
    }

    // > Verify pubkey exists
    let Some(source_index) = index_of_public_key(state, source_pubkey)? else {
        return Ok(None);
    };

    let source_validator = accessors::validator(state, source_index)?;

    let is_valid = withdrawal_address(source_validator.withdrawal_credentials) == source_address
        && has_eth1_withdrawal_credential(source_validator)
        && is_active_validator(source_validator, get_current_epoch(state))
        && source_validator.exit_epoch == FAR_FUTURE_EPOCH;

    Ok(is_valid.then_some(source_index))
}

fn is_authorized_source(validator: &Validator, source_address: ExecutionAddress) -> bool {
    has_execution_withdrawal_credential(validator)
        && withdrawal_address(validator.withdrawal_credentials) == source_address
}

// Conditions shared by exits and consolidations requested by the execution layer.
fn exit_blocker(config: &Config, validator: &Validator, current_epoch: Epoch) -> Option<Ignored> {
    if !is_active_validator(validator, current_epoch) {
        return Some(Ignored::NotActive);
    }

    if validator.exit_epoch != FAR_FUTURE_EPOCH {
        return Some(Ignored::AlreadyExiting);
    }

    if current_epoch < validator.activation_epoch + config.shard_committee_period {
        return Some(Ignored::NotActiveLongEnough);
    }

    None
}
