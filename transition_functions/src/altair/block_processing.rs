use anyhow::Result;
use arithmetic::U64Ext as _;
use bit_field::BitField as _;
use helper_functions::{
    accessors::{
        attestation_epoch, get_attestation_participation_flags, get_base_reward,
        get_base_reward_per_increment, get_beacon_proposer_index, get_block_root_at_slot,
        get_indexed_attestation, index_of_public_key, total_active_balance,
    },
    block_rewards::{Delta, ProposerRewardSource, RewardLedger},
    error::{Error as HelperError, SignatureKind},
    mutators::{
        balance, decrease_balance, increase_balance, initiate_validator_exit, slash_validator,
    },
    predicates::validate_received_indexed_attestation,
    signing::SignForSingleForkAtSlot as _,
    verifier::Verifier,
};
use log::warn;
use tokio_util::sync::CancellationToken;
use tree_hash::TreeHash as _;
use types::{
    altair::{
        beacon_state::BeaconState as AltairBeaconState,
        consts::{
            PARTICIPATION_FLAG_WEIGHTS, PROPOSER_WEIGHT, SYNC_REWARD_WEIGHT, WEIGHT_DENOMINATOR,
        },
        containers::{BeaconBlock as AltairBeaconBlock, SyncAggregate},
    },
    config::Config,
    nonstandard::{AttestationEpoch, SlashingKind},
    phase0::{
        consts::FAR_FUTURE_EPOCH,
        containers::{
            Attestation, AttestationData, AttesterSlashing, BeaconBlockHeader, Deposit,
            DepositData, ProposerSlashing, SignedVoluntaryExit, Validator,
        },
        primitives::{Gwei, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
    traits::{BeaconState, PostAltairBeaconState},
};

use crate::unphased::{self, cancellation, Error};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "metrics")]
use types::nonstandard::Phase;

/// Operations shared by every block body from Altair to Deneb.
pub struct Operations<'block, P: Preset> {
    pub proposer_slashings: &'block [ProposerSlashing],
    pub attester_slashings: &'block [AttesterSlashing<P>],
    pub attestations: &'block [Attestation<P>],
    pub deposits: &'block [Deposit],
    pub voluntary_exits: &'block [SignedVoluntaryExit],
}

pub fn process_block<P: Preset>(
    config: &Config,
    state: &mut AltairBeaconState<P>,
    block: &AltairBeaconBlock<P>,
    mut verifier: impl Verifier,
    mut ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.block_transition_timer(Phase::Altair));

    let body = &block.body;

    let header = header_of(
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

    process_sync_aggregate(config, state, &body.sync_aggregate, &mut verifier, ledger)?;

    verifier.finish()
}

/// Header with an empty state root, as cached by [`unphased::process_block_header`].
#[must_use]
pub const fn header_of(
    slot: Slot,
    proposer_index: ValidatorIndex,
    parent_root: H256,
    body_root: H256,
) -> BeaconBlockHeader {
    BeaconBlockHeader {
        slot,
        proposer_index,
        parent_root,
        state_root: H256::ZERO,
        body_root,
    }
}

/// Applies operations in the order they are listed in the block body.
///
/// The deposit count must already have been checked.
pub fn process_operations<P: Preset, V: Verifier>(
    config: &Config,
    state: &mut impl PostAltairBeaconState<P>,
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
        process_proposer_slashing(
            config,
            state,
            proposer_slashing,
            &mut verifier,
            &mut ledger,
        )?;
    }

    for attester_slashing in attester_slashings {
        cancellation::check(cancel)?;
        process_attester_slashing(
            config,
            state,
            attester_slashing,
            &mut verifier,
            &mut ledger,
        )?;
    }

    for attestation in attestations {
        cancellation::check(cancel)?;
        process_attestation(config, state, attestation, &mut verifier, &mut ledger)?;
    }

    for deposit in deposits {
        cancellation::check(cancel)?;
        process_deposit(config, state, deposit, &mut ledger)?;
    }

    for voluntary_exit in voluntary_exits {
        cancellation::check(cancel)?;
        process_voluntary_exit(config, state, voluntary_exit, &mut verifier)?;
    }

    Ok(())
}

pub fn process_proposer_slashing<P: Preset>(
    config: &Config,
    state: &mut impl BeaconState<P>,
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
    state: &mut impl BeaconState<P>,
    attester_slashing: &AttesterSlashing<P>,
    mut verifier: V,
    mut ledger: impl RewardLedger,
) -> Result<()> {
    let attestation_1 = &attester_slashing.attestation_1;
    let attestation_2 = &attester_slashing.attestation_2;

    unphased::validate_attester_slashing_data(attestation_1.data, attestation_2.data)?;
    validate_received_indexed_attestation(config, state, attestation_1, &mut verifier)?;
    validate_received_indexed_attestation(config, state, attestation_2, &mut verifier)?;

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
    state: &mut impl PostAltairBeaconState<P>,
    attestation: &Attestation<P>,
    verifier: impl Verifier,
    ledger: impl RewardLedger,
) -> Result<()> {
    unphased::validate_attestation_data(state, attestation.data)?;

    let indexed_attestation = get_indexed_attestation(state, attestation)?;

    validate_received_indexed_attestation(config, state, &indexed_attestation, verifier)?;

    apply_attestation(
        state,
        attestation.data,
        indexed_attestation.attesting_indices.iter().copied(),
        ledger,
    )
}

/// Sets participation flags for attesters and rewards the proposer for the flags that are new.
///
/// `attesting_indices` must come from an attestation that has already been validated. Shared by
/// both attestation shapes, which only differ in how committees are selected.
pub fn apply_attestation<P: Preset>(
    state: &mut impl PostAltairBeaconState<P>,
    data: AttestationData,
    attesting_indices: impl IntoIterator<Item = ValidatorIndex>,
    mut ledger: impl RewardLedger,
) -> Result<()> {
    // > Participation flag indices
    let inclusion_delay = state.slot() - data.slot;
    let participation_flags = get_attestation_participation_flags(state, data, inclusion_delay)?;

    // > Update epoch participation flags
    let base_reward_per_increment = get_base_reward_per_increment(state)?;

    let attesting_indices_with_base_rewards = attesting_indices
        .into_iter()
        .map(|validator_index| {
            let base_reward = get_base_reward(state, validator_index, base_reward_per_increment)?;
            Ok((validator_index, base_reward))
        })
        .collect::<Result<Vec<_>>>()?;

    let epoch_participation = match attestation_epoch(state, data.target.epoch)? {
        AttestationEpoch::Previous => state.previous_epoch_participation_mut(),
        AttestationEpoch::Current => state.current_epoch_participation_mut(),
    };

    let mut proposer_reward_numerator = 0;

    for (validator_index, base_reward) in attesting_indices_with_base_rewards {
        let flags = usize::try_from(validator_index)
            .ok()
            .and_then(|index| epoch_participation.get_mut(index))
            .ok_or(HelperError::ValidatorIndexOutOfBounds(validator_index))?;

        for (flag_index, weight) in PARTICIPATION_FLAG_WEIGHTS {
            if participation_flags.get_bit(flag_index) && !flags.get_bit(flag_index) {
                proposer_reward_numerator += base_reward * weight;
            }
        }

        *flags |= participation_flags;
    }

    // > Reward proposer
    let proposer_index = get_beacon_proposer_index(state)?;
    let proposer_reward_denominator =
        (WEIGHT_DENOMINATOR.get() - PROPOSER_WEIGHT) * WEIGHT_DENOMINATOR.get() / PROPOSER_WEIGHT;
    let proposer_reward = proposer_reward_numerator / proposer_reward_denominator;

    increase_balance(balance(state, proposer_index)?, proposer_reward);

    ledger.record_proposer_reward(ProposerRewardSource::Attestations, proposer_reward);

    Ok(())
}

pub fn process_deposit<P: Preset>(
    config: &Config,
    state: &mut impl PostAltairBeaconState<P>,
    deposit: &Deposit,
    ledger: impl RewardLedger,
) -> Result<()> {
    unphased::verify_deposit_merkle_branch(state, state.eth1_deposit_index(), deposit)?;

    // > Deposits must be processed in order
    *state.eth1_deposit_index_mut() += 1;

    apply_deposit(config, state, &deposit.data, ledger)
}

/// Tops up an existing validator or registers a new one.
///
/// Deposits for new validators with an invalid proof of possession are skipped.
pub fn apply_deposit<P: Preset>(
    config: &Config,
    state: &mut impl PostAltairBeaconState<P>,
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
        // > Increase balance by deposit amount
        increase_balance(balance(state, validator_index)?, amount);
        ledger.record_deposit(validator_index, amount);
        return Ok(());
    }

    // > Verify the deposit signature (proof of possession) which is not checked by the deposit
    // > contract
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

    let validator_index = add_validator_to_registry(state, validator, amount)?;

    ledger.record_deposit(validator_index, amount);

    Ok(())
}

/// Appends a validator along with its balance and zeroed participation and inactivity entries.
pub fn add_validator_to_registry<P: Preset>(
    state: &mut impl PostAltairBeaconState<P>,
    validator: Validator,
    amount: Gwei,
) -> Result<ValidatorIndex> {
    let validator_index = u64::try_from(state.validators().len())?;

    state
        .validators_mut()
        .push(validator)
        .map_err(|_| HelperError::ListFull)?;

    state
        .balances_mut()
        .push(amount)
        .map_err(|_| HelperError::ListFull)?;

    state
        .previous_epoch_participation_mut()
        .push(0)
        .map_err(|_| HelperError::ListFull)?;

    state
        .current_epoch_participation_mut()
        .push(0)
        .map_err(|_| HelperError::ListFull)?;

    state
        .inactivity_scores_mut()
        .push(0)
        .map_err(|_| HelperError::ListFull)?;

    Ok(validator_index)
}

pub fn process_voluntary_exit<P: Preset>(
    config: &Config,
    state: &mut impl BeaconState<P>,
    signed_voluntary_exit: &SignedVoluntaryExit,
    verifier: impl Verifier,
) -> Result<()> {
    unphased::validate_voluntary_exit(config, state, signed_voluntary_exit, verifier)?;

    // > Initiate exit
    initiate_validator_exit(config, state, signed_voluntary_exit.message.validator_index)
}

pub fn process_sync_aggregate<P: Preset>(
    config: &Config,
    state: &mut impl PostAltairBeaconState<P>,
    sync_aggregate: &SyncAggregate<P>,
    verifier: impl Verifier,
    mut ledger: impl RewardLedger,
) -> Result<()> {
    // > Verify sync committee aggregate signature signing over the previous slot block root
    verify_sync_aggregate_signature(config, state, sync_aggregate, verifier)?;

    // > Compute participant and proposer rewards
    let total_active_increments =
        total_active_balance(state)?.get() / P::EFFECTIVE_BALANCE_INCREMENT;
    let total_base_rewards = get_base_reward_per_increment(state)? * total_active_increments;
    let max_participant_rewards = (total_base_rewards * SYNC_REWARD_WEIGHT / WEIGHT_DENOMINATOR)
        .div_typenum::<P::SlotsPerEpoch>();
    let participant_reward = max_participant_rewards.div_typenum::<P::SyncCommitteeSize>();
    let proposer_reward =
        participant_reward * PROPOSER_WEIGHT / (WEIGHT_DENOMINATOR.get() - PROPOSER_WEIGHT);

    // > Apply participant and proposer rewards
    let proposer_index = get_beacon_proposer_index(state)?;
    let committee = state.current_sync_committee().clone();
    let mut participation = 0;

    for (pubkey, participated) in committee
        .pubkeys
        .iter()
        .zip(sync_aggregate.sync_committee_bits.iter())
    {
        let participant_index =
            index_of_public_key(state, pubkey)?.ok_or(Error::SyncCommitteeMemberNotInRegistry)?;

        let delta = if participated {
            increase_balance(balance(state, participant_index)?, participant_reward);
            participation += 1;
            Delta::Reward(participant_reward)
        } else {
            decrease_balance(balance(state, participant_index)?, participant_reward);
            Delta::Penalty(participant_reward)
        };

        ledger.record_sync_committee_delta(participant_index, delta);
    }

    let proposer_reward = proposer_reward * participation;

    increase_balance(balance(state, proposer_index)?, proposer_reward);

    ledger.record_proposer_reward(ProposerRewardSource::SyncAggregate, proposer_reward);

    Ok(())
}

pub fn verify_sync_aggregate_signature<P: Preset, V: Verifier>(
    config: &Config,
    state: &impl PostAltairBeaconState<P>,
    sync_aggregate: &SyncAggregate<P>,
    mut verifier: V,
) -> Result<()> {
    if V::IS_NULL {
        return Ok(());
    }

    let participant_pubkeys = state
        .current_sync_committee()
        .pubkeys
        .iter()
        .zip(sync_aggregate.sync_committee_bits.iter())
        .filter(|(_, participated)| *participated)
        .map(|(pubkey, _)| bls::PublicKey::try_from(pubkey))
        .collect::<Result<Vec<_>, _>>()?;

    let previous_slot = state.slot().saturating_sub(1);
    let block_root = get_block_root_at_slot(state, previous_slot)?;
    let signing_root = block_root.signing_root(config, state, previous_slot);

    verifier.verify_aggregate_allowing_empty(
        signing_root,
        &sync_aggregate.sync_committee_signature,
        &participant_pubkeys,
        SignatureKind::SyncAggregate,
    )
}

#[cfg(test)]
mod tests {
    use core::num::NonZeroU64;

    use bls::SignatureBytes;
    use helper_functions::{
        accessors::{self, beacon_committee},
        block_rewards::BlockRewards,
        signing::SignForAllForks as _,
        verifier::{NullVerifier, SingleVerifier},
    };
    use ssz_types::{BitList, BitVector, FixedVector};
    use types::{
        nonstandard::Phase,
        phase0::{
            consts::DEPOSIT_CONTRACT_TREE_DEPTH,
            containers::{AttestationData, Checkpoint, DepositMessage, SignedBeaconBlockHeader},
        },
        preset::Minimal,
    };

    use super::*;

    fn genesis_state(validator_count: u64) -> Result<AltairBeaconState<Minimal>> {
        let config = Config::minimal();
        let count = NonZeroU64::new(validator_count).ok_or_else(|| anyhow::anyhow!("zero"))?;
        let state = interop::quick_start_beacon_state(&config, Phase::Altair, 0, count)?;

        state
            .altair()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("quick start did not produce an Altair state"))
    }

    fn state_at_slot(slot: u64) -> Result<AltairBeaconState<Minimal>> {
        let mut state = genesis_state(16)?;
        state.slot = slot;
        state.cache.advance_epoch();
        Ok(state)
    }

    fn full_attestation(
        state: &AltairBeaconState<Minimal>,
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
    fn attestation_sets_flags_and_rewards_proposer_only_once() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(9)?;
        let attestation = full_attestation(&state, 8)?;
        let committee = beacon_committee(&state, 8, 0)?.to_vec();
        let proposer_index = get_beacon_proposer_index(&state)?;
        let proposer_balance = accessors::balance(&state, proposer_index)?;
        let mut first = BlockRewards::default();
        let mut second = BlockRewards::default();

        process_attestation(&config, &mut state, &attestation, NullVerifier, &mut first)?;
        process_attestation(&config, &mut state, &attestation, NullVerifier, &mut second)?;

        for validator_index in committee {
            let flags = state.current_epoch_participation[usize::try_from(validator_index)?];
            assert_eq!(flags, 0b111);
        }

        let reward = first.proposer_rewards[ProposerRewardSource::Attestations];

        assert!(reward > 0);
        assert_eq!(first.proposer_total(), reward);
        assert_eq!(second.proposer_total(), 0);
        assert_eq!(
            accessors::balance(&state, proposer_index)?,
            proposer_balance + reward,
        );

        Ok(())
    }

    #[test]
    fn attestation_with_unknown_committee_is_rejected() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(9)?;
        let mut attestation = full_attestation(&state, 8)?;

        attestation.data.index = 5;

        process_attestation(
            &config,
            &mut state,
            &attestation,
            NullVerifier,
            BlockRewards::default(),
        )
        .expect_err("there is only one committee per slot");

        Ok(())
    }

    #[test]
    fn deposits_top_up_register_or_skip() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(9)?;
        let mut report = BlockRewards::default();

        // Top-up of validator 3.
        let existing =
            interop::quick_start_deposit_data::<Minimal>(&config, &interop::secret_key(3));
        let balance_before = accessors::balance(&state, 3)?;

        apply_deposit(&config, &mut state, &existing, &mut report)?;

        assert_eq!(
            accessors::balance(&state, 3)?,
            balance_before + existing.amount,
        );
        assert_eq!(state.validators.len(), 16);

        // New validator with a valid proof of possession.
        let new =
            interop::quick_start_deposit_data::<Minimal>(&config, &interop::secret_key(100));

        apply_deposit(&config, &mut state, &new, &mut report)?;

        assert_eq!(state.validators.len(), 17);
        assert_eq!(state.balances.len(), 17);
        assert_eq!(state.previous_epoch_participation.len(), 17);
        assert_eq!(state.current_epoch_participation.len(), 17);
        assert_eq!(state.inactivity_scores.len(), 17);
        assert_eq!(state.validators[16].pubkey, new.pubkey);
        assert_eq!(state.validators[16].activation_epoch, FAR_FUTURE_EPOCH);
        assert_eq!(index_of_public_key(&state, &new.pubkey)?, Some(16));

        // New validator whose signature does not match.
        let mut forged =
            interop::quick_start_deposit_data::<Minimal>(&config, &interop::secret_key(101));
        forged.amount -= 1;

        apply_deposit(&config, &mut state, &forged, &mut report)?;

        assert_eq!(state.validators.len(), 17);
        assert_eq!(report.deposits.len(), 2);

        Ok(())
    }

    #[test]
    fn new_validator_effective_balance_is_rounded_down_and_capped() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(9)?;
        let secret_key = interop::secret_key(200);
        let mut deposit_data = interop::quick_start_deposit_data::<Minimal>(&config, &secret_key);

        deposit_data.amount = Minimal::MAX_EFFECTIVE_BALANCE * 2;
        deposit_data.signature = DepositMessage {
            pubkey: deposit_data.pubkey.clone(),
            withdrawal_credentials: deposit_data.withdrawal_credentials,
            amount: deposit_data.amount,
        }
        .sign(&config, &secret_key)
        .to_bytes();

        apply_deposit(&config, &mut state, &deposit_data, BlockRewards::default())?;

        assert_eq!(state.validators[16].effective_balance, Minimal::MAX_EFFECTIVE_BALANCE);
        assert_eq!(state.balances[16], Minimal::MAX_EFFECTIVE_BALANCE * 2);

        Ok(())
    }

    #[test]
    fn deposit_with_proof_advances_deposit_index() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(9)?;
        let data =
            interop::quick_start_deposit_data::<Minimal>(&config, &interop::secret_key(300));

        // Tree containing only this deposit.
        let mut branch = vec![];
        let mut zero = H256::ZERO;

        for _ in 0..DEPOSIT_CONTRACT_TREE_DEPTH {
            branch.push(zero);
            zero = hashing::hash_256_256(zero, zero);
        }

        let mut root = data.tree_hash_root();

        for node in &branch {
            root = hashing::hash_256_256(root, *node);
        }

        let mut length = H256::ZERO;
        length.0[0] = 1;
        branch.push(length);
        root = hashing::hash_256_256(root, length);

        let deposit = Deposit {
            proof: FixedVector::new(branch).map_err(|error| anyhow::anyhow!("{error:?}"))?,
            data,
        };

        state.eth1_deposit_index = 0;
        state.eth1_data.deposit_root = root;

        process_deposit(&config, &mut state, &deposit, BlockRewards::default())?;

        assert_eq!(state.eth1_deposit_index, 1);
        assert_eq!(state.validators.len(), 17);

        let error = process_deposit(&config, &mut state, &deposit, BlockRewards::default())
            .expect_err("proof is for index 0")
            .downcast::<Error>()?;

        assert_eq!(error, Error::DepositProofInvalid { deposit_index: 1 });

        Ok(())
    }

    #[test]
    fn proposer_slashing_slashes_and_initiates_exit() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(9)?;

        let header = |byte| BeaconBlockHeader {
            slot: 9,
            proposer_index: 2,
            body_root: H256::repeat_byte(byte),
            ..BeaconBlockHeader::default()
        };

        let slashing = ProposerSlashing {
            signed_header_1: SignedBeaconBlockHeader {
                message: header(1),
                signature: SignatureBytes::empty(),
            },
            signed_header_2: SignedBeaconBlockHeader {
                message: header(2),
                signature: SignatureBytes::empty(),
            },
        };

        let mut report = BlockRewards::default();

        process_proposer_slashing(&config, &mut state, &slashing, NullVerifier, &mut report)?;

        assert!(state.validators[2].slashed);
        assert_ne!(state.validators[2].exit_epoch, FAR_FUTURE_EPOCH);
        assert!(report.slashing_penalty(2) > 0);

        // The validator can no longer be slashed.
        process_proposer_slashing(&config, &mut state, &slashing, NullVerifier, &mut report)
            .expect_err("validator is already slashed");

        Ok(())
    }

    fn signed_sync_aggregate(
        config: &Config,
        state: &AltairBeaconState<Minimal>,
    ) -> Result<SyncAggregate<Minimal>> {
        let previous_slot = state.slot - 1;
        let block_root = get_block_root_at_slot(state, previous_slot)?;
        let mut bits = BitVector::new();
        let mut aggregate: Option<bls::Signature> = None;

        for (position, pubkey) in state.current_sync_committee.pubkeys.iter().enumerate() {
            let validator_index =
                index_of_public_key(state, pubkey)?.ok_or(Error::SyncCommitteeMemberNotInRegistry)?;
            let signature = block_root.sign(
                config,
                state,
                previous_slot,
                &interop::secret_key(validator_index),
            );

            match aggregate.as_mut() {
                Some(aggregate) => aggregate.aggregate_in_place(signature),
                None => aggregate = Some(signature),
            }

            bits.set(position, true)
                .map_err(|error| anyhow::anyhow!("{error:?}"))?;
        }

        Ok(SyncAggregate {
            sync_committee_bits: bits,
            sync_committee_signature: aggregate
                .map(bls::Signature::to_bytes)
                .unwrap_or_else(SignatureBytes::empty),
        })
    }

    #[test]
    fn full_sync_aggregate_rewards_every_seat() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(1)?;
        let sync_aggregate = signed_sync_aggregate(&config, &state)?;
        let total_before = state.balances.iter().sum::<Gwei>();
        let mut report = BlockRewards::default();

        process_sync_aggregate(&config, &mut state, &sync_aggregate, SingleVerifier, &mut report)?;

        let rewards = report
            .sync_aggregate_rewards
            .ok_or_else(|| anyhow::anyhow!("sync aggregate rewards were not reported"))?;

        assert_eq!(rewards.participation, 32);
        assert!(report
            .sync_committee_deltas
            .values()
            .all(|delta| delta.reward().is_some()));
        assert!(state.balances.iter().sum::<Gwei>() > total_before);

        Ok(())
    }

    #[test]
    fn sync_aggregate_signed_by_wrong_keys_is_rejected() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(1)?;
        let mut sync_aggregate = signed_sync_aggregate(&config, &state)?;

        sync_aggregate
            .sync_committee_bits
            .set(0, false)
            .map_err(|error| anyhow::anyhow!("{error:?}"))?;

        process_sync_aggregate(
            &config,
            &mut state,
            &sync_aggregate,
            SingleVerifier,
            BlockRewards::default(),
        )
        .expect_err("signature includes a member whose bit is not set");

        Ok(())
    }

    #[test]
    fn empty_sync_aggregate_penalizes_every_seat() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(1)?;
        let total_before = state.balances.iter().sum::<Gwei>();
        let mut report = BlockRewards::default();

        process_sync_aggregate(
            &config,
            &mut state,
            &SyncAggregate::empty(),
            SingleVerifier,
            &mut report,
        )?;

        assert!(report
            .sync_committee_deltas
            .values()
            .all(|delta| delta.penalty().is_some()));
        assert!(state.balances.iter().sum::<Gwei>() < total_before);

        let nonempty_signature = SyncAggregate {
            sync_committee_signature: signed_sync_aggregate(&config, &state)?
                .sync_committee_signature,
            ..SyncAggregate::empty()
        };

        process_sync_aggregate(
            &config,
            &mut state,
            &nonempty_signature,
            SingleVerifier,
            BlockRewards::default(),
        )
        .expect_err("empty aggregate must carry the point at infinity");

        Ok(())
    }
}
