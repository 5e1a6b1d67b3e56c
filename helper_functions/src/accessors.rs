use core::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{ensure, Result};
use arithmetic::U64Ext as _;
use bit_field::BitField as _;
use bls::{PublicKey, PublicKeyBytes};
use itertools::Itertools as _;
use ssz_types::{BitList, FixedVector, VariableList};
use typenum::Unsigned as _;
use types::{
    altair::{
        consts::{
            DOMAIN_SYNC_COMMITTEE, TIMELY_HEAD_FLAG_INDEX, TIMELY_SOURCE_FLAG_INDEX,
            TIMELY_TARGET_FLAG_INDEX,
        },
        containers::SyncCommittee,
        primitives::ParticipationFlags,
    },
    config::Config,
    nonstandard::{AttestationEpoch, Phase, RelativeEpoch},
    phase0::{
        containers::{Attestation, AttestationData, IndexedAttestation, Validator},
        primitives::{CommitteeIndex, Domain, DomainType, Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
    traits::{BeaconState, PostElectraBeaconState},
};

use crate::{epoch_context, error::Error, misc, predicates};

#[must_use]
pub fn get_current_epoch<P: Preset>(state: &(impl BeaconState<P> + ?Sized)) -> Epoch {
    misc::compute_epoch_at_slot::<P>(state.slot())
}

#[must_use]
pub fn get_previous_epoch<P: Preset>(state: &(impl BeaconState<P> + ?Sized)) -> Epoch {
    get_current_epoch(state).saturating_sub(1)
}

#[must_use]
pub fn get_next_epoch<P: Preset>(state: &(impl BeaconState<P> + ?Sized)) -> Epoch {
    get_current_epoch(state) + 1
}

#[must_use]
pub fn get_finality_delay<P: Preset>(state: &(impl BeaconState<P> + ?Sized)) -> u64 {
    get_previous_epoch(state) - state.finalized_checkpoint().epoch
}

pub fn attestation_epoch<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    epoch: Epoch,
) -> Result<AttestationEpoch> {
    if epoch == get_current_epoch(state) {
        return Ok(AttestationEpoch::Current);
    }

    if epoch == get_previous_epoch(state) {
        return Ok(AttestationEpoch::Previous);
    }

    if epoch < get_previous_epoch(state) {
        Err(Error::EpochBeforePrevious.into())
    } else {
        Err(Error::EpochInTheFuture.into())
    }
}

pub fn validator<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Result<&Validator> {
    usize::try_from(validator_index)
        .ok()
        .and_then(|index| state.validators().get(index))
        .ok_or_else(|| Error::ValidatorIndexOutOfBounds(validator_index).into())
}

pub fn balance<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Result<Gwei> {
    usize::try_from(validator_index)
        .ok()
        .and_then(|index| state.balances().get(index))
        .copied()
        .ok_or_else(|| Error::ValidatorIndexOutOfBounds(validator_index).into())
}

pub fn public_key<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Result<PublicKey> {
    let pubkey = &validator(state, validator_index)?.pubkey;
    PublicKey::try_from(pubkey).map_err(Into::into)
}

/// Looks up a validator by public key.
///
/// Validators added after the epoch context was built are not in its map.
/// They are found by scanning the tail of the registry.
pub fn index_of_public_key<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    pubkey: &PublicKeyBytes,
) -> Result<Option<ValidatorIndex>> {
    let context = epoch_context::get_or_init(state)?;

    if let Some(index) = context.validator_indices.get(pubkey) {
        return Ok(Some(*index));
    }

    let snapshot_length = context.validator_count();

    Ok(state
        .validators()
        .iter()
        .zip(0..)
        .skip(snapshot_length)
        .find(|(validator, _)| validator.pubkey == *pubkey)
        .map(|(_, index)| index))
}

// > Return the block root at the start of a recent ``epoch``.
pub fn get_block_root<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    attestation_epoch: AttestationEpoch,
) -> Result<H256> {
    let epoch = match attestation_epoch {
        AttestationEpoch::Previous => get_previous_epoch(state),
        AttestationEpoch::Current => get_current_epoch(state),
    };

    get_block_root_at_slot(state, misc::compute_start_slot_at_epoch::<P>(epoch))
}

// > Return the block root at a recent ``slot``.
pub fn get_block_root_at_slot<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    slot: Slot,
) -> Result<H256> {
    let state_slot = state.slot();

    ensure!(
        slot < state_slot && state_slot <= slot + P::SlotsPerHistoricalRoot::U64,
        Error::SlotOutOfRange { slot, state_slot },
    );

    Ok(state.block_roots()[ring_index::<P::SlotsPerHistoricalRoot>(slot)])
}

// > Return the randao mix at a recent ``epoch``.
#[must_use]
pub fn get_randao_mix<P: Preset>(state: &(impl BeaconState<P> + ?Sized), epoch: Epoch) -> H256 {
    state.randao_mixes()[ring_index::<P::EpochsPerHistoricalVector>(epoch)]
}

// > Return the seed at ``epoch``.
#[must_use]
pub fn get_seed<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    epoch: Epoch,
    domain_type: DomainType,
) -> H256 {
    // `EPOCHS_PER_HISTORICAL_VECTOR` is added first to avoid underflow near genesis.
    let mix_epoch = epoch + P::EpochsPerHistoricalVector::U64 - P::MIN_SEED_LOOKAHEAD - 1;

    let mix = get_randao_mix(state, mix_epoch);

    hashing::hash_32_64_256(domain_type.0, epoch, mix)
}

/// Position of `index` in a ring buffer of length `N`.
#[must_use]
pub fn ring_index<N: typenum::Unsigned + typenum::NonZero>(index: u64) -> usize {
    // The remainder is less than `N`, which is the length of an in-memory collection.
    usize::try_from(index.mod_typenum::<N>()).unwrap_or_default()
}

pub fn active_validator_indices_ordered<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    epoch: Epoch,
) -> impl Iterator<Item = ValidatorIndex> + '_ {
    state
        .validators()
        .iter()
        .zip(0..)
        .filter(move |(validator, _)| predicates::is_active_validator(validator, epoch))
        .map(|(_, index)| index)
}

pub fn active_validator_count<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    relative_epoch: RelativeEpoch,
) -> Result<u64> {
    let context = epoch_context::get_or_init(state)?;
    let count = context.shuffling(relative_epoch).active_validator_indices.len();
    Ok(u64::try_from(count)?)
}

pub fn total_active_balance<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<NonZeroU64> {
    let context = epoch_context::get_or_init(state)?;
    Ok(context.shuffling(RelativeEpoch::Current).total_active_balance)
}

// > Return the combined effective balance of the ``indices``.
// > ``EFFECTIVE_BALANCE_INCREMENT`` Gwei minimum to avoid divisions by zero.
pub fn get_total_balance<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    indices: impl IntoIterator<Item = ValidatorIndex>,
) -> Result<NonZeroU64> {
    let mut total: Gwei = 0;

    for validator_index in indices {
        total = total
            .checked_add(validator(state, validator_index)?.effective_balance)
            .ok_or(Error::BalanceOverflow)?;
    }

    Ok(NonZeroU64::new(total)
        .map_or(P::EFFECTIVE_BALANCE_INCREMENT, |total| {
            total.max(P::EFFECTIVE_BALANCE_INCREMENT)
        }))
}

// > Return the validator churn limit for the current epoch.
pub fn get_validator_churn_limit<P: Preset>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<u64> {
    let active_validator_count = active_validator_count(state, RelativeEpoch::Current)?;

    Ok(config
        .min_per_epoch_churn_limit
        .max(active_validator_count / config.churn_limit_quotient))
}

// > Return the validator activation churn limit for the current epoch.
pub fn get_validator_activation_churn_limit<P: Preset>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<u64> {
    let churn_limit = get_validator_churn_limit(config, state)?;

    if state.phase() >= Phase::Deneb {
        Ok(churn_limit.min(config.max_per_epoch_activation_churn_limit))
    } else {
        Ok(churn_limit)
    }
}

// > Return the churn limit for the current epoch.
pub fn get_balance_churn_limit<P: Preset>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<Gwei> {
    let total_active_balance = total_active_balance(state)?.get();

    let churn = config
        .min_per_epoch_churn_limit_electra
        .max(total_active_balance / config.churn_limit_quotient);

    Ok(churn.prev_multiple_of(P::EFFECTIVE_BALANCE_INCREMENT))
}

// > Return the churn limit for the current epoch dedicated to activations and exits.
pub fn get_activation_exit_churn_limit<P: Preset>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<Gwei> {
    Ok(config
        .max_per_epoch_activation_exit_churn_limit
        .min(get_balance_churn_limit(config, state)?))
}

pub fn get_consolidation_churn_limit<P: Preset>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<Gwei> {
    Ok(get_balance_churn_limit(config, state)? - get_activation_exit_churn_limit(config, state)?)
}

pub fn get_committee_count_per_slot<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    relative_epoch: RelativeEpoch,
) -> Result<NonZeroU64> {
    let context = epoch_context::get_or_init(state)?;
    Ok(context.shuffling(relative_epoch).committees_per_slot)
}

// > Return the beacon committee at ``slot`` for ``index``.
pub fn beacon_committee<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    slot: Slot,
    committee_index: CommitteeIndex,
) -> Result<&[ValidatorIndex]> {
    let epoch = misc::compute_epoch_at_slot::<P>(slot);
    let relative_epoch = RelativeEpoch::from(attestation_epoch(state, epoch)?);
    let context = epoch_context::get_or_init(state)?;

    context
        .shuffling(relative_epoch)
        .beacon_committee::<P>(slot, committee_index)
        .ok_or_else(|| Error::CommitteeIndexOutOfBounds.into())
}

// > Return the beacon proposer index at the current slot.
pub fn get_beacon_proposer_index<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<ValidatorIndex> {
    epoch_context::get_or_init(state)?
        .proposer_index::<P>(state.slot())
        .ok_or_else(|| Error::FailedToSelectProposer.into())
}

// > Return the signature domain (fork version concatenated with domain type) of a message.
#[must_use]
pub fn get_domain<P: Preset>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
    domain_type: DomainType,
    epoch: Option<Epoch>,
) -> Domain {
    let epoch = epoch.unwrap_or_else(|| get_current_epoch(state));
    let fork = state.fork();

    let fork_version = if epoch < fork.epoch {
        fork.previous_version
    } else {
        fork.current_version
    };

    misc::compute_domain(
        config,
        domain_type,
        Some(fork_version),
        Some(state.genesis_validators_root()),
    )
}

// > Return the indexed attestation corresponding to ``attestation``.
pub fn get_indexed_attestation<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    attestation: &Attestation<P>,
) -> Result<IndexedAttestation<P>> {
    let attesting_indices = get_attesting_indices(
        state,
        attestation.data,
        &attestation.aggregation_bits,
    )?
    .sorted_unstable()
    .collect_vec();

    Ok(IndexedAttestation {
        // Committees are never longer than `MAX_VALIDATORS_PER_COMMITTEE`.
        attesting_indices: VariableList::from(attesting_indices),
        data: attestation.data,
        signature: attestation.signature.clone(),
    })
}

// > Return the set of attesting indices corresponding to ``data`` and ``bits``.
pub fn get_attesting_indices<'all, P: Preset>(
    state: &'all (impl BeaconState<P> + ?Sized),
    attestation_data: AttestationData,
    aggregation_bits: &'all BitList<P::MaxValidatorsPerCommittee>,
) -> Result<impl Iterator<Item = ValidatorIndex> + 'all> {
    let committee = beacon_committee(state, attestation_data.slot, attestation_data.index)?;

    ensure!(
        committee.len() == aggregation_bits.len(),
        Error::CommitteeLengthMismatch {
            aggregation_bitlist_length: aggregation_bits.len(),
            committee_length: committee.len(),
        },
    );

    Ok(committee
        .iter()
        .zip(aggregation_bits.iter())
        .filter_map(|(validator_index, present)| present.then_some(*validator_index)))
}

// > Return the sequence of sync committee indices, with possible duplicates,
// > for the next sync committee.
pub fn get_next_sync_committee_indices<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<Vec<ValidatorIndex>> {
    let epoch = get_next_epoch(state);
    let active_validator_indices = active_validator_indices_ordered(state, epoch).collect_vec();

    let total = u64::try_from(active_validator_indices.len())
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or(Error::NoActiveValidators)?;

    let seed = get_seed(state, epoch, DOMAIN_SYNC_COMMITTEE);
    let phase = state.phase();
    let mut sync_committee_indices = Vec::with_capacity(P::SyncCommitteeSize::USIZE);

    for attempt in 0..u64::MAX {
        if sync_committee_indices.len() == P::SyncCommitteeSize::USIZE {
            return Ok(sync_committee_indices);
        }

        let shuffled_index = misc::compute_shuffled_index::<P>(attempt % total, total, seed)?;
        let candidate_index = active_validator_indices[usize::try_from(shuffled_index)?];
        let effective_balance = validator(state, candidate_index)?.effective_balance;

        if misc::is_candidate_accepted::<P>(phase, seed, attempt, effective_balance) {
            sync_committee_indices.push(candidate_index);
        }
    }

    Err(Error::FailedToSelectSyncCommitteeMember.into())
}

// > Return the next sync committee, with possible pubkey duplicates.
pub fn get_next_sync_committee<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<Arc<SyncCommittee<P>>> {
    let indices = get_next_sync_committee_indices(state)?;

    let pubkeys = indices
        .iter()
        .map(|validator_index| Ok(validator(state, *validator_index)?.pubkey.clone()))
        .collect::<Result<Vec<_>>>()?;

    let public_keys = pubkeys
        .iter()
        .map(PublicKey::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let aggregate_pubkey = PublicKey::aggregate_nonempty(&public_keys)?.to_bytes();

    Ok(Arc::new(SyncCommittee {
        pubkeys: FixedVector::new(pubkeys).map_err(|error| anyhow::anyhow!("{error:?}"))?,
        aggregate_pubkey,
    }))
}

pub fn get_base_reward_per_increment<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
) -> Result<Gwei> {
    let total_active_balance = total_active_balance(state)?.get();

    Ok(P::EFFECTIVE_BALANCE_INCREMENT.get() * P::BASE_REWARD_FACTOR
        / total_active_balance.integer_sqrt())
}

// > Return the base reward for the validator defined by ``index`` with respect to the current
// > ``state``.
pub fn get_base_reward<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
    base_reward_per_increment: Gwei,
) -> Result<Gwei> {
    let increments =
        validator(state, validator_index)?.effective_balance / P::EFFECTIVE_BALANCE_INCREMENT;

    Ok(increments * base_reward_per_increment)
}

// > Return the flag indices that are satisfied by an attestation.
pub fn get_attestation_participation_flags<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    data: AttestationData,
    inclusion_delay: u64,
) -> Result<ParticipationFlags> {
    let attestation_epoch = attestation_epoch(state, data.target.epoch)?;

    let justified_checkpoint = match attestation_epoch {
        AttestationEpoch::Previous => state.previous_justified_checkpoint(),
        AttestationEpoch::Current => state.current_justified_checkpoint(),
    };

    // > Matching roots
    let is_matching_source = data.source == justified_checkpoint;

    ensure!(is_matching_source, Error::AttestationSourceMismatch);

    let is_matching_target =
        is_matching_source && data.target.root == get_block_root(state, attestation_epoch)?;

    let is_matching_head = is_matching_target
        && data.beacon_block_root == get_block_root_at_slot(state, data.slot)?;

    let mut participation_flags = 0;

    if is_matching_source && inclusion_delay <= P::SlotsPerEpoch::U64.integer_sqrt() {
        participation_flags.set_bit(TIMELY_SOURCE_FLAG_INDEX, true);
    }

    // The upper bound on the target delay was removed in Deneb.
    if is_matching_target
        && (state.phase() >= Phase::Deneb || inclusion_delay <= P::SlotsPerEpoch::U64)
    {
        participation_flags.set_bit(TIMELY_TARGET_FLAG_INDEX, true);
    }

    if is_matching_head && inclusion_delay == P::MIN_ATTESTATION_INCLUSION_DELAY.get() {
        participation_flags.set_bit(TIMELY_HEAD_FLAG_INDEX, true);
    }

    Ok(participation_flags)
}

/// Intersection of two sorted index lists, in ascending order.
pub fn intersect_sorted_indices<'all>(
    indices_1: &'all [ValidatorIndex],
    indices_2: &'all [ValidatorIndex],
) -> impl Iterator<Item = ValidatorIndex> + 'all {
    indices_1
        .iter()
        .merge_join_by(indices_2, |left, right| left.cmp(right))
        .filter_map(|either_or_both| either_or_both.both().map(|(index, _)| *index))
}

pub fn get_pending_balance_to_withdraw<P: Preset>(
    state: &(impl PostElectraBeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Gwei {
    state
        .pending_partial_withdrawals()
        .iter()
        .filter(|withdrawal| withdrawal.validator_index == validator_index)
        .map(|withdrawal| withdrawal.amount)
        .sum()
}
