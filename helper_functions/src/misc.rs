use core::{num::NonZeroU64, ops::Range};

use anyhow::Result;
use arithmetic::U64Ext as _;
use bls::PublicKeyBytes;
use ssz_types::BitVector;
use tree_hash::TreeHash;
use typenum::Unsigned as _;
use types::{
    altair::primitives::SyncCommitteePeriod,
    config::Config,
    deneb::{
        consts::VERSIONED_HASH_VERSION_KZG,
        primitives::{KzgCommitment, VersionedHash},
    },
    electra::consts::COMPOUNDING_WITHDRAWAL_PREFIX,
    nonstandard::Phase,
    phase0::{
        consts::{BLS_WITHDRAWAL_PREFIX, ETH1_ADDRESS_WITHDRAWAL_PREFIX, GENESIS_SLOT},
        containers::{ForkData, SigningData, Validator},
        primitives::{
            CommitteeIndex, Domain, DomainType, Epoch, ExecutionAddress, Gwei, Slot, UnixSeconds,
            ValidatorIndex, Version, H256,
        },
    },
    preset::Preset,
    traits::BeaconState,
};

use crate::{accessors, error::Error, predicates};

// Execution credentials are the prefix byte, 11 zero bytes and a 20-byte address.
const ADDRESS_OFFSET: usize = size_of::<H256>() - size_of::<ExecutionAddress>();

#[must_use]
pub fn compute_epoch_at_slot<P: Preset>(slot: Slot) -> Epoch {
    slot.div_typenum::<P::SlotsPerEpoch>()
}

#[must_use]
pub const fn compute_start_slot_at_epoch<P: Preset>(epoch: Epoch) -> Slot {
    epoch.saturating_mul(P::SlotsPerEpoch::U64)
}

#[must_use]
pub fn is_epoch_start<P: Preset>(slot: Slot) -> bool {
    slots_since_epoch_start::<P>(slot) == 0
}

#[must_use]
pub fn slots_since_epoch_start<P: Preset>(slot: Slot) -> u64 {
    slot.mod_typenum::<P::SlotsPerEpoch>()
}

#[must_use]
pub const fn slots_in_epoch<P: Preset>(epoch: Epoch) -> Range<Slot> {
    compute_start_slot_at_epoch::<P>(epoch)..compute_start_slot_at_epoch::<P>(epoch + 1)
}

#[must_use]
pub fn sync_committee_period<P: Preset>(epoch: Epoch) -> SyncCommitteePeriod {
    epoch / P::EPOCHS_PER_SYNC_COMMITTEE_PERIOD
}

#[must_use]
pub const fn compute_activation_exit_epoch<P: Preset>(epoch: Epoch) -> Epoch {
    epoch + 1 + P::MAX_SEED_LOOKAHEAD
}

// > Return the 32-byte fork data root for the ``current_version`` and ``genesis_validators_root``.
// > This is used primarily in signature domains to avoid collisions across forks/chains.
#[must_use]
pub fn compute_fork_data_root(current_version: Version, genesis_validators_root: H256) -> H256 {
    ForkData {
        current_version,
        genesis_validators_root,
    }
    .tree_hash_root()
}

/// Missing parameters default to `GENESIS_FORK_VERSION` and a zero root.
#[must_use]
pub fn compute_domain(
    config: &Config,
    domain_type: DomainType,
    fork_version: Option<Version>,
    genesis_validators_root: Option<H256>,
) -> Domain {
    let fork_version = fork_version.unwrap_or(config.genesis_fork_version);
    let genesis_validators_root = genesis_validators_root.unwrap_or_default();
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);
    let prefix_length = domain_type.len();

    let mut domain = Domain::ZERO;
    domain[..prefix_length].copy_from_slice(domain_type.as_slice());
    let suffix_length = domain.len() - prefix_length;
    domain[prefix_length..].copy_from_slice(&fork_data_root[..suffix_length]);
    domain
}

pub fn compute_signing_root(object: &(impl TreeHash + ?Sized), domain: Domain) -> H256 {
    SigningData {
        object_root: object.tree_hash_root(),
        domain,
    }
    .tree_hash_root()
}

pub fn compute_shuffled_index<P: Preset>(
    index: ValidatorIndex,
    index_count: NonZeroU64,
    seed: H256,
) -> Result<ValidatorIndex> {
    shuffling::shuffle_single::<P>(index, index_count, seed)
}

/// Rejection sampling weighted by effective balance.
///
/// Electra draws 16-bit random values and weighs against `MAX_EFFECTIVE_BALANCE_ELECTRA`.
/// Earlier phases draw single bytes and weigh against `MAX_EFFECTIVE_BALANCE`.
pub(crate) fn is_candidate_accepted<P: Preset>(
    phase: Phase,
    seed: H256,
    attempt: u64,
    effective_balance: Gwei,
) -> bool {
    if phase >= Phase::Electra {
        let values_per_hash = (size_of::<H256>() / size_of::<u16>()) as u64;
        let random_bytes = hashing::hash_256_64(seed, attempt / values_per_hash);
        let offset = (attempt % values_per_hash) as usize * 2;
        let random_value = u64::from(u16::from_le_bytes([
            random_bytes[offset],
            random_bytes[offset + 1],
        ]));

        u128::from(effective_balance) * u128::from(u16::MAX)
            >= u128::from(P::MAX_EFFECTIVE_BALANCE_ELECTRA) * u128::from(random_value)
    } else {
        let bytes_per_hash = size_of::<H256>() as u64;
        let random_bytes = hashing::hash_256_64(seed, attempt / bytes_per_hash);
        let random_byte = u64::from(random_bytes[(attempt % bytes_per_hash) as usize]);

        u128::from(effective_balance) * u128::from(u8::MAX)
            >= u128::from(P::MAX_EFFECTIVE_BALANCE) * u128::from(random_byte)
    }
}

// > Return from ``indices`` a random index sampled by effective balance.
pub fn compute_proposer_index<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    indices: &[ValidatorIndex],
    seed: H256,
) -> Result<ValidatorIndex> {
    let total = u64::try_from(indices.len())
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or(Error::NoActiveValidators)?;

    let phase = state.phase();

    for attempt in 0..u64::MAX {
        let shuffled = compute_shuffled_index::<P>(attempt % total, total, seed)?;
        let candidate_index = indices[usize::try_from(shuffled)?];
        let effective_balance = accessors::validator(state, candidate_index)?.effective_balance;

        if is_candidate_accepted::<P>(phase, seed, attempt, effective_balance) {
            return Ok(candidate_index);
        }
    }

    Err(Error::FailedToSelectProposer.into())
}

#[must_use]
pub fn compute_timestamp_at_slot<P: Preset>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
    slot: Slot,
) -> UnixSeconds {
    let slots_since_genesis = slot - GENESIS_SLOT;
    state.genesis_time() + slots_since_genesis * config.seconds_per_slot.get()
}

#[must_use]
pub fn committee_count_from_active_validator_count<P: Preset>(
    active_validator_count: u64,
) -> NonZeroU64 {
    let count = (active_validator_count.div_typenum::<P::SlotsPerEpoch>()
        / P::TARGET_COMMITTEE_SIZE)
        .clamp(1, P::max_committees_per_slot().get());

    NonZeroU64::new(count).unwrap_or(NonZeroU64::MIN)
}

/// Committee indices selected by an Electra attestation, in ascending order.
pub fn get_committee_indices<P: Preset>(
    committee_bits: &BitVector<P::MaxCommitteesPerSlot>,
) -> impl Iterator<Item = CommitteeIndex> + '_ {
    committee_bits
        .iter()
        .zip(0..)
        .filter_map(|(present, index)| present.then_some(index))
}

#[must_use]
pub fn get_validator_max_effective_balance<P: Preset>(validator: &Validator) -> Gwei {
    if predicates::has_compounding_withdrawal_credential(validator) {
        P::MAX_EFFECTIVE_BALANCE_ELECTRA
    } else {
        P::MIN_ACTIVATION_BALANCE
    }
}

#[must_use]
pub fn bls_withdrawal_credentials(public_key: &PublicKeyBytes) -> H256 {
    let mut withdrawal_credentials = hashing::hash(public_key.as_bytes());
    withdrawal_credentials[0] = BLS_WITHDRAWAL_PREFIX;
    withdrawal_credentials
}

#[must_use]
pub fn eth1_address_withdrawal_credentials(address: ExecutionAddress) -> H256 {
    address_withdrawal_credentials(ETH1_ADDRESS_WITHDRAWAL_PREFIX, address)
}

#[must_use]
pub fn compounding_withdrawal_credentials(address: ExecutionAddress) -> H256 {
    address_withdrawal_credentials(COMPOUNDING_WITHDRAWAL_PREFIX, address)
}

fn address_withdrawal_credentials(prefix: u8, address: ExecutionAddress) -> H256 {
    let mut withdrawal_credentials = H256::ZERO;
    withdrawal_credentials[0] = prefix;
    withdrawal_credentials[ADDRESS_OFFSET..].copy_from_slice(address.as_slice());
    withdrawal_credentials
}

/// The address in the low 20 bytes of an execution credential.
#[must_use]
pub fn withdrawal_address(withdrawal_credentials: H256) -> ExecutionAddress {
    ExecutionAddress::from_slice(&withdrawal_credentials[ADDRESS_OFFSET..])
}

#[must_use]
pub fn kzg_commitment_to_versioned_hash(kzg_commitment: &KzgCommitment) -> VersionedHash {
    let mut versioned_hash = hashing::hash(kzg_commitment.as_bytes());
    versioned_hash[0] = VERSIONED_HASH_VERSION_KZG;
    versioned_hash
}
