use anyhow::{ensure, Result};
use bit_field::BitField as _;
use bls::SignatureBytes;
use itertools::Itertools as _;
use types::{
    config::Config,
    electra::{
        consts::COMPOUNDING_WITHDRAWAL_PREFIX,
        containers::IndexedAttestation as ElectraIndexedAttestation,
    },
    phase0::{
        consts::{ETH1_ADDRESS_WITHDRAWAL_PREFIX, FAR_FUTURE_EPOCH},
        containers::{AttestationData, IndexedAttestation, Validator},
        primitives::{Epoch, Gwei, ValidatorIndex, H256},
    },
    preset::Preset,
    traits::BeaconState,
};

use crate::{
    accessors,
    error::{Error, SignatureKind},
    signing::SignForSingleFork as _,
    verifier::Verifier,
};

// > Check if ``validator`` is active.
#[inline]
#[must_use]
pub const fn is_active_validator(validator: &Validator, epoch: Epoch) -> bool {
    validator.activation_epoch <= epoch && epoch < validator.exit_epoch
}

// > Check if ``validator`` is eligible to be placed into the activation queue.
#[must_use]
pub const fn is_eligible_for_activation_queue<P: Preset>(validator: &Validator) -> bool {
    validator.activation_eligibility_epoch == FAR_FUTURE_EPOCH
        && validator.effective_balance == P::MAX_EFFECTIVE_BALANCE
}

// > Check if ``validator`` is eligible for activation.
#[must_use]
pub fn is_eligible_for_activation<P: Preset>(
    state: &(impl BeaconState<P> + ?Sized),
    validator: &Validator,
) -> bool {
    // > Placement in queue is finalized
    validator.activation_eligibility_epoch <= state.finalized_checkpoint().epoch
        // > Has not yet been activated
        && validator.activation_epoch == FAR_FUTURE_EPOCH
}

#[inline]
#[must_use]
pub const fn is_eligible_for_penalties(validator: &Validator, previous_epoch: Epoch) -> bool {
    is_active_validator(validator, previous_epoch)
        || (validator.slashed && previous_epoch + 1 < validator.withdrawable_epoch)
}

// > Check if ``validator`` is slashable.
#[inline]
#[must_use]
pub const fn is_slashable_validator(validator: &Validator, epoch: Epoch) -> bool {
    !validator.slashed
        && validator.activation_epoch <= epoch
        && epoch < validator.withdrawable_epoch
}

// > Check if ``data_1`` and ``data_2`` are slashable according to Casper FFG rules.
#[inline]
#[must_use]
pub fn is_slashable_attestation_data(data_1: AttestationData, data_2: AttestationData) -> bool {
    // > Double vote
    (data_1 != data_2 && data_1.target.epoch == data_2.target.epoch)
        // > Surround vote
        || (data_1.source.epoch < data_2.source.epoch && data_2.target.epoch < data_1.target.epoch)
}

pub fn validate_received_indexed_attestation<P: Preset>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
    indexed_attestation: &IndexedAttestation<P>,
    verifier: impl Verifier,
) -> Result<()> {
    validate_indexed_attestation(
        config,
        state,
        &indexed_attestation.attesting_indices,
        indexed_attestation.data,
        &indexed_attestation.signature,
        verifier,
    )
}

pub fn validate_received_electra_indexed_attestation<P: Preset>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
    indexed_attestation: &ElectraIndexedAttestation<P>,
    verifier: impl Verifier,
) -> Result<()> {
    validate_indexed_attestation(
        config,
        state,
        &indexed_attestation.attesting_indices,
        indexed_attestation.data,
        &indexed_attestation.signature,
        verifier,
    )
}

// Both shapes of indexed attestation differ only in the capacity of `attesting_indices`.
fn validate_indexed_attestation<P: Preset, V: Verifier>(
    config: &Config,
    state: &(impl BeaconState<P> + ?Sized),
    indices: &[ValidatorIndex],
    data: AttestationData,
    signature: &SignatureBytes,
    mut verifier: V,
) -> Result<()> {
    ensure!(!indices.is_empty(), Error::AttestationHasNoAttestingIndices);

    // > Verify indices are sorted and unique
    ensure!(
        indices.iter().tuple_windows().all(|(a, b)| a < b),
        Error::AttestingIndicesNotSortedAndUnique,
    );

    if V::IS_NULL {
        // Indices still have to refer to existing validators.
        for validator_index in indices.iter().copied() {
            accessors::validator(state, validator_index)?;
        }

        return Ok(());
    }

    // > Verify aggregate signature
    let public_keys = indices
        .iter()
        .map(|validator_index| accessors::public_key(state, *validator_index))
        .collect::<Result<Vec<_>>>()?;

    verifier.verify_aggregate(
        data.signing_root(config, state),
        signature,
        &public_keys,
        SignatureKind::Attestation,
    )
}

// > Check if ``leaf`` at ``index`` verifies against the Merkle ``root`` and ``branch``.
#[must_use]
pub fn is_valid_merkle_branch(
    leaf: H256,
    branch: impl IntoIterator<Item = H256>,
    index: u64,
    root: H256,
) -> bool {
    let mut hash = leaf;

    for (height, node) in branch.into_iter().enumerate() {
        if index.get_bit(height) {
            hash = hashing::hash_256_256(node, hash);
        } else {
            hash = hashing::hash_256_256(hash, node);
        }
    }

    hash == root
}

#[must_use]
pub fn is_in_inactivity_leak<P: Preset>(state: &(impl BeaconState<P> + ?Sized)) -> bool {
    accessors::get_finality_delay(state) > P::MIN_EPOCHS_TO_INACTIVITY_PENALTY
}

// > Check if ``validator`` has an 0x01 prefixed "eth1" withdrawal credential.
#[must_use]
pub fn has_eth1_withdrawal_credential(validator: &Validator) -> bool {
    validator.withdrawal_credentials[0] == ETH1_ADDRESS_WITHDRAWAL_PREFIX
}

// > Check if ``validator`` has an 0x02 prefixed "compounding" withdrawal credential.
#[must_use]
pub fn has_compounding_withdrawal_credential(validator: &Validator) -> bool {
    validator.withdrawal_credentials[0] == COMPOUNDING_WITHDRAWAL_PREFIX
}

// > Check if ``validator`` has a 0x01 or 0x02 prefixed withdrawal credential.
#[must_use]
pub fn has_execution_withdrawal_credential(validator: &Validator) -> bool {
    has_compounding_withdrawal_credential(validator) || has_eth1_withdrawal_credential(validator)
}

// > Check if ``validator`` is fully withdrawable.
#[must_use]
pub fn is_fully_withdrawable_validator(validator: &Validator, balance: Gwei, epoch: Epoch) -> bool {
    has_eth1_withdrawal_credential(validator)
        && validator.withdrawable_epoch <= epoch
        && balance > 0
}

// > Check if ``validator`` is partially withdrawable.
#[must_use]
pub fn is_partially_withdrawable_validator<P: Preset>(
    validator: &Validator,
    balance: Gwei,
) -> bool {
    let has_max_effective_balance = validator.effective_balance == P::MAX_EFFECTIVE_BALANCE;
    let has_excess_balance = balance > P::MAX_EFFECTIVE_BALANCE;
    has_eth1_withdrawal_credential(validator) && has_max_effective_balance && has_excess_balance
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bls::SecretKey;
    use ssz_types::VariableList;
    use test_case::test_case;
    use types::{
        altair::beacon_state::BeaconState as AltairBeaconState,
        phase0::{containers::Checkpoint, primitives::ExecutionAddress},
        preset::Minimal,
    };

    use crate::{
        misc,
        signing::SignForSingleFork,
        verifier::{NullVerifier, SingleVerifier},
    };

    use super::*;

    fn checkpoint(epoch: Epoch) -> Checkpoint {
        Checkpoint {
            epoch,
            root: H256::ZERO,
        }
    }

    fn data(source: Epoch, target: Epoch, slot: u64) -> AttestationData {
        AttestationData {
            slot,
            source: checkpoint(source),
            target: checkpoint(target),
            ..AttestationData::default()
        }
    }

    #[test_case(data(0, 2, 16), data(0, 2, 17) => true; "double vote")]
    #[test_case(data(0, 3, 24), data(1, 2, 16) => true; "surround vote")]
    #[test_case(data(1, 2, 16), data(0, 3, 24) => false; "surrounded vote")]
    #[test_case(data(0, 2, 16), data(0, 2, 16) => false; "identical votes")]
    #[test_case(data(0, 1, 8), data(0, 2, 16) => false; "consecutive votes")]
    fn slashable_attestation_data(data_1: AttestationData, data_2: AttestationData) -> bool {
        is_slashable_attestation_data(data_1, data_2)
    }

    #[test]
    fn slashable_validator_window() {
        let validator = Validator {
            activation_epoch: 2,
            withdrawable_epoch: 10,
            ..Validator::default()
        };

        assert!(!is_slashable_validator(&validator, 1));
        assert!(is_slashable_validator(&validator, 2));
        assert!(is_slashable_validator(&validator, 9));
        assert!(!is_slashable_validator(&validator, 10));

        let slashed = Validator {
            slashed: true,
            ..validator
        };

        assert!(!is_slashable_validator(&slashed, 5));
    }

    #[test]
    fn credential_prefixes() {
        let address = ExecutionAddress::repeat_byte(0xaa);

        let eth1 = Validator {
            withdrawal_credentials: misc::eth1_address_withdrawal_credentials(address),
            ..Validator::default()
        };

        let compounding = Validator {
            withdrawal_credentials: misc::compounding_withdrawal_credentials(address),
            ..Validator::default()
        };

        let bls = Validator::default();

        assert!(has_eth1_withdrawal_credential(&eth1));
        assert!(!has_compounding_withdrawal_credential(&eth1));
        assert!(has_compounding_withdrawal_credential(&compounding));
        assert!(has_execution_withdrawal_credential(&compounding));
        assert!(!has_execution_withdrawal_credential(&bls));
    }

    #[test]
    fn withdrawability_requires_execution_credentials_and_balance() {
        let mut validator = Validator {
            effective_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            withdrawable_epoch: 5,
            ..Validator::default()
        };

        let excess = Minimal::MAX_EFFECTIVE_BALANCE + 1;

        assert!(!is_fully_withdrawable_validator(&validator, excess, 5));
        assert!(!is_partially_withdrawable_validator::<Minimal>(&validator, excess));

        validator.withdrawal_credentials[0] = ETH1_ADDRESS_WITHDRAWAL_PREFIX;

        assert!(is_fully_withdrawable_validator(&validator, excess, 5));
        assert!(!is_fully_withdrawable_validator(&validator, excess, 4));
        assert!(!is_fully_withdrawable_validator(&validator, 0, 5));
        assert!(is_partially_withdrawable_validator::<Minimal>(&validator, excess));
        assert!(!is_partially_withdrawable_validator::<Minimal>(
            &validator,
            Minimal::MAX_EFFECTIVE_BALANCE,
        ));
    }

    #[test]
    fn merkle_branch_of_two_leaves() {
        let left = H256::repeat_byte(1);
        let right = H256::repeat_byte(2);
        let root = hashing::hash_256_256(left, right);

        assert!(is_valid_merkle_branch(left, [right], 0, root));
        assert!(is_valid_merkle_branch(right, [left], 1, root));
        assert!(!is_valid_merkle_branch(left, [right], 1, root));
    }

    fn state_with_keys(secret_keys: &[SecretKey]) -> AltairBeaconState<Minimal> {
        let validators = secret_keys
            .iter()
            .map(|secret_key| Validator {
                pubkey: secret_key.to_public_key().to_bytes(),
                ..Validator::default()
            })
            .collect::<Vec<_>>();

        AltairBeaconState {
            slot: 9,
            validators: Arc::new(validators.into()),
            ..AltairBeaconState::default()
        }
    }

    #[test]
    fn indexed_attestation_validation() -> Result<()> {
        let config = Config::minimal();
        let secret_keys = [1, 2, 3].map(|byte| {
            SecretKey::from_ikm(&[byte; 32]).expect("32 bytes of keying material are enough")
        });
        let state = state_with_keys(&secret_keys);
        let data = data(0, 1, 8);
        let signing_root = SignForSingleFork::<Minimal>::signing_root(&data, &config, &state);

        let mut signature = secret_keys[0].sign(signing_root);
        signature.aggregate_in_place(secret_keys[2].sign(signing_root));

        let attestation = |indices: Vec<ValidatorIndex>| IndexedAttestation::<Minimal> {
            attesting_indices: VariableList::from(indices),
            data,
            signature: signature.to_bytes(),
        };

        validate_received_indexed_attestation(
            &config,
            &state,
            &attestation(vec![0, 2]),
            SingleVerifier,
        )?;

        let wrong_signers = validate_received_indexed_attestation(
            &config,
            &state,
            &attestation(vec![0, 1]),
            SingleVerifier,
        );

        let unsorted = validate_received_indexed_attestation(
            &config,
            &state,
            &attestation(vec![2, 0]),
            NullVerifier,
        );

        let empty = validate_received_indexed_attestation(
            &config,
            &state,
            &attestation(vec![]),
            NullVerifier,
        );

        assert_eq!(
            wrong_signers.unwrap_err().downcast::<Error>()?,
            Error::SignatureInvalid(SignatureKind::Attestation),
        );
        assert_eq!(
            unsorted.unwrap_err().downcast::<Error>()?,
            Error::AttestingIndicesNotSortedAndUnique,
        );
        assert_eq!(
            empty.unwrap_err().downcast::<Error>()?,
            Error::AttestationHasNoAttestingIndices,
        );

        Ok(())
    }
}
