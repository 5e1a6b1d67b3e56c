use anyhow::{ensure, Result};
use bls::{PublicKey, SignatureBytes};
use helper_functions::{
    accessors::{self, attestation_epoch, get_beacon_proposer_index, get_current_epoch},
    error::{Error as HelperError, SignatureKind},
    misc::compute_epoch_at_slot,
    predicates::{is_active_validator, is_slashable_attestation_data, is_slashable_validator},
    signing::{RandaoEpoch, SignForAllForks as _, SignForSingleFork as _},
    verifier::Verifier,
};
use tree_hash::TreeHash as _;
use typenum::Unsigned as _;
use types::{
    config::Config,
    nonstandard::{AttestationEpoch, Phase},
    phase0::{
        consts::FAR_FUTURE_EPOCH,
        containers::{
            AttestationData, BeaconBlockHeader, Deposit, DepositData, DepositMessage, Eth1Data,
            ProposerSlashing, SignedVoluntaryExit,
        },
        primitives::{DepositIndex, ValidatorIndex, H256},
    },
    preset::Preset,
    traits::BeaconState,
};

use crate::unphased::Error;

/// Checks `header` against the state and makes it the latest block header.
///
/// `header.body_root` must already be the root of the block body. The state root is cleared and
/// filled in by the next call to [`process_slot`](crate::unphased::process_slot).
pub fn process_block_header<P: Preset>(
    state: &mut impl BeaconState<P>,
    header: BeaconBlockHeader,
) -> Result<()> {
    // > Verify that the slots match
    ensure!(
        header.slot == state.slot(),
        Error::SlotMismatch {
            state_slot: state.slot(),
            block_slot: header.slot,
        },
    );

    // > Verify that the block is newer than latest block header
    ensure!(
        header.slot > state.latest_block_header().slot,
        Error::BlockNotNewerThanLatestBlockHeader {
            block_slot: header.slot,
            block_header_slot: state.latest_block_header().slot,
        },
    );

    // > Verify that proposer index is the correct index
    let computed = get_beacon_proposer_index(state)?;

    ensure!(
        header.proposer_index == computed,
        Error::ProposerIndexMismatch {
            computed,
            in_block: header.proposer_index,
        },
    );

    // > Verify that the parent matches
    let computed = state.latest_block_header().tree_hash_root();

    ensure!(
        header.parent_root == computed,
        Error::ParentRootMismatch {
            computed,
            in_block: header.parent_root,
        },
    );

    // > Cache current block as the new latest block
    *state.latest_block_header_mut() = BeaconBlockHeader {
        state_root: H256::ZERO,
        ..header
    };

    // > Verify proposer is not slashed
    let index = header.proposer_index;

    ensure!(
        !accessors::validator(state, index)?.slashed,
        Error::ProposerSlashed { index },
    );

    Ok(())
}

pub fn process_randao<P: Preset, V: Verifier>(
    config: &Config,
    state: &mut impl BeaconState<P>,
    randao_reveal: &SignatureBytes,
    mut verifier: V,
) -> Result<()> {
    let epoch = get_current_epoch(state);

    // > Verify RANDAO reveal
    if !V::IS_NULL {
        let proposer_index = get_beacon_proposer_index(state)?;

        verifier.verify_singular(
            RandaoEpoch::from(epoch).signing_root(config, state),
            randao_reveal,
            &accessors::public_key(state, proposer_index)?,
            SignatureKind::Randao,
        )?;
    }

    // > Mix in RANDAO reveal
    let mix = accessors::get_randao_mix(state, epoch) ^ hashing::hash(randao_reveal.as_bytes());
    let index = accessors::ring_index::<P::EpochsPerHistoricalVector>(epoch);

    state.randao_mixes_mut()[index] = mix;

    Ok(())
}

pub fn process_eth1_data<P: Preset>(
    state: &mut impl BeaconState<P>,
    eth1_data: Eth1Data,
) -> Result<()> {
    state
        .eth1_data_votes_mut()
        .push(eth1_data)
        .map_err(|_| HelperError::ListFull)?;

    let votes = state
        .eth1_data_votes()
        .iter()
        .filter(|vote| **vote == eth1_data)
        .count();

    if votes * 2 > P::SlotsPerEth1VotingPeriod::USIZE {
        *state.eth1_data_mut() = eth1_data;
    }

    Ok(())
}

/// Checks the number of deposits in a block.
///
/// `eth1_deposit_bound` is the index one past the last deposit that may be processed through the
/// Eth1 bridge. Before Electra it is `state.eth1_data.deposit_count`.
pub fn validate_deposit_count<P: Preset>(
    state: &impl BeaconState<P>,
    in_block: usize,
    eth1_deposit_bound: DepositIndex,
) -> Result<()> {
    // > Verify that outstanding deposits are processed up to the maximum number of deposits
    let computed = P::MaxDeposits::U64.min(
        eth1_deposit_bound.saturating_sub(state.eth1_deposit_index()),
    );

    let in_block = u64::try_from(in_block)?;

    ensure!(
        computed == in_block,
        Error::DepositCountMismatch { computed, in_block },
    );

    Ok(())
}

pub fn validate_proposer_slashing<P: Preset, V: Verifier>(
    config: &Config,
    state: &impl BeaconState<P>,
    proposer_slashing: &ProposerSlashing,
    mut verifier: V,
) -> Result<()> {
    let header_1 = proposer_slashing.signed_header_1.message;
    let header_2 = proposer_slashing.signed_header_2.message;

    // > Verify header slots match
    ensure!(
        header_1.slot == header_2.slot,
        Error::ProposerSlashingSlotMismatch {
            slot_1: header_1.slot,
            slot_2: header_2.slot,
        },
    );

    // > Verify header proposer indices match
    ensure!(
        header_1.proposer_index == header_2.proposer_index,
        Error::ProposerSlashingProposerMismatch {
            proposer_index_1: header_1.proposer_index,
            proposer_index_2: header_2.proposer_index,
        },
    );

    // > Verify the headers are different
    ensure!(
        header_1 != header_2,
        Error::ProposerSlashingHeadersIdentical { header: header_1 },
    );

    // > Verify the proposer is slashable
    let index = header_1.proposer_index;
    let proposer = accessors::validator(state, index)?;

    ensure!(
        is_slashable_validator(proposer, get_current_epoch(state)),
        Error::ProposerNotSlashable { index },
    );

    // > Verify signatures
    if !V::IS_NULL {
        let public_key = PublicKey::try_from(&proposer.pubkey)?;

        for signed_header in [
            &proposer_slashing.signed_header_1,
            &proposer_slashing.signed_header_2,
        ] {
            verifier.verify_singular(
                signed_header.message.signing_root(config, state),
                &signed_header.signature,
                &public_key,
                SignatureKind::Block,
            )?;
        }
    }

    Ok(())
}

pub fn validate_attester_slashing_data(
    data_1: AttestationData,
    data_2: AttestationData,
) -> Result<()> {
    ensure!(
        is_slashable_attestation_data(data_1, data_2),
        Error::AttestationDataNotSlashable { data_1, data_2 },
    );

    Ok(())
}

/// Validators attesting in both halves of an attester slashing that can still be slashed.
///
/// Both index lists must be sorted. Fails if the result would be empty.
pub fn slashable_indices<P: Preset>(
    state: &impl BeaconState<P>,
    indices_1: &[ValidatorIndex],
    indices_2: &[ValidatorIndex],
) -> Result<Vec<ValidatorIndex>> {
    let current_epoch = get_current_epoch(state);
    let mut slashable = vec![];

    for index in accessors::intersect_sorted_indices(indices_1, indices_2) {
        if is_slashable_validator(accessors::validator(state, index)?, current_epoch) {
            slashable.push(index);
        }
    }

    ensure!(!slashable.is_empty(), Error::NoAttestersSlashed);

    Ok(slashable)
}

/// Checks the parts of an attestation that do not depend on its aggregation bits.
pub fn validate_attestation_data<P: Preset>(
    state: &impl BeaconState<P>,
    data: AttestationData,
) -> Result<AttestationEpoch> {
    let attestation_epoch = attestation_epoch(state, data.target.epoch)?;

    ensure!(
        data.target.epoch == compute_epoch_at_slot::<P>(data.slot),
        Error::AttestationTargetsWrongEpoch { data },
    );

    let state_slot = state.slot();
    let attestation_slot = data.slot;
    let earliest = attestation_slot + P::MIN_ATTESTATION_INCLUSION_DELAY.get();

    // Deneb lets attestations from the previous epoch be included until the end of the current one.
    let within_range = earliest <= state_slot
        && (state.phase() >= Phase::Deneb
            || state_slot <= attestation_slot + P::SlotsPerEpoch::U64);

    ensure!(
        within_range,
        Error::AttestationOutsideInclusionRange {
            state_slot,
            attestation_slot,
        },
    );

    let in_state = match attestation_epoch {
        AttestationEpoch::Previous => state.previous_justified_checkpoint(),
        AttestationEpoch::Current => state.current_justified_checkpoint(),
    };

    ensure!(
        data.source == in_state,
        Error::AttestationSourceMismatch {
            in_state,
            in_block: data.source,
        },
    );

    Ok(attestation_epoch)
}

// > Verify the Merkle branch
pub fn verify_deposit_merkle_branch<P: Preset>(
    state: &impl BeaconState<P>,
    deposit_index: DepositIndex,
    deposit: &Deposit,
) -> Result<()> {
    // The extra level at the root mixes in the number of deposits.
    ensure!(
        helper_functions::predicates::is_valid_merkle_branch(
            deposit.data.tree_hash_root(),
            deposit.proof.iter().copied(),
            deposit_index,
            state.eth1_data().deposit_root,
        ),
        Error::DepositProofInvalid { deposit_index },
    );

    Ok(())
}

/// Proof of possession for a new validator.
///
/// An invalid signature does not make the block invalid. The deposit is skipped instead.
#[must_use]
pub fn is_valid_deposit_signature(config: &Config, deposit_data: &DepositData) -> bool {
    let message = DepositMessage {
        pubkey: deposit_data.pubkey.clone(),
        withdrawal_credentials: deposit_data.withdrawal_credentials,
        amount: deposit_data.amount,
    };

    PublicKey::try_from(&deposit_data.pubkey).is_ok_and(|public_key| {
        message
            .verify(config, &deposit_data.signature, &public_key)
            .is_ok()
    })
}

pub fn validate_voluntary_exit<P: Preset, V: Verifier>(
    config: &Config,
    state: &impl BeaconState<P>,
    signed_voluntary_exit: &SignedVoluntaryExit,
    mut verifier: V,
) -> Result<()> {
    let voluntary_exit = signed_voluntary_exit.message;
    let index = voluntary_exit.validator_index;
    let validator = accessors::validator(state, index)?;
    let current_epoch = get_current_epoch(state);

    // > Verify the validator is active
    ensure!(
        is_active_validator(validator, current_epoch),
        Error::ValidatorNotActive {
            index,
            current_epoch,
        },
    );

    // > Verify exit has not been initiated
    ensure!(
        validator.exit_epoch == FAR_FUTURE_EPOCH,
        Error::ValidatorAlreadyExited {
            index,
            exit_epoch: validator.exit_epoch,
        },
    );

    // > Exits must specify an epoch when they become valid; they are not valid before then
    ensure!(
        current_epoch >= voluntary_exit.epoch,
        Error::VoluntaryExitNotYetValid {
            current_epoch,
            exit_epoch: voluntary_exit.epoch,
        },
    );

    // > Verify the validator has been active long enough
    ensure!(
        current_epoch >= validator.activation_epoch + config.shard_committee_period,
        Error::ValidatorHasNotBeenActiveLongEnough {
            index,
            activation_epoch: validator.activation_epoch,
            current_epoch,
        },
    );

    // > Verify signature
    if !V::IS_NULL {
        verifier.verify_singular(
            voluntary_exit.signing_root(config, state),
            &signed_voluntary_exit.signature,
            &PublicKey::try_from(&validator.pubkey)?,
            SignatureKind::VoluntaryExit,
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bls::SecretKey;
    use helper_functions::{
        misc,
        verifier::{NullVerifier, SingleVerifier},
    };
    use ssz_types::{FixedVector, VariableList};
    use test_case::test_case;
    use types::{
        altair::beacon_state::BeaconState as AltairBeaconState,
        deneb::beacon_state::BeaconState as DenebBeaconState,
        phase0::{
            consts::DEPOSIT_CONTRACT_TREE_DEPTH,
            containers::{Checkpoint, SignedBeaconBlockHeader, Validator, VoluntaryExit},
            primitives::Slot,
        },
        preset::Minimal,
    };

    use super::*;

    fn secret_key(seed: u8) -> SecretKey {
        SecretKey::from_ikm(&[seed; 32]).expect("32 bytes of keying material are enough")
    }

    fn active_validator(seed: u8) -> Validator {
        Validator {
            pubkey: secret_key(seed).to_public_key().to_bytes(),
            effective_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        }
    }

    fn state_with_validators(slot: Slot, count: u8) -> AltairBeaconState<Minimal> {
        let validators = (0..count).map(active_validator).collect::<Vec<_>>();
        let balances = vec![Minimal::MAX_EFFECTIVE_BALANCE; validators.len()];

        AltairBeaconState {
            slot,
            validators: Arc::new(VariableList::from(validators)),
            balances: Arc::new(VariableList::from(balances)),
            ..AltairBeaconState::default()
        }
    }

    #[test]
    fn block_header_is_cached_with_empty_state_root() -> Result<()> {
        let mut state = state_with_validators(1, 8);
        let proposer_index = get_beacon_proposer_index(&state)?;

        let header = BeaconBlockHeader {
            slot: 1,
            proposer_index,
            parent_root: state.latest_block_header.tree_hash_root(),
            state_root: H256::repeat_byte(3),
            body_root: H256::repeat_byte(4),
        };

        process_block_header(&mut state, header)?;

        assert_eq!(state.latest_block_header.state_root, H256::ZERO);
        assert_eq!(state.latest_block_header.body_root, header.body_root);

        Ok(())
    }

    #[test]
    fn block_header_with_wrong_parent_is_rejected() -> Result<()> {
        let mut state = state_with_validators(1, 8);

        let header = BeaconBlockHeader {
            slot: 1,
            proposer_index: get_beacon_proposer_index(&state)?,
            parent_root: H256::repeat_byte(1),
            ..BeaconBlockHeader::default()
        };

        let error = process_block_header(&mut state, header)
            .expect_err("parent root does not match")
            .downcast::<Error>()?;

        assert!(matches!(error, Error::ParentRootMismatch { .. }));

        Ok(())
    }

    #[test_case(0 => matches Error::SlotMismatch { .. }; "slot in the past")]
    #[test_case(2 => matches Error::SlotMismatch { .. }; "slot in the future")]
    fn block_header_slot_must_match_state(block_slot: Slot) -> Error {
        let mut state = state_with_validators(1, 8);

        let header = BeaconBlockHeader {
            slot: block_slot,
            ..BeaconBlockHeader::default()
        };

        process_block_header(&mut state, header)
            .expect_err("slot does not match")
            .downcast()
            .expect("error should come from block processing")
    }

    #[test]
    fn randao_reveal_is_mixed_in_and_verified() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_with_validators(3, 8);
        let proposer_index = get_beacon_proposer_index(&state)?;
        let epoch = get_current_epoch(&state);

        let reveal = RandaoEpoch::from(epoch)
            .sign(&config, &state, &secret_key(u8::try_from(proposer_index)?))
            .to_bytes();

        let expected =
            accessors::get_randao_mix(&state, epoch) ^ hashing::hash(reveal.as_bytes());

        process_randao(&config, &mut state, &reveal, SingleVerifier)?;

        assert_eq!(accessors::get_randao_mix(&state, epoch), expected);

        let wrong_reveal = RandaoEpoch::from(epoch + 1)
            .sign(&config, &state, &secret_key(u8::try_from(proposer_index)?))
            .to_bytes();

        process_randao(&config, &mut state, &wrong_reveal, SingleVerifier)
            .expect_err("reveal is for another epoch");

        Ok(())
    }

    #[test]
    fn eth1_data_is_adopted_after_majority_of_votes() -> Result<()> {
        let mut state = AltairBeaconState::<Minimal>::default();

        let vote = Eth1Data {
            deposit_count: 5,
            ..Eth1Data::default()
        };

        // The minimal voting period is 32 slots.
        for _ in 0..16 {
            process_eth1_data(&mut state, vote)?;
        }

        assert_eq!(state.eth1_data, Eth1Data::default());

        process_eth1_data(&mut state, vote)?;

        assert_eq!(state.eth1_data, vote);

        Ok(())
    }

    #[test_case(0, 0, 0 => true)]
    #[test_case(10, 4, 6 => true)]
    #[test_case(10, 4, 5 => false)]
    #[test_case(100, 0, 16 => true; "capped by maximum")]
    #[test_case(100, 0, 17 => false)]
    fn deposit_count(bound: DepositIndex, deposit_index: DepositIndex, in_block: usize) -> bool {
        let state = AltairBeaconState::<Minimal> {
            eth1_deposit_index: deposit_index,
            ..AltairBeaconState::default()
        };

        validate_deposit_count(&state, in_block, bound).is_ok()
    }

    fn proposer_slashing(
        config: &Config,
        state: &AltairBeaconState<Minimal>,
        header_2_body: H256,
    ) -> ProposerSlashing {
        let secret_key = secret_key(2);

        let signed = |body_root| {
            let message = BeaconBlockHeader {
                slot: 1,
                proposer_index: 2,
                body_root,
                ..BeaconBlockHeader::default()
            };

            SignedBeaconBlockHeader {
                message,
                signature: message.sign(config, state, &secret_key).to_bytes(),
            }
        };

        ProposerSlashing {
            signed_header_1: signed(H256::repeat_byte(1)),
            signed_header_2: signed(header_2_body),
        }
    }

    #[test]
    fn proposer_slashing_with_distinct_signed_headers_is_valid() -> Result<()> {
        let config = Config::minimal();
        let state = state_with_validators(8, 4);
        let slashing = proposer_slashing(&config, &state, H256::repeat_byte(2));

        validate_proposer_slashing(&config, &state, &slashing, SingleVerifier)
    }

    #[test]
    fn proposer_slashing_with_identical_headers_is_rejected() -> Result<()> {
        let config = Config::minimal();
        let state = state_with_validators(8, 4);
        let slashing = proposer_slashing(&config, &state, H256::repeat_byte(1));

        let error = validate_proposer_slashing(&config, &state, &slashing, NullVerifier)
            .expect_err("headers are identical")
            .downcast::<Error>()?;

        assert!(matches!(error, Error::ProposerSlashingHeadersIdentical { .. }));

        Ok(())
    }

    #[test]
    fn slashable_indices_skip_already_slashed_validators() -> Result<()> {
        let mut state = state_with_validators(8, 6);

        Arc::make_mut(&mut state.validators)[3].slashed = true;

        assert_eq!(slashable_indices(&state, &[1, 3, 4], &[0, 3, 4, 5])?, [4]);

        let error = slashable_indices(&state, &[1, 3], &[3, 5])
            .expect_err("only validator 3 overlaps and it is already slashed")
            .downcast::<Error>()?;

        assert_eq!(error, Error::NoAttestersSlashed);

        Ok(())
    }

    fn attestation_data(slot: Slot, source: Checkpoint) -> AttestationData {
        AttestationData {
            slot,
            source,
            target: Checkpoint {
                epoch: misc::compute_epoch_at_slot::<Minimal>(slot),
                ..Checkpoint::default()
            },
            ..AttestationData::default()
        }
    }

    #[test_case(17, 16 => true; "one slot after attestation")]
    #[test_case(16, 16 => false; "in the same slot")]
    #[test_case(24, 16 => true; "exactly one epoch later")]
    #[test_case(25, 16 => false; "more than one epoch later")]
    fn attestation_inclusion_range_before_deneb(state_slot: Slot, attestation_slot: Slot) -> bool {
        let state = AltairBeaconState::<Minimal> {
            slot: state_slot,
            ..AltairBeaconState::default()
        };

        validate_attestation_data(&state, attestation_data(attestation_slot, Checkpoint::default()))
            .is_ok()
    }

    #[test]
    fn deneb_accepts_attestations_from_the_start_of_the_previous_epoch() {
        let state = DenebBeaconState::<Minimal> {
            slot: 31,
            ..DenebBeaconState::default()
        };

        assert!(validate_attestation_data(&state, attestation_data(16, Checkpoint::default()))
            .is_ok());
    }

    #[test]
    fn attestation_with_wrong_source_is_rejected() -> Result<()> {
        let state = AltairBeaconState::<Minimal> {
            slot: 17,
            ..AltairBeaconState::default()
        };

        let source = Checkpoint {
            epoch: 1,
            root: H256::repeat_byte(9),
        };

        let error = validate_attestation_data(&state, attestation_data(16, source))
            .expect_err("source differs from current justified checkpoint")
            .downcast::<Error>()?;

        assert!(matches!(error, Error::AttestationSourceMismatch { .. }));

        Ok(())
    }

    #[test]
    fn deposit_proof_against_single_leaf_tree() -> Result<()> {
        let data = DepositData {
            amount: 1,
            ..DepositData::default()
        };

        // Branch for index 0 of a tree with one deposit: zero hashes, then the length mix-in.
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

        let mut state = AltairBeaconState::<Minimal>::default();
        state.eth1_data.deposit_root = root;

        verify_deposit_merkle_branch(&state, 0, &deposit)?;

        let error = verify_deposit_merkle_branch(&state, 1, &deposit)
            .expect_err("proof is for index 0")
            .downcast::<Error>()?;

        assert_eq!(error, Error::DepositProofInvalid { deposit_index: 1 });

        Ok(())
    }

    #[test]
    fn deposit_signature_is_checked_over_deposit_message() {
        let config = Config::minimal();
        let secret_key = secret_key(5);

        let message = DepositMessage {
            pubkey: secret_key.to_public_key().to_bytes(),
            withdrawal_credentials: H256::repeat_byte(1),
            amount: Minimal::MAX_EFFECTIVE_BALANCE,
        };

        let mut deposit_data = DepositData {
            pubkey: message.pubkey.clone(),
            withdrawal_credentials: message.withdrawal_credentials,
            amount: message.amount,
            signature: message.sign(&config, &secret_key).to_bytes(),
        };

        assert!(is_valid_deposit_signature(&config, &deposit_data));

        deposit_data.amount -= 1;

        assert!(!is_valid_deposit_signature(&config, &deposit_data));
    }

    #[test]
    fn voluntary_exit_requires_shard_committee_period() -> Result<()> {
        let config = Config::minimal();
        let state = state_with_validators(8, 4);

        let exit = SignedVoluntaryExit {
            message: VoluntaryExit {
                epoch: 0,
                validator_index: 1,
            },
            signature: SignatureBytes::empty(),
        };

        let error = validate_voluntary_exit(&config, &state, &exit, NullVerifier)
            .expect_err("validator was activated at genesis")
            .downcast::<Error>()?;

        assert!(matches!(
            error,
            Error::ValidatorHasNotBeenActiveLongEnough { index: 1, .. },
        ));

        Ok(())
    }

    #[test]
    fn signed_voluntary_exit_is_valid_once_validator_is_old_enough() -> Result<()> {
        let config = Config::minimal();
        let slot = misc::compute_start_slot_at_epoch::<Minimal>(config.shard_committee_period);
        let state = state_with_validators(slot, 4);

        let message = VoluntaryExit {
            epoch: 0,
            validator_index: 1,
        };

        let exit = SignedVoluntaryExit {
            message,
            signature: message.sign(&config, &state, &secret_key(1)).to_bytes(),
        };

        validate_voluntary_exit(&config, &state, &exit, SingleVerifier)
    }
}
