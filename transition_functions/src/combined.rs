//! Entry points that work on states and blocks of any supported phase.
//!
//! Every entry point works on a copy of the caller's state. The copy replaces the caller's state
//! only if the whole transition succeeds, so a rejected block or a failed upgrade leaves the
//! caller's state untouched.

use std::sync::Arc;

use anyhow::{bail, ensure, Result};
use execution_engine::ExecutionEngine;
use helper_functions::{
    accessors,
    block_rewards::{BlockRewards, NullLedger, RewardLedger},
    error::{Error as HelperError, SignatureKind},
    fork,
    signing::SignForSingleFork,
    verifier::{MultiVerifier, NullVerifier, Verifier},
};
use log::trace;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use typenum::Unsigned as _;
use types::{
    combined::{BeaconState, SignedBeaconBlock},
    config::Config,
    nonstandard::Phase,
    phase0::primitives::Slot,
    preset::Preset,
    traits::BeaconState as _,
};

use crate::{
    altair, bellatrix, capella, deneb, electra, phase0,
    unphased::{self, cancellation, Error, ProcessSlots, StateRootPolicy},
};

/// Failure of a whole transition, classified for the caller.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The block or the requested transition is not valid. Retrying will not help.
    #[error("invalid state transition: {0:#}")]
    Invalid(anyhow::Error),
    /// A collaborator could not do its job. The same input may succeed later.
    #[error("collaborator failed during state transition: {0:#}")]
    Collaborator(anyhow::Error),
    #[error("state transition was cancelled")]
    Cancelled,
    #[error("upgrade from {from} to {to} is not supported")]
    UnsupportedUpgrade { from: Phase, to: Phase },
}

impl TransitionError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Collaborator(_) | Self::Cancelled)
    }
}

impl From<anyhow::Error> for TransitionError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast_ref::<Error>() {
            Some(Error::Cancelled) => return Self::Cancelled,
            Some(&Error::UnsupportedUpgrade { from, to }) => {
                return Self::UnsupportedUpgrade { from, to };
            }
            _ => {}
        }

        let stale_cache = matches!(
            error.downcast_ref::<HelperError>(),
            Some(HelperError::EpochContextOutOfDate { .. }),
        );

        if stale_cache || error.is::<execution_engine::Error>() {
            return Self::Collaborator(error);
        }

        Self::Invalid(error)
    }
}

/// Applies a block received from the network, verifying every signature and the state root.
pub fn untrusted_state_transition<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    signed_block: &SignedBeaconBlock<P>,
    execution_engine: impl ExecutionEngine<P>,
    cancel: &CancellationToken,
) -> Result<(), TransitionError> {
    custom_state_transition(
        config,
        state,
        signed_block,
        ProcessSlots::Always,
        StateRootPolicy::Verify,
        execution_engine,
        MultiVerifier::default(),
        NullLedger,
        cancel,
    )
}

/// Applies a block that is already known to be valid, skipping signatures and the state root.
pub fn trusted_state_transition<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    signed_block: &SignedBeaconBlock<P>,
    execution_engine: impl ExecutionEngine<P>,
    cancel: &CancellationToken,
) -> Result<(), TransitionError> {
    custom_state_transition(
        config,
        state,
        signed_block,
        ProcessSlots::Always,
        StateRootPolicy::Trust,
        execution_engine,
        NullVerifier,
        NullLedger,
        cancel,
    )
}

/// Applies a block that is already known to be valid and reports the balance changes it made.
///
/// Epoch processing run while advancing to the block's slot is not included in the report.
pub fn trusted_state_transition_with_rewards<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    signed_block: &SignedBeaconBlock<P>,
    execution_engine: impl ExecutionEngine<P>,
    cancel: &CancellationToken,
) -> Result<BlockRewards, TransitionError> {
    let mut rewards = BlockRewards::default();

    custom_state_transition(
        config,
        state,
        signed_block,
        ProcessSlots::Always,
        StateRootPolicy::Trust,
        execution_engine,
        NullVerifier,
        &mut rewards,
        cancel,
    )?;

    Ok(rewards)
}

pub fn custom_state_transition<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    signed_block: &SignedBeaconBlock<P>,
    process_slots: ProcessSlots,
    state_root_policy: StateRootPolicy,
    execution_engine: impl ExecutionEngine<P>,
    verifier: impl Verifier,
    ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<(), TransitionError> {
    let mut working_copy = state.clone();

    apply_block(
        config,
        &mut working_copy,
        signed_block,
        process_slots,
        state_root_policy,
        execution_engine,
        verifier,
        ledger,
        cancel,
    )?;

    *state = working_copy;

    Ok(())
}

/// Advances `state` to `slot`, running epoch processing and fork upgrades along the way.
pub fn process_slots<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    slot: Slot,
    cancel: &CancellationToken,
) -> Result<(), TransitionError> {
    let mut working_copy = state.clone();

    advance_slots(config, &mut working_copy, slot, cancel)?;

    *state = working_copy;

    Ok(())
}

pub fn process_epoch<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    match state {
        BeaconState::Phase0(state) => phase0::process_epoch(config, Arc::make_mut(state), cancel),
        BeaconState::Altair(state) => altair::process_epoch(config, Arc::make_mut(state), cancel),
        BeaconState::Bellatrix(state) => {
            bellatrix::process_epoch(config, Arc::make_mut(state), cancel)
        }
        BeaconState::Capella(state) => capella::process_epoch(config, Arc::make_mut(state), cancel),
        BeaconState::Deneb(state) => capella::process_epoch(config, Arc::make_mut(state), cancel),
        BeaconState::Electra(state) => electra::process_epoch(config, Arc::make_mut(state), cancel),
    }
}

fn apply_block<P: Preset, V: Verifier>(
    config: &Config,
    state: &mut BeaconState<P>,
    signed_block: &SignedBeaconBlock<P>,
    process_slots: ProcessSlots,
    state_root_policy: StateRootPolicy,
    execution_engine: impl ExecutionEngine<P>,
    mut verifier: V,
    ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<()> {
    // > Process slots (including those with no blocks) since block
    if process_slots.should_process(&*state, signed_block.slot()) {
        advance_slots(config, state, signed_block.slot(), cancel)?;
    }

    let state_phase = state.phase();
    let block_phase = signed_block.phase();

    ensure!(
        state_phase == block_phase,
        Error::PhaseMismatch {
            state_phase,
            block_phase,
        },
    );

    // > Verify signature
    if !V::IS_NULL {
        let header = signed_block.to_header();
        let signing_root = SignForSingleFork::<P>::signing_root(&header, config, &*state);
        let public_key = accessors::public_key(&*state, signed_block.proposer_index())?;

        verifier.verify_singular(
            signing_root,
            signed_block.signature(),
            &public_key,
            SignatureKind::Block,
        )?;
    }

    // > Process block
    match (&mut *state, signed_block) {
        (BeaconState::Phase0(state), SignedBeaconBlock::Phase0(block)) => phase0::process_block(
            config,
            Arc::make_mut(state),
            &block.message,
            verifier,
            ledger,
            cancel,
        )?,
        (BeaconState::Altair(state), SignedBeaconBlock::Altair(block)) => altair::process_block(
            config,
            Arc::make_mut(state),
            &block.message,
            verifier,
            ledger,
            cancel,
        )?,
        (BeaconState::Bellatrix(state), SignedBeaconBlock::Bellatrix(block)) => {
            bellatrix::process_block(
                config,
                Arc::make_mut(state),
                &block.message,
                execution_engine,
                verifier,
                ledger,
                cancel,
            )?;
        }
        (BeaconState::Capella(state), SignedBeaconBlock::Capella(block)) => {
            capella::process_block(
                config,
                Arc::make_mut(state),
                &block.message,
                execution_engine,
                verifier,
                ledger,
                cancel,
            )?;
        }
        (BeaconState::Deneb(state), SignedBeaconBlock::Deneb(block)) => deneb::process_block(
            config,
            Arc::make_mut(state),
            &block.message,
            execution_engine,
            verifier,
            ledger,
            cancel,
        )?,
        (BeaconState::Electra(state), SignedBeaconBlock::Electra(block)) => {
            electra::process_block(
                config,
                Arc::make_mut(state),
                &block.message,
                execution_engine,
                verifier,
                ledger,
                cancel,
            )?;
        }
        _ => bail!(Error::PhaseMismatch {
            state_phase,
            block_phase,
        }),
    }

    // > Verify state root
    state_root_policy.verify(&*state, signed_block.state_root())
}

fn advance_slots<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    slot: Slot,
    cancel: &CancellationToken,
) -> Result<()> {
    // Without this a block could be applied twice to a state already advanced to its slot.
    ensure!(
        state.slot() < slot,
        Error::SlotNotLater {
            current: state.slot(),
            target: slot,
        },
    );

    while state.slot() < slot {
        cancellation::check(cancel)?;

        trace!("processing slot {}", state.slot());

        unphased::process_slot(state);

        // > Process epoch on the start slot of the next epoch
        if (state.slot() + 1) % P::SlotsPerEpoch::U64 == 0 {
            process_epoch(config, state, cancel)?;
        }

        *state.slot_mut() += 1;

        if state.slot() % P::SlotsPerEpoch::U64 == 0 {
            state.cache_mut().advance_epoch();
            upgrade(config, state)?;
        }
    }

    Ok(())
}

fn upgrade<P: Preset>(config: &Config, state: &mut BeaconState<P>) -> Result<()> {
    let target = config.phase_at_slot::<P>(state.slot());

    // Several forks may be scheduled for the same epoch.
    while state.phase() < target {
        let upgraded: BeaconState<P> = match state {
            BeaconState::Phase0(pre) => {
                fork::upgrade_to_altair(config, pre.as_ref().clone())?.into()
            }
            BeaconState::Altair(pre) => {
                fork::upgrade_to_bellatrix(config, pre.as_ref().clone()).into()
            }
            BeaconState::Bellatrix(pre) => {
                fork::upgrade_to_capella(config, pre.as_ref().clone()).into()
            }
            BeaconState::Capella(pre) => {
                fork::upgrade_to_deneb(config, pre.as_ref().clone()).into()
            }
            BeaconState::Deneb(_) => bail!(Error::UnsupportedUpgrade {
                from: Phase::Deneb,
                to: Phase::Electra,
            }),
            BeaconState::Electra(_) => bail!(Error::UnsupportedUpgrade {
                from: Phase::Electra,
                to: target,
            }),
        };

        *state = upgraded;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use core::num::NonZeroU64;

    use bls::SignatureBytes;
    use execution_engine::{MockExecutionEngine, NullExecutionEngine, Verdict};
    use helper_functions::{
        block_rewards::{Delta, ProposerRewardSource},
        misc::compute_timestamp_at_slot,
    };
    use ssz::{DecodeError, Encode as _};
    use ssz_derive::Encode;
    use ssz_types::VariableList;
    use test_case::test_case;
    use tree_hash::TreeHash as _;
    use types::{
        altair::containers::SyncAggregate,
        capella::containers::{
            BeaconBlock as CapellaBeaconBlock, BeaconBlockBody as CapellaBeaconBlockBody,
            BlsToExecutionChange, ExecutionPayload, SignedBeaconBlock as CapellaSignedBeaconBlock,
            SignedBlsToExecutionChange,
        },
        deneb::{
            containers::ExecutionPayload as DenebExecutionPayload, primitives::KzgCommitment,
        },
        electra::containers::{
            Attestation as ElectraAttestation, AttesterSlashing as ElectraAttesterSlashing,
            BeaconBlockBody as ElectraBeaconBlockBody, ExecutionRequests,
            IndexedAttestation as ElectraIndexedAttestation,
        },
        nonstandard::SlashingKind,
        phase0::{
            consts::ETH1_ADDRESS_WITHDRAWAL_PREFIX,
            containers::{
                Attestation, AttestationData, AttesterSlashing, BeaconBlockHeader, Deposit,
                Eth1Data, IndexedAttestation, ProposerSlashing, SignedBeaconBlockHeader,
                SignedVoluntaryExit,
            },
            primitives::{ExecutionAddress, ValidatorIndex, H256},
        },
        preset::Minimal,
    };

    use super::*;

    fn genesis_state(
        config: &Config,
        phase: Phase,
        validator_count: u64,
    ) -> Result<BeaconState<Minimal>> {
        // Shows epoch processing and upgrades with `RUST_LOG=debug`.
        env_logger::builder().is_test(true).try_init().ok();

        let count = NonZeroU64::new(validator_count).ok_or_else(|| anyhow::anyhow!("zero"))?;
        interop::quick_start_beacon_state(config, phase, 0, count)
    }

    // Block for slot 1 that passes every check that does not involve signatures.
    fn capella_block(
        config: &Config,
        state: &BeaconState<Minimal>,
    ) -> Result<CapellaSignedBeaconBlock<Minimal>> {
        let mut advanced = state.clone();
        advance_slots(config, &mut advanced, 1, &CancellationToken::new())?;

        let advanced = advanced
            .capella()
            .ok_or_else(|| anyhow::anyhow!("state is not a Capella state"))?;

        let epoch = accessors::get_current_epoch(advanced);

        let execution_payload = ExecutionPayload {
            parent_hash: advanced.latest_execution_payload_header.block_hash,
            prev_randao: accessors::get_randao_mix(advanced, epoch),
            timestamp: compute_timestamp_at_slot(config, advanced, 1),
            ..ExecutionPayload::default()
        };

        Ok(CapellaSignedBeaconBlock {
            message: CapellaBeaconBlock {
                slot: 1,
                proposer_index: accessors::get_beacon_proposer_index(advanced)?,
                parent_root: advanced.latest_block_header.tree_hash_root(),
                state_root: H256::ZERO,
                body: CapellaBeaconBlockBody {
                    execution_payload,
                    ..CapellaBeaconBlockBody::default()
                },
            },
            signature: SignatureBytes::empty(),
        })
    }

    // The containers below encode exactly like the real ones, but `attester_slashings` is a
    // plain `Vec`, so blocks with more slashings than the preset allows can be produced.
    #[derive(Encode)]
    struct UnboundedSignedBeaconBlock<B: ssz::Encode> {
        message: UnboundedBeaconBlock<B>,
        signature: SignatureBytes,
    }

    #[derive(Encode)]
    struct UnboundedBeaconBlock<B: ssz::Encode> {
        slot: Slot,
        proposer_index: ValidatorIndex,
        parent_root: H256,
        state_root: H256,
        body: B,
    }

    #[derive(Encode)]
    struct UnboundedCapellaBody<P: Preset> {
        randao_reveal: SignatureBytes,
        eth1_data: Eth1Data,
        graffiti: H256,
        proposer_slashings: VariableList<ProposerSlashing, P::MaxProposerSlashings>,
        attester_slashings: Vec<AttesterSlashing<P>>,
        attestations: VariableList<Attestation<P>, P::MaxAttestations>,
        deposits: VariableList<Deposit, P::MaxDeposits>,
        voluntary_exits: VariableList<SignedVoluntaryExit, P::MaxVoluntaryExits>,
        sync_aggregate: SyncAggregate<P>,
        execution_payload: ExecutionPayload<P>,
        bls_to_execution_changes:
            VariableList<SignedBlsToExecutionChange, P::MaxBlsToExecutionChanges>,
    }

    #[derive(Encode)]
    struct UnboundedElectraBody<P: Preset> {
        randao_reveal: SignatureBytes,
        eth1_data: Eth1Data,
        graffiti: H256,
        proposer_slashings: VariableList<ProposerSlashing, P::MaxProposerSlashings>,
        attester_slashings: Vec<ElectraAttesterSlashing<P>>,
        attestations: VariableList<ElectraAttestation<P>, P::MaxAttestationsElectra>,
        deposits: VariableList<Deposit, P::MaxDeposits>,
        voluntary_exits: VariableList<SignedVoluntaryExit, P::MaxVoluntaryExits>,
        sync_aggregate: SyncAggregate<P>,
        execution_payload: DenebExecutionPayload<P>,
        bls_to_execution_changes:
            VariableList<SignedBlsToExecutionChange, P::MaxBlsToExecutionChanges>,
        blob_kzg_commitments: VariableList<KzgCommitment, P::MaxBlobCommitmentsPerBlock>,
        execution_requests: ExecutionRequests<P>,
    }

    fn capella_body_bytes(slashing_count: usize) -> Vec<u8> {
        let body = CapellaBeaconBlockBody::<Minimal>::default();

        let slashing = AttesterSlashing {
            attestation_1: IndexedAttestation {
                attesting_indices: VariableList::from(vec![0]),
                data: AttestationData::default(),
                signature: SignatureBytes::empty(),
            },
            attestation_2: IndexedAttestation {
                attesting_indices: VariableList::from(vec![0]),
                data: AttestationData {
                    slot: 1,
                    ..AttestationData::default()
                },
                signature: SignatureBytes::empty(),
            },
        };

        signed_block_bytes(UnboundedCapellaBody::<Minimal> {
            randao_reveal: body.randao_reveal,
            eth1_data: body.eth1_data,
            graffiti: body.graffiti,
            proposer_slashings: body.proposer_slashings,
            attester_slashings: vec![slashing; slashing_count],
            attestations: body.attestations,
            deposits: body.deposits,
            voluntary_exits: body.voluntary_exits,
            sync_aggregate: body.sync_aggregate,
            execution_payload: body.execution_payload,
            bls_to_execution_changes: body.bls_to_execution_changes,
        })
    }

    fn electra_body_bytes(slashing_count: usize) -> Vec<u8> {
        let body = ElectraBeaconBlockBody::<Minimal>::default();

        let slashing = ElectraAttesterSlashing {
            attestation_1: ElectraIndexedAttestation {
                attesting_indices: VariableList::from(vec![0]),
                data: AttestationData::default(),
                signature: SignatureBytes::empty(),
            },
            attestation_2: ElectraIndexedAttestation {
                attesting_indices: VariableList::from(vec![0]),
                data: AttestationData {
                    slot: 1,
                    ..AttestationData::default()
                },
                signature: SignatureBytes::empty(),
            },
        };

        signed_block_bytes(UnboundedElectraBody::<Minimal> {
            randao_reveal: body.randao_reveal,
            eth1_data: body.eth1_data,
            graffiti: body.graffiti,
            proposer_slashings: body.proposer_slashings,
            attester_slashings: vec![slashing; slashing_count],
            attestations: body.attestations,
            deposits: body.deposits,
            voluntary_exits: body.voluntary_exits,
            sync_aggregate: body.sync_aggregate,
            execution_payload: body.execution_payload,
            bls_to_execution_changes: body.bls_to_execution_changes,
            blob_kzg_commitments: body.blob_kzg_commitments,
            execution_requests: body.execution_requests,
        })
    }

    fn signed_block_bytes(body: impl ssz::Encode) -> Vec<u8> {
        UnboundedSignedBeaconBlock {
            message: UnboundedBeaconBlock {
                slot: 1,
                proposer_index: 0,
                parent_root: H256::ZERO,
                state_root: H256::ZERO,
                body,
            },
            signature: SignatureBytes::empty(),
        }
        .as_ssz_bytes()
    }

    #[test_case(Phase::Capella, capella_body_bytes(2); "Capella block at the limit")]
    #[test_case(Phase::Electra, electra_body_bytes(1); "Electra block at the limit")]
    fn block_with_maximum_attester_slashings_is_decoded(
        phase: Phase,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let config = Config::minimal().start_and_stay_in(phase);
        let block = SignedBeaconBlock::<Minimal>::from_ssz_bytes(&config, &bytes)
            .map_err(|error| anyhow::anyhow!("{error:?}"))?;

        assert_eq!(block.phase(), phase);
        assert_eq!(block.to_ssz_bytes(), bytes);

        Ok(())
    }

    #[test_case(Phase::Capella, capella_body_bytes(3); "Capella block over the limit")]
    #[test_case(Phase::Electra, electra_body_bytes(2); "Electra block over the limit")]
    fn block_with_too_many_attester_slashings_is_rejected_at_decoding(
        phase: Phase,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let config = Config::minimal().start_and_stay_in(phase);
        let state = genesis_state(&config, phase, 16)?;
        let pre_state = state.clone();

        let error = SignedBeaconBlock::<Minimal>::from_ssz_bytes(&config, &bytes)
            .expect_err("list is longer than its limit");

        assert!(matches!(error, DecodeError::BytesInvalid(_)));
        assert_eq!(state, pre_state);

        Ok(())
    }

    #[test]
    fn empty_epochs_only_penalize_and_shift_justification_bits() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Capella);
        let cancel = CancellationToken::new();
        let mut state = genesis_state(&config, Phase::Capella, 1000)?;

        // Justification is only processed from epoch 2 on.
        *state.slot_mut() = 16;
        state.cache_mut().advance_epoch();
        state
            .justification_bits_mut()
            .set(0, true)
            .map_err(|error| anyhow::anyhow!("{error:?}"))?;

        let pre_state = state.clone();

        process_slots(&config, &mut state, 32, &cancel)?;

        let bits = state.justification_bits().iter().collect::<Vec<_>>();

        assert_eq!(state.slot(), 32);
        assert_eq!(bits, [false, false, true, false]);
        assert_eq!(state.finalized_checkpoint(), pre_state.finalized_checkpoint());
        assert!(state.slashings().iter().all(|slashing| *slashing == 0));
        assert!(state.validators().iter().all(|validator| !validator.slashed));
        assert!(state
            .balances()
            .iter()
            .zip(pre_state.balances().iter())
            .all(|(post, pre)| post < pre));

        Ok(())
    }

    #[test]
    fn slots_are_processed_only_forward() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Altair);
        let mut state = genesis_state(&config, Phase::Altair, 16)?;

        process_slots(&config, &mut state, 3, &CancellationToken::new())?;

        let error = process_slots(&config, &mut state, 3, &CancellationToken::new())
            .expect_err("state is already at slot 3");

        let TransitionError::Invalid(error) = error else {
            bail!("unexpected error class: {error}");
        };

        assert_eq!(
            error.downcast::<Error>()?,
            Error::SlotNotLater {
                current: 3,
                target: 3,
            },
        );

        Ok(())
    }

    #[test]
    fn state_is_upgraded_at_fork_epoch() -> Result<()> {
        let config = Config::minimal().upgrade_once(Phase::Capella, 1);
        let mut state = genesis_state(&config, Phase::Bellatrix, 16)?;

        process_slots(&config, &mut state, 7, &CancellationToken::new())?;

        assert_eq!(state.phase(), Phase::Bellatrix);

        process_slots(&config, &mut state, 9, &CancellationToken::new())?;

        let fork = state.fork();

        assert_eq!(state.phase(), Phase::Capella);
        assert_eq!(fork.previous_version, config.bellatrix_fork_version);
        assert_eq!(fork.current_version, config.capella_fork_version);
        assert_eq!(fork.epoch, 1);

        Ok(())
    }

    #[test]
    fn phase0_state_is_upgraded_to_altair_at_fork_epoch() -> Result<()> {
        let config = Config::minimal().upgrade_once(Phase::Altair, 1);
        let mut state = genesis_state(&config, Phase::Phase0, 16)?;

        process_slots(&config, &mut state, 7, &CancellationToken::new())?;

        assert_eq!(state.phase(), Phase::Phase0);

        process_slots(&config, &mut state, 9, &CancellationToken::new())?;

        let fork = state.fork();

        assert_eq!(state.phase(), Phase::Altair);
        assert_eq!(fork.previous_version, config.genesis_fork_version);
        assert_eq!(fork.current_version, config.altair_fork_version);
        assert_eq!(fork.epoch, 1);

        Ok(())
    }

    #[test]
    fn phase0_block_is_applied_without_an_execution_engine() -> Result<()> {
        use types::phase0::containers::{
            BeaconBlock as Phase0BeaconBlock, SignedBeaconBlock as Phase0SignedBeaconBlock,
        };

        let config = Config::minimal();
        let mut state = genesis_state(&config, Phase::Phase0, 16)?;

        let mut advanced = state.clone();
        advance_slots(&config, &mut advanced, 1, &CancellationToken::new())?;

        let advanced = advanced
            .phase0()
            .ok_or_else(|| anyhow::anyhow!("state is not a Phase 0 state"))?;

        let block = Phase0SignedBeaconBlock {
            message: Phase0BeaconBlock {
                slot: 1,
                proposer_index: accessors::get_beacon_proposer_index(advanced)?,
                parent_root: advanced.latest_block_header.tree_hash_root(),
                ..Phase0BeaconBlock::default()
            },
            signature: SignatureBytes::empty(),
        };

        trusted_state_transition(
            &config,
            &mut state,
            &block.into(),
            NullExecutionEngine,
            &CancellationToken::new(),
        )?;

        assert_eq!(state.phase(), Phase::Phase0);
        assert_eq!(state.slot(), 1);
        assert_eq!(state.latest_block_header().slot, 1);

        Ok(())
    }

    #[test]
    fn upgrade_to_electra_is_fatal_and_leaves_state_untouched() -> Result<()> {
        let config = Config::minimal().upgrade_once(Phase::Electra, 1);
        let mut state = genesis_state(&config, Phase::Deneb, 16)?;
        let pre_state = state.clone();

        let error = process_slots(&config, &mut state, 8, &CancellationToken::new())
            .expect_err("Deneb states cannot be upgraded");

        assert!(matches!(
            error,
            TransitionError::UnsupportedUpgrade {
                from: Phase::Deneb,
                to: Phase::Electra,
            },
        ));
        assert!(!error.is_retryable());
        assert_eq!(state, pre_state);

        Ok(())
    }

    #[test]
    fn cancelled_transition_is_retryable() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Altair);
        let mut state = genesis_state(&config, Phase::Altair, 16)?;
        let pre_state = state.clone();
        let cancel = CancellationToken::new();

        cancel.cancel();

        let error = process_slots(&config, &mut state, 20, &cancel)
            .expect_err("transition was cancelled before it started");

        assert!(matches!(error, TransitionError::Cancelled));
        assert!(error.is_retryable());
        assert_eq!(state, pre_state);

        Ok(())
    }

    #[test]
    fn bls_to_execution_change_touches_only_its_validator() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Capella);
        let mut state = genesis_state(&config, Phase::Capella, 16)?;
        let pre_state = state.clone();
        let address = ExecutionAddress::repeat_byte(0xaa);

        let mut block = capella_block(&config, &state)?;

        block.message.body.bls_to_execution_changes =
            VariableList::from(vec![SignedBlsToExecutionChange {
                message: BlsToExecutionChange {
                    validator_index: 5,
                    from_bls_pubkey: pre_state.validators()[5].pubkey.clone(),
                    to_execution_address: address,
                },
                signature: SignatureBytes::empty(),
            }]);

        trusted_state_transition(
            &config,
            &mut state,
            &block.into(),
            NullExecutionEngine,
            &CancellationToken::new(),
        )?;

        let credentials = state.validators()[5].withdrawal_credentials;

        assert_eq!(state.slot(), 1);
        assert_eq!(credentials[0], ETH1_ADDRESS_WITHDRAWAL_PREFIX);
        assert_eq!(&credentials[12..], address.as_slice());

        for (index, (post, pre)) in state
            .validators()
            .iter()
            .zip(pre_state.validators().iter())
            .enumerate()
        {
            if index != 5 {
                assert_eq!(post, pre);
            }
        }

        Ok(())
    }

    #[test]
    fn rewards_of_a_block_match_balance_changes() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Capella);
        let mut state = genesis_state(&config, Phase::Capella, 16)?;
        let pre_state = state.clone();
        let mut block = capella_block(&config, &state)?;
        let proposer_index = block.message.proposer_index;
        let slashed_index = (proposer_index + 1) % 16;

        let header = |byte| SignedBeaconBlockHeader {
            message: BeaconBlockHeader {
                proposer_index: slashed_index,
                body_root: H256::repeat_byte(byte),
                ..BeaconBlockHeader::default()
            },
            signature: SignatureBytes::empty(),
        };

        block.message.body.proposer_slashings = VariableList::from(vec![ProposerSlashing {
            signed_header_1: header(1),
            signed_header_2: header(2),
        }]);

        let rewards = trusted_state_transition_with_rewards(
            &config,
            &mut state,
            &block.into(),
            NullExecutionEngine,
            &CancellationToken::new(),
        )?;

        let [slashing] = rewards.slashings[..] else {
            bail!("expected exactly one slashing: {:?}", rewards.slashings);
        };

        assert_eq!(slashing.kind, SlashingKind::Proposer);
        assert_eq!(slashing.slashed_index, slashed_index);
        assert_eq!(slashing.whistleblower_index, proposer_index);
        assert!(slashing.proposer_reward > 0);
        assert_eq!(
            rewards.proposer_rewards[ProposerRewardSource::ProposerSlashings],
            slashing.proposer_reward,
        );

        // The block carries an empty sync aggregate, so every committee member is penalized.
        assert_eq!(rewards.proposer_rewards[ProposerRewardSource::SyncAggregate], 0);
        assert!(!rewards.sync_committee_deltas.is_empty());

        for (validator_index, delta) in &rewards.sync_committee_deltas {
            let Delta::Penalty(penalty) = *delta else {
                bail!("validator {validator_index} was rewarded without participating");
            };

            if *validator_index == proposer_index || *validator_index == slashed_index {
                continue;
            }

            let index = usize::try_from(*validator_index)?;

            assert_eq!(pre_state.balances()[index] - state.balances()[index], penalty);
        }

        Ok(())
    }

    #[test]
    fn identical_inputs_produce_identical_states() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Capella);
        let genesis = genesis_state(&config, Phase::Capella, 16)?;
        let block = capella_block(&config, &genesis)?.into();
        let cancel = CancellationToken::new();

        let mut first = genesis.clone();
        let mut second = genesis;

        trusted_state_transition(&config, &mut first, &block, NullExecutionEngine, &cancel)?;
        trusted_state_transition(&config, &mut second, &block, NullExecutionEngine, &cancel)?;

        assert_eq!(first, second);
        assert_eq!(first.tree_hash_root(), second.tree_hash_root());

        Ok(())
    }

    #[test]
    fn rejected_block_leaves_state_untouched() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Capella);
        let mut state = genesis_state(&config, Phase::Capella, 16)?;

        // The block must now include a deposit, which it does not.
        if let BeaconState::Capella(capella_state) = &mut state {
            Arc::make_mut(capella_state).eth1_data.deposit_count += 1;
        }

        let pre_state = state.clone();
        let block = capella_block(&config, &state)?;

        let error = trusted_state_transition(
            &config,
            &mut state,
            &block.into(),
            NullExecutionEngine,
            &CancellationToken::new(),
        )
        .expect_err("block is missing a deposit");

        assert!(!error.is_retryable());

        let TransitionError::Invalid(error) = error else {
            bail!("unexpected error class: {error}");
        };

        assert!(matches!(
            error.downcast::<Error>()?,
            Error::DepositCountMismatch { .. },
        ));
        assert_eq!(state, pre_state);

        Ok(())
    }

    #[test]
    fn unavailable_engine_is_a_collaborator_failure() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Capella);
        let mut state = genesis_state(&config, Phase::Capella, 16)?;
        let pre_state = state.clone();
        let block = capella_block(&config, &state)?;

        let error = trusted_state_transition(
            &config,
            &mut state,
            &block.into(),
            MockExecutionEngine::new(Verdict::Unavailable),
            &CancellationToken::new(),
        )
        .expect_err("engine could not judge the payload");

        assert!(matches!(error, TransitionError::Collaborator(_)));
        assert!(error.is_retryable());
        assert_eq!(state, pre_state);

        Ok(())
    }

    #[test]
    fn unsigned_block_is_rejected_by_untrusted_transition() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Capella);
        let mut state = genesis_state(&config, Phase::Capella, 16)?;
        let block = capella_block(&config, &state)?.into();

        let error = untrusted_state_transition(
            &config,
            &mut state.clone(),
            &block,
            NullExecutionEngine,
            &CancellationToken::new(),
        )
        .expect_err("block has no signature");

        assert!(matches!(error, TransitionError::Invalid(_)));

        trusted_state_transition(
            &config,
            &mut state,
            &block,
            NullExecutionEngine,
            &CancellationToken::new(),
        )?;

        assert_eq!(state.slot(), 1);

        Ok(())
    }

    #[test]
    fn block_for_another_phase_is_rejected() -> Result<()> {
        let config = Config::minimal().start_and_stay_in(Phase::Deneb);
        let capella_config = Config::minimal().start_and_stay_in(Phase::Capella);
        let mut state = genesis_state(&config, Phase::Deneb, 16)?;
        let capella_state = genesis_state(&capella_config, Phase::Capella, 16)?;
        let block = capella_block(&capella_config, &capella_state)?;

        let error = trusted_state_transition(
            &config,
            &mut state,
            &block.into(),
            NullExecutionEngine,
            &CancellationToken::new(),
        )
        .expect_err("block and state phases differ");

        let TransitionError::Invalid(error) = error else {
            bail!("unexpected error class: {error}");
        };

        assert_eq!(
            error.downcast::<Error>()?,
            Error::PhaseMismatch {
                state_phase: Phase::Deneb,
                block_phase: Phase::Capella,
            },
        );

        Ok(())
    }
}
