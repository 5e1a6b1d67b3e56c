use execution_engine::PayloadCheck;
use thiserror::Error;
use types::{
    capella::containers::Withdrawal,
    nonstandard::Phase,
    phase0::{
        containers::{AttestationData, BeaconBlockHeader, Checkpoint},
        primitives::{
            DepositIndex, Epoch, ExecutionBlockHash, Slot, UnixSeconds, ValidatorIndex, H256,
        },
    },
};

#[derive(PartialEq, Eq, Debug, Error)]
pub enum Error {
    #[error("attestation data is not slashable (data_1: {data_1:?}, data_2: {data_2:?})")]
    AttestationDataNotSlashable {
        data_1: AttestationData,
        data_2: AttestationData,
    },
    #[error(
        "attestation in slot {attestation_slot} is outside \
         inclusion range for state at slot {state_slot}"
    )]
    AttestationOutsideInclusionRange {
        state_slot: Slot,
        attestation_slot: Slot,
    },
    #[error(
        "attestation source does not match justified checkpoint \
         (in_state: {in_state:?}, in_block: {in_block:?})"
    )]
    AttestationSourceMismatch {
        in_state: Checkpoint,
        in_block: Checkpoint,
    },
    #[error("attestation votes for a checkpoint in the wrong epoch: {data:?}")]
    AttestationTargetsWrongEpoch { data: AttestationData },
    #[error("post-Electra attestation with non-zero committee index: {data:?}")]
    AttestationWithNonZeroCommitteeIndex { data: AttestationData },
    #[error("block is not newer than latest block header ({block_slot} <= {block_header_slot})")]
    BlockNotNewerThanLatestBlockHeader {
        block_slot: Slot,
        block_header_slot: Slot,
    },
    #[error("state transition was cancelled")]
    Cancelled,
    #[error("deposit count is incorrect (computed: {computed}, in block: {in_block})")]
    DepositCountMismatch { computed: u64, in_block: u64 },
    #[error("deposit {deposit_index} has an invalid Merkle proof")]
    DepositProofInvalid { deposit_index: DepositIndex },
    #[error("execution payload failed {check} check")]
    ExecutionPayloadInvalid { check: PayloadCheck },
    #[error(
        "execution payload parent hash ({in_block:?}) \
         does not match latest execution block hash ({in_state:?})"
    )]
    ExecutionPayloadParentHashMismatch {
        in_state: ExecutionBlockHash,
        in_block: ExecutionBlockHash,
    },
    #[error(
        "execution payload prev_randao ({in_block:?}) \
         does not match current RANDAO mix ({in_state:?})"
    )]
    ExecutionPayloadPrevRandaoMismatch { in_state: H256, in_block: H256 },
    #[error(
        "execution payload timestamp ({in_block}) \
         does not match slot timestamp ({computed})"
    )]
    ExecutionPayloadTimestampMismatch {
        computed: UnixSeconds,
        in_block: UnixSeconds,
    },
    #[error("attester slashing does not slash any validators")]
    NoAttestersSlashed,
    #[error("pending attestation was included in its own slot: {data:?}")]
    PendingAttestationWithZeroInclusionDelay { data: AttestationData },
    #[error("parent root is incorrect (computed: {computed:?}, in block: {in_block:?})")]
    ParentRootMismatch { computed: H256, in_block: H256 },
    #[error("block phase ({block_phase}) does not match state phase ({state_phase})")]
    PhaseMismatch {
        state_phase: Phase,
        block_phase: Phase,
    },
    #[error("proposer index is incorrect (computed: {computed}, in block: {in_block})")]
    ProposerIndexMismatch {
        computed: ValidatorIndex,
        in_block: ValidatorIndex,
    },
    #[error("proposer {index} is not slashable")]
    ProposerNotSlashable { index: ValidatorIndex },
    #[error("proposer {index} is slashed")]
    ProposerSlashed { index: ValidatorIndex },
    #[error("proposer slashing headers are identical: {header:?}")]
    ProposerSlashingHeadersIdentical { header: BeaconBlockHeader },
    #[error(
        "proposer slashing proposer indices do not match \
         ({proposer_index_1} != {proposer_index_2})"
    )]
    ProposerSlashingProposerMismatch {
        proposer_index_1: ValidatorIndex,
        proposer_index_2: ValidatorIndex,
    },
    #[error("proposer slashing slots do not match ({slot_1} != {slot_2})")]
    ProposerSlashingSlotMismatch { slot_1: Slot, slot_2: Slot },
    #[error("slot is incorrect (state slot: {state_slot}, block slot: {block_slot})")]
    SlotMismatch { state_slot: Slot, block_slot: Slot },
    #[error("target slot ({target}) is not later than current slot ({current})")]
    SlotNotLater { current: Slot, target: Slot },
    #[error("state root is incorrect (computed: {computed:?}, in block: {in_block:?})")]
    StateRootMismatch { computed: H256, in_block: H256 },
    #[error("sync committee member is not in the validator registry")]
    SyncCommitteeMemberNotInRegistry,
    #[error("too many blob KZG commitments (maximum: {maximum}, in block: {in_block})")]
    TooManyBlockKzgCommitments { maximum: u64, in_block: u64 },
    #[error("upgrade from {from} to {to} is not supported")]
    UnsupportedUpgrade { from: Phase, to: Phase },
    #[error("validator {index} has already initiated exit (exit epoch: {exit_epoch})")]
    ValidatorAlreadyExited {
        index: ValidatorIndex,
        exit_epoch: Epoch,
    },
    #[error(
        "validator {index} has not been active long enough \
         (activation epoch: {activation_epoch}, current epoch: {current_epoch})"
    )]
    ValidatorHasNotBeenActiveLongEnough {
        index: ValidatorIndex,
        activation_epoch: Epoch,
        current_epoch: Epoch,
    },
    #[error("validator {index} is not active in epoch {current_epoch}")]
    ValidatorNotActive {
        index: ValidatorIndex,
        current_epoch: Epoch,
    },
    #[error("voluntary exit is not valid until epoch {exit_epoch} (current epoch: {current_epoch})")]
    VoluntaryExitNotYetValid {
        current_epoch: Epoch,
        exit_epoch: Epoch,
    },
    #[error("validator {index} cannot exit because it has pending partial withdrawals")]
    VoluntaryExitWithPendingWithdrawals { index: ValidatorIndex },
    #[error("withdrawal count is incorrect (computed: {computed}, in block: {in_block})")]
    WithdrawalCountMismatch { computed: usize, in_block: usize },
    #[error(
        "withdrawal credentials of validator {index} do not match \
         (in state: {in_state:?}, computed: {computed:?})"
    )]
    WithdrawalCredentialsMismatch {
        index: ValidatorIndex,
        in_state: H256,
        computed: H256,
    },
    #[error("withdrawal credentials of validator {index} are not BLS credentials")]
    WithdrawalCredentialsNotBls { index: ValidatorIndex },
    #[error("withdrawal is incorrect (computed: {computed:?}, in block: {in_block:?})")]
    WithdrawalMismatch {
        computed: Withdrawal,
        in_block: Withdrawal,
    },
}
