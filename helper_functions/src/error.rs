use parse_display::Display;
use thiserror::Error;
use types::phase0::primitives::{CommitteeIndex, Epoch, Slot, ValidatorIndex};

#[derive(PartialEq, Eq, Debug, Error)]
pub enum Error {
    #[error("attestation has no attesting indices")]
    AttestationHasNoAttestingIndices,
    #[error("attestation source does not match justified checkpoint")]
    AttestationSourceMismatch,
    #[error("attesting indices are not sorted and unique")]
    AttestingIndicesNotSortedAndUnique,
    #[error("total balance overflowed")]
    BalanceOverflow,
    #[error("committee index is out of bounds")]
    CommitteeIndexOutOfBounds,
    #[error(
        "aggregation bitlist length {aggregation_bitlist_length} \
         does not match committee length {committee_length}"
    )]
    CommitteeLengthMismatch {
        aggregation_bitlist_length: usize,
        committee_length: usize,
    },
    #[error("epoch context was built for epoch {context_epoch} but state is in epoch {state_epoch}")]
    EpochContextOutOfDate {
        context_epoch: Epoch,
        state_epoch: Epoch,
    },
    #[error("epoch is before previous one relative to state")]
    EpochBeforePrevious,
    #[error("epoch is in the future relative to state")]
    EpochInTheFuture,
    #[error("epoch number overflowed")]
    EpochOverflow,
    #[error("failed to select proposer")]
    FailedToSelectProposer,
    #[error("failed to select sync committee member")]
    FailedToSelectSyncCommitteeMember,
    #[error("list is full")]
    ListFull,
    #[error("no validators are active")]
    NoActiveValidators,
    #[error("no committee attesters for {index} committee")]
    NoCommitteeAttesters { index: CommitteeIndex },
    #[error(
        "aggregation bitlist length {aggregation_bitlist_length} \
         does not match participants count {participants_count}"
    )]
    ParticipantsCountMismatch {
        aggregation_bitlist_length: usize,
        participants_count: usize,
    },
    #[error("{0} is invalid")]
    SignatureInvalid(SignatureKind),
    #[error("slot {slot} is out of range of stored block roots (state slot: {state_slot})")]
    SlotOutOfRange { slot: Slot, state_slot: Slot },
    #[error("validator index {0} is out of bounds")]
    ValidatorIndexOutOfBounds(ValidatorIndex),
    #[error("churn limit is zero")]
    ZeroChurnLimit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum SignatureKind {
    #[display("attestation signature")]
    Attestation,
    #[display("block signature")]
    Block,
    #[display("BLS to execution change signature")]
    BlsToExecutionChange,
    #[display("deposit signature")]
    Deposit,
    #[display("collection of multiple signatures")]
    Multi,
    #[display("RANDAO reveal")]
    Randao,
    #[display("sync aggregate signature")]
    SyncAggregate,
    #[display("voluntary exit signature")]
    VoluntaryExit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_errors_name_the_signature() {
        assert_eq!(
            Error::SignatureInvalid(SignatureKind::Randao).to_string(),
            "RANDAO reveal is invalid",
        );
    }
}
