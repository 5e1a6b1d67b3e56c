use std::sync::Arc;

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::BitVector;
use tree_hash_derive::TreeHash;

use crate::{
    altair::containers::SyncCommittee,
    cache::Cache,
    capella::primitives::WithdrawalIndex,
    collections::{
        Balances, EpochParticipation, Eth1DataVotes, HistoricalRoots, HistoricalSummaries,
        InactivityScores, PendingConsolidations, PendingDeposits, PendingPartialWithdrawals,
        RandaoMixes, RecentRoots, Slashings, Validators,
    },
    deneb::containers::ExecutionPayloadHeader,
    phase0::{
        consts::JustificationBitsLength,
        containers::{BeaconBlockHeader, Checkpoint, Eth1Data, Fork},
        primitives::{DepositIndex, Epoch, Gwei, Slot, UnixSeconds, ValidatorIndex, H256},
    },
    preset::Preset,
};

#[derive(Clone, Debug, Derivative, Deserialize, Serialize, Encode, Decode, TreeHash)]
#[derivative(Default, PartialEq, Eq)]
#[serde(bound = "", deny_unknown_fields)]
pub struct BeaconState<P: Preset> {
    // > Versioning
    pub genesis_time: UnixSeconds,
    pub genesis_validators_root: H256,
    pub slot: Slot,
    pub fork: Fork,

    // > History
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: Arc<RecentRoots<P>>,
    pub state_roots: Arc<RecentRoots<P>>,
    pub historical_roots: Arc<HistoricalRoots<P>>,

    // > Eth1
    pub eth1_data: Eth1Data,
    pub eth1_data_votes: Arc<Eth1DataVotes<P>>,
    pub eth1_deposit_index: DepositIndex,

    // > Registry
    pub validators: Arc<Validators<P>>,
    pub balances: Arc<Balances<P>>,

    // > Randomness
    pub randao_mixes: Arc<RandaoMixes<P>>,

    // > Slashings
    pub slashings: Arc<Slashings<P>>,

    // > Participation
    pub previous_epoch_participation: Arc<EpochParticipation<P>>,
    pub current_epoch_participation: Arc<EpochParticipation<P>>,

    // > Finality
    #[derivative(Default(value = "BitVector::new()"))]
    pub justification_bits: BitVector<JustificationBitsLength>,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,

    // > Inactivity
    pub inactivity_scores: Arc<InactivityScores<P>>,

    // > Sync
    pub current_sync_committee: Arc<SyncCommittee<P>>,
    pub next_sync_committee: Arc<SyncCommittee<P>>,

    // > Execution
    pub latest_execution_payload_header: ExecutionPayloadHeader<P>,

    // > Withdrawals
    pub next_withdrawal_index: WithdrawalIndex,
    pub next_withdrawal_validator_index: ValidatorIndex,

    // > Deep history valid from Capella onwards
    pub historical_summaries: Arc<HistoricalSummaries<P>>,

    // > Electra
    pub deposit_requests_start_index: DepositIndex,
    pub deposit_balance_to_consume: Gwei,
    pub exit_balance_to_consume: Gwei,
    pub earliest_exit_epoch: Epoch,
    pub consolidation_balance_to_consume: Gwei,
    pub earliest_consolidation_epoch: Epoch,
    pub pending_deposits: Arc<PendingDeposits<P>>,
    pub pending_partial_withdrawals: Arc<PendingPartialWithdrawals<P>>,
    pub pending_consolidations: Arc<PendingConsolidations<P>>,

    // Cache
    #[derivative(PartialEq = "ignore")]
    #[serde(skip)]
    #[ssz(skip_serializing, skip_deserializing)]
    #[tree_hash(skip_hashing)]
    pub cache: Cache,
}
