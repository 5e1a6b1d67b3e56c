// TODO: Add an associated `SignedBeaconBlock` type to `BeaconState`. That would let the per-phase
//       block processors reject blocks of the wrong phase at compile time.

use std::sync::Arc;

use duplicate::duplicate_item;
use ssz_types::BitVector;
use tree_hash::TreeHash;

use crate::{
    altair::{beacon_state::BeaconState as AltairBeaconState, containers::SyncCommittee},
    bellatrix::beacon_state::BeaconState as BellatrixBeaconState,
    cache::Cache,
    capella::{beacon_state::BeaconState as CapellaBeaconState, primitives::WithdrawalIndex},
    collections::{
        Balances, EpochParticipation, Eth1DataVotes, HistoricalRoots, HistoricalSummaries,
        InactivityScores, PendingConsolidations, PendingDeposits, PendingPartialWithdrawals,
        RandaoMixes, RecentRoots, Slashings, Validators,
    },
    combined::BeaconState as CombinedBeaconState,
    deneb::beacon_state::BeaconState as DenebBeaconState,
    electra::beacon_state::BeaconState as ElectraBeaconState,
    nonstandard::Phase,
    phase0::{
        beacon_state::BeaconState as Phase0BeaconState,
        consts::JustificationBitsLength,
        containers::{BeaconBlockHeader, Checkpoint, Eth1Data, Fork},
        primitives::{
            DepositIndex, Epoch, ExecutionBlockHash, Gwei, Slot, UnixSeconds, ValidatorIndex, H256,
        },
    },
    preset::Preset,
};

/// Fields present in the state of every supported phase.
///
/// Collections are stored behind `Arc`s. The `*_mut` accessors go through [`Arc::make_mut`],
/// which copies a collection only if it is still shared with another state.
pub trait BeaconState<P: Preset>: Clone + TreeHash + Send + Sync {
    fn genesis_time(&self) -> UnixSeconds;
    fn genesis_validators_root(&self) -> H256;
    fn slot(&self) -> Slot;
    fn fork(&self) -> Fork;
    fn latest_block_header(&self) -> BeaconBlockHeader;
    fn block_roots(&self) -> &RecentRoots<P>;
    fn state_roots(&self) -> &RecentRoots<P>;
    fn historical_roots(&self) -> &HistoricalRoots<P>;
    fn eth1_data(&self) -> Eth1Data;
    fn eth1_data_votes(&self) -> &Eth1DataVotes<P>;
    fn eth1_deposit_index(&self) -> DepositIndex;
    fn validators(&self) -> &Validators<P>;
    fn balances(&self) -> &Balances<P>;
    fn randao_mixes(&self) -> &RandaoMixes<P>;
    fn slashings(&self) -> &Slashings<P>;
    fn justification_bits(&self) -> &BitVector<JustificationBitsLength>;
    fn previous_justified_checkpoint(&self) -> Checkpoint;
    fn current_justified_checkpoint(&self) -> Checkpoint;
    fn finalized_checkpoint(&self) -> Checkpoint;
    fn cache(&self) -> &Cache;

    fn slot_mut(&mut self) -> &mut Slot;
    fn latest_block_header_mut(&mut self) -> &mut BeaconBlockHeader;
    fn eth1_data_mut(&mut self) -> &mut Eth1Data;
    fn eth1_deposit_index_mut(&mut self) -> &mut DepositIndex;
    fn justification_bits_mut(&mut self) -> &mut BitVector<JustificationBitsLength>;
    fn previous_justified_checkpoint_mut(&mut self) -> &mut Checkpoint;
    fn current_justified_checkpoint_mut(&mut self) -> &mut Checkpoint;
    fn finalized_checkpoint_mut(&mut self) -> &mut Checkpoint;
    fn cache_mut(&mut self) -> &mut Cache;

    fn block_roots_mut(&mut self) -> &mut RecentRoots<P>;
    fn state_roots_mut(&mut self) -> &mut RecentRoots<P>;
    fn historical_roots_mut(&mut self) -> &mut HistoricalRoots<P>;
    fn eth1_data_votes_mut(&mut self) -> &mut Eth1DataVotes<P>;
    fn validators_mut(&mut self) -> &mut Validators<P>;
    fn balances_mut(&mut self) -> &mut Balances<P>;
    fn randao_mixes_mut(&mut self) -> &mut RandaoMixes<P>;
    fn slashings_mut(&mut self) -> &mut Slashings<P>;

    // These are needed to split borrows in epoch processing.
    fn validators_mut_with_balances(&mut self) -> (&mut Validators<P>, &Balances<P>);
    fn balances_mut_with_slashings(&mut self) -> (&mut Balances<P>, &Slashings<P>);

    fn phase(&self) -> Phase;
}

#[duplicate_item(
    implementor
    get_copy(field)
    get_ref(field)
    get_ref_mut(field, method)
    get_arc_mut(field, method)
    validators_mut_with_balances_body
    balances_mut_with_slashings_body
    phase_body;

    [Phase0BeaconState<P>]
    [self.field]
    [&self.field]
    [&mut self.field]
    [Arc::make_mut(&mut self.field)]
    [(Arc::make_mut(&mut self.validators), &*self.balances)]
    [(Arc::make_mut(&mut self.balances), &*self.slashings)]
    [Phase::Phase0];

    [AltairBeaconState<P>]
    [self.field]
    [&self.field]
    [&mut self.field]
    [Arc::make_mut(&mut self.field)]
    [(Arc::make_mut(&mut self.validators), &*self.balances)]
    [(Arc::make_mut(&mut self.balances), &*self.slashings)]
    [Phase::Altair];

    [BellatrixBeaconState<P>]
    [self.field]
    [&self.field]
    [&mut self.field]
    [Arc::make_mut(&mut self.field)]
    [(Arc::make_mut(&mut self.validators), &*self.balances)]
    [(Arc::make_mut(&mut self.balances), &*self.slashings)]
    [Phase::Bellatrix];

    [CapellaBeaconState<P>]
    [self.field]
    [&self.field]
    [&mut self.field]
    [Arc::make_mut(&mut self.field)]
    [(Arc::make_mut(&mut self.validators), &*self.balances)]
    [(Arc::make_mut(&mut self.balances), &*self.slashings)]
    [Phase::Capella];

    [DenebBeaconState<P>]
    [self.field]
    [&self.field]
    [&mut self.field]
    [Arc::make_mut(&mut self.field)]
    [(Arc::make_mut(&mut self.validators), &*self.balances)]
    [(Arc::make_mut(&mut self.balances), &*self.slashings)]
    [Phase::Deneb];

    [ElectraBeaconState<P>]
    [self.field]
    [&self.field]
    [&mut self.field]
    [Arc::make_mut(&mut self.field)]
    [(Arc::make_mut(&mut self.validators), &*self.balances)]
    [(Arc::make_mut(&mut self.balances), &*self.slashings)]
    [Phase::Electra];

    [CombinedBeaconState<P>]
    [
        match self {
            Self::Phase0(state) => state.field(),
            Self::Altair(state) => state.field(),
            Self::Bellatrix(state) => state.field(),
            Self::Capella(state) => state.field(),
            Self::Deneb(state) => state.field(),
            Self::Electra(state) => state.field(),
        }
    ]
    [
        match self {
            Self::Phase0(state) => state.field(),
            Self::Altair(state) => state.field(),
            Self::Bellatrix(state) => state.field(),
            Self::Capella(state) => state.field(),
            Self::Deneb(state) => state.field(),
            Self::Electra(state) => state.field(),
        }
    ]
    [
        match self {
            Self::Phase0(state) => Arc::make_mut(state).method(),
            Self::Altair(state) => Arc::make_mut(state).method(),
            Self::Bellatrix(state) => Arc::make_mut(state).method(),
            Self::Capella(state) => Arc::make_mut(state).method(),
            Self::Deneb(state) => Arc::make_mut(state).method(),
            Self::Electra(state) => Arc::make_mut(state).method(),
        }
    ]
    [
        match self {
            Self::Phase0(state) => Arc::make_mut(state).method(),
            Self::Altair(state) => Arc::make_mut(state).method(),
            Self::Bellatrix(state) => Arc::make_mut(state).method(),
            Self::Capella(state) => Arc::make_mut(state).method(),
            Self::Deneb(state) => Arc::make_mut(state).method(),
            Self::Electra(state) => Arc::make_mut(state).method(),
        }
    ]
    [
        match self {
            Self::Phase0(state) => Arc::make_mut(state).validators_mut_with_balances(),
            Self::Altair(state) => Arc::make_mut(state).validators_mut_with_balances(),
            Self::Bellatrix(state) => Arc::make_mut(state).validators_mut_with_balances(),
            Self::Capella(state) => Arc::make_mut(state).validators_mut_with_balances(),
            Self::Deneb(state) => Arc::make_mut(state).validators_mut_with_balances(),
            Self::Electra(state) => Arc::make_mut(state).validators_mut_with_balances(),
        }
    ]
    [
        match self {
            Self::Phase0(state) => Arc::make_mut(state).balances_mut_with_slashings(),
            Self::Altair(state) => Arc::make_mut(state).balances_mut_with_slashings(),
            Self::Bellatrix(state) => Arc::make_mut(state).balances_mut_with_slashings(),
            Self::Capella(state) => Arc::make_mut(state).balances_mut_with_slashings(),
            Self::Deneb(state) => Arc::make_mut(state).balances_mut_with_slashings(),
            Self::Electra(state) => Arc::make_mut(state).balances_mut_with_slashings(),
        }
    ]
    [
        match self {
            Self::Phase0(_) => Phase::Phase0,
            Self::Altair(_) => Phase::Altair,
            Self::Bellatrix(_) => Phase::Bellatrix,
            Self::Capella(_) => Phase::Capella,
            Self::Deneb(_) => Phase::Deneb,
            Self::Electra(_) => Phase::Electra,
        }
    ];
)]
impl<P: Preset> BeaconState<P> for implementor {
    #[duplicate_item(
        field                           return_type;
        [genesis_time]                  [UnixSeconds];
        [genesis_validators_root]       [H256];
        [slot]                          [Slot];
        [fork]                          [Fork];
        [latest_block_header]           [BeaconBlockHeader];
        [eth1_data]                     [Eth1Data];
        [eth1_deposit_index]            [DepositIndex];
        [previous_justified_checkpoint] [Checkpoint];
        [current_justified_checkpoint]  [Checkpoint];
        [finalized_checkpoint]          [Checkpoint];
    )]
    fn field(&self) -> return_type {
        get_copy([field])
    }

    #[duplicate_item(
        field                return_type;
        [block_roots]        [RecentRoots<P>];
        [state_roots]        [RecentRoots<P>];
        [historical_roots]   [HistoricalRoots<P>];
        [eth1_data_votes]    [Eth1DataVotes<P>];
        [validators]         [Validators<P>];
        [balances]           [Balances<P>];
        [randao_mixes]       [RandaoMixes<P>];
        [slashings]          [Slashings<P>];
        [justification_bits] [BitVector<JustificationBitsLength>];
        [cache]              [Cache];
    )]
    fn field(&self) -> &return_type {
        get_ref([field])
    }

    #[duplicate_item(
        field                           method                              return_type;
        [slot]                          [slot_mut]                          [Slot];
        [latest_block_header]           [latest_block_header_mut]           [BeaconBlockHeader];
        [eth1_data]                     [eth1_data_mut]                     [Eth1Data];
        [eth1_deposit_index]            [eth1_deposit_index_mut]            [DepositIndex];
        [justification_bits]            [justification_bits_mut]            [BitVector<JustificationBitsLength>];
        [previous_justified_checkpoint] [previous_justified_checkpoint_mut] [Checkpoint];
        [current_justified_checkpoint]  [current_justified_checkpoint_mut]  [Checkpoint];
        [finalized_checkpoint]          [finalized_checkpoint_mut]          [Checkpoint];
        [cache]                         [cache_mut]                         [Cache];
    )]
    fn method(&mut self) -> &mut return_type {
        get_ref_mut([field], [method])
    }

    #[duplicate_item(
        field              method                 return_type;
        [block_roots]      [block_roots_mut]      [RecentRoots<P>];
        [state_roots]      [state_roots_mut]      [RecentRoots<P>];
        [historical_roots] [historical_roots_mut] [HistoricalRoots<P>];
        [eth1_data_votes]  [eth1_data_votes_mut]  [Eth1DataVotes<P>];
        [validators]       [validators_mut]       [Validators<P>];
        [balances]         [balances_mut]         [Balances<P>];
        [randao_mixes]     [randao_mixes_mut]     [RandaoMixes<P>];
        [slashings]        [slashings_mut]        [Slashings<P>];
    )]
    fn method(&mut self) -> &mut return_type {
        get_arc_mut([field], [method])
    }

    fn validators_mut_with_balances(&mut self) -> (&mut Validators<P>, &Balances<P>) {
        validators_mut_with_balances_body
    }

    fn balances_mut_with_slashings(&mut self) -> (&mut Balances<P>, &Slashings<P>) {
        balances_mut_with_slashings_body
    }

    fn phase(&self) -> Phase {
        phase_body
    }
}

pub trait PostAltairBeaconState<P: Preset>: BeaconState<P> {
    fn previous_epoch_participation(&self) -> &EpochParticipation<P>;
    fn current_epoch_participation(&self) -> &EpochParticipation<P>;
    fn inactivity_scores(&self) -> &InactivityScores<P>;
    fn current_sync_committee(&self) -> &Arc<SyncCommittee<P>>;
    fn next_sync_committee(&self) -> &Arc<SyncCommittee<P>>;

    fn previous_epoch_participation_mut(&mut self) -> &mut EpochParticipation<P>;
    fn current_epoch_participation_mut(&mut self) -> &mut EpochParticipation<P>;
    fn inactivity_scores_mut(&mut self) -> &mut InactivityScores<P>;
    fn current_sync_committee_mut(&mut self) -> &mut Arc<SyncCommittee<P>>;
    fn next_sync_committee_mut(&mut self) -> &mut Arc<SyncCommittee<P>>;

    /// Replaces the previous epoch participation with the current one and clears the latter.
    ///
    /// Moves the `Arc` instead of copying the list.
    fn rotate_epoch_participation(&mut self);
}

#[duplicate_item(
    implementor;
    [AltairBeaconState<P>];
    [BellatrixBeaconState<P>];
    [CapellaBeaconState<P>];
    [DenebBeaconState<P>];
    [ElectraBeaconState<P>];
)]
impl<P: Preset> PostAltairBeaconState<P> for implementor {
    #[duplicate_item(
        field                          return_type;
        [previous_epoch_participation] [EpochParticipation<P>];
        [current_epoch_participation]  [EpochParticipation<P>];
        [inactivity_scores]            [InactivityScores<P>];
    )]
    fn field(&self) -> &return_type {
        &self.field
    }

    #[duplicate_item(
        field                    return_type;
        [current_sync_committee] [Arc<SyncCommittee<P>>];
        [next_sync_committee]    [Arc<SyncCommittee<P>>];
    )]
    fn field(&self) -> &return_type {
        &self.field
    }

    #[duplicate_item(
        field                          method                             return_type;
        [previous_epoch_participation] [previous_epoch_participation_mut] [EpochParticipation<P>];
        [current_epoch_participation]  [current_epoch_participation_mut]  [EpochParticipation<P>];
        [inactivity_scores]            [inactivity_scores_mut]            [InactivityScores<P>];
    )]
    fn method(&mut self) -> &mut return_type {
        Arc::make_mut(&mut self.field)
    }

    #[duplicate_item(
        field                    method                       return_type;
        [current_sync_committee] [current_sync_committee_mut] [Arc<SyncCommittee<P>>];
        [next_sync_committee]    [next_sync_committee_mut]    [Arc<SyncCommittee<P>>];
    )]
    fn method(&mut self) -> &mut return_type {
        &mut self.field
    }

    fn rotate_epoch_participation(&mut self) {
        let zeroed = vec![0; self.validators.len()];

        // Both lists share the registry limit, so nothing is truncated.
        self.previous_epoch_participation = core::mem::replace(
            &mut self.current_epoch_participation,
            Arc::new(EpochParticipation::<P>::from(zeroed)),
        );
    }
}

pub trait PostBellatrixBeaconState<P: Preset>: PostAltairBeaconState<P> {
    fn latest_execution_block_hash(&self) -> ExecutionBlockHash;

    /// Whether the state has seen an execution payload.
    ///
    /// Bellatrix states start with a default header. Every later state has a real one.
    fn is_merge_transition_complete(&self) -> bool;
}

#[duplicate_item(
    implementor;
    [BellatrixBeaconState<P>];
    [CapellaBeaconState<P>];
    [DenebBeaconState<P>];
    [ElectraBeaconState<P>];
)]
impl<P: Preset> PostBellatrixBeaconState<P> for implementor {
    fn latest_execution_block_hash(&self) -> ExecutionBlockHash {
        self.latest_execution_payload_header.block_hash
    }

    fn is_merge_transition_complete(&self) -> bool {
        self.latest_execution_payload_header != Default::default()
    }
}

pub trait PostCapellaBeaconState<P: Preset>: PostBellatrixBeaconState<P> {
    fn next_withdrawal_index(&self) -> WithdrawalIndex;
    fn next_withdrawal_validator_index(&self) -> ValidatorIndex;
    fn historical_summaries(&self) -> &HistoricalSummaries<P>;

    fn next_withdrawal_index_mut(&mut self) -> &mut WithdrawalIndex;
    fn next_withdrawal_validator_index_mut(&mut self) -> &mut ValidatorIndex;
    fn historical_summaries_mut(&mut self) -> &mut HistoricalSummaries<P>;
}

#[duplicate_item(
    implementor;
    [CapellaBeaconState<P>];
    [DenebBeaconState<P>];
    [ElectraBeaconState<P>];
)]
impl<P: Preset> PostCapellaBeaconState<P> for implementor {
    fn next_withdrawal_index(&self) -> WithdrawalIndex {
        self.next_withdrawal_index
    }

    fn next_withdrawal_validator_index(&self) -> ValidatorIndex {
        self.next_withdrawal_validator_index
    }

    fn historical_summaries(&self) -> &HistoricalSummaries<P> {
        &self.historical_summaries
    }

    fn next_withdrawal_index_mut(&mut self) -> &mut WithdrawalIndex {
        &mut self.next_withdrawal_index
    }

    fn next_withdrawal_validator_index_mut(&mut self) -> &mut ValidatorIndex {
        &mut self.next_withdrawal_validator_index
    }

    fn historical_summaries_mut(&mut self) -> &mut HistoricalSummaries<P> {
        Arc::make_mut(&mut self.historical_summaries)
    }
}

pub trait PostElectraBeaconState<P: Preset>: PostCapellaBeaconState<P> {
    fn deposit_requests_start_index(&self) -> DepositIndex;
    fn deposit_balance_to_consume(&self) -> Gwei;
    fn exit_balance_to_consume(&self) -> Gwei;
    fn earliest_exit_epoch(&self) -> Epoch;
    fn consolidation_balance_to_consume(&self) -> Gwei;
    fn earliest_consolidation_epoch(&self) -> Epoch;
    fn pending_deposits(&self) -> &PendingDeposits<P>;
    fn pending_partial_withdrawals(&self) -> &PendingPartialWithdrawals<P>;
    fn pending_consolidations(&self) -> &PendingConsolidations<P>;

    fn deposit_requests_start_index_mut(&mut self) -> &mut DepositIndex;
    fn deposit_balance_to_consume_mut(&mut self) -> &mut Gwei;
    fn exit_balance_to_consume_mut(&mut self) -> &mut Gwei;
    fn earliest_exit_epoch_mut(&mut self) -> &mut Epoch;
    fn consolidation_balance_to_consume_mut(&mut self) -> &mut Gwei;
    fn earliest_consolidation_epoch_mut(&mut self) -> &mut Epoch;
    fn pending_deposits_mut(&mut self) -> &mut PendingDeposits<P>;
    fn pending_partial_withdrawals_mut(&mut self) -> &mut PendingPartialWithdrawals<P>;
    fn pending_consolidations_mut(&mut self) -> &mut PendingConsolidations<P>;
}

impl<P: Preset> PostElectraBeaconState<P> for ElectraBeaconState<P> {
    #[duplicate_item(
        field                              return_type;
        [deposit_requests_start_index]     [DepositIndex];
        [deposit_balance_to_consume]       [Gwei];
        [exit_balance_to_consume]          [Gwei];
        [earliest_exit_epoch]              [Epoch];
        [consolidation_balance_to_consume] [Gwei];
        [earliest_consolidation_epoch]     [Epoch];
    )]
    fn field(&self) -> return_type {
        self.field
    }

    #[duplicate_item(
        field                         return_type;
        [pending_deposits]            [PendingDeposits<P>];
        [pending_partial_withdrawals] [PendingPartialWithdrawals<P>];
        [pending_consolidations]      [PendingConsolidations<P>];
    )]
    fn field(&self) -> &return_type {
        &self.field
    }

    #[duplicate_item(
        field                              method                                 return_type;
        [deposit_requests_start_index]     [deposit_requests_start_index_mut]     [DepositIndex];
        [deposit_balance_to_consume]       [deposit_balance_to_consume_mut]       [Gwei];
        [exit_balance_to_consume]          [exit_balance_to_consume_mut]          [Gwei];
        [earliest_exit_epoch]              [earliest_exit_epoch_mut]              [Epoch];
        [consolidation_balance_to_consume] [consolidation_balance_to_consume_mut] [Gwei];
        [earliest_consolidation_epoch]     [earliest_consolidation_epoch_mut]     [Epoch];
    )]
    fn method(&mut self) -> &mut return_type {
        &mut self.field
    }

    #[duplicate_item(
        field                         method                            return_type;
        [pending_deposits]            [pending_deposits_mut]            [PendingDeposits<P>];
        [pending_partial_withdrawals] [pending_partial_withdrawals_mut] [PendingPartialWithdrawals<P>];
        [pending_consolidations]      [pending_consolidations_mut]      [PendingConsolidations<P>];
    )]
    fn method(&mut self) -> &mut return_type {
        Arc::make_mut(&mut self.field)
    }
}
