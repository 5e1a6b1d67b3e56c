//! Collections used in `BeaconState`.
//!
//! Every list and vector in a state is stored behind an `Arc`. Cloning a state only bumps
//! reference counts. A collection is copied the first time it is mutated through a clone that
//! shares it (see the `*_mut` accessors in `crate::traits`), so subtrees that a transition does
//! not touch stay shared between the original state and the new one.

use ssz_types::{FixedVector, VariableList};

use crate::{
    altair::primitives::ParticipationFlags,
    capella::containers::HistoricalSummary,
    electra::containers::{PendingConsolidation, PendingDeposit, PendingPartialWithdrawal},
    phase0::{
        containers::{Eth1Data, PendingAttestation, Validator},
        primitives::{Gwei, H256},
    },
    preset::Preset,
};

pub type RecentRoots<P> = FixedVector<H256, <P as Preset>::SlotsPerHistoricalRoot>;

pub type HistoricalRoots<P> = VariableList<H256, <P as Preset>::HistoricalRootsLimit>;

pub type Eth1DataVotes<P> = VariableList<Eth1Data, <P as Preset>::SlotsPerEth1VotingPeriod>;

pub type Validators<P> = VariableList<Validator, <P as Preset>::ValidatorRegistryLimit>;

pub type Balances<P> = VariableList<Gwei, <P as Preset>::ValidatorRegistryLimit>;

pub type RandaoMixes<P> = FixedVector<H256, <P as Preset>::EpochsPerHistoricalVector>;

pub type Slashings<P> = FixedVector<Gwei, <P as Preset>::EpochsPerSlashingsVector>;

pub type PendingAttestations<P> =
    VariableList<PendingAttestation<P>, <P as Preset>::MaxAttestationsPerEpoch>;

pub type EpochParticipation<P> =
    VariableList<ParticipationFlags, <P as Preset>::ValidatorRegistryLimit>;

pub type InactivityScores<P> = VariableList<u64, <P as Preset>::ValidatorRegistryLimit>;

pub type HistoricalSummaries<P> =
    VariableList<HistoricalSummary, <P as Preset>::HistoricalRootsLimit>;

pub type PendingDeposits<P> = VariableList<PendingDeposit, <P as Preset>::PendingDepositsLimit>;

pub type PendingPartialWithdrawals<P> =
    VariableList<PendingPartialWithdrawal, <P as Preset>::PendingPartialWithdrawalsLimit>;

pub type PendingConsolidations<P> =
    VariableList<PendingConsolidation, <P as Preset>::PendingConsolidationsLimit>;
