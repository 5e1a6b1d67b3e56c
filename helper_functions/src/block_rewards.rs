//! Accounting of the balance changes made while a block is applied.
//!
//! Block processing reports every reward and penalty it applies to a [`RewardLedger`]. Ordinary
//! transitions pass [`NullLedger`], which compiles to nothing. [`BlockRewards`] keeps the totals
//! grouped by the operation that caused them.

use core::ops::{Add, AddAssign};
use std::collections::BTreeMap;

use enum_map::{Enum, EnumMap};
use types::{
    nonstandard::SlashingKind,
    phase0::primitives::{Gwei, ValidatorIndex},
};

/// Block operations that pay the proposer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Enum)]
pub enum ProposerRewardSource {
    Attestations,
    ProposerSlashings,
    AttesterSlashings,
    SyncAggregate,
}

impl From<SlashingKind> for ProposerRewardSource {
    fn from(kind: SlashingKind) -> Self {
        match kind {
            SlashingKind::Proposer => Self::ProposerSlashings,
            SlashingKind::Attester => Self::AttesterSlashings,
        }
    }
}

/// Balance changes caused by slashing one validator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Slashing {
    pub kind: SlashingKind,
    pub slashed_index: ValidatorIndex,
    pub penalty: Gwei,
    pub whistleblower_index: ValidatorIndex,
    pub whistleblower_reward: Gwei,
    pub proposer_reward: Gwei,
}

pub trait RewardLedger {
    fn record_slashing(&mut self, slashing: Slashing);
    fn record_proposer_reward(&mut self, source: ProposerRewardSource, reward: Gwei);
    fn record_deposit(&mut self, validator_index: ValidatorIndex, amount: Gwei);
    fn record_sync_committee_delta(&mut self, participant_index: ValidatorIndex, delta: Delta);
}

impl<L: RewardLedger> RewardLedger for &mut L {
    #[inline]
    fn record_slashing(&mut self, slashing: Slashing) {
        (**self).record_slashing(slashing);
    }

    #[inline]
    fn record_proposer_reward(&mut self, source: ProposerRewardSource, reward: Gwei) {
        (**self).record_proposer_reward(source, reward);
    }

    #[inline]
    fn record_deposit(&mut self, validator_index: ValidatorIndex, amount: Gwei) {
        (**self).record_deposit(validator_index, amount);
    }

    #[inline]
    fn record_sync_committee_delta(&mut self, participant_index: ValidatorIndex, delta: Delta) {
        (**self).record_sync_committee_delta(participant_index, delta);
    }
}

pub struct NullLedger;

impl RewardLedger for NullLedger {
    #[inline]
    fn record_slashing(&mut self, _slashing: Slashing) {}

    #[inline]
    fn record_proposer_reward(&mut self, _source: ProposerRewardSource, _reward: Gwei) {}

    #[inline]
    fn record_deposit(&mut self, _validator_index: ValidatorIndex, _amount: Gwei) {}

    #[inline]
    fn record_sync_committee_delta(&mut self, _participant_index: ValidatorIndex, _delta: Delta) {}
}

/// Everything a single block paid out or took away.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct BlockRewards {
    pub proposer_rewards: EnumMap<ProposerRewardSource, Gwei>,
    /// In the order the slashings were applied.
    pub slashings: Vec<Slashing>,
    pub deposits: BTreeMap<ValidatorIndex, Gwei>,
    /// A validator can hold several seats in the same sync committee. Its seats are merged.
    pub sync_committee_deltas: BTreeMap<ValidatorIndex, Delta>,
}

impl RewardLedger for BlockRewards {
    fn record_slashing(&mut self, slashing: Slashing) {
        self.record_proposer_reward(slashing.kind.into(), slashing.proposer_reward);
        self.slashings.push(slashing);
    }

    fn record_proposer_reward(&mut self, source: ProposerRewardSource, reward: Gwei) {
        let total = &mut self.proposer_rewards[source];
        *total = total.saturating_add(reward);
    }

    fn record_deposit(&mut self, validator_index: ValidatorIndex, amount: Gwei) {
        let total = self.deposits.entry(validator_index).or_default();
        *total = total.saturating_add(amount);
    }

    fn record_sync_committee_delta(&mut self, participant_index: ValidatorIndex, delta: Delta) {
        *self
            .sync_committee_deltas
            .entry(participant_index)
            .or_insert(Delta::Reward(0)) += delta;
    }
}

impl BlockRewards {
    #[must_use]
    pub fn proposer_total(&self) -> Gwei {
        self.proposer_rewards
            .values()
            .fold(0, |total, reward| total.saturating_add(*reward))
    }

    /// Penalties applied to `validator_index` by slashings in this block.
    #[must_use]
    pub fn slashing_penalty(&self, validator_index: ValidatorIndex) -> Gwei {
        self.slashings
            .iter()
            .filter(|slashing| slashing.slashed_index == validator_index)
            .map(|slashing| slashing.penalty)
            .sum()
    }
}

/// Net change to a balance.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Delta {
    Reward(Gwei),
    Penalty(Gwei),
}

impl Delta {
    const fn parts(self) -> (Gwei, Gwei) {
        match self {
            Self::Reward(reward) => (reward, 0),
            Self::Penalty(penalty) => (0, penalty),
        }
    }
}

impl Add for Delta {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        let (reward, penalty) = self.parts();
        let (other_reward, other_penalty) = other.parts();
        let rewards = reward.saturating_add(other_reward);
        let penalties = penalty.saturating_add(other_penalty);

        if penalties > rewards {
            Self::Penalty(penalties - rewards)
        } else {
            Self::Reward(rewards - penalties)
        }
    }
}

impl AddAssign for Delta {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(Delta::Reward(2), Delta::Reward(3) => Delta::Reward(5))]
    #[test_case(Delta::Reward(2), Delta::Penalty(3) => Delta::Penalty(1))]
    #[test_case(Delta::Penalty(2), Delta::Reward(3) => Delta::Reward(1))]
    #[test_case(Delta::Penalty(2), Delta::Penalty(3) => Delta::Penalty(5))]
    #[test_case(Delta::Reward(2), Delta::Penalty(2) => Delta::Reward(0))]
    #[test_case(Delta::Reward(Gwei::MAX), Delta::Reward(2) => Delta::Reward(Gwei::MAX))]
    fn deltas_net_out(first: Delta, second: Delta) -> Delta {
        first + second
    }

    #[test]
    fn slashings_credit_the_proposer_by_kind() {
        let mut rewards = BlockRewards::default();

        rewards.record_proposer_reward(ProposerRewardSource::Attestations, 3);
        rewards.record_proposer_reward(ProposerRewardSource::Attestations, 4);
        rewards.record_proposer_reward(ProposerRewardSource::SyncAggregate, 10);
        rewards.record_slashing(Slashing {
            kind: SlashingKind::Attester,
            slashed_index: 2,
            penalty: 100,
            whistleblower_index: 1,
            whistleblower_reward: 7,
            proposer_reward: 1,
        });

        assert_eq!(rewards.proposer_rewards[ProposerRewardSource::Attestations], 7);
        assert_eq!(rewards.proposer_rewards[ProposerRewardSource::AttesterSlashings], 1);
        assert_eq!(rewards.proposer_rewards[ProposerRewardSource::ProposerSlashings], 0);
        assert_eq!(rewards.proposer_total(), 18);
        assert_eq!(rewards.slashing_penalty(2), 100);
        assert_eq!(rewards.slashing_penalty(1), 0);
    }

    #[test]
    fn repeated_sync_committee_seats_are_merged() {
        let mut rewards = BlockRewards::default();

        rewards.record_sync_committee_delta(7, Delta::Reward(5));
        rewards.record_sync_committee_delta(7, Delta::Penalty(2));
        rewards.record_sync_committee_delta(8, Delta::Penalty(2));

        assert_eq!(rewards.sync_committee_deltas[&7], Delta::Reward(3));
        assert_eq!(rewards.sync_committee_deltas[&8], Delta::Penalty(2));
    }

    #[test]
    fn deposits_to_the_same_validator_are_summed() {
        fn top_up_twice(mut ledger: impl RewardLedger) {
            ledger.record_deposit(4, 1);
            ledger.record_deposit(4, 2);
        }

        let mut rewards = BlockRewards::default();

        top_up_twice(&mut rewards);
        top_up_twice(NullLedger);

        assert_eq!(rewards.deposits, BTreeMap::from([(4, 3)]));
    }
}
