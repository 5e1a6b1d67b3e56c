use core::num::NonZeroU64;

use anyhow::Result;
use arithmetic::U64Ext as _;
use helper_functions::{
    accessors::{
        get_attesting_indices, get_block_root, get_block_root_at_slot, get_finality_delay,
        get_previous_epoch, total_active_balance,
    },
    error::Error as HelperError,
    predicates::{is_eligible_for_penalties, is_in_inactivity_leak},
};
use itertools::izip;
use types::{
    nonstandard::AttestationEpoch,
    phase0::{
        beacon_state::BeaconState as Phase0BeaconState,
        consts::BASE_REWARDS_PER_EPOCH,
        containers::{PendingAttestation, Validator},
        primitives::{Gwei, ValidatorIndex},
    },
    preset::Preset,
};

use crate::unphased::{EpochDeltas, Error};

#[derive(Clone, Copy, Debug)]
#[cfg_attr(test, derive(Default))]
pub struct ValidatorSummary {
    pub effective_balance: Gwei,
    pub slashed: bool,
    pub eligible_for_penalties: bool,
}

/// The earliest inclusion of any previous epoch attestation a validator took part in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Inclusion {
    pub delay: NonZeroU64,
    pub proposer_index: ValidatorIndex,
}

/// What an unslashed validator's previous epoch attestations achieved.
///
/// Each match implies the ones before it.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Performance {
    pub matching_source: bool,
    pub matching_target: bool,
    pub matching_head: bool,
    pub fastest_inclusion: Option<Inclusion>,
}

// Balances are at least `EFFECTIVE_BALANCE_INCREMENT` to avoid division by zero.
#[derive(Clone, Copy, Default, Debug)]
pub struct Statistics {
    pub previous_epoch_source_attesting_balance: Gwei,
    pub previous_epoch_target_attesting_balance: Gwei,
    pub previous_epoch_head_attesting_balance: Gwei,
    pub current_epoch_target_attesting_balance: Gwei,
}

impl Statistics {
    fn floor_balances<P: Preset>(&mut self) {
        for balance in [
            &mut self.previous_epoch_source_attesting_balance,
            &mut self.previous_epoch_target_attesting_balance,
            &mut self.previous_epoch_head_attesting_balance,
            &mut self.current_epoch_target_attesting_balance,
        ] {
            *balance = (*balance).max(P::EFFECTIVE_BALANCE_INCREMENT.get());
        }
    }
}

/// Phase 0 applies the sum of all rewards before the sum of all penalties.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Phase0EpochDeltas {
    pub reward: Gwei,
    pub penalty: Gwei,
}

impl EpochDeltas for Phase0EpochDeltas {
    fn components(self) -> impl IntoIterator<Item = (Gwei, Gwei)> {
        [(self.reward, self.penalty)]
    }
}

pub fn statistics<P: Preset>(
    state: &Phase0BeaconState<P>,
) -> Result<(Statistics, Vec<ValidatorSummary>, Vec<Performance>)> {
    let previous_epoch = get_previous_epoch(state);

    let mut statistics = Statistics::default();

    let summaries = state
        .validators
        .iter()
        .map(|validator| {
            let Validator {
                effective_balance,
                slashed,
                ..
            } = *validator;

            ValidatorSummary {
                effective_balance,
                slashed,
                eligible_for_penalties: is_eligible_for_penalties(validator, previous_epoch),
            }
        })
        .collect::<Vec<_>>();

    let mut performance = vec![Performance::default(); summaries.len()];
    let mut current_epoch_matching_target = vec![false; summaries.len()];

    // `get_block_root` fails in the first slot of the epoch after genesis.
    if let Ok(expected_target) = get_block_root(state, AttestationEpoch::Previous) {
        for attestation in state.previous_epoch_attestations.iter() {
            let PendingAttestation {
                ref aggregation_bits,
                data,
                inclusion_delay,
                proposer_index,
            } = *attestation;

            let expected_head = get_block_root_at_slot(state, data.slot)?;
            let target = data.target.root == expected_target;
            let head = target && data.beacon_block_root == expected_head;

            let delay = NonZeroU64::new(inclusion_delay)
                .ok_or(Error::PendingAttestationWithZeroInclusionDelay { data })?;

            let inclusion = Inclusion {
                delay,
                proposer_index,
            };

            for validator_index in get_attesting_indices(state, data, aggregation_bits)? {
                let index = usize::try_from(validator_index)?;
                let summary = summaries[index];

                if summary.slashed {
                    continue;
                }

                let performance = &mut performance[index];

                if !performance.matching_source {
                    statistics.previous_epoch_source_attesting_balance +=
                        summary.effective_balance;
                    performance.matching_source = true;
                }

                if target && !performance.matching_target {
                    statistics.previous_epoch_target_attesting_balance +=
                        summary.effective_balance;
                    performance.matching_target = true;
                }

                if head && !performance.matching_head {
                    statistics.previous_epoch_head_attesting_balance += summary.effective_balance;
                    performance.matching_head = true;
                }

                let fastest = performance.fastest_inclusion.get_or_insert(inclusion);

                if inclusion.delay < fastest.delay {
                    *fastest = inclusion;
                }
            }
        }
    }

    if let Ok(expected_target) = get_block_root(state, AttestationEpoch::Current) {
        for attestation in state.current_epoch_attestations.iter() {
            if attestation.data.target.root != expected_target {
                continue;
            }

            for validator_index in
                get_attesting_indices(state, attestation.data, &attestation.aggregation_bits)?
            {
                let index = usize::try_from(validator_index)?;
                let summary = summaries[index];

                if !summary.slashed && !current_epoch_matching_target[index] {
                    statistics.current_epoch_target_attesting_balance +=
                        summary.effective_balance;
                    current_epoch_matching_target[index] = true;
                }
            }
        }
    }

    statistics.floor_balances::<P>();

    Ok((statistics, summaries, performance))
}

/// Attestation, inclusion and inactivity deltas for every validator.
pub fn epoch_deltas<P: Preset>(
    state: &Phase0BeaconState<P>,
    statistics: Statistics,
    summaries: impl IntoIterator<Item = ValidatorSummary>,
    performance: impl IntoIterator<Item = Performance>,
) -> Result<Vec<Phase0EpochDeltas>> {
    let finality_delay = get_finality_delay(state);
    let in_inactivity_leak = is_in_inactivity_leak(state);
    let total_active_balance = total_active_balance(state)?.get();
    let total_active_balance_sqrt = total_active_balance.integer_sqrt();
    let increment = P::EFFECTIVE_BALANCE_INCREMENT;

    let mut deltas = vec![Phase0EpochDeltas::default(); state.validators.len()];

    for (index, summary, performance) in izip!(0.., summaries, performance) {
        let ValidatorSummary {
            effective_balance,
            eligible_for_penalties,
            ..
        } = summary;

        let base_reward = effective_balance * P::BASE_REWARD_FACTOR
            / total_active_balance_sqrt
            / BASE_REWARDS_PER_EPOCH;

        let proposer_reward = base_reward / P::PROPOSER_REWARD_QUOTIENT;

        let component_reward = |attesting_balance: Gwei| {
            // > Since full base reward will be canceled out by inactivity penalty deltas,
            // > optimal participation receives full base reward compensation here.
            if in_inactivity_leak {
                base_reward
            } else {
                base_reward * (attesting_balance / increment) / (total_active_balance / increment)
            }
        };

        if eligible_for_penalties {
            let deltas = &mut deltas[index];

            for (matched, attesting_balance) in [
                (
                    performance.matching_source,
                    statistics.previous_epoch_source_attesting_balance,
                ),
                (
                    performance.matching_target,
                    statistics.previous_epoch_target_attesting_balance,
                ),
                (
                    performance.matching_head,
                    statistics.previous_epoch_head_attesting_balance,
                ),
            ] {
                if matched {
                    deltas.reward += component_reward(attesting_balance);
                } else {
                    deltas.penalty += base_reward;
                }
            }

            if in_inactivity_leak {
                // > If validator is performing optimally this cancels all rewards for a neutral
                // > balance
                deltas.penalty += BASE_REWARDS_PER_EPOCH.get() * base_reward - proposer_reward;

                if !performance.matching_target {
                    deltas.penalty +=
                        effective_balance * finality_delay / P::INACTIVITY_PENALTY_QUOTIENT;
                }
            }
        }

        if let Some(Inclusion {
            delay,
            proposer_index,
        }) = performance.fastest_inclusion
        {
            let max_attester_reward = base_reward - proposer_reward;

            usize::try_from(proposer_index)
                .ok()
                .and_then(|index| deltas.get_mut(index))
                .ok_or(HelperError::ValidatorIndexOutOfBounds(proposer_index))?
                .reward += proposer_reward;

            deltas[index].reward += max_attester_reward / delay;
        }
    }

    Ok(deltas)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use helper_functions::accessors::beacon_committee;
    use ssz_types::{BitList, VariableList};
    use types::{
        config::Config,
        nonstandard::Phase,
        phase0::{
            consts::FAR_FUTURE_EPOCH,
            containers::{AttestationData, Checkpoint},
            primitives::H256,
        },
        preset::Minimal,
    };

    use super::*;

    fn validator() -> Validator {
        Validator {
            effective_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        }
    }

    fn state_at_epoch(epoch: u64, count: usize) -> Phase0BeaconState<Minimal> {
        Phase0BeaconState {
            slot: epoch * 8,
            validators: Arc::new(VariableList::from(vec![validator(); count])),
            balances: Arc::new(VariableList::from(vec![Minimal::MAX_EFFECTIVE_BALANCE; count])),
            ..Phase0BeaconState::default()
        }
    }

    fn summary() -> ValidatorSummary {
        ValidatorSummary {
            effective_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            slashed: false,
            eligible_for_penalties: true,
        }
    }

    fn attested(delay: u64, proposer_index: ValidatorIndex) -> Result<Performance> {
        let delay = NonZeroU64::new(delay).ok_or_else(|| anyhow::anyhow!("zero delay"))?;

        Ok(Performance {
            matching_source: true,
            matching_target: true,
            matching_head: true,
            fastest_inclusion: Some(Inclusion {
                delay,
                proposer_index,
            }),
        })
    }

    #[test]
    fn statistics_keep_the_fastest_inclusion_of_each_attester() -> Result<()> {
        let config = Config::minimal();
        let count = NonZeroU64::new(16).ok_or_else(|| anyhow::anyhow!("zero"))?;
        let state = interop::quick_start_beacon_state::<Minimal>(&config, Phase::Phase0, 0, count)?;
        let mut state = state
            .phase0()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("quick start did not produce a Phase 0 state"))?;

        state.slot = 17;
        state.cache.advance_epoch();

        let committee = beacon_committee(&state, 8, 0)?.to_vec();
        let mut aggregation_bits = BitList::with_capacity(committee.len())
            .map_err(|error| anyhow::anyhow!("{error:?}"))?;

        for position in 0..committee.len() {
            aggregation_bits
                .set(position, true)
                .map_err(|error| anyhow::anyhow!("{error:?}"))?;
        }

        let data = AttestationData {
            slot: 8,
            index: 0,
            beacon_block_root: H256::ZERO,
            source: Checkpoint::default(),
            target: Checkpoint {
                epoch: 1,
                root: H256::ZERO,
            },
        };

        for (inclusion_delay, proposer_index) in [(3, 4), (1, 5)] {
            Arc::make_mut(&mut state.previous_epoch_attestations)
                .push(PendingAttestation {
                    aggregation_bits: aggregation_bits.clone(),
                    data,
                    inclusion_delay,
                    proposer_index,
                })
                .map_err(|error| anyhow::anyhow!("{error:?}"))?;
        }

        let (statistics, _, performance) = super::statistics(&state)?;
        let attesting_balance = Minimal::MAX_EFFECTIVE_BALANCE * u64::try_from(committee.len())?;

        assert_eq!(statistics.previous_epoch_source_attesting_balance, attesting_balance);
        assert_eq!(statistics.previous_epoch_target_attesting_balance, attesting_balance);
        assert_eq!(statistics.previous_epoch_head_attesting_balance, attesting_balance);
        assert_eq!(
            statistics.current_epoch_target_attesting_balance,
            Minimal::EFFECTIVE_BALANCE_INCREMENT.get(),
        );

        for validator_index in committee {
            let performance = performance[usize::try_from(validator_index)?];

            assert_eq!(performance, attested(1, 5)?);
        }

        Ok(())
    }

    #[test]
    fn matching_attesters_are_rewarded_and_absentees_penalized() -> Result<()> {
        let state = state_at_epoch(3, 4);
        let attesting_balance = 3 * Minimal::MAX_EFFECTIVE_BALANCE;

        let statistics = Statistics {
            previous_epoch_source_attesting_balance: attesting_balance,
            previous_epoch_target_attesting_balance: attesting_balance,
            previous_epoch_head_attesting_balance: attesting_balance,
            current_epoch_target_attesting_balance: attesting_balance,
        };

        let attester = attested(2, 3)?;
        let performance = [attester, attester, attester, Performance::default()];
        let deltas = epoch_deltas(&state, statistics, [summary(); 4], performance)?;

        // 32 ETH against the square root of 128 ETH, split over 4 components.
        let base_reward = 1_431_087;
        let proposer_reward = base_reward / 8;
        let component_reward = base_reward * 96 / 128;

        assert_eq!(
            deltas[0],
            Phase0EpochDeltas {
                reward: 3 * component_reward + (base_reward - proposer_reward) / 2,
                penalty: 0,
            },
        );
        assert_eq!(
            deltas[3],
            Phase0EpochDeltas {
                reward: 3 * proposer_reward,
                penalty: 3 * base_reward,
            },
        );

        Ok(())
    }

    #[test]
    fn inactivity_leak_neutralizes_attesters_and_drains_absentees() -> Result<()> {
        // Finality is 6 epochs behind.
        let state = state_at_epoch(7, 2);
        let total_active_balance = 2 * Minimal::MAX_EFFECTIVE_BALANCE;

        assert!(is_in_inactivity_leak(&state));

        let statistics = Statistics {
            previous_epoch_source_attesting_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            previous_epoch_target_attesting_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            previous_epoch_head_attesting_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            current_epoch_target_attesting_balance: Minimal::MAX_EFFECTIVE_BALANCE,
        };

        let performance = [attested(1, 0)?, Performance::default()];
        let deltas = epoch_deltas(&state, statistics, [summary(); 2], performance)?;

        let base_reward = Minimal::MAX_EFFECTIVE_BALANCE * Minimal::BASE_REWARD_FACTOR
            / total_active_balance.integer_sqrt()
            / BASE_REWARDS_PER_EPOCH;
        let proposer_reward = base_reward / 8;
        let offset = 4 * base_reward - proposer_reward;

        assert_eq!(
            deltas[0],
            Phase0EpochDeltas {
                reward: 4 * base_reward,
                penalty: offset,
            },
        );
        assert_eq!(
            deltas[1],
            Phase0EpochDeltas {
                reward: 0,
                penalty: 3 * base_reward
                    + offset
                    + Minimal::MAX_EFFECTIVE_BALANCE * 6 / Minimal::INACTIVITY_PENALTY_QUOTIENT,
            },
        );

        Ok(())
    }
}
