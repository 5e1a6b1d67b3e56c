use core::num::NonZeroU64;

use anyhow::Result;
use bit_field::BitField as _;
use helper_functions::{
    accessors::{
        get_base_reward_per_increment, get_current_epoch, get_previous_epoch, total_active_balance,
    },
    predicates::{is_active_validator, is_eligible_for_penalties, is_in_inactivity_leak},
};
use itertools::izip;
use static_assertions::assert_eq_size;
use types::{
    altair::{
        consts::{
            TIMELY_HEAD_FLAG_INDEX, TIMELY_HEAD_WEIGHT, TIMELY_SOURCE_FLAG_INDEX,
            TIMELY_SOURCE_WEIGHT, TIMELY_TARGET_FLAG_INDEX, TIMELY_TARGET_WEIGHT,
            WEIGHT_DENOMINATOR,
        },
        primitives::ParticipationFlags,
    },
    config::Config,
    phase0::primitives::Gwei,
    preset::Preset,
    traits::PostAltairBeaconState,
};

use crate::unphased::EpochDeltas;

#[derive(Clone, Copy, Debug)]
#[cfg_attr(test, derive(Default))]
pub struct ValidatorSummary {
    pub effective_balance: Gwei,
    pub slashed: bool,
    pub eligible_for_penalties: bool,
    // Flags earned in the previous epoch. Zero for validators that were not active in it.
    pub previous_epoch_participation: ParticipationFlags,
}

assert_eq_size!(ValidatorSummary, [u64; 2]);

impl ValidatorSummary {
    pub fn has_flag(self, flag_index: usize) -> bool {
        self.previous_epoch_participation.get_bit(flag_index)
    }
}

// Balances are at least `EFFECTIVE_BALANCE_INCREMENT` to avoid division by zero.
#[derive(Clone, Copy, Default, Debug)]
pub struct Statistics {
    pub previous_epoch_source_participating_balance: Gwei,
    pub previous_epoch_target_participating_balance: Gwei,
    pub previous_epoch_head_participating_balance: Gwei,
    pub current_epoch_target_participating_balance: Gwei,
}

impl Statistics {
    fn floor_balances<P: Preset>(&mut self) {
        for balance in [
            &mut self.previous_epoch_source_participating_balance,
            &mut self.previous_epoch_target_participating_balance,
            &mut self.previous_epoch_head_participating_balance,
            &mut self.current_epoch_target_participating_balance,
        ] {
            *balance = (*balance).max(P::EFFECTIVE_BALANCE_INCREMENT.get());
        }
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct AltairEpochDeltas {
    pub source_reward: Gwei,
    pub source_penalty: Gwei,
    pub target_reward: Gwei,
    pub target_penalty: Gwei,
    pub head_reward: Gwei,
    pub inactivity_penalty: Gwei,
}

impl EpochDeltas for AltairEpochDeltas {
    fn components(self) -> impl IntoIterator<Item = (Gwei, Gwei)> {
        [
            (self.source_reward, self.source_penalty),
            (self.target_reward, self.target_penalty),
            (self.head_reward, 0),
            (0, self.inactivity_penalty),
        ]
    }
}

pub fn statistics<P: Preset>(
    state: &impl PostAltairBeaconState<P>,
) -> (Statistics, Vec<ValidatorSummary>) {
    let current_epoch = get_current_epoch(state);
    let previous_epoch = get_previous_epoch(state);

    let mut statistics = Statistics::default();

    let summaries = izip!(
        state.validators().iter(),
        state.previous_epoch_participation().iter().copied(),
        state.current_epoch_participation().iter().copied(),
    )
    .map(|(validator, previous_participation, current_participation)| {
        let effective_balance = validator.effective_balance;
        let slashed = validator.slashed;
        let active_in_previous_epoch = is_active_validator(validator, previous_epoch);
        let active_in_current_epoch = is_active_validator(validator, current_epoch);

        // `get_unslashed_participating_indices` only counts validators active in the epoch.
        let previous_epoch_participation = if active_in_previous_epoch {
            previous_participation
        } else {
            0
        };

        if !slashed {
            if previous_epoch_participation.get_bit(TIMELY_SOURCE_FLAG_INDEX) {
                statistics.previous_epoch_source_participating_balance += effective_balance;
            }

            if previous_epoch_participation.get_bit(TIMELY_TARGET_FLAG_INDEX) {
                statistics.previous_epoch_target_participating_balance += effective_balance;
            }

            if previous_epoch_participation.get_bit(TIMELY_HEAD_FLAG_INDEX) {
                statistics.previous_epoch_head_participating_balance += effective_balance;
            }

            if active_in_current_epoch && current_participation.get_bit(TIMELY_TARGET_FLAG_INDEX)
            {
                statistics.current_epoch_target_participating_balance += effective_balance;
            }
        }

        ValidatorSummary {
            effective_balance,
            slashed,
            eligible_for_penalties: is_eligible_for_penalties(validator, previous_epoch),
            previous_epoch_participation,
        }
    })
    .collect();

    statistics.floor_balances::<P>();

    (statistics, summaries)
}

/// Flag and inactivity deltas for every validator.
///
/// The inactivity penalty quotient changed in Bellatrix.
pub fn epoch_deltas<P: Preset>(
    config: &Config,
    state: &impl PostAltairBeaconState<P>,
    statistics: Statistics,
    summaries: impl IntoIterator<Item = ValidatorSummary>,
    inactivity_penalty_quotient: NonZeroU64,
) -> Result<Vec<AltairEpochDeltas>> {
    let in_inactivity_leak = is_in_inactivity_leak(state);
    let base_reward_per_increment = get_base_reward_per_increment(state)?;

    let increment = P::EFFECTIVE_BALANCE_INCREMENT;
    let source_increments = statistics.previous_epoch_source_participating_balance / increment;
    let target_increments = statistics.previous_epoch_target_participating_balance / increment;
    let head_increments = statistics.previous_epoch_head_participating_balance / increment;
    let active_increments = total_active_balance(state)?.get() / increment;

    let inactivity_penalty_denominator = u128::from(config.inactivity_score_bias.get())
        * u128::from(inactivity_penalty_quotient.get());

    let deltas = izip!(summaries, state.inactivity_scores().iter().copied())
        .map(|(summary, inactivity_score)| {
            let mut deltas = AltairEpochDeltas::default();

            let ValidatorSummary {
                effective_balance,
                slashed,
                eligible_for_penalties,
                ..
            } = summary;

            if !eligible_for_penalties {
                return Ok(deltas);
            }

            let base_reward = effective_balance / increment * base_reward_per_increment;

            let participation_component_reward = |weight, unslashed_participating_increments| {
                let reward_numerator = base_reward * weight * unslashed_participating_increments;
                let reward_denominator = active_increments * WEIGHT_DENOMINATOR.get();
                reward_numerator / reward_denominator
            };

            let participation_component_penalty =
                |weight| base_reward * weight / WEIGHT_DENOMINATOR;

            if !slashed && summary.has_flag(TIMELY_SOURCE_FLAG_INDEX) {
                if !in_inactivity_leak {
                    deltas.source_reward =
                        participation_component_reward(TIMELY_SOURCE_WEIGHT, source_increments);
                }
            } else {
                deltas.source_penalty = participation_component_penalty(TIMELY_SOURCE_WEIGHT);
            }

            if !slashed && summary.has_flag(TIMELY_TARGET_FLAG_INDEX) {
                if !in_inactivity_leak {
                    deltas.target_reward =
                        participation_component_reward(TIMELY_TARGET_WEIGHT, target_increments);
                }
            } else {
                deltas.target_penalty = participation_component_penalty(TIMELY_TARGET_WEIGHT);

                let penalty_numerator =
                    u128::from(effective_balance) * u128::from(inactivity_score);

                deltas.inactivity_penalty =
                    Gwei::try_from(penalty_numerator / inactivity_penalty_denominator)?;
            }

            // Missing the head is not penalized.
            if !slashed && summary.has_flag(TIMELY_HEAD_FLAG_INDEX) && !in_inactivity_leak {
                deltas.head_reward =
                    participation_component_reward(TIMELY_HEAD_WEIGHT, head_increments);
            }

            Ok(deltas)
        })
        .collect::<Result<_>>()?;

    Ok(deltas)
}
