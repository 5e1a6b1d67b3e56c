use core::num::NonZeroU64;

use anyhow::Result;
use helper_functions::{
    accessors::{get_current_epoch, get_next_epoch, get_next_sync_committee, total_active_balance},
    predicates::is_in_inactivity_leak,
};
use itertools::izip;
use log::debug;
use tokio_util::sync::CancellationToken;
use types::{
    altair::{beacon_state::BeaconState as AltairBeaconState, consts::TIMELY_TARGET_FLAG_INDEX},
    config::Config,
    phase0::consts::GENESIS_EPOCH,
    preset::Preset,
    traits::{BeaconState, PostAltairBeaconState},
};

use super::epoch_intermediates::{self, Statistics, ValidatorSummary};
use crate::unphased::{self, cancellation};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "metrics")]
use types::nonstandard::Phase;

pub fn process_epoch<P: Preset>(
    config: &Config,
    state: &mut AltairBeaconState<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.epoch_processing_timer(Phase::Altair));

    debug!("processing Altair epoch {}", get_current_epoch(state));

    let (statistics, summaries) = epoch_intermediates::statistics(state);

    process_justification_and_finalization(state, statistics)?;
    process_inactivity_updates(config, state, summaries.iter().copied(), cancel)?;

    process_rewards_and_penalties(
        config,
        state,
        statistics,
        summaries,
        P::INACTIVITY_PENALTY_QUOTIENT_ALTAIR,
        cancel,
    )?;

    unphased::process_registry_updates(config, state)?;
    unphased::process_slashings(state, P::PROPORTIONAL_SLASHING_MULTIPLIER_ALTAIR, cancel)?;
    unphased::process_eth1_data_reset(state);
    unphased::process_effective_balance_updates(state, |_| P::MAX_EFFECTIVE_BALANCE, cancel)?;
    unphased::process_slashings_reset(state);
    unphased::process_randao_mixes_reset(state);
    unphased::process_historical_roots_update(state)?;
    process_participation_flag_updates(state);
    process_sync_committee_updates(state)
}

pub fn process_justification_and_finalization<P: Preset>(
    state: &mut impl BeaconState<P>,
    statistics: Statistics,
) -> Result<()> {
    if !unphased::should_process_justification_and_finalization(state) {
        return Ok(());
    }

    unphased::weigh_justification_and_finalization(
        state,
        total_active_balance(state)?.get(),
        statistics.previous_epoch_target_participating_balance,
        statistics.current_epoch_target_participating_balance,
    )
}

pub fn process_inactivity_updates<P: Preset>(
    config: &Config,
    state: &mut impl PostAltairBeaconState<P>,
    summaries: impl IntoIterator<Item = ValidatorSummary>,
    cancel: &CancellationToken,
) -> Result<()> {
    // > Skip the genesis epoch as score updates are based on the previous epoch participation
    if get_current_epoch(state) == GENESIS_EPOCH {
        return Ok(());
    }

    let in_inactivity_leak = is_in_inactivity_leak(state);

    for (inactivity_score, summary) in izip!(state.inactivity_scores_mut().iter_mut(), summaries) {
        cancellation::check(cancel)?;

        if !summary.eligible_for_penalties {
            continue;
        }

        let participated_in_target =
            !summary.slashed && summary.has_flag(TIMELY_TARGET_FLAG_INDEX);

        // > Increase the inactivity score of inactive validators
        if participated_in_target {
            *inactivity_score -= (*inactivity_score).min(1);
        } else {
            *inactivity_score += config.inactivity_score_bias.get();
        }

        // > Decrease the inactivity score of all eligible validators during a leak-free epoch
        if !in_inactivity_leak {
            *inactivity_score -= (*inactivity_score).min(config.inactivity_score_recovery_rate);
        }
    }

    Ok(())
}

/// Computes flag and inactivity deltas and applies them.
///
/// Must run after justification and inactivity updates. The deltas depend on the updated
/// finalized checkpoint and inactivity scores.
pub fn process_rewards_and_penalties<P: Preset>(
    config: &Config,
    state: &mut impl PostAltairBeaconState<P>,
    statistics: Statistics,
    summaries: Vec<ValidatorSummary>,
    inactivity_penalty_quotient: NonZeroU64,
    cancel: &CancellationToken,
) -> Result<()> {
    if !unphased::should_process_rewards_and_penalties(state) {
        return Ok(());
    }

    let deltas = epoch_intermediates::epoch_deltas(
        config,
        state,
        statistics,
        summaries,
        inactivity_penalty_quotient,
    )?;

    unphased::process_rewards_and_penalties(state, deltas, cancel)
}

pub fn process_participation_flag_updates<P: Preset>(state: &mut impl PostAltairBeaconState<P>) {
    // > Rotate current/previous epoch participation
    state.rotate_epoch_participation();
}

pub fn process_sync_committee_updates<P: Preset>(
    state: &mut impl PostAltairBeaconState<P>,
) -> Result<()> {
    let next_epoch = get_next_epoch(state);

    if next_epoch % P::EPOCHS_PER_SYNC_COMMITTEE_PERIOD == 0 {
        let committee = get_next_sync_committee(state)?;

        *state.current_sync_committee_mut() =
            core::mem::replace(state.next_sync_committee_mut(), committee);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ssz_types::VariableList;
    use types::{
        altair::primitives::ParticipationFlags,
        phase0::{consts::FAR_FUTURE_EPOCH, containers::Validator},
        preset::Minimal,
    };

    use super::*;

    const TARGET: ParticipationFlags = 0b010;

    fn state_at_epoch(
        epoch: u64,
        participation: Vec<ParticipationFlags>,
        scores: Vec<u64>,
    ) -> AltairBeaconState<Minimal> {
        let count = participation.len();

        let validators = (0..)
            .take(count)
            .map(|index| Validator {
                pubkey: interop::secret_key(index).to_public_key().to_bytes(),
                effective_balance: Minimal::MAX_EFFECTIVE_BALANCE,
                exit_epoch: FAR_FUTURE_EPOCH,
                withdrawable_epoch: FAR_FUTURE_EPOCH,
                ..Validator::default()
            })
            .collect::<Vec<_>>();

        AltairBeaconState {
            slot: epoch * 8 + 7,
            validators: Arc::new(VariableList::from(validators)),
            balances: Arc::new(VariableList::from(vec![Minimal::MAX_EFFECTIVE_BALANCE; count])),
            previous_epoch_participation: Arc::new(VariableList::from(participation)),
            current_epoch_participation: Arc::new(VariableList::from(vec![0; count])),
            inactivity_scores: Arc::new(VariableList::from(scores)),
            ..AltairBeaconState::default()
        }
    }

    #[test]
    fn inactivity_scores_move_toward_zero_outside_leak() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_epoch(2, vec![TARGET, 0, TARGET], vec![5, 5, 0]);
        let (_, summaries) = epoch_intermediates::statistics(&state);

        process_inactivity_updates(&config, &mut state, summaries, &CancellationToken::new())?;

        // Participants lose 1 and the recovery rate. Absentees gain the bias and lose the rate.
        assert_eq!(state.inactivity_scores.get(0).copied(), Some(0));
        assert_eq!(state.inactivity_scores.get(1).copied(), Some(0));
        assert_eq!(state.inactivity_scores.get(2).copied(), Some(0));

        let mut state = state_at_epoch(2, vec![0], vec![100]);
        let (_, summaries) = epoch_intermediates::statistics(&state);

        process_inactivity_updates(&config, &mut state, summaries, &CancellationToken::new())?;

        assert_eq!(
            state.inactivity_scores.get(0).copied(),
            Some(
                100 + config.inactivity_score_bias.get() - config.inactivity_score_recovery_rate
            ),
        );

        Ok(())
    }

    #[test]
    fn inactivity_scores_only_grow_during_leak() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_epoch(10, vec![TARGET, 0], vec![10, 10]);
        let (_, summaries) = epoch_intermediates::statistics(&state);

        assert!(is_in_inactivity_leak(&state));

        process_inactivity_updates(&config, &mut state, summaries, &CancellationToken::new())?;

        assert_eq!(state.inactivity_scores.get(0).copied(), Some(9));
        assert_eq!(
            state.inactivity_scores.get(1).copied(),
            Some(10 + config.inactivity_score_bias.get()),
        );

        Ok(())
    }

    #[test]
    fn inactivity_scores_untouched_at_genesis() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_epoch(0, vec![0], vec![3]);
        let (_, summaries) = epoch_intermediates::statistics(&state);

        process_inactivity_updates(&config, &mut state, summaries, &CancellationToken::new())?;

        assert_eq!(state.inactivity_scores.get(0).copied(), Some(3));

        Ok(())
    }

    #[test]
    fn participation_rotates() {
        let mut state = state_at_epoch(2, vec![TARGET, 0], vec![0, 0]);
        Arc::make_mut(&mut state.current_epoch_participation)[1] = 0b111;

        process_participation_flag_updates(&mut state);

        assert_eq!(state.previous_epoch_participation.to_vec(), [0, 0b111]);
        assert_eq!(state.current_epoch_participation.to_vec(), [0, 0]);
    }

    #[test]
    fn sync_committee_rotates_at_period_boundary() -> Result<()> {
        // The sync committee period is 8 epochs in the minimal preset.
        let mut state = state_at_epoch(7, vec![0; 4], vec![0; 4]);
        let old_next = state.next_sync_committee.clone();

        process_sync_committee_updates(&mut state)?;

        assert!(Arc::ptr_eq(&state.current_sync_committee, &old_next));
        assert!(!Arc::ptr_eq(&state.next_sync_committee, &old_next));

        let mut state = state_at_epoch(6, vec![0; 4], vec![0; 4]);
        let old_next = state.next_sync_committee.clone();

        process_sync_committee_updates(&mut state)?;

        assert!(Arc::ptr_eq(&state.next_sync_committee, &old_next));

        Ok(())
    }
}
